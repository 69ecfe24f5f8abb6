use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::detect::{
    fabric_launcher_version, identify_by_markers, identify_core_jar, inspect_jar,
    read_version_history, CoreDetection,
};
use super::registry::ArtifactRegistry;
use super::warning::ExtractionWarning;
use crate::core::artifact::Checksum;
use crate::core::config::is_valid_server_name;
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::instance::ServerInstance;
use crate::core::synth::defaults;
use crate::core::synth::format::{flatten_toml, parse_properties};
use crate::core::synth::writer::MANIFEST_FILE;
use crate::core::template::version::check_version;
use crate::core::template::{
    CoreKind, CoreSpec, Dependency, DependencyKind, OverlayFile, OverlayValue, ResourceLimits,
    Template, CORE_JAR,
};

/// Best-effort template plus everything that could not be carried over.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub template: Template,
    pub warnings: Vec<ExtractionWarning>,
}

/// Infers a template from an existing server directory.
pub struct Extractor<'a> {
    registry: &'a ArtifactRegistry,
}

impl<'a> Extractor<'a> {
    pub fn new(registry: &'a ArtifactRegistry) -> Self {
        Self { registry }
    }

    /// Only a missing or unreadable `dir` is an error; anything inside it
    /// that cannot be identified becomes a warning.
    #[instrument(skip(self))]
    pub fn extract(&self, dir: &Path) -> LmcpResult<Extraction> {
        if !dir.is_dir() {
            return Err(LmcpError::Other(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let root = content_root(dir);
        debug!("Extracting from {:?}", root);
        let mut warnings = Vec::new();

        let name = server_name(dir);
        let core = self.detect_core(&root, &mut warnings);
        let dependencies = self.dependencies(&root, core.kind, &mut warnings);
        let config = overlays(&root, core.kind, &mut warnings);

        let template = Template {
            name,
            java: None,
            core,
            dependencies,
            config,
            resources: ResourceLimits::default(),
        };
        info!(
            "Extracted template '{}' ({} {}) with {} warning(s)",
            template.name,
            template.core.kind,
            template.core.version,
            warnings.len()
        );
        Ok(Extraction { template, warnings })
    }

    fn detect_core(&self, root: &Path, warnings: &mut Vec<ExtractionWarning>) -> CoreSpec {
        let mut core_jar: Option<PathBuf> = None;
        let mut detection: Option<CoreDetection> = None;

        for jar in root_jars(root) {
            match inspect_jar(&jar) {
                Ok(info) => {
                    if let Some(found) = identify_core_jar(&info) {
                        debug!("Core {} identified by {}", found.kind, found.evidence);
                        core_jar = Some(jar);
                        detection = Some(found);
                        break;
                    }
                }
                Err(e) => warnings.push(ExtractionWarning::UnreadableFile {
                    path: jar.clone(),
                    message: e.to_string(),
                }),
            }
        }

        let mut detection = match detection.or_else(|| identify_by_markers(root)) {
            Some(found) => found,
            None => {
                let assumed = CoreKind::Vanilla;
                warnings.push(ExtractionWarning::UnknownCore {
                    assumed,
                    reason: "no server jar or marker file recognized".into(),
                });
                CoreDetection {
                    kind: assumed,
                    version: None,
                    build: None,
                    evidence: "fallback".into(),
                }
            }
        };

        if let Some((kind, version, build)) = read_version_history(root) {
            if kind == detection.kind || detection.evidence.starts_with("marker") {
                detection.kind = kind;
                detection.version = detection.version.or(Some(version));
                detection.build = detection.build.or(build);
            }
        }
        if detection.kind == CoreKind::Fabric && detection.version.is_none() {
            detection.version = root_jars(root)
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .find_map(fabric_launcher_version);
        }

        let version = match detection.version.filter(|v| check_version(v).is_ok()) {
            Some(version) => version,
            None => {
                warnings.push(ExtractionWarning::CoreVersionUnknown {
                    kind: detection.kind,
                });
                String::new()
            }
        };

        // Build-API cores rebuild from upstream; everything else keeps
        // pointing at the jar found here.
        let upstream = detection.build.is_some()
            && matches!(
                detection.kind,
                CoreKind::Velocity | CoreKind::Paper | CoreKind::Purpur
            );
        let (source, checksum) = match (&core_jar, upstream) {
            (Some(jar), false) => local_source(jar, warnings),
            _ => (None, None),
        };

        CoreSpec {
            kind: detection.kind,
            version,
            build: detection.build,
            source,
            checksum,
        }
    }

    fn dependencies(
        &self,
        root: &Path,
        kind: CoreKind,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> Vec<Dependency> {
        let mut dependencies = Vec::new();
        for (dir, dep_kind) in [("plugins", DependencyKind::Plugin), ("mods", DependencyKind::Mod)] {
            let jars = jars_in(&root.join(dir));
            if jars.is_empty() {
                continue;
            }
            if kind.dependency_dir() != dir {
                for jar in jars {
                    warnings.push(ExtractionWarning::UnrecognizedArtifact {
                        path: jar,
                        reason: format!("a {} server does not load {}", kind, dir),
                    });
                }
                continue;
            }
            for jar in jars {
                match self.identify(&jar, dep_kind) {
                    Ok(dependency) => dependencies.push(dependency),
                    Err(warning) => {
                        warn!("{}", warning);
                        warnings.push(warning);
                    }
                }
            }
        }
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));
        dependencies
    }

    fn identify(&self, jar: &Path, kind: DependencyKind) -> Result<Dependency, ExtractionWarning> {
        let bytes = std::fs::read(jar).map_err(|e| ExtractionWarning::UnreadableFile {
            path: jar.to_path_buf(),
            message: e.to_string(),
        })?;
        let checksum = Checksum::sha256(&bytes);
        let file_name = jar
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let found = self.registry.lookup(file_name, &checksum.hex).ok_or_else(|| {
            ExtractionWarning::UnrecognizedArtifact {
                path: jar.to_path_buf(),
                reason: "not in the artifact registry or cache".into(),
            }
        })?;

        let version = found
            .version
            .or_else(|| {
                inspect_jar(jar)
                    .ok()
                    .and_then(|info| info.declared_version().map(str::to_string))
            })
            .filter(|v| check_version(v).is_ok())
            .ok_or_else(|| ExtractionWarning::UnrecognizedArtifact {
                path: jar.to_path_buf(),
                reason: format!("matched '{}' but its version could not be determined", found.name),
            })?;

        let source = found.source.unwrap_or_else(|| file_url(jar));
        Ok(Dependency {
            name: found.name,
            version,
            kind,
            source: Some(source),
            checksum: Some(checksum.to_string()),
            repository: None,
        })
    }
}

/// A directory built by lmcp keeps its files under `config/`.
fn content_root(dir: &Path) -> PathBuf {
    let config = dir.join("config");
    if config.join(MANIFEST_FILE).is_file() {
        config
    } else {
        dir.to_path_buf()
    }
}

/// `instance.json` name if present, else the directory name made valid.
fn server_name(dir: &Path) -> String {
    if let Ok(raw) = std::fs::read_to_string(dir.join("instance.json")) {
        if let Ok(instance) = serde_json::from_str::<ServerInstance>(&raw) {
            return instance.name;
        }
    }
    let raw = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("server")
        .to_lowercase();
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(['-', '_']).chars().take(32).collect::<String>();
    if is_valid_server_name(&cleaned) {
        cleaned
    } else {
        "server".into()
    }
}

fn jars_in(dir: &Path) -> Vec<PathBuf> {
    let mut jars: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("jar")))
            .collect(),
        Err(_) => Vec::new(),
    };
    jars.sort();
    jars
}

/// Jars at the top level, `server.jar` first.
fn root_jars(root: &Path) -> Vec<PathBuf> {
    let mut jars = jars_in(root);
    jars.sort_by_key(|p| p.file_name().map(|n| n != CORE_JAR).unwrap_or(true));
    jars
}

fn file_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

fn local_source(
    jar: &Path,
    warnings: &mut Vec<ExtractionWarning>,
) -> (Option<String>, Option<String>) {
    match std::fs::read(jar) {
        Ok(bytes) => (
            Some(file_url(jar)),
            Some(Checksum::sha256(&bytes).to_string()),
        ),
        Err(e) => {
            warnings.push(ExtractionWarning::UnreadableFile {
                path: jar.to_path_buf(),
                message: e.to_string(),
            });
            (None, None)
        }
    }
}

/// Overlay entries as the diff between the files on disk and the core's
/// defaults. Network-managed keys are regenerated on build and skipped.
fn overlays(
    root: &Path,
    kind: CoreKind,
    warnings: &mut Vec<ExtractionWarning>,
) -> BTreeMap<String, BTreeMap<String, OverlayValue>> {
    let mut config = BTreeMap::new();
    for file in [OverlayFile::ServerProperties, OverlayFile::VelocityToml] {
        if !file.applies_to(kind) {
            continue;
        }
        let path = root.join(file.relative_path());
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warnings.push(ExtractionWarning::UnreadableFile {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let on_disk: BTreeMap<String, OverlayValue> = match file {
            OverlayFile::ServerProperties => parse_properties(&raw)
                .into_iter()
                .map(|(k, v)| (k, OverlayValue::from_raw(&v)))
                .collect(),
            _ => match flatten_toml(&raw) {
                Ok(flat) => flat,
                Err(e) => {
                    warnings.push(ExtractionWarning::UnreadableFile {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            },
        };

        let defaults = defaults::defaults_for(file, kind);
        let mut overlay = BTreeMap::new();
        for (key, value) in on_disk {
            if file.is_managed(&key) {
                continue;
            }
            let is_default = defaults
                .get(&key)
                .is_some_and(|d| d == &value || d.to_string() == value.to_string());
            if is_default {
                continue;
            }
            if file.recognizes(&key) {
                overlay.insert(key, value);
            } else {
                warnings.push(ExtractionWarning::UnrecognizedConfigKey {
                    file: file.file_name().to_string(),
                    key,
                });
            }
        }
        if !overlay.is_empty() {
            config.insert(file.file_name().to_string(), overlay);
        }
    }
    config
}
