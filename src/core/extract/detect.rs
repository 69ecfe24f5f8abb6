// ─── Core and jar detection ───
// Reads just enough of a jar (manifest, version.json, embedded Maven
// metadata, plugin descriptors) to tell what it is.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use zip::ZipArchive;

use crate::core::error::{LmcpError, LmcpResult};
use crate::core::maven::{PomDocument, PomProperties};
use crate::core::template::CoreKind;

/// What a jar says about itself.
#[derive(Debug, Default, Clone)]
pub struct JarInfo {
    pub manifest: BTreeMap<String, String>,
    /// `id` from a Mojang `version.json` bundled in server jars.
    pub minecraft_version: Option<String>,
    pub pom: Option<PomProperties>,
    pub pom_name: Option<String>,
    /// From `plugin.yml`, `paper-plugin.yml`, `velocity-plugin.json` or
    /// `fabric.mod.json`.
    pub descriptor_name: Option<String>,
    pub descriptor_version: Option<String>,
}

impl JarInfo {
    pub fn main_class(&self) -> Option<&str> {
        self.manifest.get("Main-Class").map(String::as_str)
    }

    /// Version from the descriptor, then embedded Maven metadata.
    pub fn declared_version(&self) -> Option<&str> {
        self.descriptor_version
            .as_deref()
            .or_else(|| self.pom.as_ref().and_then(|p| p.version.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
struct VersionJson {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct YamlDescriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
}

fn scalar_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scalar_yaml(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse `META-INF/MANIFEST.MF`, joining 72-column continuation lines.
pub fn parse_manifest(raw: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut current: Option<(String, String)> = None;
    for line in raw.lines() {
        if let Some(continued) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(continued);
            }
            continue;
        }
        if let Some((key, value)) = current.take() {
            entries.insert(key, value);
        }
        if let Some((key, value)) = line.split_once(':') {
            current = Some((key.trim().to_string(), value.trim().to_string()));
        }
    }
    if let Some((key, value)) = current {
        entries.insert(key, value);
    }
    entries
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    Some(raw)
}

/// Open `path` as a zip and collect its self-description. Fails only when
/// the file cannot be opened or is not a zip.
pub fn inspect_jar(path: &Path) -> LmcpResult<JarInfo> {
    let file = File::open(path).map_err(|source| LmcpError::io(path, source))?;
    let mut archive = ZipArchive::new(file)?;
    let mut info = JarInfo::default();

    if let Some(raw) = read_entry(&mut archive, "META-INF/MANIFEST.MF") {
        info.manifest = parse_manifest(&raw);
    }

    if let Some(raw) = read_entry(&mut archive, "version.json") {
        if let Ok(version) = serde_json::from_str::<VersionJson>(&raw) {
            info.minecraft_version = version.id.or(version.name);
        }
    }

    let maven_entries: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("META-INF/maven/"))
        .map(str::to_string)
        .collect();
    for name in &maven_entries {
        if name.ends_with("/pom.properties") && info.pom.is_none() {
            info.pom = read_entry(&mut archive, name).map(|raw| PomProperties::parse(&raw));
        } else if name.ends_with("/pom.xml") && info.pom_name.is_none() {
            if let Some(raw) = read_entry(&mut archive, name) {
                match PomDocument::parse(&raw) {
                    Ok(pom) => info.pom_name = pom.display_name().map(str::to_string),
                    Err(e) => debug!("Unreadable pom.xml in {:?}: {}", path, e),
                }
            }
        }
    }

    for json_descriptor in ["velocity-plugin.json", "fabric.mod.json"] {
        if let Some(raw) = read_entry(&mut archive, json_descriptor) {
            if let Ok(d) = serde_json::from_str::<Descriptor>(&raw) {
                info.descriptor_name = d.name.or(d.id);
                info.descriptor_version = d.version.as_ref().and_then(scalar_json);
            }
        }
    }
    for yaml_descriptor in ["plugin.yml", "paper-plugin.yml"] {
        if info.descriptor_name.is_some() {
            break;
        }
        if let Some(raw) = read_entry(&mut archive, yaml_descriptor) {
            if let Ok(d) = serde_yaml::from_str::<YamlDescriptor>(&raw) {
                info.descriptor_name = d.name;
                info.descriptor_version = d.version.as_ref().and_then(scalar_yaml);
            }
        }
    }

    Ok(info)
}

/// An identified server core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDetection {
    pub kind: CoreKind,
    pub version: Option<String>,
    pub build: Option<u32>,
    /// What gave it away, for logs.
    pub evidence: String,
}

/// Identify a core from its jar's manifest and metadata.
pub fn identify_core_jar(info: &JarInfo) -> Option<CoreDetection> {
    let main = info.main_class().unwrap_or_default();
    let title = info
        .manifest
        .get("Implementation-Title")
        .map(String::as_str)
        .unwrap_or_default();
    let vendor = info
        .manifest
        .get("Implementation-Vendor")
        .map(String::as_str)
        .unwrap_or_default();
    let artifact = info
        .pom
        .as_ref()
        .and_then(|p| p.artifact_id.as_deref())
        .unwrap_or_default();
    let haystack = format!("{} {} {} {}", main, title, vendor, artifact).to_lowercase();

    let kind = if haystack.contains("velocitypowered") || haystack.contains("velocity-proxy") {
        CoreKind::Velocity
    } else if haystack.contains("purpur") {
        CoreKind::Purpur
    } else if haystack.contains("paperclip") || haystack.contains("papermc") || title == "Paper" {
        CoreKind::Paper
    } else if haystack.contains("fabricmc") {
        CoreKind::Fabric
    } else if main.starts_with("net.minecraft.") {
        CoreKind::Vanilla
    } else {
        return None;
    };

    let implementation = info.manifest.get("Implementation-Version");
    let (version, build) = match kind {
        CoreKind::Velocity => {
            let raw = implementation
                .map(String::as_str)
                .or_else(|| info.pom.as_ref().and_then(|p| p.version.as_deref()));
            (
                raw.and_then(|r| r.split_whitespace().next())
                    .map(str::to_string),
                raw.and_then(build_number),
            )
        }
        _ => (
            info.minecraft_version.clone(),
            implementation.and_then(|r| build_number(r)),
        ),
    };

    Some(CoreDetection {
        kind,
        version,
        build,
        evidence: format!("manifest Main-Class {}", if main.is_empty() { "?" } else { main }),
    })
}

/// `3.3.0-SNAPSHOT (git-8ee1cd96-b436)` → 436, `git-Paper-496` → 496.
fn build_number(raw: &str) -> Option<u32> {
    let tail = raw
        .rsplit(|c: char| !c.is_ascii_alphanumeric())
        .find(|part| !part.is_empty())?;
    let digits = tail.strip_prefix('b').unwrap_or(tail);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionHistory {
    current_version: Option<String>,
}

/// Paper and Purpur record `git-Paper-496 (MC: 1.20.4)` in
/// `version_history.json`.
pub fn read_version_history(dir: &Path) -> Option<(CoreKind, String, Option<u32>)> {
    let raw = std::fs::read_to_string(dir.join("version_history.json")).ok()?;
    let history: VersionHistory = serde_json::from_str(&raw).ok()?;
    let current = history.current_version?;

    let kind = if current.contains("Purpur") {
        CoreKind::Purpur
    } else if current.contains("Paper") {
        CoreKind::Paper
    } else {
        return None;
    };
    let minecraft = current
        .split("(MC:")
        .nth(1)?
        .trim()
        .trim_end_matches(')')
        .trim()
        .to_string();
    let build = current.split_whitespace().next().and_then(build_number);
    Some((kind, minecraft, build))
}

/// `fabric-server-mc.1.20.4-loader.0.15.11-launcher.1.0.1.jar` → `1.20.4`.
pub fn fabric_launcher_version(file_name: &str) -> Option<String> {
    let rest = file_name.split("-mc.").nth(1)?;
    let version = rest.split("-loader").next()?;
    (!version.is_empty()).then(|| version.to_string())
}

/// Guess the core from well-known files when no jar identified it.
pub fn identify_by_markers(dir: &Path) -> Option<CoreDetection> {
    let marker = |kind: CoreKind, file: &str| {
        dir.join(file).exists().then(|| CoreDetection {
            kind,
            version: None,
            build: None,
            evidence: format!("marker file {}", file),
        })
    };
    marker(CoreKind::Velocity, "velocity.toml")
        .or_else(|| marker(CoreKind::Purpur, "purpur.yml"))
        .or_else(|| marker(CoreKind::Paper, "config/paper-global.yml"))
        .or_else(|| marker(CoreKind::Paper, "paper.yml"))
        .or_else(|| marker(CoreKind::Fabric, ".fabric"))
        .or_else(|| marker(CoreKind::Fabric, "fabric-server-launcher.properties"))
        .or_else(|| marker(CoreKind::Vanilla, "server.properties"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn jar(dir: &Path, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for (entry, content) in files {
            writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn manifest_continuation_lines_are_joined() {
        let raw = "Manifest-Version: 1.0\r\nImplementation-Version: 3.3.0-SNAPSHOT (git-8ee1\r\n cd96-b436)\r\n";
        let manifest = parse_manifest(raw);
        assert_eq!(
            manifest["Implementation-Version"],
            "3.3.0-SNAPSHOT (git-8ee1cd96-b436)"
        );
    }

    #[test]
    fn velocity_jar_is_identified_with_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = jar(
            dir.path(),
            "server.jar",
            &[(
                "META-INF/MANIFEST.MF",
                "Main-Class: com.velocitypowered.proxy.Velocity\nImplementation-Title: Velocity\nImplementation-Version: 3.3.0-SNAPSHOT (git-8ee1cd96-b436)\n",
            )],
        );
        let detection = identify_core_jar(&inspect_jar(&path).unwrap()).unwrap();
        assert_eq!(detection.kind, CoreKind::Velocity);
        assert_eq!(detection.version.as_deref(), Some("3.3.0-SNAPSHOT"));
        assert_eq!(detection.build, Some(436));
    }

    #[test]
    fn vanilla_version_comes_from_version_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = jar(
            dir.path(),
            "server.jar",
            &[
                ("META-INF/MANIFEST.MF", "Main-Class: net.minecraft.bundler.Main\n"),
                ("version.json", r#"{"id": "1.20.4", "name": "1.20.4", "java_version": 17}"#),
            ],
        );
        let detection = identify_core_jar(&inspect_jar(&path).unwrap()).unwrap();
        assert_eq!(detection.kind, CoreKind::Vanilla);
        assert_eq!(detection.version.as_deref(), Some("1.20.4"));
    }

    #[test]
    fn plugin_descriptor_and_pom_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = jar(
            dir.path(),
            "spark.jar",
            &[
                ("plugin.yml", "name: spark\nversion: 1.10.73\nmain: me.lucko.spark.Plugin\n"),
                (
                    "META-INF/maven/me.lucko/spark/pom.properties",
                    "groupId=me.lucko\nartifactId=spark\nversion=1.10.73\n",
                ),
            ],
        );
        let info = inspect_jar(&path).unwrap();
        assert_eq!(info.descriptor_name.as_deref(), Some("spark"));
        assert_eq!(info.declared_version(), Some("1.10.73"));
        assert_eq!(info.pom.unwrap().identity(), Some(("spark", "1.10.73")));
        assert!(identify_core_jar(&inspect_jar(&path).unwrap()).is_none());
    }

    #[test]
    fn paper_version_history_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("version_history.json"),
            r#"{"currentVersion": "git-Paper-496 (MC: 1.20.4)"}"#,
        )
        .unwrap();
        assert_eq!(
            read_version_history(dir.path()),
            Some((CoreKind::Paper, "1.20.4".to_string(), Some(496)))
        );
    }

    #[test]
    fn fabric_launcher_name_carries_minecraft_version() {
        assert_eq!(
            fabric_launcher_version("fabric-server-mc.1.20.4-loader.0.15.11-launcher.1.0.1.jar"),
            Some("1.20.4".into())
        );
        assert_eq!(fabric_launcher_version("server.jar"), None);
    }
}
