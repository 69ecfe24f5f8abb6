use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use super::model::{CoreKind, DependencyKind, OverlayValue, Template};
use super::overlay::OverlayFile;
use super::plan::{ArtifactLocator, BuildPlan, NetworkRequirements, PlannedArtifact};
use super::version::{check_version, java_key, required_java_for_minecraft_version};
use crate::core::artifact::Checksum;
use crate::core::cluster::{ClusterDefinition, ServerRole};
use crate::core::config::is_valid_server_name;
use crate::core::error::{ValidationError, Violation};

/// File name of the server core inside the config subtree.
pub const CORE_JAR: &str = "server.jar";

/// Expands a [`Template`] into a [`BuildPlan`] against an explicit cluster.
///
/// Pure and deterministic: no IO, no clock, no randomness. Every problem is
/// collected before failing so the user can fix them in one pass.
pub struct TemplateResolver<'a> {
    cluster: &'a ClusterDefinition,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(cluster: &'a ClusterDefinition) -> Self {
        Self { cluster }
    }

    pub fn resolve(&self, template: &Template, server: &str) -> Result<BuildPlan, ValidationError> {
        let mut violations = Vec::new();

        let role = self.check_membership(template, server, &mut violations);
        let core = resolve_core(template, &mut violations);
        let artifacts = resolve_dependencies(template, &mut violations);
        let overlays = resolve_overlays(template, &mut violations);
        let (java, image) = self.resolve_image(template, &mut violations);

        if template.resources.memory_mb < 256 {
            violations.push(Violation::new(
                "resources.memory_mb",
                format!("{} MB is below the 256 MB minimum", template.resources.memory_mb),
            ));
        }
        if let Some(cpus) = template.resources.cpus {
            if cpus.is_nan() || cpus <= 0.0 {
                violations.push(Violation::new("resources.cpus", "must be positive"));
            }
        }

        let template_hash = match template.content_hash() {
            Ok(hash) => Some(hash),
            Err(e) => {
                violations.push(Violation::new("template", format!("cannot be encoded: {}", e)));
                None
            }
        };

        ValidationError::check(server, violations)?;

        // Every branch above pushed a violation when it returned None.
        let (Some(role), Some(core), Some(template_hash)) = (role, core, template_hash) else {
            return Err(ValidationError::new(
                server,
                vec![Violation::new("template", "could not be resolved")],
            ));
        };

        let fixed_port = self.cluster.member(server).and_then(|m| m.fixed_port);
        let plan = BuildPlan {
            server: server.to_string(),
            role,
            template_hash,
            core_kind: template.core.kind,
            core_version: template.core.version.clone(),
            core,
            artifacts,
            overlays,
            network: NetworkRequirements {
                ports: 1,
                needs_forwarding_secret: role == ServerRole::Backend,
                preferred_port: fixed_port,
            },
            java,
            image,
            resources: template.resources.clone(),
        };
        debug!(
            "Resolved build plan for '{}': {} dependencies, {} overlay files",
            server,
            plan.artifacts.len(),
            plan.overlays.len()
        );
        Ok(plan)
    }

    fn check_membership(
        &self,
        template: &Template,
        server: &str,
        violations: &mut Vec<Violation>,
    ) -> Option<ServerRole> {
        if template.name.trim().is_empty() {
            violations.push(Violation::new("name", "must not be empty"));
        }
        if !is_valid_server_name(server) {
            violations.push(Violation::new(
                "server",
                format!(
                    "'{}' must be lowercase letters, digits, '-' or '_' (max 32)",
                    server
                ),
            ));
        }

        let Some(member) = self.cluster.member(server) else {
            violations.push(Violation::new(
                "server",
                format!("'{}' is not defined in the cluster", server),
            ));
            return None;
        };

        let kind = template.core.kind;
        match member.role {
            ServerRole::Proxy if !kind.is_proxy() => violations.push(Violation::new(
                "core.kind",
                format!("'{}' is the cluster proxy but the template builds {}", server, kind),
            )),
            ServerRole::Backend if kind.is_proxy() => violations.push(Violation::new(
                "core.kind",
                format!(
                    "'{}' is a backend but {} is a proxy; the cluster proxy is '{}'",
                    server,
                    kind,
                    self.cluster.proxy_name()
                ),
            )),
            _ => {}
        }
        Some(member.role)
    }

    fn resolve_image(
        &self,
        template: &Template,
        violations: &mut Vec<Violation>,
    ) -> (String, String) {
        let java = match &template.java {
            Some(key) => key.clone(),
            None if template.core.kind == CoreKind::Velocity => java_key(17),
            None => java_key(required_java_for_minecraft_version(&template.core.version)),
        };
        let image = match self.cluster.image_for(&java) {
            Some(image) => image.to_string(),
            None => {
                let known: Vec<&str> = self.cluster.image_keys().map(String::as_str).collect();
                violations.push(Violation::new(
                    "java",
                    format!(
                        "no image configured for '{}' in container_env.images (known: {})",
                        java,
                        known.join(", ")
                    ),
                ));
                String::new()
            }
        };
        (java, image)
    }
}

fn parse_checksum(
    field: String,
    raw: Option<&str>,
    violations: &mut Vec<Violation>,
) -> Option<Checksum> {
    let raw = raw?;
    match raw.parse::<Checksum>() {
        Ok(sum) => Some(sum),
        Err(message) => {
            violations.push(Violation::new(field, message));
            None
        }
    }
}

fn has_build_api(kind: CoreKind) -> bool {
    matches!(kind, CoreKind::Paper | CoreKind::Velocity | CoreKind::Purpur)
}

/// Download URL for cores published through a known build API.
fn default_core_url(kind: CoreKind, version: &str, build: u32) -> Option<String> {
    match kind {
        CoreKind::Paper | CoreKind::Velocity => {
            let project = kind.to_string();
            Some(format!(
                "https://api.papermc.io/v2/projects/{p}/versions/{v}/builds/{b}/downloads/{p}-{v}-{b}.jar",
                p = project,
                v = version,
                b = build
            ))
        }
        CoreKind::Purpur => Some(format!(
            "https://api.purpurmc.org/v2/purpur/{}/{}/download",
            version, build
        )),
        CoreKind::Fabric | CoreKind::Vanilla => None,
    }
}

fn resolve_core(template: &Template, violations: &mut Vec<Violation>) -> Option<PlannedArtifact> {
    let core = &template.core;
    let mut ok = true;

    if let Err(problem) = check_version(&core.version) {
        violations.push(Violation::new("core.version", problem.to_string()));
        ok = false;
    }

    let locator = match (&core.source, core.build) {
        (Some(source), _) => match ArtifactLocator::parse(source, None) {
            Ok(locator) => Some(locator),
            Err(message) => {
                violations.push(Violation::new("core.source", message));
                None
            }
        },
        (None, Some(build)) => match default_core_url(core.kind, &core.version, build) {
            Some(url) => Some(ArtifactLocator::Url { url }),
            None => {
                violations.push(Violation::new(
                    "core.source",
                    format!("{} cores must declare an explicit source", core.kind),
                ));
                None
            }
        },
        (None, None) => {
            let message = if has_build_api(core.kind) {
                "missing; declare core.build or core.source"
            } else {
                "missing; this core kind must declare an explicit source"
            };
            violations.push(Violation::new("core.source", message));
            None
        }
    };

    let checksum = parse_checksum(
        "core.checksum".into(),
        core.checksum.as_deref(),
        violations,
    );
    if core.checksum.is_some() && checksum.is_none() {
        ok = false;
    }

    let locator = locator?;
    if !ok {
        return None;
    }
    Some(PlannedArtifact::new(
        &core.kind.to_string(),
        &core.version,
        locator,
        checksum,
        PathBuf::from(CORE_JAR),
    ))
}

fn resolve_dependencies(template: &Template, violations: &mut Vec<Violation>) -> Vec<PlannedArtifact> {
    let kind = template.core.kind;
    let mut names = BTreeSet::new();
    let mut placements = BTreeSet::new();
    let mut artifacts = Vec::new();

    for (index, dep) in template.dependencies.iter().enumerate() {
        let field = |leaf: &str| format!("dependencies[{}].{}", index, leaf);
        let before = violations.len();

        if dep.name.trim().is_empty() {
            violations.push(Violation::new(field("name"), "must not be empty"));
        } else if !is_plain_name(&dep.name) {
            violations.push(Violation::new(
                field("name"),
                format!(
                    "'{}' may only contain letters, digits, '.', '_', '+' and '-', \
                     starting with a letter or digit",
                    dep.name
                ),
            ));
        } else if !names.insert(dep.name.to_ascii_lowercase()) {
            violations.push(Violation::new(
                field("name"),
                format!("'{}' is declared more than once", dep.name),
            ));
        }

        if let Err(problem) = check_version(&dep.version) {
            violations.push(Violation::new(field("version"), problem.to_string()));
        }

        match (kind, dep.kind) {
            (CoreKind::Vanilla, _) => violations.push(Violation::new(
                field("kind"),
                "vanilla servers cannot load plugins or mods",
            )),
            (CoreKind::Fabric, DependencyKind::Plugin) => violations.push(Violation::new(
                field("kind"),
                "fabric servers load mods, not plugins",
            )),
            (CoreKind::Velocity | CoreKind::Paper | CoreKind::Purpur, DependencyKind::Mod) => {
                violations.push(Violation::new(
                    field("kind"),
                    format!("{} servers load plugins, not mods", kind),
                ))
            }
            _ => {}
        }

        let locator = match &dep.source {
            Some(source) => match ArtifactLocator::parse(source, dep.repository.as_deref()) {
                Ok(locator) => Some(locator),
                Err(message) => {
                    violations.push(Violation::new(field("source"), message));
                    None
                }
            },
            None => {
                violations.push(Violation::new(
                    field("source"),
                    "missing; a URL or maven coordinate is required",
                ));
                None
            }
        };
        let checksum = parse_checksum(field("checksum"), dep.checksum.as_deref(), violations);

        let placement = PathBuf::from(kind.dependency_dir())
            .join(format!("{}-{}.jar", dep.name, dep.version));
        if !placements.insert(placement.to_string_lossy().to_ascii_lowercase()) {
            violations.push(Violation::new(
                field("name"),
                format!("placement {:?} collides with another dependency", placement),
            ));
        }

        if violations.len() == before {
            if let Some(locator) = locator {
                artifacts.push(PlannedArtifact::new(
                    &dep.name,
                    &dep.version,
                    locator,
                    checksum,
                    placement,
                ));
            }
        }
    }

    artifacts.sort_by(|a, b| a.placement.cmp(&b.placement));
    artifacts
}

/// Dependency names end up in file names under `plugins/` or `mods/`.
fn is_plain_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

fn resolve_overlays(
    template: &Template,
    violations: &mut Vec<Violation>,
) -> BTreeMap<OverlayFile, BTreeMap<String, OverlayValue>> {
    let kind = template.core.kind;
    let mut overlays = BTreeMap::new();

    for (file_name, entries) in &template.config {
        let Some(file) = OverlayFile::parse(file_name) else {
            let known: Vec<&str> = OverlayFile::ALL.iter().map(|f| f.file_name()).collect();
            violations.push(Violation::new(
                format!("config[{}]", file_name),
                format!("unknown config file (known: {})", known.join(", ")),
            ));
            continue;
        };
        if !file.applies_to(kind) {
            violations.push(Violation::new(
                format!("config[{}]", file_name),
                format!("{} servers do not read this file", kind),
            ));
            continue;
        }

        let mut accepted = BTreeMap::new();
        for (key, value) in entries {
            let field = format!("config[{}].{}", file_name, key);
            if file.is_managed(key) {
                violations.push(Violation::new(field, "managed by the network allocator"));
            } else if !file.recognizes(key) {
                violations.push(Violation::new(field, "unrecognized key"));
            } else {
                accepted.insert(key.clone(), value.clone());
            }
        }
        overlays.insert(file, accepted);
    }
    overlays
}
