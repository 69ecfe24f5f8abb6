use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{LmcpError, LmcpResult};

/// Server software a template is built on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoreKind {
    Velocity,
    Paper,
    Purpur,
    Fabric,
    Vanilla,
}

impl CoreKind {
    pub fn is_proxy(&self) -> bool {
        matches!(self, CoreKind::Velocity)
    }

    /// Directory that holds this core's dependency jars.
    pub fn dependency_dir(&self) -> &'static str {
        match self {
            CoreKind::Fabric => "mods",
            _ => "plugins",
        }
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreKind::Velocity => write!(f, "velocity"),
            CoreKind::Paper => write!(f, "paper"),
            CoreKind::Purpur => write!(f, "purpur"),
            CoreKind::Fabric => write!(f, "fabric"),
            CoreKind::Vanilla => write!(f, "vanilla"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreSpec {
    pub kind: CoreKind,
    pub version: String,
    /// Upstream build number; lets Paper/Velocity/Purpur omit `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Plugin,
    Mod,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Plugin => write!(f, "plugin"),
            DependencyKind::Mod => write!(f, "mod"),
        }
    }
}

/// A mod or plugin the server needs.
///
/// `source` accepts `https://…`, `http://…`, `file://…` and
/// `maven:<group>:<artifact>:<version>[:classifier][@ext]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `<algo>:<hex>` with algo one of `sha1`, `sha256`, `md5`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Base URL used with `maven:` sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Scalar value of a config overlay entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OverlayValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for OverlayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayValue::Bool(b) => write!(f, "{}", b),
            OverlayValue::Integer(i) => write!(f, "{}", i),
            OverlayValue::Float(x) => write!(f, "{}", x),
            OverlayValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for OverlayValue {
    fn from(value: &str) -> Self {
        OverlayValue::String(value.to_string())
    }
}

impl From<bool> for OverlayValue {
    fn from(value: bool) -> Self {
        OverlayValue::Bool(value)
    }
}

impl From<i64> for OverlayValue {
    fn from(value: i64) -> Self {
        OverlayValue::Integer(value)
    }
}

impl OverlayValue {
    /// Interpret a raw `.properties` value the way the server would.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "true" => OverlayValue::Bool(true),
            "false" => OverlayValue::Bool(false),
            _ => raw
                .parse::<i64>()
                .map(OverlayValue::Integer)
                .unwrap_or_else(|_| OverlayValue::String(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f32>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cpus: None,
        }
    }
}

/// User-authored (or extracted) definition of one server. Read-only input to
/// a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub name: String,
    /// Image key from `container_env.images`. Derived from the core version
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java: Option<String>,
    pub core: CoreSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// File name → key → value. File names are kept as strings so unknown
    /// files can be reported instead of failing deserialization.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, OverlayValue>>,
    #[serde(default)]
    pub resources: ResourceLimits,
}

impl Template {
    pub fn load(path: &Path) -> LmcpResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| LmcpError::io(path, source))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> LmcpResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> LmcpResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> LmcpResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|source| LmcpError::io(path, source))
    }

    /// SHA-256 of the canonical TOML encoding. Stored on the built instance as
    /// provenance so edits to the template can be detected.
    pub fn content_hash(&self) -> LmcpResult<String> {
        let canonical = toml::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPER_TEMPLATE: &str = r#"
name = "survival"
java = "java17"

[core]
kind = "paper"
version = "1.20.4"
build = 496

[[dependencies]]
name = "LuckPerms"
version = "5.4.102"
source = "https://download.luckperms.net/1515/bukkit/loader/LuckPerms-Bukkit-5.4.102.jar"

[config."server.properties"]
motd = "Survival"
max-players = 50
pvp = true

[resources]
memory_mb = 4096
"#;

    #[test]
    fn parse_paper_template() {
        let t = Template::from_toml(PAPER_TEMPLATE).unwrap();
        assert_eq!(t.core.kind, CoreKind::Paper);
        assert_eq!(t.core.build, Some(496));
        assert_eq!(t.dependencies[0].kind, DependencyKind::Plugin);
        let props = &t.config["server.properties"];
        assert_eq!(props["max-players"], OverlayValue::Integer(50));
        assert_eq!(props["pvp"], OverlayValue::Bool(true));
        assert_eq!(t.resources.memory_mb, 4096);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = Template::from_toml(PAPER_TEMPLATE).unwrap();
        let b = Template::from_toml(PAPER_TEMPLATE).unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

        let mut c = b.clone();
        c.core.build = Some(497);
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn raw_property_values_are_typed() {
        assert_eq!(OverlayValue::from_raw("true"), OverlayValue::Bool(true));
        assert_eq!(OverlayValue::from_raw("20"), OverlayValue::Integer(20));
        assert_eq!(
            OverlayValue::from_raw("A Minecraft Server"),
            OverlayValue::String("A Minecraft Server".into())
        );
    }
}
