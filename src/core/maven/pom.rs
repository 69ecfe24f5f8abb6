use quick_xml::de::from_str;
use serde::Deserialize;

use crate::core::error::{LmcpError, LmcpResult};

/// Identity fields of a `pom.xml` embedded under `META-INF/maven/` in a jar.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PomDocument {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<PomParent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PomParent {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PomDocument {
    pub fn parse(xml: &str) -> LmcpResult<Self> {
        let doc: PomDocument = from_str(xml)?;
        Ok(doc)
    }

    /// Version, inherited from `<parent>` when the module omits it.
    pub fn effective_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.version.as_deref()))
    }

    pub fn effective_group(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.group_id.as_deref()))
    }

    /// Human-readable name, falling back to the artifact id.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.artifact_id.as_deref())
    }
}

/// `pom.properties` written by the Maven archiver next to `pom.xml`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PomProperties {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
}

impl PomProperties {
    pub fn parse(raw: &str) -> Self {
        let mut props = Self::default();
        for line in raw.lines().map(str::trim) {
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = Some(value.trim().to_string());
            match key.trim() {
                "groupId" => props.group_id = value,
                "artifactId" => props.artifact_id = value,
                "version" => props.version = value,
                _ => {}
            }
        }
        props
    }
}

impl PomProperties {
    /// `(artifactId, version)` when both are present.
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.artifact_id.as_deref()?, self.version.as_deref()?))
    }
}
