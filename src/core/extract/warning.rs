use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::template::CoreKind;

/// Something extraction could not turn into template content. Never fatal;
/// the affected item is simply left out of the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// A mod or plugin jar that matched nothing in the registry.
    UnrecognizedArtifact { path: PathBuf, reason: String },
    /// No core could be identified; the template falls back to a guess.
    UnknownCore { assumed: CoreKind, reason: String },
    /// The core was identified but not its version.
    CoreVersionUnknown { kind: CoreKind },
    /// A config key that differs from the default but is not an overlay key.
    UnrecognizedConfigKey { file: String, key: String },
    UnreadableFile { path: PathBuf, message: String },
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionWarning::UnrecognizedArtifact { path, reason } => {
                write!(f, "skipped {}: {}", path.display(), reason)
            }
            ExtractionWarning::UnknownCore { assumed, reason } => {
                write!(f, "server core not identified ({}); assuming {}", reason, assumed)
            }
            ExtractionWarning::CoreVersionUnknown { kind } => {
                write!(f, "{} version could not be determined; set core.version by hand", kind)
            }
            ExtractionWarning::UnrecognizedConfigKey { file, key } => {
                write!(f, "{}: key '{}' is not a recognized overlay key", file, key)
            }
            ExtractionWarning::UnreadableFile { path, message } => {
                write!(f, "cannot read {}: {}", path.display(), message)
            }
        }
    }
}
