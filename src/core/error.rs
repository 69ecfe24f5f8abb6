use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::instance::LifecycleState;

/// Central error type for the build-and-orchestration engine.
/// Every module returns `Result<T, LmcpError>`.
#[derive(Debug, Error)]
pub enum LmcpError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // ── Domain ──────────────────────────────────────────
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    // ── Documents ───────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Invalid Maven coordinate: {0}")]
    InvalidMavenCoordinate(String),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Cluster ─────────────────────────────────────────
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Invalid lifecycle transition for '{server}': {from} -> {to}")]
    InvalidTransition {
        server: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Operation on '{0}' was cancelled")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LmcpResult<T> = Result<T, LmcpError>;

impl LmcpError {
    /// Errors that invalidate the whole cluster rather than one server's build.
    pub fn is_cluster_fatal(&self) -> bool {
        matches!(self, LmcpError::Allocation(AllocationError::CorruptTable(_)))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LmcpError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for LmcpError {
    fn from(source: std::io::Error) -> Self {
        LmcpError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Validation ──────────────────────────────────────────

/// One problem found while validating a template or cluster definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending field (`dependencies[2].version`).
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in one pass; never just the first.
#[derive(Debug, Clone, Error)]
#[error("validation failed for '{subject}' ({} problem(s)): {}", .violations.len(), join_violations(.violations))]
pub struct ValidationError {
    /// Server name, or the config file for cluster-level problems.
    pub subject: String,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(subject: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self {
            subject: subject.into(),
            violations,
        }
    }

    /// `Ok(())` when nothing was collected.
    pub fn check(subject: impl Into<String>, violations: Vec<Violation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self::new(subject, violations))
        }
    }

    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Artifact fetching ───────────────────────────────────

/// Fetch failures. `Clone` so that one in-flight download can hand the same
/// outcome to every build waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network failure fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("download failed for {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("checksum mismatch for {dependency}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        dependency: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported artifact source: {url}")]
    UnsupportedSource { url: String },

    #[error("artifact cache IO failure at {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("fetch of {0} was cancelled")]
    Cancelled(String),
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

// ── Network allocation ──────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("port range {start}-{end} exhausted while allocating for '{server}'")]
    PortRangeExhausted { server: String, start: u16, end: u16 },

    #[error("port {port} requested by '{server}' is already held by '{holder}'")]
    PortConflict {
        server: String,
        port: u16,
        holder: String,
    },

    #[error("server '{0}' is not part of the cluster")]
    UnknownServer(String),

    #[error("network allocation table is corrupt: {0}")]
    CorruptTable(String),
}

// ── Container runtime ───────────────────────────────────

/// Failure reported by the container runtime; `message` is its output verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("container runtime failed to {operation} '{service}': {message}")]
pub struct RuntimeError {
    pub service: String,
    pub operation: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_violation() {
        let err = ValidationError::new(
            "survival",
            vec![
                Violation::new("core.version", "must not be empty"),
                Violation::new("dependencies[0].source", "missing"),
            ],
        );
        let text = err.to_string();
        assert!(text.contains("2 problem(s)"));
        assert!(text.contains("core.version: must not be empty"));
        assert!(text.contains("dependencies[0].source: missing"));
    }

    #[test]
    fn only_corrupt_table_is_cluster_fatal() {
        let corrupt = LmcpError::from(AllocationError::CorruptTable("dup port".into()));
        let exhausted = LmcpError::from(AllocationError::PortRangeExhausted {
            server: "a".into(),
            start: 1,
            end: 2,
        });
        assert!(corrupt.is_cluster_fatal());
        assert!(!exhausted.is_cluster_fatal());
    }
}
