use std::fmt;

use serde::Serialize;

use crate::core::error::LmcpError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerFailure {
    pub server: String,
    pub error: String,
}

/// Outcome of an operation applied to several servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<ServerFailure>,
}

/// Result of `build_all`: which servers reached `Built` and why the others
/// did not.
pub type BuildReport = OperationReport;

impl OperationReport {
    pub fn succeed(&mut self, server: &str) {
        self.succeeded.push(server.to_string());
    }

    pub fn fail(&mut self, server: &str, error: &LmcpError) {
        self.failed.push(ServerFailure {
            server: server.to_string(),
            error: error.to_string(),
        });
    }

    pub fn has_failed(&self, server: &str) -> bool {
        self.failed.iter().any(|f| f.server == server)
    }

    pub fn failure(&self, server: &str) -> Option<&ServerFailure> {
        self.failed.iter().find(|f| f.server == server)
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.succeeded.sort();
        self.failed.sort_by(|a, b| a.server.cmp(&b.server));
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded.len(), self.failed.len())?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.server, failure.error)?;
        }
        Ok(())
    }
}
