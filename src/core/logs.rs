// ─── Per-server log files ───
// `<lmcp_dir>/logs/<server>.log`, opened in append mode only.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

use crate::core::error::{LmcpError, LmcpResult};

#[derive(Debug, Clone)]
pub struct ServerLogs {
    dir: PathBuf,
}

impl ServerLogs {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, server: &str) -> PathBuf {
        self.dir.join(format!("{}.log", server))
    }

    /// Append one timestamped line. Embedded newlines are flattened so every
    /// event stays on a single line.
    pub async fn append(&self, server: &str, message: &str) -> LmcpResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| LmcpError::io(&self.dir, source))?;

        let path = self.path_for(server);
        let line = format!(
            "{} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message.replace('\n', " | ")
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LmcpError::io(&path, source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| LmcpError::io(&path, source))?;
        file.flush()
            .await
            .map_err(|source| LmcpError::io(&path, source))
    }

    /// Last `count` lines, oldest first. Missing file means no lines.
    pub async fn tail(&self, server: &str, count: usize) -> LmcpResult<Vec<String>> {
        let path = self.path_for(server);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(LmcpError::io(&path, source)),
        };
        let lines: Vec<&str> = raw.lines().collect();
        let skip = lines.len().saturating_sub(count);
        Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_and_tails() {
        let dir = tempfile::tempdir().unwrap();
        let logs = ServerLogs::new(dir.path().join("logs"));

        logs.append("survival", "building").await.unwrap();
        logs.append("survival", "build failed:\nchecksum mismatch").await.unwrap();

        let lines = logs.tail("survival", 10).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" building"));
        assert!(lines[1].ends_with("build failed: | checksum mismatch"));

        assert_eq!(logs.tail("survival", 1).await.unwrap().len(), 1);
        assert!(logs.tail("creative", 5).await.unwrap().is_empty());
    }
}
