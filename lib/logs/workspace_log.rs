//! Per-workspace log files.
//!
//! Workspace build jobs append their progress to the workspace's
//! `logs/logging.log`, the same file the log streaming service tails, while
//! mirroring every line through `tracing` for the daemon's own output.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing_appender::rolling::RollingFileAppender;

use crate::{
    config::{LOG_FILENAME, LOG_SUBDIR},
    models::{DaemonID, IdKind},
    JinadResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Append-only writer for a workspace's `logging.log`.
pub struct WorkspaceLog {
    context: String,
    appender: RollingFileAppender,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WorkspaceLog {
    /// Opens (creating as needed) the log file of a workspace.
    pub fn open(workdir: &Path, context: impl Into<String>) -> JinadResult<Self> {
        let log_dir = workdir.join(LOG_SUBDIR);
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            context: context.into(),
            appender: tracing_appender::rolling::never(log_dir, LOG_FILENAME),
        })
    }

    /// Appends one info line.
    pub fn info(&mut self, message: &str) {
        tracing::info!("{}", message);
        self.append("INFO", message);
    }

    /// Appends one error line.
    pub fn error(&mut self, message: &str) {
        tracing::error!("{}", message);
        self.append("ERROR", message);
    }

    fn append(&mut self, level: &str, message: &str) {
        let line = format!(
            "{}\t{}\t{}\t{}\n",
            Utc::now().to_rfc3339(),
            self.context,
            level,
            message
        );
        if let Err(e) = self.appender.write_all(line.as_bytes()) {
            tracing::warn!("could not append to workspace log: {}", e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves the log file a stream request refers to, by id kind: workspace
/// ids read the workspace's own log, component ids a per-component log inside
/// the owning workspace.
pub fn log_path(workspace_dir: &Path, log_id: &DaemonID) -> PathBuf {
    match log_id.kind() {
        IdKind::Workspace => workspace_dir.join(LOG_SUBDIR).join(LOG_FILENAME),
        _ => workspace_dir
            .join(LOG_SUBDIR)
            .join(log_id.to_string())
            .join(LOG_FILENAME),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_by_kind() {
        let dir = Path::new("/ws/jworkspace-x");
        let workspace = DaemonID::new(IdKind::Workspace);
        let pea = DaemonID::new(IdKind::Pea);

        assert_eq!(
            log_path(dir, &workspace),
            dir.join("logs").join("logging.log")
        );
        assert_eq!(
            log_path(dir, &pea),
            dir.join("logs").join(pea.to_string()).join("logging.log")
        );
    }

    #[test]
    fn test_workspace_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = WorkspaceLog::open(dir.path(), "worker0").unwrap();
        log.info("building image");
        log.error("build failed");
        drop(log);

        let contents =
            std::fs::read_to_string(dir.path().join(LOG_SUBDIR).join(LOG_FILENAME)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO\tbuilding image"));
        assert!(lines[1].contains("ERROR\tbuild failed"));
    }
}
