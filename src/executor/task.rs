// Work items and the parameters shared by every item of a run

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::output::errors::FanoutError;

/// Default remote directory for staged files
pub const DEFAULT_REMOTE_DIR: &str = "/var/tmp";

/// One host to run the command against.
///
/// Identity is the raw string from the host list. Two items with the same
/// string are still independent items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem(Arc<str>);

impl WorkItem {
    pub fn new(host: impl AsRef<str>) -> Self {
        WorkItem(Arc::from(host.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for WorkItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl From<&str> for WorkItem {
    fn from(host: &str) -> Self {
        WorkItem::new(host)
    }
}

impl From<String> for WorkItem {
    fn from(host: String) -> Self {
        WorkItem(Arc::from(host))
    }
}

/// Fixed parameters of a run, shared read-only by every work item
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Command executed on each host
    pub command: String,
    /// Local file staged to `remote_dir` before the command runs
    pub file: Option<PathBuf>,
    /// Directory receiving one output file per host
    pub out_dir: PathBuf,
    /// Directory on the target where `file` is placed
    pub remote_dir: String,
    /// Per-host deadline
    pub timeout: Duration,
    /// Upper bound on hosts in flight at once
    pub max_concurrency: usize,
}

impl TaskSpec {
    pub fn new(command: impl Into<String>) -> Self {
        TaskSpec {
            command: command.into(),
            file: None,
            out_dir: std::env::temp_dir().join("fanout"),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            timeout: Duration::from_secs(60),
            max_concurrency: 5,
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_remote_dir(mut self, remote_dir: impl Into<String>) -> Self {
        self.remote_dir = remote_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Remote path the staged file lands at, if a file is configured
    pub fn staged_path(&self) -> Option<String> {
        let name = self.file.as_deref().and_then(Path::file_name)?;
        Some(format!(
            "{}/{}",
            self.remote_dir.trim_end_matches('/'),
            name.to_string_lossy()
        ))
    }

    /// Reject configurations that would make dispatch meaningless or unbounded
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.command.trim().is_empty() {
            return Err(FanoutError::config(
                "Command is empty",
                Some("Pass the command to run with --command"),
            ));
        }
        if self.timeout.is_zero() {
            return Err(FanoutError::config(
                "Timeout must be greater than zero",
                Some("Pass --timeout with a positive number of seconds"),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(FanoutError::config(
                "Maximum concurrency must be at least 1",
                Some("Pass --forks with a positive number"),
            ));
        }
        if let Some(ref file) = self.file {
            if !file.is_file() {
                return Err(FanoutError::Io {
                    message: "File to stage does not exist or is not a regular file".to_string(),
                    path: Some(file.clone()),
                });
            }
        }
        Ok(())
    }
}
