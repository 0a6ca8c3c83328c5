//! Readiness signal and error markers of the server logs.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use regex::Regex;
use tracing::{debug, warn};

use crate::fs_utils::glob_sorted;

static ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|fail|exit status 1)\b").expect("valid error marker regex")
});

/// Where the server-under-test writes its logs, and how often to look at them.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    log_dir: PathBuf,
    pattern: String,
    poll_interval: Duration,
}

impl ReadinessProbe {
    /// Default delay between two readiness checks.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Probe for files of `log_dir` matching the glob `pattern` (`server*.log`).
    pub fn new(log_dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            pattern: pattern.into(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Changes the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Directory holding the server logs.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Server log files present right now.
    pub fn server_logs(&self) -> Vec<PathBuf> {
        glob_sorted(&self.log_dir, &self.pattern).unwrap_or_else(|e| {
            warn!("invalid server log pattern {:?}: {e}", self.pattern);
            vec![]
        })
    }

    /// At least one server log exists.
    pub fn is_ready(&self) -> bool {
        !self.server_logs().is_empty()
    }

    /// Server logs mentioning `error`, `fail` or `exit status 1` (whole word, any case).
    ///
    /// Keys are file names, values the whole content of the file. Files that vanished between
    /// listing and reading are skipped.
    pub fn scan_for_errors(&self) -> BTreeMap<String, String> {
        let mut findings = BTreeMap::new();
        for path in self.server_logs() {
            let content = match fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("could not read {}: {e}", path.display());
                    continue;
                }
            };
            if let Some(found) = ERROR_RE.find(&content) {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                debug!(file = name.as_str(), marker = found.as_str(), "error marker in server log");
                findings.insert(name, content);
            }
        }
        findings
    }
}
