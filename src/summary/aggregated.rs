//! Splitting a combined `basic-workload.log` into per-worker sections.
//!
//! Older workload scripts append every worker report to one file, each wrapped in
//! `===== <name> START =====` / `===== <name> END =====` markers. Sections cannot nest.

use std::{
    fs,
    mem,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{instrument, trace};

use crate::error::{EvalError, Result};
use crate::summary::worker_log::{read_measurements, worker_id_from_name, WorkerStat};

static SECTION_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^===== (.+) START =====$").expect("valid start marker regex"));
static SECTION_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^===== (.+) END =====$").expect("valid end marker regex"));

#[derive(Debug, Default)]
enum SplitterState {
    #[default]
    Outside,
    Inside {
        name: String,
        lines: Vec<String>,
    },
}

/// Line-driven state machine over one aggregated log.
#[derive(Debug)]
pub struct AggregatedLogSplitter {
    path: PathBuf,
    state: SplitterState,
    sections: usize,
}

impl AggregatedLogSplitter {
    /// `path` is only used to label records and errors.
    pub fn new(path: impl Into<PathBuf>) -> AggregatedLogSplitter {
        AggregatedLogSplitter {
            path: path.into(),
            state: SplitterState::Outside,
            sections: 0,
        }
    }

    /// Feeds one line (without its trailing newline).
    ///
    /// Returns the worker record when the line closes a section.
    pub fn feed(&mut self, line: &str) -> Result<Option<WorkerStat>> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(caps) = SECTION_START_RE.captures(line) {
            if let SplitterState::Inside { name, .. } = &self.state {
                return Err(self.structure_error(format!(
                    "encountered nested section start before closing previous section {name:?}"
                )));
            }
            trace!(section = &caps[1], "section start");
            self.state = SplitterState::Inside {
                name: caps[1].to_string(),
                lines: vec![],
            };
            return Ok(None);
        }

        match &mut self.state {
            SplitterState::Outside => Ok(None),
            SplitterState::Inside { name, lines } => {
                let Some(caps) = SECTION_END_RE.captures(line) else {
                    lines.push(line.to_string());
                    return Ok(None);
                };
                if &caps[1] != name.as_str() {
                    let msg = format!(
                        "section end {:?} does not match current section {name:?}",
                        &caps[1]
                    );
                    return Err(self.structure_error(msg));
                }
                let SplitterState::Inside { name, lines } = mem::take(&mut self.state) else {
                    unreachable!("state checked above");
                };
                self.close_section(name, lines).map(Some)
            }
        }
    }

    /// Ends the input.
    ///
    /// # Errors
    /// [`EvalError::Structure`] if a section is still open, [`EvalError::EmptyResult`] if no
    /// section was ever closed.
    pub fn finish(self) -> Result<()> {
        if let SplitterState::Inside { name, .. } = &self.state {
            return Err(self.structure_error(format!(
                "reached end of file before closing section {name:?}"
            )));
        }
        if self.sections == 0 {
            return Err(EvalError::EmptyResult(self.path));
        }
        Ok(())
    }

    fn close_section(&mut self, name: String, lines: Vec<String>) -> Result<WorkerStat> {
        let measurements = read_measurements(&lines)
            .map_err(|e| e.in_log(format!("{} [{name}]", self.path.display())))?;
        self.sections += 1;
        let source = self
            .path
            .parent()
            .map(|dir| dir.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name));
        Ok(WorkerStat::new(worker_id_from_name(&name), measurements, source))
    }

    fn structure_error(&self, msg: String) -> EvalError {
        EvalError::Structure(msg).in_log(self.path.display().to_string())
    }
}

/// Splits `text` and reads every section, in order.
pub fn split_aggregated(path: &Path, text: &str) -> Result<Vec<WorkerStat>> {
    let mut splitter = AggregatedLogSplitter::new(path);
    let mut stats = vec![];
    for line in text.lines() {
        if let Some(stat) = splitter.feed(line)? {
            stats.push(stat);
        }
    }
    splitter.finish()?;
    Ok(stats)
}

/// Reads an aggregated log from disk.
#[instrument]
pub fn parse_aggregated_log(path: &Path) -> Result<Vec<WorkerStat>> {
    let text = fs::read_to_string(path)
        .map_err(|e| EvalError::from(e).in_log(path.display().to_string()))?;
    split_aggregated(path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Result<Vec<WorkerStat>> {
        split_aggregated(Path::new("/logs/basic-workload.log"), text)
    }

    #[test]
    fn single_section() {
        let stats = split(
            "preamble\n\
             ===== a START =====\n\
             Latency 10ms 1ms\n\
             Req/Sec 2k 100\n\
             ===== a END =====\n\
             trailer\n",
        )
        .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].worker_id, "a");
        assert_eq!(stats[0].throughput_avg_rps, 2000.0);
        assert_eq!(stats[0].source, PathBuf::from("/logs/a"));
    }

    #[test]
    fn section_names_follow_worker_pattern() {
        let stats = split(
            "===== wrk_client_1.log START =====\n\
             Latency 1ms 1ms\nReq/Sec 1 1\n\
             ===== wrk_client_1.log END =====\n\
             ===== wrk_client_2.log START =====\n\
             Latency 2ms 1ms\nReq/Sec 2 1\n\
             ===== wrk_client_2.log END =====\n",
        )
        .unwrap();
        let ids = stats.iter().map(|s| s.worker_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn mismatched_end_is_structural() {
        let err = split("===== a START =====\n===== b END =====\n").unwrap_err();
        assert!(matches!(err.root(), EvalError::Structure(_)), "{err}");
    }

    #[test]
    fn nested_start_is_structural() {
        let err = split("===== a START =====\n===== b START =====\n").unwrap_err();
        assert!(matches!(err.root(), EvalError::Structure(_)), "{err}");
    }

    #[test]
    fn unterminated_section_is_structural() {
        let err = split("===== a START =====\nLatency 1ms 1ms\n").unwrap_err();
        assert!(matches!(err.root(), EvalError::Structure(_)), "{err}");
    }

    #[test]
    fn no_sections_is_empty() {
        let err = split("nothing here\n===== stray END =====\n").unwrap_err();
        assert!(matches!(err, EvalError::EmptyResult(_)), "{err}");
    }

    #[test]
    fn incomplete_section_fails_the_whole_log() {
        let err = split(
            "===== a START =====\nLatency 1ms 1ms\nReq/Sec 1 1\n===== a END =====\n\
             ===== b START =====\nLatency 1ms 1ms\n===== b END =====\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("[b]"), "{err}");
        assert!(matches!(err.root(), EvalError::MissingField(_)));
    }
}
