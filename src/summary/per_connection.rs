//! `worker_<id>.summary` files written by the per-connection workload.
//!
//! Each file holds `key=value` lines with nanosecond counters; blank lines and lines without
//! `=` are ignored.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::instrument;

use crate::error::{EvalError, Result};

const REQUIRED_KEYS: [&str; 7] = [
    "success",
    "failure",
    "latency_sum_ns",
    "latency_count",
    "latency_min_ns",
    "latency_max_ns",
    "duration_ns",
];

/// Counters of one per-connection worker, converted to seconds and milliseconds.
///
/// Request counts are kept as written, even negative ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSummary {
    /// Digits of `worker_<id>.summary`, or the file stem.
    pub worker_id: String,
    /// `success + failure`.
    pub total_requests: i64,
    /// Requests that got a response.
    pub success: i64,
    /// Requests that failed.
    pub failure: i64,
    /// Run length, `0` when `duration_ns` is not positive.
    pub duration_sec: f64,
    /// Requests per second over the run, `0` for an empty duration.
    pub throughput_rps: f64,
    /// Mean latency, `0` when nothing was timed.
    pub latency_avg_ms: f64,
    /// Fastest request, `0` when not positive.
    pub latency_min_ms: f64,
    /// Slowest request, `0` when not positive.
    pub latency_max_ms: f64,
    /// File the counters were read from.
    pub source: PathBuf,
}

/// Parses the body of a summary file.
pub fn parse_summary(worker_id: String, source: PathBuf, text: &str) -> Result<ConnectionSummary> {
    let data = text
        .lines()
        .map(str::trim)
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<HashMap<_, _>>();

    let missing = REQUIRED_KEYS
        .into_iter()
        .filter(|key| !data.contains_key(key))
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(EvalError::MissingField(missing));
    }

    let field = |key: &'static str| -> Result<i64> {
        let value = data[key];
        value.parse().map_err(|_| EvalError::Format {
            kind: key,
            token: value.to_string(),
        })
    };

    let success = field("success")?;
    let failure = field("failure")?;
    let latency_sum_ns = field("latency_sum_ns")?;
    let latency_count = field("latency_count")?;
    let latency_min_ns = field("latency_min_ns")?;
    let latency_max_ns = field("latency_max_ns")?;
    let duration_ns = field("duration_ns")?;

    let total_requests = success
        .checked_add(failure)
        .ok_or_else(|| EvalError::Format {
            kind: "total_requests",
            token: format!("{success}+{failure}"),
        })?;
    let duration_sec = if duration_ns > 0 {
        duration_ns as f64 / 1e9
    } else {
        0.0
    };
    let throughput_rps = if duration_sec > 0.0 {
        total_requests as f64 / duration_sec
    } else {
        0.0
    };
    let latency_avg_ms = if latency_count > 0 {
        (latency_sum_ns as f64 / latency_count as f64) / 1e6
    } else {
        0.0
    };
    let ns_to_ms = |ns: i64| if ns > 0 { ns as f64 / 1e6 } else { 0.0 };

    Ok(ConnectionSummary {
        worker_id,
        total_requests,
        success,
        failure,
        duration_sec,
        throughput_rps,
        latency_avg_ms,
        latency_min_ms: ns_to_ms(latency_min_ns),
        latency_max_ms: ns_to_ms(latency_max_ns),
        source,
    })
}

/// `worker_3.summary` gives `3`; other names give their stem.
pub fn summary_worker_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.strip_prefix("worker_") {
        Some(id) => id.to_string(),
        None => stem,
    }
}

/// Reads one summary file.
#[instrument]
pub fn parse_summary_file(path: &Path) -> Result<ConnectionSummary> {
    let location = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| EvalError::from(e).in_log(&location))?;
    parse_summary(summary_worker_id(path), path.to_path_buf(), &text)
        .map_err(|e| e.in_log(&location))
}
