//! One worker's wrk-style report reduced to a [`WorkerStat`].

use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, instrument};

use crate::error::{EvalError, Result};
use crate::summary::units::{parse_latency, parse_throughput};

static WORKER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+)\.log$").expect("valid worker id regex"));

/// Latency and throughput measured by one load-generating worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStat {
    /// Digits taken from `..._<n>.log`, or the file/section stem.
    pub worker_id: String,
    /// Mean request latency, in milliseconds.
    pub latency_avg_ms: f64,
    /// Latency standard deviation, in milliseconds.
    pub latency_stdev_ms: f64,
    /// Mean requests per second.
    pub throughput_avg_rps: f64,
    /// Requests-per-second standard deviation.
    pub throughput_stdev_rps: f64,
    /// Where the record came from.
    pub source: PathBuf,
}

/// The four values of a report, before an identity is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    /// `Latency` average, in milliseconds.
    pub latency_avg_ms: f64,
    /// `Latency` standard deviation, in milliseconds.
    pub latency_stdev_ms: f64,
    /// `Req/Sec` average.
    pub throughput_avg_rps: f64,
    /// `Req/Sec` standard deviation.
    pub throughput_stdev_rps: f64,
}

impl WorkerStat {
    /// Attaches an identity and a source to parsed measurements.
    pub fn new(worker_id: String, measurements: Measurements, source: PathBuf) -> WorkerStat {
        WorkerStat {
            worker_id,
            latency_avg_ms: measurements.latency_avg_ms,
            latency_stdev_ms: measurements.latency_stdev_ms,
            throughput_avg_rps: measurements.throughput_avg_rps,
            throughput_stdev_rps: measurements.throughput_stdev_rps,
            source,
        }
    }
}

/// Extracts the `Latency` and `Req/Sec` rows from a wrk thread report.
///
/// The first row of each kind wins. A row needs at least three tokens to count.
///
/// # Errors
/// [`EvalError::Format`] if a token does not parse, [`EvalError::MissingField`] naming
/// every field still absent once `lines` is exhausted.
pub fn read_measurements<I, S>(lines: I) -> Result<Measurements>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut latency: Option<(f64, f64)> = None;
    let mut throughput: Option<(f64, f64)> = None;

    for raw_line in lines {
        let line = raw_line.as_ref().trim();
        if latency.is_none() && line.starts_with("Latency") {
            if let Some((avg, stdev)) = average_and_stdev(line) {
                latency = Some((parse_latency(avg)?, parse_latency(stdev)?));
            }
        } else if throughput.is_none() && line.starts_with("Req/Sec") {
            if let Some((avg, stdev)) = average_and_stdev(line) {
                throughput = Some((parse_throughput(avg)?, parse_throughput(stdev)?));
            }
        }
        if latency.is_some() && throughput.is_some() {
            break;
        }
    }

    match (latency, throughput) {
        (Some(latency), Some(throughput)) => Ok(Measurements {
            latency_avg_ms: latency.0,
            latency_stdev_ms: latency.1,
            throughput_avg_rps: throughput.0,
            throughput_stdev_rps: throughput.1,
        }),
        (latency, throughput) => {
            let mut missing = vec![];
            if latency.is_none() {
                missing.extend(["latency_avg", "latency_stdev"]);
            }
            if throughput.is_none() {
                missing.extend(["req_per_sec_avg", "req_per_sec_stdev"]);
            }
            Err(EvalError::MissingField(missing))
        }
    }
}

fn average_and_stdev(line: &str) -> Option<(&str, &str)> {
    let mut tokens = line.split_whitespace().skip(1);
    Some((tokens.next()?, tokens.next()?))
}

/// Worker identity for a log file or aggregated section name.
///
/// `wrk_client_7.log` gives `7`; anything else gives its stem (`a` for `a`, `node` for
/// `node.txt`).
pub fn worker_id_from_name(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    if let Some(caps) = WORKER_ID_RE.captures(&file_name) {
        return caps[1].to_string();
    }
    Path::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name)
}

/// Parses a standalone per-worker log file.
#[instrument]
pub fn parse_worker_log(path: &Path) -> Result<WorkerStat> {
    let location = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|e| EvalError::from(e).in_log(&location))?;
    let measurements = read_measurements(content.lines()).map_err(|e| e.in_log(&location))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stat = WorkerStat::new(worker_id_from_name(&name), measurements, path.to_path_buf());
    debug!(?stat);
    Ok(stat)
}
