//! CSV artifacts written after a run, and the run-metrics file read back by the evaluator.
//!
//! Column order is part of the contract with whatever consumes these files. Floats are written
//! with six decimal places.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::{info, instrument};

use crate::error::{EvalError, Result};
use crate::summary::per_connection::ConnectionSummary;
use crate::summary::scorer::RunMetrics;
use crate::summary::worker_log::WorkerStat;

/// Columns of the per-worker CSV.
pub const WORKER_COLUMNS: [&str; 6] = [
    "worker_id",
    "latency_avg_ms",
    "latency_stdev_ms",
    "req_per_sec_avg",
    "req_per_sec_stdev",
    "log_path",
];

/// Columns of the per-connection worker CSV.
pub const CONNECTION_COLUMNS: [&str; 10] = [
    "worker_id",
    "total_requests",
    "success",
    "failure",
    "duration_sec",
    "throughput_req_per_sec",
    "latency_avg_ms",
    "latency_min_ms",
    "latency_max_ms",
    "summary_path",
];

/// Columns of the single-row run metrics CSV.
pub const METRICS_COLUMNS: [&str; 6] = [
    "workers",
    "avg_latency_ms",
    "latency_stddev_ms",
    "avg_req_per_sec",
    "req_per_sec_stddev",
    "score",
];

fn fixed(value: f64) -> String {
    format!("{value:.6}")
}

/// Writes one row per worker to `out`.
pub fn write_worker_rows<W: io::Write>(stats: &[WorkerStat], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(WORKER_COLUMNS)?;
    for stat in stats {
        wtr.write_record([
            stat.worker_id.clone(),
            fixed(stat.latency_avg_ms),
            fixed(stat.latency_stdev_ms),
            fixed(stat.throughput_avg_rps),
            fixed(stat.throughput_stdev_rps),
            stat.source.display().to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes one row per per-connection worker to `out`.
pub fn write_connection_rows<W: io::Write>(stats: &[ConnectionSummary], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(CONNECTION_COLUMNS)?;
    for stat in stats {
        wtr.write_record([
            stat.worker_id.clone(),
            stat.total_requests.to_string(),
            stat.success.to_string(),
            stat.failure.to_string(),
            fixed(stat.duration_sec),
            fixed(stat.throughput_rps),
            fixed(stat.latency_avg_ms),
            fixed(stat.latency_min_ms),
            fixed(stat.latency_max_ms),
            stat.source.display().to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the header and the single metrics row to `out`.
pub fn write_metrics_row<W: io::Write>(metrics: &RunMetrics, out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(METRICS_COLUMNS)?;
    wtr.write_record([
        metrics.worker_count.to_string(),
        fixed(metrics.avg_latency_ms),
        fixed(metrics.latency_stddev_ms),
        fixed(metrics.avg_throughput_rps),
        fixed(metrics.throughput_stddev_rps),
        fixed(metrics.score),
    ])?;
    wtr.flush()?;
    Ok(())
}

/// Creates (or truncates) `path` and writes the per-worker CSV.
#[instrument(skip(stats))]
pub fn write_worker_csv(stats: &[WorkerStat], path: &Path) -> Result<()> {
    write_worker_rows(stats, std::fs::File::create(path)?)?;
    info!(workers = stats.len(), "wrote worker CSV");
    Ok(())
}

/// Creates (or truncates) `path` and writes the per-connection CSV.
#[instrument(skip(stats))]
pub fn write_connection_csv(stats: &[ConnectionSummary], path: &Path) -> Result<()> {
    write_connection_rows(stats, std::fs::File::create(path)?)?;
    info!(workers = stats.len(), "wrote per-connection CSV");
    Ok(())
}

/// Creates (or truncates) `path` and writes the metrics CSV.
#[instrument(skip(metrics))]
pub fn write_metrics_csv(metrics: &RunMetrics, path: &Path) -> Result<()> {
    write_metrics_row(metrics, std::fs::File::create(path)?)?;
    info!(score = metrics.score, "wrote metrics CSV");
    Ok(())
}

/// The three numbers the evaluator reports from a metrics CSV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsRow {
    /// `avg_req_per_sec` column.
    pub avg_req_per_sec: f64,
    /// `avg_latency_ms` column.
    pub avg_latency_ms: f64,
    /// `score` column.
    pub score: f64,
}

/// Reads the first data row of a run metrics CSV.
///
/// # Errors
/// [`EvalError::MissingField`] if a needed column is absent, [`EvalError::EmptyResult`] if the
/// file has no data row, [`EvalError::Format`] if a cell is not a number.
pub fn read_metrics_row<R: io::Read>(input: R, origin: &Path) -> Result<MetricsRow> {
    let mut rdr = csv::Reader::from_reader(input);
    let headers = rdr.headers()?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EvalError::MissingField(vec![name]))
    };
    let tput = column("avg_req_per_sec")?;
    let latency = column("avg_latency_ms")?;
    let score = column("score")?;

    let Some(record) = rdr.records().next() else {
        return Err(EvalError::EmptyResult(origin.to_path_buf()));
    };
    let record = record?;
    let cell = |idx: usize, name: &'static str| -> Result<f64> {
        let raw = record.get(idx).unwrap_or_default();
        raw.trim().parse().map_err(|_| EvalError::Format {
            kind: name,
            token: raw.to_string(),
        })
    };

    Ok(MetricsRow {
        avg_req_per_sec: cell(tput, "avg_req_per_sec")?,
        avg_latency_ms: cell(latency, "avg_latency_ms")?,
        score: cell(score, "score")?,
    })
}

/// Reads the first data row of the run metrics CSV at `path`.
pub fn read_metrics_csv(path: &Path) -> Result<MetricsRow> {
    let file = std::fs::File::open(path)?;
    read_metrics_row(file, path).map_err(|e| e.in_log(path.display().to_string()))
}

/// Reads a per-worker CSV back into records.
pub fn read_worker_rows<R: io::Read>(input: R) -> Result<Vec<WorkerStat>> {
    let mut rdr = csv::Reader::from_reader(input);
    let mut stats = vec![];
    for record in rdr.records() {
        let record = record?;
        let cell = |idx: usize| -> Result<f64> {
            let raw = record.get(idx).unwrap_or_default();
            raw.parse().map_err(|_| EvalError::Format {
                kind: WORKER_COLUMNS[idx],
                token: raw.to_string(),
            })
        };
        stats.push(WorkerStat {
            worker_id: record.get(0).unwrap_or_default().to_string(),
            latency_avg_ms: cell(1)?,
            latency_stdev_ms: cell(2)?,
            throughput_avg_rps: cell(3)?,
            throughput_stdev_rps: cell(4)?,
            source: PathBuf::from(record.get(5).unwrap_or_default()),
        });
    }
    Ok(stats)
}
