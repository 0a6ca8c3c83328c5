//! Reduction of load-generator output into worker records, run metrics and CSV artifacts.
//!
//! Two encodings are understood:
//!
//! - wrk-style reports, one `wrk_client_<n>.log` per worker, or all of them in a single
//!   `basic-workload.log` wrapped in section markers (see [`aggregated`])
//! - per-connection `worker_<id>.summary` counter files (see [`per_connection`])
//!
//! A malformed worker log aborts the whole summary: a bad file usually means the capture itself
//! failed, so scoring the remaining workers would only hide it.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::error::{EvalError, Result};
use crate::fs_utils;

pub mod aggregated;
pub mod artifacts;
pub mod per_connection;
pub mod scorer;
pub mod units;
pub mod worker_log;

use per_connection::ConnectionSummary;
use scorer::RunMetrics;
use worker_log::WorkerStat;

/// Glob of the per-worker wrk logs inside a log directory.
pub const WORKER_LOG_GLOB: &str = "wrk_client_*.log";
/// Combined log used when no per-worker file exists.
pub const AGGREGATED_LOG_NAME: &str = "basic-workload.log";
/// Glob of per-connection summary files.
pub const CONNECTION_SUMMARY_GLOB: &str = "worker_*.summary";

/// Default output names of the basic workload summary.
pub const BASIC_SUMMARY_CSV: &str = "basic-workload-summary.csv";
/// Default output name of the basic workload run metrics.
pub const BASIC_METRICS_CSV: &str = "basic-workload-summary-metrics.csv";
/// Default output name of the per-connection worker summary.
pub const CONNECTION_SUMMARY_CSV: &str = "per-connection-workload-summary.csv";
/// Default output name of the per-connection run metrics.
pub const CONNECTION_METRICS_CSV: &str = "per-connection-workload-metrics.csv";

fn glob_sorted(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    fs_utils::glob_sorted(dir, pattern)
        .map_err(|e| EvalError::Structure(format!("bad log pattern {pattern:?}: {e}")))
}

fn check_logs_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(EvalError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("logs directory not found: {}", dir.display()),
        )));
    }
    Ok(())
}

/// Whether `dir` holds anything [`collect_worker_stats`] could read.
pub fn has_worker_logs(dir: &Path) -> bool {
    dir.join(AGGREGATED_LOG_NAME).is_file()
        || glob_sorted(dir, WORKER_LOG_GLOB).is_ok_and(|files| !files.is_empty())
}

/// Reads every worker of `dir`: the per-worker logs if any, else the aggregated log.
#[instrument]
pub fn collect_worker_stats(dir: &Path) -> Result<Vec<WorkerStat>> {
    check_logs_dir(dir)?;

    let worker_logs = glob_sorted(dir, WORKER_LOG_GLOB)?;
    if !worker_logs.is_empty() {
        return worker_logs
            .iter()
            .map(|path| worker_log::parse_worker_log(path))
            .collect();
    }

    let aggregated = dir.join(AGGREGATED_LOG_NAME);
    if aggregated.is_file() {
        info!("no per-worker logs, falling back to {}", aggregated.display());
        return aggregated::parse_aggregated_log(&aggregated);
    }

    Err(EvalError::EmptyResult(dir.to_path_buf()))
}

/// Summarizes the wrk logs of `logs_dir` into `output` (per worker) and `metrics_output`.
#[instrument]
pub fn summarize_basic_workload(
    logs_dir: &Path,
    output: &Path,
    metrics_output: &Path,
) -> Result<RunMetrics> {
    let stats = collect_worker_stats(logs_dir)?;
    artifacts::write_worker_csv(&stats, output)?;
    let metrics = scorer::compute_run_metrics(&stats)?;
    artifacts::write_metrics_csv(&metrics, metrics_output)?;
    Ok(metrics)
}

/// Reads every `worker_*.summary` of `dir`.
#[instrument]
pub fn collect_connection_summaries(dir: &Path) -> Result<Vec<ConnectionSummary>> {
    check_logs_dir(dir)?;
    let files = glob_sorted(dir, CONNECTION_SUMMARY_GLOB)?;
    if files.is_empty() {
        return Err(EvalError::EmptyResult(dir.to_path_buf()));
    }
    files
        .iter()
        .map(|path| per_connection::parse_summary_file(path))
        .collect()
}

/// Summarizes the per-connection workload of `logs_dir`.
#[instrument]
pub fn summarize_per_connection(
    logs_dir: &Path,
    output: &Path,
    metrics_output: &Path,
) -> Result<RunMetrics> {
    let summaries = collect_connection_summaries(logs_dir)?;
    artifacts::write_connection_csv(&summaries, output)?;
    let metrics = scorer::compute_run_metrics(&summaries)?;
    artifacts::write_metrics_csv(&metrics, metrics_output)?;
    Ok(metrics)
}
