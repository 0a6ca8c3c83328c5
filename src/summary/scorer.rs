//! Run-level reduction of worker records into a single score.

use crate::error::{EvalError, Result};
use crate::summary::per_connection::ConnectionSummary;
use crate::summary::worker_log::WorkerStat;

/// Anything carrying one worker's mean latency and throughput.
pub trait WorkerSample {
    /// Mean latency in milliseconds.
    fn latency_ms(&self) -> f64;
    /// Mean requests per second.
    fn throughput_rps(&self) -> f64;
}

impl WorkerSample for WorkerStat {
    fn latency_ms(&self) -> f64 {
        self.latency_avg_ms
    }

    fn throughput_rps(&self) -> f64 {
        self.throughput_avg_rps
    }
}

impl WorkerSample for ConnectionSummary {
    fn latency_ms(&self) -> f64 {
        self.latency_avg_ms
    }

    fn throughput_rps(&self) -> f64 {
        self.throughput_rps
    }
}

/// Aggregate over every worker of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMetrics {
    /// Number of workers, at least one.
    pub worker_count: usize,
    /// Mean of the workers' latency averages.
    pub avg_latency_ms: f64,
    /// Population standard deviation of the workers' latency averages.
    pub latency_stddev_ms: f64,
    /// Mean of the workers' throughput averages.
    pub avg_throughput_rps: f64,
    /// Population standard deviation of the workers' throughput averages.
    pub throughput_stddev_rps: f64,
    /// `avg_throughput_rps / avg_latency_ms`.
    pub score: f64,
}

/// Computes [`RunMetrics`] over `samples`.
///
/// # Errors
/// [`EvalError::EmptyInput`] without samples, [`EvalError::Division`] when the mean latency is
/// exactly zero.
pub fn compute_run_metrics<S: WorkerSample>(samples: &[S]) -> Result<RunMetrics> {
    if samples.is_empty() {
        return Err(EvalError::EmptyInput);
    }

    let latencies = samples.iter().map(S::latency_ms).collect::<Vec<_>>();
    let throughputs = samples.iter().map(S::throughput_rps).collect::<Vec<_>>();

    let avg_latency_ms = mean(&latencies);
    let avg_throughput_rps = mean(&throughputs);
    if avg_latency_ms == 0.0 {
        return Err(EvalError::Division);
    }

    Ok(RunMetrics {
        worker_count: samples.len(),
        avg_latency_ms,
        latency_stddev_ms: population_stddev(&latencies, avg_latency_ms),
        avg_throughput_rps,
        throughput_stddev_rps: population_stddev(&throughputs, avg_throughput_rps),
        score: avg_throughput_rps / avg_latency_ms,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::summary::worker_log::Measurements;

    fn stat(latency: f64, throughput: f64) -> WorkerStat {
        WorkerStat::new(
            "w".into(),
            Measurements {
                latency_avg_ms: latency,
                latency_stdev_ms: 0.0,
                throughput_avg_rps: throughput,
                throughput_stdev_rps: 0.0,
            },
            PathBuf::new(),
        )
    }

    #[test]
    fn single_worker() {
        let m = compute_run_metrics(&[stat(3.0, 7.0)]).unwrap();
        assert_eq!(m.worker_count, 1);
        assert_eq!(m.latency_stddev_ms, 0.0);
        assert_eq!(m.throughput_stddev_rps, 0.0);
        assert_eq!(m.score, 7.0 / 3.0);
    }

    #[test]
    fn population_not_sample() {
        let m = compute_run_metrics(&[stat(2.0, 100.0), stat(4.0, 300.0)]).unwrap();
        assert_eq!(m.avg_latency_ms, 3.0);
        assert_eq!(m.latency_stddev_ms, 1.0);
        assert_eq!(m.avg_throughput_rps, 200.0);
        assert_eq!(m.throughput_stddev_rps, 100.0);
        assert_eq!(m.score, 200.0 / 3.0);
    }

    #[test]
    fn three_workers_same_latency() {
        let m = compute_run_metrics(&[stat(10.0, 100.0), stat(10.0, 200.0), stat(10.0, 300.0)])
            .unwrap();
        assert_eq!(m.avg_throughput_rps, 200.0);
        assert_eq!(m.avg_latency_ms, 10.0);
        assert_eq!(m.latency_stddev_ms, 0.0);
        assert_eq!(m.score, 20.0);
    }

    #[test]
    fn empty_input() {
        let none: [WorkerStat; 0] = [];
        assert!(matches!(compute_run_metrics(&none), Err(EvalError::EmptyInput)));
    }

    #[test]
    fn zero_latency() {
        let err = compute_run_metrics(&[stat(0.0, 10.0), stat(0.0, 20.0)]).unwrap_err();
        assert!(matches!(err, EvalError::Division));
    }
}
