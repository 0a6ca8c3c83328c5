//! What an evaluation hands back to the grading framework.

use std::collections::BTreeMap;

/// Names of the artifacts an evaluation may attach.
pub mod artifact_keys {
    /// Combined output of the build step.
    pub const COMPILE_OUTPUT: &str = "compile_output";
    /// Why the server never became usable.
    pub const LAUNCH_FAILURE: &str = "launch_failure";
    /// Workload stdout, verbatim.
    pub const WORKLOAD_STDOUT: &str = "workload_stdout";
    /// Workload stderr, verbatim.
    pub const WORKLOAD_STDERR: &str = "workload_stderr";
    /// Why the workload produced no score.
    pub const WORKLOAD_FAILURE: &str = "workload_failure";
    /// Per-worker summary CSV.
    pub const SUMMARY_CSV: &str = "basic_workload_summary_csv";
    /// Run metrics CSV.
    pub const METRICS_CSV: &str = "basic_workload_metrics_csv";
    /// Newest accept-queue statistics log.
    pub const ACCEPTQ_STATS_LOG: &str = "acceptq_stats_log";
    /// Newest CPU statistics log.
    pub const CPU_STATS_LOG: &str = "cpu_stats_log";
    /// Everything the server launcher printed.
    pub const LAUNCH_SERVERS_OUTPUT: &str = "launch_servers_output";

    /// Key of a server log in which an error marker was found.
    pub fn server_log(file_name: &str) -> String {
        format!("log_{file_name}")
    }
}

/// The fixed metrics of an evaluation. Stages that were not reached leave theirs at `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    /// Mean requests per second over the workers.
    pub average_tput: f64,
    /// Mean latency over the workers, in milliseconds.
    pub average_latency: f64,
    /// `average_tput / average_latency`.
    pub total_score: f64,
    /// `1.0` once a score was read.
    pub run_successful: f64,
    /// `1.0` once the build step succeeded.
    pub compile_successful: f64,
}

impl Metrics {
    /// Metric names, in the order of [`Metrics::entries`].
    pub const KEYS: [&'static str; 5] = [
        "average_tput",
        "average_latency",
        "total_score",
        "run_successful",
        "compile_successful",
    ];

    /// `(name, value)` for every metric.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            (Self::KEYS[0], self.average_tput),
            (Self::KEYS[1], self.average_latency),
            (Self::KEYS[2], self.total_score),
            (Self::KEYS[3], self.run_successful),
            (Self::KEYS[4], self.compile_successful),
        ]
    }

    /// The metrics as a name to value map.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        self.entries().into_iter().collect()
    }
}

/// Metrics plus named text artifacts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// Always the same five metrics.
    pub metrics: Metrics,
    /// Logs, CSV contents and failure explanations, by name.
    pub artifacts: BTreeMap<String, String>,
}

impl EvaluationResult {
    /// Default metrics, no artifact.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_artifact(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.artifacts.insert(key.into(), value.into());
    }

    /// Artifact stored under `key`.
    pub fn artifact(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).map(String::as_str)
    }

    /// A failure explanation was attached: the run stopped before producing a score.
    pub fn failure(&self) -> Option<&str> {
        self.artifact(artifact_keys::LAUNCH_FAILURE)
            .or_else(|| self.artifact(artifact_keys::WORKLOAD_FAILURE))
    }
}
