//! Core evaluation logic for grading one candidate server.
//!
//! This module defines the [`Evaluator`] type, which runs the whole evaluation workflow:
//!
//! 1. Run the build step. On failure, stop (`compile_successful` stays `0`).
//! 2. Launch the servers under a [`ProcessSupervisor`].
//! 3. Wait for a server log to appear (readiness).
//! 4. Scan the server logs for error markers.
//! 5. Run the workload, then clear stray server processes.
//! 6. Summarize the worker logs into the summary CSVs (when enabled and logs exist).
//! 7. Read the run metrics CSV and attach the summary and statistics files.
//!
//! Every stage failure is recorded in the returned [`EvaluationResult`] as a text artifact;
//! [`Evaluator::evaluate`] itself never fails. Whatever the exit path, the supervisor is shut
//! down exactly once and the launcher output is attached as `launch_servers_output`.
//!
//! # Example
//!
//! ```no_run
//! use bench_eval::prelude::*;
//!
//! let config = Configuration::from_env().with_root_dir("/srv/go-http-server");
//! let result = Evaluator::new(config).evaluate();
//! for (name, value) in result.metrics.entries() {
//!     println!("{name}: {value}");
//! }
//! ```

use std::{path::Path, time::SystemTime};

use tracing::{error, info, instrument, trace, warn};

use crate::build_step::run_build_step;
use crate::configuration::Configuration;
use crate::error::EvalError;
use crate::fs_utils::newest_matching;
use crate::logger::init_logger;
use crate::result::{artifact_keys as keys, EvaluationResult};
use crate::summary::{self, artifacts::read_metrics_csv, BASIC_METRICS_CSV, BASIC_SUMMARY_CSV};
use crate::supervisor::ProcessSupervisor;
use crate::workload::run_workload;

/// Glob of the accept-queue statistics logs in the server log directory.
pub const ACCEPTQ_STATS_GLOB: &str = "acceptq_stats*.log";
/// Glob of the CPU statistics logs in the server log directory.
pub const CPU_STATS_GLOB: &str = "cpu_stats*.log";

/// A stage stopped the evaluation; its explanation is already in the result.
struct Stopped;

type Stage = Result<(), Stopped>;

/// Runs the build / launch / workload / score workflow described in the
/// [module documentation](self).
pub struct Evaluator {
    config: Configuration,
}

impl Evaluator {
    /// Create an [`Evaluator`] with the given [`Configuration`].
    ///
    /// Installs the file logger when `config.log` is set.
    #[instrument(skip_all)]
    pub fn new(config: Configuration) -> Evaluator {
        if config.log {
            if let Err(e) = init_logger(&config.root_dir) {
                eprintln!("logging disabled: {e:#}");
            }
        }
        trace!(?config);
        Evaluator { config }
    }

    /// Runs one evaluation.
    ///
    /// The metrics always hold the five fixed keys; see
    /// [`artifact_keys`](crate::result::artifact_keys) for the artifacts that may be attached.
    pub fn evaluate(&self) -> EvaluationResult {
        let mut result = EvaluationResult::new();

        self.progress("Building");
        let build = run_build_step(
            &self.config.build_command,
            &self.config.resolve(&self.config.build_dir),
        );
        result.set_artifact(keys::COMPILE_OUTPUT, build.output);
        if !build.success {
            self.report(false, "build failed");
            return result;
        }
        result.metrics.compile_successful = 1.0;
        self.report(true, "Ok");

        let mut supervisor = ProcessSupervisor::new(self.config.shutdown);
        let _ = self.run_supervised(&mut supervisor, &mut result);

        self.progress("Stopping servers");
        if let Some(report) = supervisor.shutdown() {
            self.report(true, &format!("{:?}", report.outcome));
            let already_set = result
                .artifact(keys::LAUNCH_SERVERS_OUTPUT)
                .is_some_and(|o| !o.is_empty());
            if !report.output.is_empty() && !already_set {
                result.set_artifact(keys::LAUNCH_SERVERS_OUTPUT, report.output);
            }
        } else {
            self.report(true, "nothing to stop");
        }

        info!(metrics = ?result.metrics, artifacts = ?result.artifacts.keys().collect::<Vec<_>>());
        result
    }

    fn run_supervised(
        &self,
        supervisor: &mut ProcessSupervisor,
        result: &mut EvaluationResult,
    ) -> Stage {
        let launch_started_at = SystemTime::now();
        self.launch(supervisor, result)?;
        self.scan_server_logs(supervisor, result)?;
        self.workload(result)?;
        self.collect_scores(result, launch_started_at)
    }

    #[instrument(skip_all)]
    fn launch(&self, supervisor: &mut ProcessSupervisor, result: &mut EvaluationResult) -> Stage {
        self.progress("Launching servers");
        let launch_dir = self.config.resolve(&self.config.launch_dir);
        if let Err(e) = supervisor.launch(&self.config.launch_command, &launch_dir) {
            error!("{e}");
            return self.fail(result, keys::LAUNCH_FAILURE, format!("Failed to launch servers: {e}"));
        }

        let probe = self.config.readiness_probe();
        if !supervisor.await_ready(&probe, self.config.ready_timeout) {
            let timeout = EvalError::Timeout {
                timeout: self.config.ready_timeout,
                exit_code: supervisor.try_exit_status().and_then(|s| s.code()),
            };
            return self.fail(result, keys::LAUNCH_FAILURE, timeout.to_string());
        }

        self.check_still_running(supervisor, result)?;
        self.report(true, "Ok");
        Ok(())
    }

    /// A launcher that exits right after its servers became ready is a launch failure.
    fn check_still_running(
        &self,
        supervisor: &mut ProcessSupervisor,
        result: &mut EvaluationResult,
    ) -> Stage {
        let Some(status) = supervisor.try_exit_status() else {
            return Ok(());
        };
        let code = status.code().map_or("None".to_string(), |c| c.to_string());
        self.fail(
            result,
            keys::LAUNCH_FAILURE,
            format!(
                "{} exited early with code {code}",
                self.config.launch_command.join(" ")
            ),
        )
    }

    #[instrument(skip_all)]
    fn scan_server_logs(&self, supervisor: &ProcessSupervisor, result: &mut EvaluationResult) -> Stage {
        let findings = self.config.readiness_probe().scan_for_errors();
        if findings.is_empty() {
            return Ok(());
        }
        warn!(files = ?findings.keys().collect::<Vec<_>>(), "error markers in server logs");
        for (name, content) in findings {
            result.set_artifact(keys::server_log(&name), content);
        }
        trace!(partial_output = %supervisor.output_snapshot());
        self.fail(
            result,
            keys::LAUNCH_FAILURE,
            "Detected 'error' keyword in server logs.".to_string(),
        )
    }

    #[instrument(skip_all)]
    fn workload(&self, result: &mut EvaluationResult) -> Stage {
        self.progress("Running workload");
        let outcome = run_workload(
            &self.config.workload_command,
            &self.config.resolve(&self.config.workload_dir),
            &self.config.stray_processes,
            &self.config.cleanup_command,
            self.config.cleanup_delay,
        );
        let exit_code = outcome.exit_code;
        let success = outcome.success();
        result.set_artifact(keys::WORKLOAD_STDOUT, outcome.stdout);
        result.set_artifact(keys::WORKLOAD_STDERR, outcome.stderr);
        if !success {
            let code = exit_code.map_or("None".to_string(), |c| c.to_string());
            return self.fail(
                result,
                keys::WORKLOAD_FAILURE,
                format!(
                    "{} exited with code {code}",
                    self.config.workload_command.join(" ")
                ),
            );
        }
        self.report(true, "Ok");
        Ok(())
    }

    #[instrument(skip_all)]
    fn collect_scores(&self, result: &mut EvaluationResult, launch_started_at: SystemTime) -> Stage {
        let log_dir = self.config.resolve(&self.config.workload_log_dir);
        let summary_path = log_dir.join(BASIC_SUMMARY_CSV);
        let metrics_path = log_dir.join(BASIC_METRICS_CSV);

        if self.config.summarize_logs && summary::has_worker_logs(&log_dir) {
            self.progress("Summarizing worker logs");
            match summary::summarize_basic_workload(&log_dir, &summary_path, &metrics_path) {
                Ok(metrics) => {
                    info!(?metrics);
                    self.report(true, &format!("score {:.6}", metrics.score));
                }
                Err(e) => {
                    error!("{e}");
                    return self.fail(
                        result,
                        keys::WORKLOAD_FAILURE,
                        format!("Could not summarize worker logs: {e}"),
                    );
                }
            }
        }

        if !summary_path.is_file() || !metrics_path.is_file() {
            return self.fail(
                result,
                keys::WORKLOAD_FAILURE,
                "Expected workload summary files were not generated.".to_string(),
            );
        }

        let row = match read_metrics_csv(&metrics_path) {
            Ok(row) => row,
            Err(e) => {
                return self.fail(
                    result,
                    keys::WORKLOAD_FAILURE,
                    format!("Could not read workload metrics: {e}"),
                )
            }
        };
        result.metrics.average_tput = row.avg_req_per_sec;
        result.metrics.average_latency = row.avg_latency_ms;
        result.metrics.total_score = row.score;
        result.metrics.run_successful = 1.0;

        attach_file(result, keys::SUMMARY_CSV, &summary_path);
        attach_file(result, keys::METRICS_CSV, &metrics_path);

        let server_log_dir = self.config.resolve(&self.config.log_dir);
        for (key, pattern) in [
            (keys::ACCEPTQ_STATS_LOG, ACCEPTQ_STATS_GLOB),
            (keys::CPU_STATS_LOG, CPU_STATS_GLOB),
        ] {
            if let Some(path) = newest_matching(&server_log_dir, pattern, launch_started_at) {
                attach_file(result, key, &path);
            }
        }
        Ok(())
    }

    fn fail(&self, result: &mut EvaluationResult, key: &str, reason: String) -> Stage {
        warn!("{key}: {reason}");
        self.report(false, &reason);
        result.set_artifact(key, reason);
        Err(Stopped)
    }

    fn progress(&self, stage: &str) {
        if self.config.verbose {
            print!("{stage}... ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
    }

    fn report(&self, ok: bool, msg: &str) {
        if self.config.verbose {
            // green ok, red failure
            let color = if ok { "\x1b[32m" } else { "\x1b[31m" };
            println!("{color}{msg}\x1b[39m");
        }
    }
}

/// Attaches the content of `path`, or why it could not be read.
fn attach_file(result: &mut EvaluationResult, key: &str, path: &Path) {
    if !path.exists() {
        return;
    }
    let content = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("Failed to read {}: {e}", path.display()),
    };
    result.set_artifact(key, content);
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::supervisor::ShutdownPolicy;

    fn launched(script: &str) -> (Evaluator, ProcessSupervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::new()
            .with_launch_command(["sh", "-c", script], "")
            .with_verbose(false);
        let evaluator = Evaluator::new(config);
        let mut supervisor = ProcessSupervisor::new(ShutdownPolicy::default());
        supervisor
            .launch(&evaluator.config.launch_command, dir.path())
            .unwrap();
        (evaluator, supervisor, dir)
    }

    #[test]
    fn launcher_exit_after_readiness_is_reported() {
        let (evaluator, mut supervisor, _dir) = launched("exit 5");
        let started = Instant::now();
        while supervisor.try_exit_status().is_none() && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }

        let mut result = EvaluationResult::new();
        assert!(evaluator
            .check_still_running(&mut supervisor, &mut result)
            .is_err());
        assert_eq!(
            result.artifact(keys::LAUNCH_FAILURE),
            Some("sh -c exit 5 exited early with code 5")
        );
        assert!(supervisor.shutdown().is_some());
    }

    #[test]
    fn running_launcher_passes() {
        let (evaluator, mut supervisor, _dir) = launched("exec sleep 30");
        let mut result = EvaluationResult::new();
        assert!(evaluator
            .check_still_running(&mut supervisor, &mut result)
            .is_ok());
        assert_eq!(result.artifact(keys::LAUNCH_FAILURE), None);
        assert!(supervisor.shutdown().is_some());
    }
}
