//! Config for the evaluator behaviors
//!
//! This module provides the commands, paths and timeouts used by the
//! [`Evaluator`](crate::evaluator::Evaluator).
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! Relative paths are resolved against the root directory (`EVAL_ROOT_DIR`, default: the
//! current directory).
//!
//! # Environment Variables
//!
//! All values are optional. Flags are enabled by `"true"` (case-insensitive), commands are
//! split on whitespace, durations are in seconds (fractions allowed).
//!
//! - `EVAL_ROOT_DIR`: Project root (default: `.`)
//! - `EVAL_BUILD_COMMAND` / `EVAL_BUILD_DIR`: Build step (default: `go generate ./...` in `server_code`)
//! - `EVAL_LAUNCH_COMMAND`: Server launcher (default: `sudo -n ./launch_servers.sh 4 agent`, run in the root)
//! - `EVAL_LOG_DIR`: Server log directory (default: `log`)
//! - `EVAL_SERVER_LOG_GLOB`: Readiness pattern (default: `server*.log`)
//! - `EVAL_WORKLOAD_COMMAND` / `EVAL_WORKLOAD_DIR`: Workload runner (default: `sudo -n ./basic-workload.sh 20 10` in `workloads`)
//! - `EVAL_WORKLOAD_LOG_DIR`: Worker logs and summary CSVs (default: `workloads/wrk_log`)
//! - `EVAL_STRAY_PROCESSES`: Comma-separated command line fragments killed after the workload (default: `launch_servers,server_code`)
//! - `EVAL_READY_TIMEOUT`: Readiness budget (default: `30`)
//! - `EVAL_READY_POLL_INTERVAL`: Readiness polling (default: `1`)
//! - `EVAL_INTERRUPT_GRACE` / `EVAL_TERMINATE_GRACE`: Shutdown steps (default: `15` / `5`)
//! - `EVAL_CLEANUP_COMMAND`: Run with each stray pattern appended, empty to skip (default: `sudo -n pkill -f`)
//! - `EVAL_CLEANUP_DELAY`: Pause before killing stray processes (default: `1`)
//! - `EVAL_SUMMARIZE_LOGS`: Summarize worker logs in-process (default: `true`)
//! - `EVAL_VERBOSE`: Print stage progress (default: `true`)
//! - `EVAL_LOG`: Write a trace log file in the root directory (default: `false`)

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::supervisor::{ReadinessProbe, ShutdownPolicy};

fn words(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}

/// Configuration for evaluator behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) root_dir: PathBuf,
    pub(crate) build_command: Vec<String>,
    pub(crate) build_dir: PathBuf,
    pub(crate) launch_command: Vec<String>,
    pub(crate) launch_dir: PathBuf,
    pub(crate) log_dir: PathBuf,
    pub(crate) server_log_glob: String,
    pub(crate) workload_command: Vec<String>,
    pub(crate) workload_dir: PathBuf,
    pub(crate) workload_log_dir: PathBuf,
    pub(crate) stray_processes: Vec<String>,
    pub(crate) cleanup_command: Vec<String>,
    pub(crate) ready_timeout: Duration,
    pub(crate) ready_poll_interval: Duration,
    pub(crate) shutdown: ShutdownPolicy,
    pub(crate) cleanup_delay: Duration,
    pub(crate) summarize_logs: bool,
    pub(crate) verbose: bool,
    pub(crate) log: bool,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - `go generate ./...` builds the candidate in `server_code/`.
    /// - `sudo -n ./launch_servers.sh 4 agent` starts the servers, which are ready once a
    ///   `log/server*.log` file exists (waiting at most 30 s, polling every second).
    /// - `sudo -n ./basic-workload.sh 20 10` runs in `workloads/`, writing into
    ///   `workloads/wrk_log/`.
    /// - Shutdown waits 15 s after SIGINT and 5 s after SIGTERM.
    /// - After the workload, `sudo -n pkill -f` runs for each stray pattern, then the
    ///   remaining matches get SIGTERM.
    /// - Worker logs are summarized in-process, progress is printed, no log file is written.
    pub fn new() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            build_command: words("go generate ./..."),
            build_dir: PathBuf::from("server_code"),
            launch_command: words("sudo -n ./launch_servers.sh 4 agent"),
            launch_dir: PathBuf::new(),
            log_dir: PathBuf::from("log"),
            server_log_glob: "server*.log".to_string(),
            workload_command: words("sudo -n ./basic-workload.sh 20 10"),
            workload_dir: PathBuf::from("workloads"),
            workload_log_dir: PathBuf::from("workloads/wrk_log"),
            stray_processes: vec!["launch_servers".to_string(), "server_code".to_string()],
            cleanup_command: words("sudo -n pkill -f"),
            ready_timeout: Duration::from_secs(30),
            ready_poll_interval: ReadinessProbe::DEFAULT_POLL_INTERVAL,
            shutdown: ShutdownPolicy::default(),
            cleanup_delay: Duration::from_secs(1),
            summarize_logs: true,
            verbose: true,
            log: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Unset or
    /// unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_secs(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .unwrap_or(default)
        }

        let defaults = Self::new();
        let path = |var: &str, default: PathBuf| env::var_os(var).map(PathBuf::from).unwrap_or(default);
        let command = |var: &str, default: Vec<String>| {
            env::var(var)
                .ok()
                .map(|c| words(&c))
                .filter(|c| !c.is_empty())
                .unwrap_or(default)
        };

        Self {
            root_dir: path("EVAL_ROOT_DIR", defaults.root_dir),
            build_command: command("EVAL_BUILD_COMMAND", defaults.build_command),
            build_dir: path("EVAL_BUILD_DIR", defaults.build_dir),
            launch_command: command("EVAL_LAUNCH_COMMAND", defaults.launch_command),
            launch_dir: defaults.launch_dir,
            log_dir: path("EVAL_LOG_DIR", defaults.log_dir),
            server_log_glob: env::var("EVAL_SERVER_LOG_GLOB").unwrap_or(defaults.server_log_glob),
            workload_command: command("EVAL_WORKLOAD_COMMAND", defaults.workload_command),
            workload_dir: path("EVAL_WORKLOAD_DIR", defaults.workload_dir),
            workload_log_dir: path("EVAL_WORKLOAD_LOG_DIR", defaults.workload_log_dir),
            stray_processes: env::var("EVAL_STRAY_PROCESSES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.stray_processes),
            cleanup_command: env::var("EVAL_CLEANUP_COMMAND")
                .map(|c| words(&c))
                .unwrap_or(defaults.cleanup_command),
            ready_timeout: get_env_secs("EVAL_READY_TIMEOUT", defaults.ready_timeout),
            ready_poll_interval: get_env_secs(
                "EVAL_READY_POLL_INTERVAL",
                defaults.ready_poll_interval,
            ),
            shutdown: ShutdownPolicy {
                interrupt_grace: get_env_secs(
                    "EVAL_INTERRUPT_GRACE",
                    defaults.shutdown.interrupt_grace,
                ),
                terminate_grace: get_env_secs(
                    "EVAL_TERMINATE_GRACE",
                    defaults.shutdown.terminate_grace,
                ),
                collector_join: defaults.shutdown.collector_join,
            },
            cleanup_delay: get_env_secs("EVAL_CLEANUP_DELAY", defaults.cleanup_delay),
            summarize_logs: get_env_flag("EVAL_SUMMARIZE_LOGS", defaults.summarize_logs),
            verbose: get_env_flag("EVAL_VERBOSE", defaults.verbose),
            log: get_env_flag("EVAL_LOG", defaults.log),
        }
    }

    /// Set the project root every relative path is resolved against.
    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Set the build command and the directory it runs in.
    pub fn with_build_command<S: Into<String>>(
        mut self,
        command: impl IntoIterator<Item = S>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.build_command = command.into_iter().map(Into::into).collect();
        self.build_dir = dir.into();
        self
    }

    /// Set the server launch command and the directory it runs in.
    pub fn with_launch_command<S: Into<String>>(
        mut self,
        command: impl IntoIterator<Item = S>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.launch_command = command.into_iter().map(Into::into).collect();
        self.launch_dir = dir.into();
        self
    }

    /// Set where server logs appear and which files signal readiness.
    pub fn with_server_logs(mut self, dir: impl Into<PathBuf>, glob: impl Into<String>) -> Self {
        self.log_dir = dir.into();
        self.server_log_glob = glob.into();
        self
    }

    /// Set the workload command, the directory it runs in, and where it leaves its logs.
    pub fn with_workload_command<S: Into<String>>(
        mut self,
        command: impl IntoIterator<Item = S>,
        dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        self.workload_command = command.into_iter().map(Into::into).collect();
        self.workload_dir = dir.into();
        self.workload_log_dir = log_dir.into();
        self
    }

    /// Set the command line fragments of processes killed after the workload.
    pub fn with_stray_processes<S: Into<String>>(
        mut self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.stray_processes = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the command run with each stray pattern appended; an empty command skips it.
    pub fn with_cleanup_command<S: Into<String>>(
        mut self,
        command: impl IntoIterator<Item = S>,
    ) -> Self {
        self.cleanup_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the readiness budget and polling interval.
    pub fn with_readiness(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.ready_timeout = timeout;
        self.ready_poll_interval = poll_interval;
        self
    }

    /// Set the shutdown escalation delays.
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    /// Set the pause between the end of the workload and the stray process cleanup.
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Enable or disable in-process summarization of worker logs.
    pub fn with_summarize_logs(mut self, value: bool) -> Self {
        self.summarize_logs = value;
        self
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// `path` itself if absolute, otherwise joined to the root directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }

    /// Readiness probe over the resolved server log directory.
    pub fn readiness_probe(&self) -> ReadinessProbe {
        ReadinessProbe::new(self.resolve(&self.log_dir), self.server_log_glob.clone())
            .with_poll_interval(self.ready_poll_interval)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
