//! Lifecycle of the server-under-test.
//!
//! The [`ProcessSupervisor`] launches the server command as the leader of a new process group,
//! so that signals reach every process it spawns, and keeps its combined stdout/stderr in
//! memory. Its states are:
//!
//! ```text
//! NotStarted -> Running -> Stopping -> Stopped
//!                  \-> Failed (exited on its own while supervised)
//! ```
//!
//! Shutdown escalates SIGINT, SIGTERM then SIGKILL, each step waiting for the leader to exit
//! (see [`ShutdownPolicy`]). It runs exactly once per launched process: an explicit
//! [`ProcessSupervisor::shutdown`] call, or the supervisor's `Drop` if the caller never made one.

use std::{
    path::Path,
    process::{Child, ExitStatus},
    thread,
    time::{Duration, Instant, SystemTime},
};

use tracing::{debug, info, instrument, warn};

use crate::error::{EvalError, Result};

mod collector;
pub mod readiness;

#[cfg(unix)]
mod process_group;

#[cfg(not(unix))]
#[path = "process_group_stub.rs"]
mod process_group;

use collector::OutputCollector;
pub use readiness::ReadinessProbe;

/// Signals the supervisor sends to the whole process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupSignal {
    Interrupt,
    Terminate,
    Kill,
}

/// Where the supervised process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing launched yet.
    NotStarted,
    /// Launched and alive as far as the supervisor knows.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Shut down; every resource released.
    Stopped,
    /// Exited on its own while supervised, with its exit code if it had one.
    Failed(Option<i32>),
}

/// How long each shutdown step may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Wait after SIGINT before escalating.
    pub interrupt_grace: Duration,
    /// Wait after SIGTERM before escalating.
    pub terminate_grace: Duration,
    /// Wait for the output collector to drain the stream; past it, the collector stops
    /// reading and closes its end.
    pub collector_join: Duration,
}

impl ShutdownPolicy {
    /// Reaping after SIGKILL should be immediate; this only bounds the case where the signal
    /// could not be delivered (e.g. a group owned by another user).
    const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(1);

    /// Longest time [`ProcessSupervisor::shutdown`] can block.
    pub fn budget(&self) -> Duration {
        self.interrupt_grace
            + self.terminate_grace
            + Self::KILL_REAP_TIMEOUT
            + self.collector_join
            + OutputCollector::STOP_GRACE
    }
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            interrupt_grace: Duration::from_secs(15),
            terminate_grace: Duration::from_secs(5),
            collector_join: Duration::from_secs(2),
        }
    }
}

/// Last step of the shutdown sequence that was needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The process had already exited; no signal was sent.
    AlreadyExited,
    /// Exited after SIGINT.
    Interrupted,
    /// Exited after SIGTERM.
    Terminated,
    /// Needed SIGKILL.
    Killed,
}

/// What [`ProcessSupervisor::shutdown`] observed.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Which step stopped the process.
    pub outcome: ShutdownOutcome,
    /// Exit status of the group leader, if it could be reaped.
    pub exit_status: Option<ExitStatus>,
    /// Complete captured output if `collector_joined`, otherwise what was read so far.
    pub output: String,
    /// Whether the collector drained the stream to EOF in time. When `false`, a process that
    /// escaped the group still held the stream open.
    pub collector_joined: bool,
}

/// One launched server: its leader process and output collector.
#[derive(Debug)]
struct SupervisedProcess {
    child: Child,
    collector: OutputCollector,
    launched_at: SystemTime,
}

/// Owner of at most one server-under-test process group.
#[derive(Debug)]
pub struct ProcessSupervisor {
    policy: ShutdownPolicy,
    state: SupervisorState,
    process: Option<SupervisedProcess>,
}

impl ProcessSupervisor {
    /// A supervisor that has not launched anything yet.
    pub fn new(policy: ShutdownPolicy) -> ProcessSupervisor {
        ProcessSupervisor {
            policy,
            state: SupervisorState::NotStarted,
            process: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Process id of the group leader (also the process group id).
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.child.id())
    }

    /// When the process was launched.
    pub fn launched_at(&self) -> Option<SystemTime> {
        self.process.as_ref().map(|p| p.launched_at)
    }

    /// Output captured so far. Not authoritative until [`Self::shutdown`] returned.
    pub fn output_snapshot(&self) -> String {
        self.process
            .as_ref()
            .map(|p| p.collector.snapshot())
            .unwrap_or_default()
    }

    /// Starts `command` in `working_dir` as a new process group and begins collecting its
    /// output.
    ///
    /// # Errors
    /// [`EvalError::Launch`] if the command is empty, cannot be spawned, or something was
    /// already launched by this supervisor.
    #[instrument(skip(self))]
    pub fn launch(&mut self, command: &[String], working_dir: &Path) -> Result<()> {
        let launch_error = |reason: String| EvalError::Launch {
            command: command.join(" "),
            reason,
        };
        if self.state != SupervisorState::NotStarted {
            return Err(launch_error(format!(
                "supervisor already used (state {:?})",
                self.state
            )));
        }
        let Some((program, args)) = command.split_first() else {
            return Err(launch_error("empty command".to_string()));
        };

        let launched_at = SystemTime::now();
        let (mut child, stream) = process_group::spawn_group_leader(program, args, working_dir)
            .map_err(|e| launch_error(e.to_string()))?;
        let collector = match OutputCollector::spawn(stream) {
            Ok(collector) => collector,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(launch_error(format!("could not start output collector: {e}")));
            }
        };

        info!(pid = child.id(), "server launched");
        self.process = Some(SupervisedProcess {
            child,
            collector,
            launched_at,
        });
        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Exit status of the leader if it already exited.
    ///
    /// An exit while `Running` moves the supervisor to [`SupervisorState::Failed`].
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        let process = self.process.as_mut()?;
        match process.child.try_wait() {
            Ok(Some(status)) => {
                if self.state == SupervisorState::Running {
                    warn!(%status, "supervised process exited on its own");
                    self.state = SupervisorState::Failed(status.code());
                }
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("could not poll supervised process: {e}");
                None
            }
        }
    }

    /// Blocks until `probe` sees a server log, the process exits, or `timeout` elapses.
    ///
    /// Returns `true` only in the first case. The process is checked before the logs on every
    /// poll.
    #[instrument(skip(self, probe))]
    pub fn await_ready(&mut self, probe: &ReadinessProbe, timeout: Duration) -> bool {
        if self.state != SupervisorState::Running {
            return false;
        }
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.try_exit_status().is_some() {
                return false;
            }
            if probe.is_ready() {
                debug!("server logs found");
                return true;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(probe.poll_interval().min(left));
        }
        warn!("server logs did not appear within {timeout:?}");
        false
    }

    /// Shuts the process group down and returns the final output.
    ///
    /// Returns `None` if nothing was launched or the shutdown already happened.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) -> Option<ShutdownReport> {
        let mut process = self.process.take()?;
        self.state = SupervisorState::Stopping;

        let pgid = process.child.id();
        let (outcome, exit_status) = match process.child.try_wait() {
            Ok(Some(status)) => (ShutdownOutcome::AlreadyExited, Some(status)),
            _ => stop_group(&mut process.child, pgid, &self.policy),
        };
        let collector_joined = process.collector.join(self.policy.collector_join);
        let output = process.collector.snapshot();

        info!(?outcome, ?exit_status, "server shut down");
        self.state = SupervisorState::Stopped;
        Some(ShutdownReport {
            outcome,
            exit_status,
            output,
            collector_joined,
        })
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if self.process.is_some() {
            warn!("supervisor dropped while its process was still owned, shutting down");
            self.shutdown();
        }
    }
}

fn stop_group(
    child: &mut Child,
    pgid: u32,
    policy: &ShutdownPolicy,
) -> (ShutdownOutcome, Option<ExitStatus>) {
    let steps = [
        (GroupSignal::Interrupt, policy.interrupt_grace, ShutdownOutcome::Interrupted),
        (GroupSignal::Terminate, policy.terminate_grace, ShutdownOutcome::Terminated),
    ];
    for (signal, grace, outcome) in steps {
        if !process_group::signal_group(pgid, signal) {
            // group vanished between the liveness check and the signal
            return (ShutdownOutcome::AlreadyExited, wait_for_exit(child, grace));
        }
        if let Some(status) = wait_for_exit(child, grace) {
            return (outcome, Some(status));
        }
        debug!(?signal, "process still alive after {grace:?}, escalating");
    }

    process_group::signal_group(pgid, GroupSignal::Kill);
    if let Err(e) = child.kill() {
        debug!("kill on group leader: {e}");
    }
    let status = wait_for_exit(child, ShutdownPolicy::KILL_REAP_TIMEOUT);
    if status.is_none() {
        warn!(pgid, "process survived SIGKILL, giving up on it");
    }
    (ShutdownOutcome::Killed, status)
}

fn wait_for_exit(child: &mut Child, max_duration: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + max_duration;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                warn!("could not poll process: {e}");
                return None;
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
}
