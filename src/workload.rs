//! The load-generation run and the safety net that follows it.

use std::{
    path::Path,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tracing::{debug, info, instrument, warn};

/// Exit code reported when the workload command cannot be started at all.
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

/// Captured result of the workload command.
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Verbatim stdout.
    pub stdout: String,
    /// Verbatim stderr.
    pub stderr: String,
}

impl WorkloadOutcome {
    /// Whether the workload exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs `command` in `dir`, then clears stray processes once the workload is over.
///
/// The cleanup waits `cleanup_delay` first and happens whatever the workload outcome was:
/// `cleanup_command` runs once per pattern, then the remaining matches get SIGTERM.
#[instrument(skip(stray_processes, cleanup_command))]
pub fn run_workload(
    command: &[String],
    dir: &Path,
    stray_processes: &[String],
    cleanup_command: &[String],
    cleanup_delay: Duration,
) -> WorkloadOutcome {
    let outcome = execute(command, dir);
    thread::sleep(cleanup_delay);
    run_cleanup_command(cleanup_command, stray_processes);
    kill_stray_processes(stray_processes);
    info!(exit_code = ?outcome.exit_code, "workload finished");
    outcome
}

fn execute(command: &[String], dir: &Path) -> WorkloadOutcome {
    let not_started = |reason: String| WorkloadOutcome {
        exit_code: Some(NOT_FOUND_EXIT_CODE),
        stdout: String::new(),
        stderr: reason,
    };
    let Some((program, args)) = command.split_first() else {
        return not_started("empty workload command".to_string());
    };

    match Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => WorkloadOutcome {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => {
            warn!("could not launch workload '{program}': {e}");
            not_started(e.to_string())
        }
    }
}

/// Runs `cleanup_command <pattern>` for each pattern, e.g. `sudo -n pkill -f <pattern>`.
///
/// Reaches processes owned by another user, such as servers started through `sudo`. Exit
/// codes and launch errors are logged and ignored.
pub fn run_cleanup_command(cleanup_command: &[String], patterns: &[String]) {
    let Some((program, args)) = cleanup_command.split_first() else {
        return;
    };
    for pattern in patterns {
        match Command::new(program)
            .args(args)
            .arg(pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => debug!(pattern, %status, "cleanup command finished"),
            Err(e) => debug!(pattern, "could not run cleanup command '{program}': {e}"),
        }
    }
}

/// Sends SIGTERM to every process whose command line contains one of `patterns`, except this
/// one.
///
/// Falls back to a plain kill where SIGTERM is not available. Failures are logged and
/// otherwise ignored. Returns how many processes were signaled.
pub fn kill_stray_processes(patterns: &[String]) -> usize {
    if patterns.is_empty() {
        return 0;
    }
    let own_pid = sysinfo::get_current_pid().ok();
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    let mut signaled = 0;
    for (pid, process) in system.processes() {
        if Some(*pid) == own_pid {
            continue;
        }
        let command_line = if process.cmd().is_empty() {
            process.name().to_string_lossy().into_owned()
        } else {
            process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        };
        if !patterns.iter().any(|p| command_line.contains(p.as_str())) {
            continue;
        }
        let sent = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if sent {
            debug!(%pid, command_line, "sent SIGTERM to stray process");
            signaled += 1;
        } else {
            warn!(%pid, command_line, "could not signal stray process");
        }
    }
    signaled
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn captures_streams_verbatim() {
        let outcome = run_workload(
            &sh("printf 'req/s 10\\n'; printf 'warn\\n' >&2; exit 3"),
            Path::new("."),
            &[],
            &[],
            Duration::ZERO,
        );
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.stdout, "req/s 10\n");
        assert_eq!(outcome.stderr, "warn\n");
    }

    #[test]
    fn missing_command_is_127() {
        let outcome = execute(&["no-such-workload-runner-4242".to_string()], Path::new("."));
        assert_eq!(outcome.exit_code, Some(NOT_FOUND_EXIT_CODE));
        assert!(!outcome.stderr.is_empty());
    }

    #[cfg(unix)]
    fn wait_for(condition: impl Fn() -> bool) {
        let started = Instant::now();
        while !condition() && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[cfg(unix)]
    #[test]
    fn stray_processes_are_killed() {
        use std::os::unix::process::CommandExt;

        let marker = format!("stray-marker-{}", std::process::id());
        let mut child = Command::new("sleep")
            .arg0(&marker)
            .arg("30")
            .spawn()
            .unwrap();

        // /proc may lag behind the spawn for a moment
        let started = Instant::now();
        let mut killed = 0;
        while killed == 0 && started.elapsed() < Duration::from_secs(5) {
            killed = kill_stray_processes(&[marker.clone()]);
            thread::sleep(Duration::from_millis(50));
        }
        let status = child.wait().unwrap();
        assert_eq!(killed, 1);
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn stray_processes_get_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir
            .path()
            .join(format!("stray-term-{}", std::process::id()));
        let script = r#"trap 'touch "$0.term"; exit 0' TERM; touch "$0.ready"; while :; do sleep 0.05; done"#;
        let mut child = Command::new("sh")
            .args(["-c", script])
            .arg(&marker)
            .spawn()
            .unwrap();
        let ready = marker.with_extension("ready");
        wait_for(|| ready.exists());

        let pattern = marker.to_string_lossy().into_owned();
        let mut signaled = 0;
        let started = Instant::now();
        while signaled == 0 && started.elapsed() < Duration::from_secs(5) {
            signaled = kill_stray_processes(&[pattern.clone()]);
            thread::sleep(Duration::from_millis(50));
        }
        let status = child.wait().unwrap();
        assert_ne!(signaled, 0);
        assert!(status.success(), "{status}");
        assert!(marker.with_extension("term").exists());
    }

    #[cfg(unix)]
    #[test]
    fn cleanup_command_runs_once_per_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("cleanup.txt");
        let script = format!(r#"printf '%s\n' "$0" >> '{}'"#, record.display());
        run_cleanup_command(
            &sh(&script),
            &["launch_servers".to_string(), "server_code".to_string()],
        );
        assert_eq!(
            std::fs::read_to_string(&record).unwrap(),
            "launch_servers\nserver_code\n"
        );
    }

    #[test]
    fn cleanup_command_failures_are_ignored() {
        run_cleanup_command(&["no-such-cleanup-tool-4242".to_string()], &["x".to_string()]);
        run_cleanup_command(&[], &["x".to_string()]);
    }

    #[test]
    fn no_patterns_no_kill() {
        assert_eq!(kill_stray_processes(&[]), 0);
    }
}
