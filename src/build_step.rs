use std::{
    path::Path,
    process::{Command, Stdio},
};

use tracing::{error, info, instrument};

/// Result of the external build command.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Exit code was zero.
    pub success: bool,
    /// stdout followed by stderr, trimmed; or why the command could not run.
    pub output: String,
}

/// Runs `command` in `dir` and waits for it.
///
/// A build command that cannot be started is reported as a failed build, never retried.
#[instrument(parent = None)]
pub fn run_build_step(command: &[String], dir: &Path) -> BuildOutcome {
    let Some((program, args)) = command.split_first() else {
        return BuildOutcome {
            success: false,
            output: "Failed to execute build step: empty command".to_string(),
        };
    };

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .stdout(Stdio::piped())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            error!("could not launch build command '{program}': {e}");
            return BuildOutcome {
                success: false,
                output: format!("Failed to execute {}: {e}", command.join(" ")),
            };
        }
    };

    let combined = String::from_utf8_lossy(&output.stdout).into_owned()
        + &String::from_utf8_lossy(&output.stderr);
    let combined = combined.trim().to_string();
    if output.status.success() {
        info!("build succeeded");
    } else {
        error!(
            "build failed ({}): {}",
            output.status,
            combined.lines().next().unwrap_or_default()
        );
    }

    BuildOutcome {
        success: output.status.success(),
        output: combined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn captures_both_streams() {
        let outcome = run_build_step(&sh("echo out; echo err >&2"), Path::new("."));
        assert!(outcome.success);
        assert_eq!(outcome.output, "out\nerr");
    }

    #[test]
    fn non_zero_exit_fails() {
        let outcome = run_build_step(&sh("echo 'undefined: Foo' >&2; exit 2"), Path::new("."));
        assert!(!outcome.success);
        assert_eq!(outcome.output, "undefined: Foo");
    }

    #[test]
    fn missing_program_is_reported() {
        let command = vec!["definitely-not-a-build-tool-4242".to_string()];
        let outcome = run_build_step(&command, Path::new("."));
        assert!(!outcome.success);
        assert!(outcome.output.starts_with("Failed to execute"));
    }
}
