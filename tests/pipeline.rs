use std::{fs, path::Path, time::Duration};

use bench_eval::prelude::*;
use bench_eval::summary::{BASIC_METRICS_CSV, BASIC_SUMMARY_CSV};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const SERVER_UP: &str = "mkdir -p log && echo listening > log/server_0.log && echo launching && exec sleep 30";

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn wrk_report(latency: &str, req_sec: &str) -> String {
    format!(
        "  Thread Stats   Avg      Stdev     Max   +/- Stdev\n    \
         Latency   {latency}    1.00ms  80.00ms   90.00%\n    \
         Req/Sec   {req_sec}     10.00   150.00     70.00%\n"
    )
}

/// Fixture reports the workload stand-in copies into `wrk_log/`.
fn write_fixtures(root: &Path) {
    let fixtures = root.join("fixtures");
    fs::create_dir(&fixtures).unwrap();
    for (id, latency, req_sec) in [(1, "10ms", "100"), (2, "20ms", "200"), (3, "30ms", "300")] {
        fs::write(
            fixtures.join(format!("wrk_client_{id}.log")),
            wrk_report(latency, req_sec),
        )
        .unwrap();
    }
}

const COPY_REPORTS: &str = "mkdir -p wrk_log && cp fixtures/*.log wrk_log/ && echo workload done";

/// Stage events go to the test output; only the first test to get here installs it.
fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_ansi(true)
        .with_target(false)
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn config(root: &Path, launch: &str, workload: &str) -> Configuration {
    init_test_logger();
    Configuration::new()
        .with_root_dir(root)
        .with_build_command(sh("echo built > built.txt && echo compiled"), ".")
        .with_launch_command(sh(launch), "")
        .with_server_logs("log", "server*.log")
        .with_workload_command(sh(workload), ".", "wrk_log")
        .with_stray_processes(["bench-eval-pipeline-test-no-such-process"])
        .with_cleanup_command(Vec::<String>::new())
        .with_readiness(Duration::from_secs(5), Duration::from_millis(50))
        .with_shutdown_policy(ShutdownPolicy {
            interrupt_grace: Duration::from_millis(500),
            terminate_grace: Duration::from_millis(500),
            collector_join: Duration::from_secs(2),
        })
        .with_cleanup_delay(Duration::ZERO)
        .with_verbose(false)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn successful_run_is_scored() {
    let root = tempfile::tempdir().unwrap();
    write_fixtures(root.path());
    let result = Evaluator::new(config(root.path(), SERVER_UP, COPY_REPORTS)).evaluate();

    assert_eq!(result.failure(), None, "{:?}", result.artifacts);
    assert_eq!(result.metrics.compile_successful, 1.0);
    assert_eq!(result.metrics.run_successful, 1.0);
    assert_close(result.metrics.average_tput, 200.0);
    assert_close(result.metrics.average_latency, 20.0);
    assert_close(result.metrics.total_score, 10.0);

    assert_eq!(result.artifact(artifact_keys::COMPILE_OUTPUT), Some("compiled"));
    assert_eq!(
        result.artifact(artifact_keys::WORKLOAD_STDOUT),
        Some("workload done\n")
    );
    assert_eq!(result.artifact(artifact_keys::WORKLOAD_STDERR), Some(""));
    let summary = result.artifact(artifact_keys::SUMMARY_CSV).unwrap();
    assert!(summary.starts_with("worker_id,latency_avg_ms"), "{summary}");
    assert_eq!(summary.lines().count(), 4);
    assert!(result
        .artifact(artifact_keys::METRICS_CSV)
        .unwrap()
        .contains("10.000000"));
    assert_eq!(
        result.artifact(artifact_keys::LAUNCH_SERVERS_OUTPUT),
        Some("launching\n")
    );
    assert!(root.path().join("wrk_log").join(BASIC_SUMMARY_CSV).is_file());
}

#[test]
fn cleanup_command_runs_after_failed_workload() {
    let root = tempfile::tempdir().unwrap();
    let record = root.path().join("cleanup.txt");
    let cleanup = sh(&format!(r#"echo "$0" >> '{}'"#, record.display()));
    let patterns = ["launcher", "server"].map(|p| format!("bench-eval-{p}-{}", std::process::id()));
    let config = config(root.path(), SERVER_UP, "exit 2")
        .with_stray_processes(patterns.clone())
        .with_cleanup_command(cleanup);
    let result = Evaluator::new(config).evaluate();

    assert!(result.artifact(artifact_keys::WORKLOAD_FAILURE).is_some());
    assert_eq!(
        fs::read_to_string(&record).unwrap(),
        format!("{}\n{}\n", patterns[0], patterns[1])
    );
}

#[test]
fn stats_logs_are_attached_when_present() {
    let root = tempfile::tempdir().unwrap();
    write_fixtures(root.path());
    let launch = format!(
        "mkdir -p log && echo 'cpu 12%' > log/cpu_stats_1.log && echo 'q 3' > log/acceptq_stats.log; {SERVER_UP}"
    );
    let result = Evaluator::new(config(root.path(), &launch, COPY_REPORTS)).evaluate();

    assert_eq!(result.metrics.run_successful, 1.0, "{:?}", result.artifacts);
    assert_eq!(
        result.artifact(artifact_keys::CPU_STATS_LOG),
        Some("cpu 12%\n")
    );
    assert_eq!(
        result.artifact(artifact_keys::ACCEPTQ_STATS_LOG),
        Some("q 3\n")
    );
}

#[test]
fn build_failure_stops_before_launch() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), "touch launched; exec sleep 30", COPY_REPORTS)
        .with_build_command(sh("echo 'undefined: handler' >&2; exit 1"), ".");
    let result = Evaluator::new(config).evaluate();

    assert_eq!(result.metrics, Metrics::default());
    assert_eq!(
        result.artifact(artifact_keys::COMPILE_OUTPUT),
        Some("undefined: handler")
    );
    assert_eq!(result.failure(), None);
    assert!(!root.path().join("launched").exists());
}

#[test]
fn missing_build_tool_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), SERVER_UP, COPY_REPORTS)
        .with_build_command(["bench-eval-missing-compiler"], ".");
    let result = Evaluator::new(config).evaluate();

    assert_eq!(result.metrics.compile_successful, 0.0);
    let output = result.artifact(artifact_keys::COMPILE_OUTPUT).unwrap();
    assert!(output.starts_with("Failed to execute"), "{output}");
}

#[test]
fn readiness_timeout_is_a_launch_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), "echo waiting; exec sleep 30", COPY_REPORTS)
        .with_readiness(Duration::from_millis(300), Duration::from_millis(50));
    let result = Evaluator::new(config).evaluate();

    assert_eq!(result.metrics.compile_successful, 1.0);
    assert_eq!(result.metrics.run_successful, 0.0);
    let reason = result.artifact(artifact_keys::LAUNCH_FAILURE).unwrap();
    assert!(reason.contains("did not appear"), "{reason}");
    assert!(reason.contains("exit_code=None"), "{reason}");
    assert_eq!(
        result.artifact(artifact_keys::LAUNCH_SERVERS_OUTPUT),
        Some("waiting\n")
    );
    assert!(result.artifact(artifact_keys::WORKLOAD_STDOUT).is_none());
}

#[test]
fn early_exit_is_a_launch_failure() {
    let root = tempfile::tempdir().unwrap();
    let result =
        Evaluator::new(config(root.path(), "echo 'port in use'; exit 2", COPY_REPORTS)).evaluate();

    let reason = result.artifact(artifact_keys::LAUNCH_FAILURE).unwrap();
    assert!(reason.contains("exit_code=Some(2)"), "{reason}");
    assert_eq!(
        result.artifact(artifact_keys::LAUNCH_SERVERS_OUTPUT),
        Some("port in use\n")
    );
}

#[test]
fn missing_launcher_is_a_launch_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), SERVER_UP, COPY_REPORTS)
        .with_launch_command(["./launch_servers.sh", "4", "agent"], "");
    let result = Evaluator::new(config).evaluate();

    let reason = result.artifact(artifact_keys::LAUNCH_FAILURE).unwrap();
    assert!(reason.starts_with("Failed to launch servers"), "{reason}");
    assert!(result.artifact(artifact_keys::LAUNCH_SERVERS_OUTPUT).is_none());
}

#[test]
fn error_marker_in_server_log_stops_the_run() {
    let root = tempfile::tempdir().unwrap();
    write_fixtures(root.path());
    // renamed into place so readiness never sees a half-written log
    let launch = "mkdir -p log && echo 'listen tcp :8080: bind error' > log/tmp \
                  && echo ok > log/server_0.tmp && mv log/tmp log/server_1.log \
                  && mv log/server_0.tmp log/server_0.log && exec sleep 30";
    let workload = format!("touch workload_ran; {COPY_REPORTS}");
    let result = Evaluator::new(config(root.path(), launch, &workload)).evaluate();

    assert_eq!(
        result.artifact(artifact_keys::LAUNCH_FAILURE),
        Some("Detected 'error' keyword in server logs.")
    );
    assert_eq!(
        result.artifact("log_server_1.log"),
        Some("listen tcp :8080: bind error\n")
    );
    assert!(result.artifact("log_server_0.log").is_none());
    assert!(!root.path().join("workload_ran").exists());
    assert_eq!(result.metrics.run_successful, 0.0);
}

#[test]
fn failing_workload_keeps_its_output() {
    let root = tempfile::tempdir().unwrap();
    let result = Evaluator::new(config(
        root.path(),
        SERVER_UP,
        "echo partial; echo 'wrk: connection refused' >&2; exit 4",
    ))
    .evaluate();

    let reason = result.artifact(artifact_keys::WORKLOAD_FAILURE).unwrap();
    assert!(reason.contains("exited with code 4"), "{reason}");
    assert_eq!(result.artifact(artifact_keys::WORKLOAD_STDOUT), Some("partial\n"));
    assert_eq!(
        result.artifact(artifact_keys::WORKLOAD_STDERR),
        Some("wrk: connection refused\n")
    );
    assert_eq!(result.metrics.run_successful, 0.0);
}

#[test]
fn missing_summaries_are_a_workload_failure() {
    let root = tempfile::tempdir().unwrap();
    let result = Evaluator::new(config(root.path(), SERVER_UP, "mkdir -p wrk_log")).evaluate();

    assert_eq!(
        result.artifact(artifact_keys::WORKLOAD_FAILURE),
        Some("Expected workload summary files were not generated.")
    );
    assert_eq!(result.metrics.run_successful, 0.0);
}

#[test]
fn malformed_worker_log_is_a_workload_failure() {
    let root = tempfile::tempdir().unwrap();
    let workload = "mkdir -p wrk_log && echo 'Latency 1ms 1ms' > wrk_log/wrk_client_1.log";
    let result = Evaluator::new(config(root.path(), SERVER_UP, workload)).evaluate();

    let reason = result.artifact(artifact_keys::WORKLOAD_FAILURE).unwrap();
    assert!(reason.starts_with("Could not summarize worker logs"), "{reason}");
    assert!(reason.contains("req_per_sec_avg"), "{reason}");
    assert!(!root.path().join("wrk_log").join(BASIC_METRICS_CSV).exists());
}

#[test]
fn summaries_written_by_the_workload_are_read() {
    let root = tempfile::tempdir().unwrap();
    let workload = format!(
        "mkdir -p wrk_log && echo 'worker_id' > wrk_log/{BASIC_SUMMARY_CSV} && \
         printf 'workers,avg_latency_ms,latency_stddev_ms,avg_req_per_sec,req_per_sec_stddev,score\\n\
         2,4.000000,1.000000,800.000000,5.000000,200.000000\\n' > wrk_log/{BASIC_METRICS_CSV}"
    );
    let config = config(root.path(), SERVER_UP, &workload).with_summarize_logs(false);
    let result = Evaluator::new(config).evaluate();

    assert_eq!(result.failure(), None, "{:?}", result.artifacts);
    assert_close(result.metrics.average_tput, 800.0);
    assert_close(result.metrics.average_latency, 4.0);
    assert_close(result.metrics.total_score, 200.0);
}

#[test]
fn metrics_without_score_column_are_a_workload_failure() {
    let root = tempfile::tempdir().unwrap();
    let workload = format!(
        "mkdir -p wrk_log && echo 'worker_id' > wrk_log/{BASIC_SUMMARY_CSV} && \
         printf 'avg_req_per_sec,avg_latency_ms\\n1,1\\n' > wrk_log/{BASIC_METRICS_CSV}"
    );
    let config = config(root.path(), SERVER_UP, &workload).with_summarize_logs(false);
    let result = Evaluator::new(config).evaluate();

    let reason = result.artifact(artifact_keys::WORKLOAD_FAILURE).unwrap();
    assert!(reason.contains("missing fields: score"), "{reason}");
    assert_eq!(result.metrics.run_successful, 0.0);
    assert_eq!(result.metrics.total_score, 0.0);
}
