//! # Bench Eval
//!
//! Grades a candidate network server end to end: build it, launch it, drive it with a load
//! workload, and turn the load generator's logs into a single score.
//!
//! It provides:
//! - The evaluation workflow (`Evaluator`), returning fixed metrics plus named text artifacts
//! - A process supervisor that owns the server's process group and always tears it down
//! - Reducers from wrk-style and per-connection worker logs into CSV summaries and run metrics
//!
//! The score of a run is `mean throughput (req/s) / mean latency (ms)` over the workers.
//!
//! # Documentation Overview
//!
//! - For the stage by stage workflow and its failure artifacts, see the [`evaluator`] module.
//! - For commands, paths and timeouts, see [`Configuration`](crate::configuration::Configuration).
//! - For server lifecycle and shutdown escalation, see the [`supervisor`] module.
//! - For log formats, scoring and the CSV layouts, see the [`summary`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bench_eval::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new()
//!         .with_root_dir("/srv/go-http-server")
//!         .with_readiness(Duration::from_secs(60), Duration::from_secs(1));
//!
//!     let result = Evaluator::new(config).evaluate();
//!     if let Some(reason) = result.failure() {
//!         eprintln!("run failed: {reason}");
//!     }
//!     println!("score: {}", result.metrics.total_score);
//!
//!     // Logs can also be summarized on their own
//!     let metrics = summarize_basic_workload(
//!         "workloads/wrk_log".as_ref(),
//!         "summary.csv".as_ref(),
//!         "metrics.csv".as_ref(),
//!     )?;
//!     println!("{} workers, score {:.3}", metrics.worker_count, metrics.score);
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod build_step;
pub mod configuration;
pub mod error;
pub mod evaluator;
mod fs_utils;
mod logger;
pub mod result;
pub mod summary;
pub mod supervisor;
pub mod workload;

/// Commonly used types for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use bench_eval::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`Evaluator`](crate::evaluator::Evaluator) and its [`EvaluationResult`](crate::result::EvaluationResult)
/// - the [`ProcessSupervisor`](crate::supervisor::ProcessSupervisor) and its policy
/// - the summary entry points
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::error::EvalError;
    pub use crate::evaluator::Evaluator;
    pub use crate::result::{artifact_keys, EvaluationResult, Metrics};
    pub use crate::summary::scorer::{compute_run_metrics, RunMetrics};
    pub use crate::summary::{summarize_basic_workload, summarize_per_connection};
    pub use crate::supervisor::{ProcessSupervisor, ReadinessProbe, ShutdownPolicy};
}
