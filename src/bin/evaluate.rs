use bench_eval::prelude::*;

/// Runs one evaluation configured from `EVAL_*` variables and prints its result.
///
/// Exits with status 1 when no score was produced.
fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    let result = Evaluator::new(config).evaluate();

    for (name, value) in result.metrics.entries() {
        println!("{name}: {value}");
    }
    println!("artifacts:");
    for (name, content) in &result.artifacts {
        println!("  {name} ({} bytes)", content.len());
    }
    if let Some(reason) = result.failure() {
        anyhow::bail!("{reason}");
    }
    if result.metrics.compile_successful == 0.0 {
        anyhow::bail!("build failed");
    }
    Ok(())
}
