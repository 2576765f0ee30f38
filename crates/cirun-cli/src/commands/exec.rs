//! Local build execution command.

use anyhow::{Context, Result};
use cirun_config::load_runner_config;
use cirun_core::{Build, BuildId, BuildOutcome, Executor, RunnerConfig};
use cirun_executor::new_executor;
use std::sync::Arc;

use crate::local_build::LocalBuild;

/// Run `commands` as one build on the named runner from `config_path`.
pub async fn exec(
    config_path: &str,
    runner_name: &str,
    commands: Vec<String>,
    timeout: i64,
    build_id: u64,
) -> Result<BuildOutcome> {
    let file = load_runner_config(config_path)
        .with_context(|| format!("Failed to load runner config: {}", config_path))?;
    let runner = file
        .find(runner_name)
        .cloned()
        .with_context(|| format!("No runner named '{}' in {}", runner_name, config_path))?;

    let mut executor = new_executor(&runner)
        .with_context(|| format!("Unsupported executor: '{}'", runner.executor))?;
    let build = Arc::new(
        LocalBuild::new(BuildId::new(build_id), commands, timeout)
            .context("Failed to set up build")?,
    );

    println!("Running build {} on runner '{}'", build_id, runner.name);
    run_attempt(executor.as_mut(), Arc::new(runner), build).await
}

/// Drive one attempt through prepare, start, wait and cleanup.
///
/// Cleanup runs on every path once prepare was attempted.
pub async fn run_attempt(
    executor: &mut dyn Executor,
    config: Arc<RunnerConfig>,
    build: Arc<dyn Build>,
) -> Result<BuildOutcome> {
    if let Err(e) = executor.prepare(config, build).await {
        executor.cleanup().await;
        return Err(e).context("Failed to prepare build");
    }
    if let Err(e) = executor.start().await {
        executor.cleanup().await;
        return Err(e).context("Failed to start build");
    }

    let outcome = executor.wait().await;
    executor.cleanup().await;
    Ok(outcome?)
}
