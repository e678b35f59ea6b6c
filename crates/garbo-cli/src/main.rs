mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use garbo_core::impls::{FileLockManager, SqliteStore};
use garbo_core::{GarboConfig, Runner, RunnerOptions, TaskRegistry};
use tracing::Instrument;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli::init_logging(cli.quiet, cli.verbose);

    let mut config =
        GarboConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(lock_dir) = cli.lock_dir {
        config.lock_dir = lock_dir;
    }

    let store = Arc::new(
        SqliteStore::open(&config.database)
            .with_context(|| format!("failed to open {}", config.database.display()))?,
    );
    let registry = TaskRegistry::from_config(&config, store.clone(), store)
        .context("invalid task configuration")?;
    let tasks = registry.tasks_for(cli.set, cli.experimental);

    let options = RunnerOptions {
        threads: cli.threads,
        abort_script: Some(
            cli.abort_script
                .unwrap_or_else(|| cli.set.default_script_timeout()),
        ),
        goal: config.goal,
        cooldown: config.cooldown,
        grace: config.grace,
        requeue_threshold: config.requeue_threshold,
        requeue_pause: config.requeue_pause,
        ..RunnerOptions::default()
    }
    .with_abort_task(cli.abort_task);
    let locks = Arc::new(FileLockManager::new(&config.lock_dir));
    let runner = Runner::new(locks, options);

    let span = tracing::info_span!("script", name = cli.set.script_name());
    let report = runner.run(tasks).instrument(span).await;
    tracing::info!(
        failures = report.failures,
        not_started = report.not_started.len(),
        elapsed_secs = report.elapsed.as_secs_f64(),
        "run finished"
    );

    Ok(ExitCode::from(report.exit_code()))
}
