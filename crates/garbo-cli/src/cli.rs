use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use garbo_core::TaskSet;
use tracing_subscriber::EnvFilter;

/// Run a set of database maintenance tasks.
#[derive(Debug, Parser)]
#[command(name = "garbo", version, about)]
pub struct Cli {
    /// Task set to run: frequent, hourly or daily.
    pub set: TaskSet,

    /// Run experimental tasks too.
    #[arg(short = 'x', long)]
    pub experimental: bool,

    /// Abort the script after SECS seconds [default depends on the set].
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub abort_script: Option<Duration>,

    /// Abort a task if it runs over SECS seconds
    /// [default: threads * remaining time / remaining tasks].
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub abort_task: Option<Duration>,

    /// Run NUM tasks in parallel.
    #[arg(long, value_name = "NUM", default_value_t = default_threads())]
    pub threads: usize,

    /// Configuration file [default: ./garbo.toml if present].
    #[arg(short, long, value_name = "FILE", env = "GARBO_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database, overriding the configuration.
    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Directory for the task lock files, overriding the configuration.
    #[arg(long, value_name = "DIR")]
    pub lock_dir: Option<PathBuf>,

    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

/// `RUST_LOG` wins; otherwise `-q` / `-v` pick the level.
pub fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
