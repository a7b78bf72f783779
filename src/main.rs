use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use worklog::config::WorklogConfig;
use worklog::subprocess::SubprocessManager;
use worklog::tracker::{TrackerEngine, TrackerScheduler};

/// Track time spent in git repositories automatically
#[derive(Parser)]
#[command(name = "worklog")]
#[command(about = "Watches git repositories and attributes time to tasks", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch configured repositories and log time (default command)
    Track {
        /// Path to the configuration file
        #[arg(short = 'c', long, default_value = "worklog.config.json")]
        config: PathBuf,

        /// Run a single tick and exit instead of polling
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    let result = match cli.command {
        Some(Commands::Track { config, once }) => run_track(&config, once).await,
        None => run_track(Path::new("worklog.config.json"), false).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run_track(config_path: &Path, once: bool) -> Result<()> {
    let config = WorklogConfig::load(config_path)?;
    let config_dir = config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    debug!(
        "Loaded config from {}: interval {}m",
        config_path.display(),
        config.tracking_interval_minutes
    );

    let subprocess = SubprocessManager::production();
    let mut engine = TrackerEngine::new(&config, &config_dir, &subprocess)?;

    if once {
        let summary = engine.tick().await?;
        debug!(
            "Single tick: {} repos checked, {} log events",
            summary.repos_checked, summary.log_events
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    TrackerScheduler::new(engine)
        .run(cancel)
        .await
        .context("Tracker loop failed")?;
    Ok(())
}
