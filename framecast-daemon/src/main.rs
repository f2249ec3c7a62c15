//! framecast daemon entry point.
//!
//! ```text
//! framecastd                         Run with ./framecast.toml
//! framecastd --config <path>         Load a custom config TOML
//! framecastd --gen-config            Write an example config to stdout
//! framecastd --stats-interval <secs> Override [stats] interval_secs
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use framecast_daemon::config::DaemonConfig;
use framecast_daemon::service::DaemonService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framecastd", about = "Render configured outputs and stream their frames")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framecast.toml")]
    config: PathBuf,

    /// Print an example configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Seconds between stats lines (0 disables).
    #[arg(long)]
    stats_interval: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&DaemonConfig::example())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = DaemonConfig::load(&cli.config);
    if let Some(secs) = cli.stats_interval {
        config.stats.interval_secs = secs;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("framecastd v{}", env!("CARGO_PKG_VERSION"));
    info!("config: {}", cli.config.display());
    info!("sender: {:?}", config.sender.kind);
    info!("outputs configured: {}", config.outputs.len());

    let service = DaemonService::new(config, cli.config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
