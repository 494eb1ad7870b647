use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod artifacts;
mod commands;

#[derive(Parser)]
#[command(name = "pfh")]
#[command(about = "Portfolio history replay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an event file and write the portfolio history
    Replay {
        /// JSON array of raw events
        #[arg(long)]
        events: PathBuf,

        /// Price CSV (symbol,date,close); FX rows use a pair like EUR/USD as symbol
        #[arg(long)]
        prices: Option<PathBuf>,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<PathBuf>,

        /// Exports root; artifacts land in <out>/<run_id>/
        #[arg(long, default_value = "exports")]
        out: PathBuf,

        /// Fail instead of warn when the config has keys nobody reads
        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overrides...)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); silent when missing.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Replay {
            events,
            prices,
            config_paths,
            out,
            strict_config,
        } => commands::replay::run_replay(commands::replay::ReplayArgs {
            events,
            prices,
            config_paths,
            out,
            strict_config,
        })?,

        Commands::ConfigHash { paths } => {
            let loaded = pfh_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
