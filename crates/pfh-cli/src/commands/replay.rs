//! `pfh replay`: events file + optional prices + layered config in,
//! export directory out.

use anyhow::{Context, Result};
use pfh_config::{report_unused_keys, sha256_hex, LoadedConfig, UnusedKeyPolicy};
use pfh_portfolio::PriceTable;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::artifacts::{derive_run_id, write_run_artifacts, WriteRunArtifactsArgs};

pub struct ReplayArgs {
    pub events: PathBuf,
    pub prices: Option<PathBuf>,
    pub config_paths: Vec<PathBuf>,
    pub out: PathBuf,
    pub strict_config: bool,
}

pub fn run_replay(args: ReplayArgs) -> Result<()> {
    let loaded: LoadedConfig = if args.config_paths.is_empty() {
        pfh_config::load_layered_yaml_from_strings(&["{}"])?
    } else {
        pfh_config::load_layered_yaml(&args.config_paths)?
    };

    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let unused = report_unused_keys(&loaded.config_json, policy)?;
    for key in &unused.unused_leaf_pointers {
        warn!(pointer = %key, "config key is not read by the engine");
    }
    let engine_config = loaded.engine_config()?;

    let (event_bytes, event_text) = super::read_text(&args.events)?;
    let raws = super::parse_events(&event_text)
        .with_context(|| format!("invalid events file: {}", args.events.display()))?;
    let events_hash = sha256_hex(&event_bytes);

    let (prices, prices_hash) = match &args.prices {
        Some(path) => {
            let (bytes, text) = super::read_text(path)?;
            let table = super::parse_prices(&text)
                .with_context(|| format!("invalid prices file: {}", path.display()))?;
            (table, Some(sha256_hex(&bytes)))
        }
        None => (PriceTable::new(), None),
    };

    let run_id = derive_run_id(&loaded.config_hash, &events_hash, prices_hash.as_deref());
    info!(
        run_id = %run_id,
        config_hash = %loaded.config_hash,
        events = raws.len(),
        prices = prices.len(),
        "replay starting"
    );

    let report = pfh_history::replay(&raws, &engine_config, prices)
        .with_context(|| format!("replay failed (run_id={run_id})"))?;

    let run_dir = write_run_artifacts(WriteRunArtifactsArgs {
        exports_root: &args.out,
        run_id,
        config_hash: &loaded.config_hash,
        events_hash: &events_hash,
        prices_hash: prices_hash.as_deref(),
        report: &report,
    })?;

    println!(
        "replay_ok=true run_id={} snapshots={} matches={} skipped={} rejected={}",
        run_id,
        report.snapshots.len(),
        report.matches.len(),
        report.skipped.len(),
        report.rejected.len()
    );
    if let Some(last) = report.last() {
        println!(
            "final total_equity={} cash={} accounting_pnl={}",
            last.total_equity, last.cash, last.metrics.accounting_pnl
        );
    }
    println!("run_dir={}", run_dir.display());

    Ok(())
}
