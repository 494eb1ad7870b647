use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfh_history::RunReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: i32,
    pub run_id: Uuid,
    pub config_hash: String,
    pub events_hash: String,
    pub prices_hash: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub counts: RunCounts,
    pub artifacts: ArtifactList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCounts {
    pub snapshots: usize,
    pub matches: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub resorted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactList {
    pub manifest_json: String,
    pub snapshots_jsonl: String,
    pub matches_csv: String,
}

pub struct WriteRunArtifactsArgs<'a> {
    pub exports_root: &'a Path,
    pub run_id: Uuid,
    pub config_hash: &'a str,
    pub events_hash: &'a str,
    pub prices_hash: Option<&'a str>,
    pub report: &'a RunReport,
}

/// Derive the run id from the content hashes; identical inputs reuse the
/// same export directory.
pub fn derive_run_id(config_hash: &str, events_hash: &str, prices_hash: Option<&str>) -> Uuid {
    let seed = format!(
        "pfh:{config_hash}:{events_hash}:{}",
        prices_hash.unwrap_or("-")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
}

/// Write `exports/<run_id>/{manifest.json, snapshots.jsonl, matches.csv}`.
/// Existing files for the same run are overwritten.
pub fn write_run_artifacts(args: WriteRunArtifactsArgs<'_>) -> Result<PathBuf> {
    let run_dir = args.exports_root.join(args.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("create exports dir failed: {}", run_dir.display()))?;

    write_snapshots(&run_dir.join("snapshots.jsonl"), args.report)?;
    write_matches(&run_dir.join("matches.csv"), args.report)?;

    let manifest = RunManifest {
        schema_version: SCHEMA_VERSION,
        run_id: args.run_id,
        config_hash: args.config_hash.to_string(),
        events_hash: args.events_hash.to_string(),
        prices_hash: args.prices_hash.map(str::to_string),
        created_at_utc: Utc::now(),
        counts: RunCounts {
            snapshots: args.report.snapshots.len(),
            matches: args.report.matches.len(),
            skipped: args.report.skipped.len(),
            rejected: args.report.rejected.len(),
            resorted: args.report.resorted,
        },
        artifacts: ArtifactList {
            manifest_json: "manifest.json".to_string(),
            snapshots_jsonl: "snapshots.jsonl".to_string(),
            matches_csv: "matches.csv".to_string(),
        },
    };

    let manifest_path = run_dir.join("manifest.json");
    let json = serde_json::to_string_pretty(&manifest).context("serialize manifest failed")?;
    fs::write(&manifest_path, format!("{json}\n"))
        .with_context(|| format!("write manifest failed: {}", manifest_path.display()))?;

    Ok(run_dir)
}

fn write_snapshots(path: &Path, report: &RunReport) -> Result<()> {
    let mut out = fs::File::create(path)
        .with_context(|| format!("create snapshots failed: {}", path.display()))?;
    for snap in &report.snapshots {
        let line = serde_json::to_string(snap)
            .with_context(|| format!("serialize snapshot #{} failed", snap.index))?;
        writeln!(out, "{line}").with_context(|| format!("write failed: {}", path.display()))?;
    }
    Ok(())
}

fn write_matches(path: &Path, report: &RunReport) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("create matches csv failed: {}", path.display()))?;
    if report.matches.is_empty() {
        // serialize() emits the header with the first row; keep it for empty runs.
        wtr.write_record(MATCH_COLUMNS)?;
    }
    for m in &report.matches {
        wtr.serialize(m)
            .with_context(|| format!("write match {}->{} failed", m.entry_id, m.exit_id))?;
    }
    wtr.flush()
        .with_context(|| format!("flush failed: {}", path.display()))?;
    Ok(())
}

const MATCH_COLUMNS: &[&str] = &[
    "ts",
    "symbol",
    "side",
    "qty",
    "entry_price",
    "exit_price",
    "currency",
    "fee",
    "entry_id",
    "exit_id",
    "opened_at",
    "holding_days",
    "gross_pnl",
    "net_pnl",
    "fx_adjustment",
    "entry_fx",
    "exit_fx",
];
