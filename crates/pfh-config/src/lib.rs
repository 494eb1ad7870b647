//! pfh-config
//!
//! Layered YAML configuration for the history engine.
//! - Documents merge in order; later documents override earlier ones
//! - The merged tree is serialized to canonical JSON and hashed (SHA-256)
//! - `/engine` is deserialized into [`EngineConfig`]
//! - Leaves the engine never reads are reported by the unused-key guard

use anyhow::{bail, Context, Result};
use pfh_history::EngineConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Settings read by [`LoadedConfig::engine_config`], as JSON pointers. A
/// leaf at or below one of these is consumed; everything else is unused.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/engine/match_order",
    "/engine/cover_order",
    "/engine/shorting",
    "/engine/dividends",
    "/engine/missing_price",
    "/engine/missing_rate",
    "/engine/ordering",
    "/engine/on_insufficient",
    "/engine/malformed",
    "/engine/quantity_sign",
    "/engine/base_currency",
    "/engine/currencies",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub consumed_prefixes: Vec<String>,
    /// Sorted JSON pointers of leaves outside every consumed setting.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Check `config_json` against [`CONSUMED_POINTERS`].
///
/// Consumed subtrees are not descended into, so list-valued settings such
/// as `/engine/currencies` count as one setting.
///
/// # Errors
/// Under [`UnusedKeyPolicy::Fail`], when any unused leaf exists.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: Vec<Vec<&str>> = CONSUMED_POINTERS
        .iter()
        .map(|p| p.split('/').skip(1).collect())
        .collect();

    let mut unused = Vec::new();
    let mut pending: Vec<(Vec<String>, &Value)> = vec![(Vec::new(), config_json)];
    while let Some((path, node)) = pending.pop() {
        let covered = consumed
            .iter()
            .any(|c| c.len() <= path.len() && c.iter().zip(&path).all(|(a, b)| *a == b.as_str()));
        if covered {
            continue;
        }
        let children: Vec<(String, &Value)> = match node {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Value::Array(items) => items.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
            _ => {
                unused.push(json_pointer(&path));
                continue;
            }
        };
        for (token, child) in children {
            let mut next = path.clone();
            next.push(token);
            pending.push((next, child));
        }
    }
    unused.sort();

    let report = UnusedKeyReport {
        consumed_prefixes: CONSUMED_POINTERS.iter().map(|p| p.to_string()).collect(),
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} config key(s) are not read by the engine: {}",
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers.join(", ")
        );
    }
    Ok(report)
}

/// RFC 6901 pointer for a token path; the empty path is the root `/`.
fn json_pointer(path: &[String]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter()
        .map(|t| format!("/{}", t.replace('~', "~0").replace('/', "~1")))
        .collect()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Canonical form and hash of an already-merged tree. `serde_json::Map`
    /// is key-sorted, so compact serialization is canonical.
    fn from_merged(config_json: Value) -> Result<Self> {
        let canonical_json =
            serde_json::to_string(&config_json).context("canonical json serialize failed")?;
        Ok(Self {
            config_hash: sha256_hex(canonical_json.as_bytes()),
            canonical_json,
            config_json,
        })
    }

    /// Typed engine settings from the `/engine` subtree (defaults when absent).
    pub fn engine_config(&self) -> Result<EngineConfig> {
        match self.config_json.pointer("/engine") {
            None | Some(Value::Null) => Ok(EngineConfig::default()),
            Some(v) => serde_json::from_value(v.clone()).context("invalid /engine section"),
        }
    }
}

pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for path in paths {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read yaml path: {}", path.display()))?;
        let layer = parse_layer(&raw).with_context(|| format!("in {}", path.display()))?;
        merge_layer(&mut merged, layer);
    }
    LoadedConfig::from_merged(merged)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for raw in yaml_docs {
        merge_layer(&mut merged, parse_layer(raw)?);
    }
    LoadedConfig::from_merged(merged)
}

fn parse_layer(raw: &str) -> Result<Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
    serde_json::to_value(yaml).context("yaml is not representable as json")
}

/// Overlay `layer` onto `base` in place. Mappings merge key by key; any
/// other value replaces what was there. A null layer (an empty YAML
/// document) changes nothing.
fn merge_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_layer(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
