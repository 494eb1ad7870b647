use std::collections::BTreeSet;

use pfh_events::{MalformedEvent, MalformedPolicy, NormalizeConfig, OrderingPolicy, QuantitySign};
use pfh_portfolio::{
    DividendPolicy, LedgerConfig, LedgerError, MatchOrder, MatchRecord, MissingPricePolicy,
    MissingRatePolicy, ShortPolicy, Snapshot, Valuation,
};
use serde::{Deserialize, Serialize};

/// What to do when a close exceeds the open quantity under no-shorting.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsufficientPolicy {
    /// Abort the run.
    #[default]
    Fail,
    /// Opt-in best effort: drop the event, log it, keep going.
    SkipAndLog,
}

/// Engine configuration surface. Missing keys take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub match_order: MatchOrder,
    /// Covering order for short lots; follows `match_order` when absent.
    pub cover_order: Option<MatchOrder>,
    pub shorting: ShortPolicy,
    pub dividends: DividendPolicy,
    pub missing_price: MissingPricePolicy,
    pub missing_rate: MissingRatePolicy,
    pub ordering: OrderingPolicy,
    pub on_insufficient: InsufficientPolicy,
    pub malformed: MalformedPolicy,
    pub quantity_sign: QuantitySign,
    pub base_currency: Option<String>,
    pub currencies: Option<Vec<String>>,
}

impl EngineConfig {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            match_order: self.match_order,
            cover_order: self.cover_order,
            shorting: self.shorting,
        }
    }

    pub fn normalize_config(&self) -> NormalizeConfig {
        NormalizeConfig {
            ordering: self.ordering,
            malformed: self.malformed,
            quantity_sign: self.quantity_sign,
            currencies: self.currencies.as_ref().map(|list| {
                list.iter()
                    .map(|c| c.trim().to_ascii_uppercase())
                    .collect::<BTreeSet<_>>()
            }),
        }
    }

    pub fn valuation(&self) -> Valuation {
        Valuation {
            base_currency: self
                .base_currency
                .as_deref()
                .map(|c| c.trim().to_ascii_uppercase()),
            missing_price: self.missing_price,
            missing_rate: self.missing_rate,
        }
    }
}

/// An event dropped under [`InsufficientPolicy::SkipAndLog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEvent {
    pub index: usize,
    pub event_id: String,
    pub reason: LedgerError,
}

/// Result of processing one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Committed(Box<Snapshot>),
    Skipped(SkippedEvent),
}

/// Output of a full run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// One per committed event, in processing order.
    pub snapshots: Vec<Snapshot>,
    pub skipped: Vec<SkippedEvent>,
    /// Every match record of the run, in order.
    pub matches: Vec<MatchRecord>,
    /// Records rejected by the normalizer in skip mode.
    pub rejected: Vec<MalformedEvent>,
    /// Input had to be re-sorted by timestamp.
    pub resorted: bool,
}

impl RunReport {
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }
}
