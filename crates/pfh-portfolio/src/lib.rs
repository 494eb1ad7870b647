//! pfh-portfolio
//!
//! Lot-matching and portfolio-accounting core.
//! - Tranche ledger with FIFO/LIFO matching and an independent cover order
//! - Optional shorting with explicit long/short flips
//! - Per-tranche realized-PnL records (never merged)
//! - Cumulative metrics with clean (inflow-neutral) drawdown
//! - Snapshot valuation through an external price source
//! - Pure deterministic logic (no IO, no clock); all numerics are `Decimal`

mod arith;
mod matching;
mod metrics;
mod state;
mod types;

pub mod ledger;
pub mod pricing;
pub mod snapshot;

pub use arith::Overflow;
pub use ledger::{CloseOutcome, Ledger, LedgerError, TrancheMatch};
pub use matching::{apply_event, MatchOutcome, MatchRecord};
pub use metrics::{Aggregator, DividendPolicy, PerformanceMetrics, ProfitFactor};
pub use pricing::{
    CurrencyPair, MarkCache, MissingPricePolicy, MissingRatePolicy, PriceSource, PriceTable,
    Pricer, PricingError, Valuation,
};
pub use snapshot::{build_snapshot, MarkSource, PositionView, Snapshot};
pub use state::{AccountingError, PortfolioState};
pub use types::{
    LedgerConfig, LotSide, MatchOrder, Position, PositionPhase, ShortPolicy, Tranche,
};
