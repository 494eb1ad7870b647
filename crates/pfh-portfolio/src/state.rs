use pfh_events::Event;

use crate::arith::Overflow;
use crate::ledger::{Ledger, LedgerError};
use crate::matching::apply_event;
use crate::metrics::{Aggregator, DividendPolicy};
use crate::pricing::{MarkCache, Pricer, PricingError};
use crate::snapshot::{build_snapshot, Snapshot};
use crate::types::LedgerConfig;

/// Failure while applying one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountingError {
    Ledger(LedgerError),
    Pricing(PricingError),
    /// A cash, metric or valuation total left the decimal range.
    Overflow(Overflow),
}

impl std::fmt::Display for AccountingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountingError::Ledger(e) => e.fmt(f),
            AccountingError::Pricing(e) => e.fmt(f),
            AccountingError::Overflow(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for AccountingError {}

impl From<LedgerError> for AccountingError {
    fn from(e: LedgerError) -> Self {
        AccountingError::Ledger(e)
    }
}

impl From<Overflow> for AccountingError {
    fn from(e: Overflow) -> Self {
        AccountingError::Overflow(e)
    }
}

impl From<PricingError> for AccountingError {
    fn from(e: PricingError) -> Self {
        AccountingError::Pricing(e)
    }
}

/// Running state for one account.
///
/// Cloneable so callers can stage an event on a copy and only keep it when
/// the whole step succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortfolioState {
    pub ledger: Ledger,
    pub aggregator: Aggregator,
    pub marks: MarkCache,
}

impl PortfolioState {
    pub fn new(config: LedgerConfig, dividends: DividendPolicy) -> Self {
        Self {
            ledger: Ledger::new(config),
            aggregator: Aggregator::new(dividends),
            marks: MarkCache::default(),
        }
    }

    /// Match, aggregate, and value one event.
    ///
    /// On error `self` may be partially mutated; apply to a clone when the
    /// previous state must survive.
    pub fn apply(&mut self, event: &Event, pricer: &Pricer<'_>) -> Result<Snapshot, AccountingError> {
        let fx = pricer.rate(&mut self.marks, &event.currency, event.date())?;
        if let Some(trade) = event.trade() {
            pricer.observe_execution(&mut self.marks, &trade.symbol, trade.price);
        }

        let outcome = apply_event(&mut self.ledger, event, fx)?;
        self.aggregator.apply(event, fx, &outcome)?;

        build_snapshot(self, event, outcome.records, pricer)
    }
}
