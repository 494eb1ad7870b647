use chrono::{DateTime, Utc};
use pfh_events::{
    check_order, normalize_all, Event, MalformedReason, NormalizeError, RawEvent,
};
use pfh_portfolio::{
    AccountingError, LedgerError, Overflow, PortfolioState, PriceSource, Pricer, PricingError,
    Valuation,
};
use tracing::{debug, info, warn};

use crate::types::{EngineConfig, InsufficientPolicy, RunReport, SkippedEvent, Step};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunErrorKind {
    Malformed(MalformedReason),
    OutOfOrder {
        ts: DateTime<Utc>,
        previous_ts: DateTime<Utc>,
    },
    Ledger(LedgerError),
    Pricing(PricingError),
    Overflow(Overflow),
}

impl core::fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RunErrorKind::Malformed(r) => write!(f, "malformed: {r}"),
            RunErrorKind::OutOfOrder { ts, previous_ts } => {
                write!(f, "out of order: {ts} precedes {previous_ts}")
            }
            RunErrorKind::Ledger(e) => e.fmt(f),
            RunErrorKind::Pricing(e) => e.fmt(f),
            RunErrorKind::Overflow(e) => e.fmt(f),
        }
    }
}

/// Fatal run failure, tagged with the feed index and id of the failing event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunError {
    pub index: usize,
    pub event_id: String,
    pub kind: RunErrorKind,
}

impl RunError {
    fn at(event: &Event, kind: RunErrorKind) -> Self {
        Self {
            index: event.index,
            event_id: event.id.clone(),
            kind,
        }
    }
}

impl core::fmt::Display for RunError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "event #{} (id='{}'): {}",
            self.index, self.event_id, self.kind
        )
    }
}

impl std::error::Error for RunError {}

impl From<NormalizeError> for RunError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::Malformed(m) => RunError {
                index: m.index,
                event_id: m.id,
                kind: RunErrorKind::Malformed(m.reason),
            },
            NormalizeError::OutOfOrder(o) => RunError {
                index: o.index,
                event_id: o.id,
                kind: RunErrorKind::OutOfOrder {
                    ts: o.ts,
                    previous_ts: o.previous_ts,
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequential, single-account history engine.
///
/// Pipeline per event: MATCH -> AGGREGATE -> VALUE -> COMMIT
///
/// Every event is applied to a staged copy of the portfolio state; the copy
/// replaces the committed state only when the whole step succeeded, so a
/// failed event never leaves a partial mutation behind.
pub struct HistoryEngine<P: PriceSource> {
    config: EngineConfig,
    valuation: Valuation,
    prices: P,
    state: PortfolioState,
    last_ts: Option<DateTime<Utc>>,
    committed: usize,
}

impl<P: PriceSource> HistoryEngine<P> {
    pub fn new(config: EngineConfig, prices: P) -> Self {
        let state = PortfolioState::new(config.ledger_config(), config.dividends);
        let valuation = config.valuation();
        Self {
            config,
            valuation,
            prices,
            state,
            last_ts: None,
            committed: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last committed state.
    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Process one event.
    ///
    /// # Errors
    /// Out-of-order timestamps, ledger failures (unless skip-and-log is
    /// configured for insufficient quantity), unresolved prices/rates, and
    /// amounts out of decimal range.
    /// The committed state is unchanged on error.
    pub fn process(&mut self, event: &Event) -> Result<Step, RunError> {
        if let Some(previous_ts) = self.last_ts {
            if event.ts < previous_ts {
                return Err(RunError::at(
                    event,
                    RunErrorKind::OutOfOrder {
                        ts: event.ts,
                        previous_ts,
                    },
                ));
            }
        }

        let pricer = Pricer::new(&self.prices, &self.valuation);
        let mut staged = self.state.clone();

        match staged.apply(event, &pricer) {
            Ok(snapshot) => {
                self.state = staged;
                self.last_ts = Some(event.ts);
                self.committed += 1;
                debug!(
                    index = event.index,
                    id = %event.id,
                    kind = %event.kind(),
                    matches = snapshot.matches.len(),
                    equity = %snapshot.total_equity,
                    "event committed"
                );
                Ok(Step::Committed(Box::new(snapshot)))
            }
            Err(AccountingError::Ledger(e @ LedgerError::InsufficientQuantity { .. }))
                if self.config.on_insufficient == InsufficientPolicy::SkipAndLog =>
            {
                self.last_ts = Some(event.ts);
                warn!(index = event.index, id = %event.id, error = %e, "event skipped");
                Ok(Step::Skipped(SkippedEvent {
                    index: event.index,
                    event_id: event.id.clone(),
                    reason: e,
                }))
            }
            Err(AccountingError::Ledger(e)) => Err(RunError::at(event, RunErrorKind::Ledger(e))),
            Err(AccountingError::Pricing(e)) => Err(RunError::at(event, RunErrorKind::Pricing(e))),
            Err(AccountingError::Overflow(e)) => {
                Err(RunError::at(event, RunErrorKind::Overflow(e)))
            }
        }
    }

    /// Process an ordered event sequence.
    ///
    /// Order is checked up front; nothing is processed when it is violated.
    pub fn run(&mut self, events: &[Event]) -> Result<RunReport, RunError> {
        check_order(events).map_err(|e| RunError {
            index: e.index,
            event_id: e.id,
            kind: RunErrorKind::OutOfOrder {
                ts: e.ts,
                previous_ts: e.previous_ts,
            },
        })?;

        let mut report = RunReport::default();
        for event in events {
            match self.process(event)? {
                Step::Committed(snapshot) => {
                    report.matches.extend(snapshot.matches.iter().cloned());
                    report.snapshots.push(*snapshot);
                }
                Step::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        info!(
            events = events.len(),
            snapshots = report.snapshots.len(),
            skipped = report.skipped.len(),
            matches = report.matches.len(),
            "run complete"
        );
        Ok(report)
    }
}

/// Normalize a raw feed and run it through a fresh engine.
pub fn replay<P: PriceSource>(
    raws: &[RawEvent],
    config: &EngineConfig,
    prices: P,
) -> Result<RunReport, RunError> {
    let batch = normalize_all(raws, &config.normalize_config())?;
    if batch.resorted {
        warn!(events = batch.events.len(), "input re-sorted by timestamp");
    }
    for r in &batch.rejected {
        warn!(index = r.index, id = %r.id, reason = %r.reason, "record rejected");
    }

    let mut engine = HistoryEngine::new(config.clone(), prices);
    let mut report = engine.run(&batch.events)?;
    report.rejected = batch.rejected;
    report.resorted = batch.resorted;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pfh_events::{EventBody, Trade};
    use pfh_portfolio::{MissingPricePolicy, PriceTable};
    use rust_decimal::Decimal;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap()
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn carry() -> EngineConfig {
        EngineConfig {
            missing_price: MissingPricePolicy::CarryForward,
            ..EngineConfig::default()
        }
    }

    fn buy(i: usize, day: u32, qty: i64) -> Event {
        Event::new(
            i,
            format!("b{i}"),
            ts(day),
            "USD".to_string(),
            EventBody::Buy(Trade::new("AAPL", dec(qty), dec(10))),
        )
    }

    fn sell(i: usize, day: u32, qty: i64) -> Event {
        Event::new(
            i,
            format!("s{i}"),
            ts(day),
            "USD".to_string(),
            EventBody::Sell(Trade::new("AAPL", dec(qty), dec(12))),
        )
    }

    #[test]
    fn failed_event_leaves_committed_state_untouched() {
        let mut engine = HistoryEngine::new(carry(), PriceTable::new());
        engine.process(&buy(0, 1, 10)).unwrap();
        let before = engine.state().clone();

        let err = engine.process(&sell(1, 2, 11)).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.event_id, "s1");
        assert!(matches!(
            err.kind,
            RunErrorKind::Ledger(LedgerError::InsufficientQuantity { .. })
        ));
        assert_eq!(engine.state(), &before);
        assert_eq!(engine.committed(), 1);
    }

    #[test]
    fn skip_and_log_drops_only_the_bad_event() {
        let cfg = EngineConfig {
            on_insufficient: InsufficientPolicy::SkipAndLog,
            ..carry()
        };
        let mut engine = HistoryEngine::new(cfg, PriceTable::new());
        let report = engine
            .run(&[buy(0, 1, 10), sell(1, 2, 11), sell(2, 3, 10)])
            .unwrap();

        assert_eq!(report.snapshots.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].event_id, "s1");
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.last().unwrap().metrics.trading_pnl, dec(20));
    }

    #[test]
    fn pricing_failure_is_fatal_and_reported() {
        let mut engine = HistoryEngine::new(EngineConfig::default(), PriceTable::new());
        let err = engine.process(&buy(0, 1, 1)).unwrap_err();
        assert!(matches!(err.kind, RunErrorKind::Pricing(PricingError::PriceUnavailable { .. })));
        assert_eq!(
            err.to_string(),
            "event #0 (id='b0'): price unavailable for AAPL on 2024-04-01"
        );
    }

    #[test]
    fn run_rejects_unordered_input_before_processing() {
        let mut engine = HistoryEngine::new(carry(), PriceTable::new());
        let err = engine.run(&[buy(0, 2, 1), buy(1, 1, 1)]).unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(err.kind, RunErrorKind::OutOfOrder { .. }));
        assert_eq!(engine.committed(), 0);
    }

    #[test]
    fn process_rejects_event_older_than_last_commit() {
        let mut engine = HistoryEngine::new(carry(), PriceTable::new());
        engine.process(&buy(0, 5, 1)).unwrap();
        let err = engine.process(&buy(1, 4, 1)).unwrap_err();
        assert!(matches!(err.kind, RunErrorKind::OutOfOrder { .. }));
    }

    const HUGE_QTY: &str = "100000000000000000";
    const HUGE_PRICE: &str = "1000000000000";

    #[test]
    fn replay_reports_out_of_range_notional_as_malformed() {
        let raws = [RawEvent::new("b1", "2024-04-01", "BUY", "USD")
            .symbol("AAPL")
            .quantity(HUGE_QTY)
            .price(HUGE_PRICE)];
        let err = replay(&raws, &carry(), PriceTable::new()).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.event_id, "b1");
        assert_eq!(
            err.kind,
            RunErrorKind::Malformed(MalformedReason::Overflow { field: "amount" })
        );
    }

    #[test]
    fn replay_reports_out_of_range_pnl_with_event_identity() {
        let raws = [
            RawEvent::new("b1", "2024-04-01", "BUY", "USD")
                .symbol("AAPL")
                .quantity(HUGE_QTY)
                .price("1")
                .amount("1"),
            RawEvent::new("s1", "2024-04-02", "SELL", "USD")
                .symbol("AAPL")
                .quantity(format!("-{HUGE_QTY}"))
                .price(HUGE_PRICE)
                .amount("1"),
        ];
        let err = replay(&raws, &carry(), PriceTable::new()).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.event_id, "s1");
        assert_eq!(
            err.kind,
            RunErrorKind::Ledger(LedgerError::Overflow {
                symbol: "AAPL".to_string(),
                what: "gross_pnl",
            })
        );
    }

    #[test]
    fn cash_overflow_is_fatal_and_keeps_state() {
        let big = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        let deposit = |i: usize| {
            Event::new(
                i,
                format!("d{i}"),
                ts(1),
                "USD".to_string(),
                EventBody::Deposit { amount: big },
            )
        };
        let mut engine = HistoryEngine::new(carry(), PriceTable::new());
        engine.process(&deposit(0)).unwrap();
        let before = engine.state().clone();

        let err = engine.process(&deposit(1)).unwrap_err();
        assert_eq!(err.event_id, "d1");
        assert_eq!(err.kind, RunErrorKind::Overflow(Overflow { what: "cash" }));
        assert_eq!(
            err.to_string(),
            "event #1 (id='d1'): decimal overflow computing cash"
        );
        assert_eq!(engine.state(), &before);
    }
}
