//! Snapshot builder: values the ledger at the event's date and freezes the
//! result together with the aggregator metrics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pfh_events::{Event, EventKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::arith::{self, add, mul, sub, Overflow};
use crate::matching::MatchRecord;
use crate::metrics::{DividendPolicy, PerformanceMetrics};
use crate::pricing::Pricer;
use crate::state::{AccountingError, PortfolioState};
use crate::types::{LotSide, Position, Tranche};

/// Where a position's mark came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkSource {
    Quoted,
    CarriedForward,
    Zero,
}

/// Valued view of one open position. Amounts in base currency unless noted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub side: LotSide,
    /// Signed net quantity.
    pub qty: Decimal,
    /// Weighted average entry price, position currency.
    pub avg_entry_price: Decimal,
    /// Mark price, position currency.
    pub mark: Decimal,
    pub mark_source: MarkSource,
    pub fx_rate: Decimal,
    /// Signed: negative for shorts.
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    /// Entry fees still held by open tranches, position currency.
    pub open_fees: Decimal,
    pub realized_pnl: Decimal,
    pub fees: Decimal,
    pub currency: String,
    pub isin: Option<String>,
    pub first_entry: Option<DateTime<Utc>>,
    pub holding_days: i64,
    pub tranches: Vec<Tranche>,
}

impl PositionView {
    pub fn value(
        pos: &Position,
        side: LotSide,
        mark: Decimal,
        mark_source: MarkSource,
        fx_rate: Decimal,
        as_of: DateTime<Utc>,
    ) -> Result<Self, Overflow> {
        let sign = side.sign();
        let qty = pos.qty_abs();
        let costs = pos
            .tranches
            .iter()
            .map(Tranche::cost_base)
            .collect::<Result<Vec<_>, _>>()?;
        let cost_basis = arith::sum(costs, "cost_basis")?;
        let gross_value = mul(mul(qty, mark, "market_value")?, fx_rate, "market_value")?;
        let first_entry = pos.first_entry();

        Ok(Self {
            symbol: pos.symbol.clone(),
            side,
            qty: sign * qty,
            avg_entry_price: pos.avg_entry_price()?.unwrap_or(Decimal::ZERO),
            mark,
            mark_source,
            fx_rate,
            market_value: sign * gross_value,
            cost_basis,
            unrealized_pnl: sign * sub(gross_value, cost_basis, "unrealized_pnl")?,
            open_fees: pos.open_fees(),
            realized_pnl: pos.realized_pnl,
            fees: pos.fees,
            currency: pos.currency.clone(),
            isin: pos.tranches.iter().find_map(|t| t.isin.clone()),
            first_entry,
            holding_days: first_entry
                .map(|t| (as_of.date_naive() - t.date_naive()).num_days())
                .unwrap_or(0),
            tranches: pos.tranches.iter().cloned().collect(),
        })
    }
}

/// Immutable per-event output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub index: usize,
    pub event_id: String,
    pub kind: EventKind,
    pub ts: DateTime<Utc>,
    pub positions: BTreeMap<String, PositionView>,
    pub cash: Decimal,
    /// Sum of signed market values.
    pub invested: Decimal,
    pub gross_exposure: Decimal,
    pub total_equity: Decimal,
    pub dividend_policy: DividendPolicy,
    pub metrics: PerformanceMetrics,
    /// Matches produced by this event.
    pub matches: Vec<MatchRecord>,
}

/// Value every open position at the event's date, update the drawdown
/// tracker, and freeze the result.
///
/// # Errors
/// [`AccountingError::Pricing`] when a mark or rate cannot be resolved
/// under the configured policies; [`AccountingError::Overflow`] when a
/// valuation leaves the decimal range.
pub fn build_snapshot(
    state: &mut PortfolioState,
    event: &Event,
    matches: Vec<MatchRecord>,
    pricer: &Pricer<'_>,
) -> Result<Snapshot, AccountingError> {
    let date = event.date();
    let PortfolioState {
        ledger,
        aggregator,
        marks,
    } = state;

    let mut positions = BTreeMap::new();
    let mut invested = Decimal::ZERO;
    let mut gross_exposure = Decimal::ZERO;
    let mut unrealized = Decimal::ZERO;

    for pos in ledger.open_positions() {
        let Some(side) = pos.side else { continue };
        let (mark, source) = pricer.mark(marks, &pos.symbol, date)?;
        let rate = pricer.rate(marks, &pos.currency, date)?;
        let view = PositionView::value(pos, side, mark, source, rate, event.ts)?;

        invested = add(invested, view.market_value, "invested")?;
        gross_exposure = add(gross_exposure, view.market_value.abs(), "gross_exposure")?;
        unrealized = add(unrealized, view.unrealized_pnl, "unrealized_pnl")?;
        positions.insert(pos.symbol.clone(), view);
    }

    let total_equity = add(aggregator.cash, invested, "total_equity")?;
    aggregator.observe_equity(total_equity)?;
    let metrics = aggregator.metrics(positions.len(), unrealized)?;

    Ok(Snapshot {
        index: event.index,
        event_id: event.id.clone(),
        kind: event.kind(),
        ts: event.ts,
        cash: aggregator.cash,
        invested,
        gross_exposure,
        total_equity,
        dividend_policy: aggregator.policy,
        metrics,
        positions,
        matches,
    })
}
