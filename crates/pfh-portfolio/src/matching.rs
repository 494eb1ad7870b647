//! Matching engine: turns one ordered [`Event`] into ledger mutations and
//! per-tranche realized-PnL records.
//!
//! Per symbol the position moves through `Flat -> Long -> Flat` or
//! `Flat -> Short -> Flat`. With shorting allowed a single over-sized close
//! goes `Long -> Short` (or `Short -> Long`) directly; the [`MatchOutcome`]
//! then carries both the closing matches and the opened remainder.
//!
//! PnL per match, for a closed lot of side `s` (+1 long, -1 short):
//! - `gross_pnl     = s * (exit - entry) * qty * exit_fx`
//! - `fx_adjustment = s * qty * entry * (exit_fx - entry_fx)`
//! - `fee           = released_entry_fee * entry_fx + exit_fee_share * exit_fx`
//! - `net_pnl       = gross_pnl - fee`

use chrono::{DateTime, Utc};
use pfh_events::{Event, EventBody, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::arith::{self, Overflow};
use crate::ledger::{Ledger, LedgerError, TrancheMatch};
use crate::types::{LotSide, PositionPhase, Tranche};

/// One tranche match. Never merged with its siblings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    /// Side of the lot that was closed.
    pub side: LotSide,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub currency: String,
    /// Released entry fee plus allocated exit fee, base currency.
    pub fee: Decimal,
    pub entry_id: String,
    pub exit_id: String,
    pub opened_at: DateTime<Utc>,
    pub holding_days: i64,
    /// Price PnL in base currency, fees excluded.
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub fx_adjustment: Decimal,
    pub entry_fx: Decimal,
    pub exit_fx: Decimal,
}

/// Everything one event did to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    pub records: Vec<MatchRecord>,
    /// Tranche opened by the event (a plain open or a flip remainder).
    pub opened: Option<Tranche>,
    pub before: PositionPhase,
    pub after: PositionPhase,
}

impl MatchOutcome {
    fn cash_only() -> Self {
        Self {
            records: Vec::new(),
            opened: None,
            before: PositionPhase::Flat,
            after: PositionPhase::Flat,
        }
    }

    /// A non-flat position went flat (or flipped through flat).
    pub fn round_turn_closed(&self) -> bool {
        self.before != PositionPhase::Flat && self.after != self.before
    }

    pub fn matched_qty(&self) -> Decimal {
        self.records.iter().map(|r| r.qty).sum()
    }
}

/// Apply one event to the ledger.
///
/// `fx` converts the event currency into the base currency (1 without a
/// base). Cash-only events leave the ledger untouched.
///
/// # Errors
/// [`LedgerError::InsufficientQuantity`] when a SELL exceeds the long
/// quantity and shorting is forbidden; the ledger is unchanged in that case.
/// [`LedgerError::Overflow`] when a PnL or fee amount leaves the decimal
/// range; the ledger may already be mutated then.
pub fn apply_event(
    ledger: &mut Ledger,
    event: &Event,
    fx: Decimal,
) -> Result<MatchOutcome, LedgerError> {
    match &event.body {
        EventBody::Buy(trade) => {
            let before = ledger.phase(&trade.symbol);
            if before == PositionPhase::Short {
                close(ledger, event, trade, LotSide::Short, fx, before)
            } else {
                let tranche = opening_tranche(event, trade, fx);
                let fee = arith::mul(event.commission, fx, "fees")
                    .map_err(|e| LedgerError::overflow(&trade.symbol, e))?;
                ledger.open(&trade.symbol, LotSide::Long, tranche.clone())?;
                ledger.book(&trade.symbol, Decimal::ZERO, fee)?;
                Ok(MatchOutcome {
                    records: Vec::new(),
                    opened: Some(tranche),
                    before,
                    after: ledger.phase(&trade.symbol),
                })
            }
        }
        EventBody::Sell(trade) => {
            let before = ledger.phase(&trade.symbol);
            close(ledger, event, trade, LotSide::Long, fx, before)
        }
        EventBody::Dividend { .. } | EventBody::Deposit { .. } | EventBody::Withdrawal { .. } => {
            Ok(MatchOutcome::cash_only())
        }
    }
}

fn opening_tranche(event: &Event, trade: &Trade, fx: Decimal) -> Tranche {
    Tranche::new(
        event.id.clone(),
        event.ts,
        trade.qty,
        trade.price,
        event.currency.clone(),
    )
    .with_fee(event.commission)
    .with_isin(event.isin.clone())
    .with_entry_fx(fx)
}

fn close(
    ledger: &mut Ledger,
    event: &Event,
    trade: &Trade,
    closes: LotSide,
    fx: Decimal,
    before: PositionPhase,
) -> Result<MatchOutcome, LedgerError> {
    let outcome = ledger.close(&trade.symbol, closes, opening_tranche(event, trade, fx))?;

    let overflow = |e| LedgerError::overflow(&trade.symbol, e);
    let records = outcome
        .matches
        .iter()
        .map(|m| record(event, trade, closes, fx, m))
        .collect::<Result<Vec<_>, _>>()
        .map_err(overflow)?;

    let realized = arith::sum(records.iter().map(|r| r.gross_pnl), "realized_pnl").map_err(overflow)?;
    let fee = arith::mul(event.commission, fx, "fees").map_err(overflow)?;
    ledger.book(&trade.symbol, realized, fee)?;

    Ok(MatchOutcome {
        records,
        opened: outcome.opened,
        before,
        after: ledger.phase(&trade.symbol),
    })
}

fn record(
    event: &Event,
    trade: &Trade,
    side: LotSide,
    exit_fx: Decimal,
    m: &TrancheMatch,
) -> Result<MatchRecord, Overflow> {
    use crate::arith::{add, mul, sub};

    let lot = &m.tranche;
    let sign = side.sign();

    let exit_fee = arith::pro_rata(event.commission, m.qty, trade.qty);
    let fee = add(
        mul(m.released_fee, lot.entry_fx, "fee")?,
        mul(exit_fee, exit_fx, "fee")?,
        "fee",
    )?;

    let move_per_unit = sub(trade.price, lot.entry_price, "gross_pnl")?;
    let gross_pnl = mul(mul(sign * move_per_unit, m.qty, "gross_pnl")?, exit_fx, "gross_pnl")?;

    let entry_notional = mul(m.qty, lot.entry_price, "fx_adjustment")?;
    let fx_move = sub(exit_fx, lot.entry_fx, "fx_adjustment")?;
    let fx_adjustment = sign * mul(entry_notional, fx_move, "fx_adjustment")?;

    Ok(MatchRecord {
        ts: event.ts,
        symbol: trade.symbol.clone(),
        side,
        qty: m.qty,
        entry_price: lot.entry_price,
        exit_price: trade.price,
        currency: event.currency.clone(),
        fee,
        entry_id: lot.source_id.clone(),
        exit_id: event.id.clone(),
        opened_at: lot.opened_at,
        holding_days: (event.date() - lot.opened_at.date_naive()).num_days(),
        gross_pnl,
        net_pnl: sub(gross_pnl, fee, "net_pnl")?,
        fx_adjustment,
        entry_fx: lot.entry_fx,
        exit_fx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LedgerConfig, MatchOrder, ShortPolicy};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn buy(id: &str, day: u32, qty: i64, px: i64) -> Event {
        Event::new(
            0,
            id,
            ts(day),
            "USD",
            EventBody::Buy(Trade::new("AAPL", dec(qty), dec(px))),
        )
    }

    fn sell(id: &str, day: u32, qty: i64, px: i64) -> Event {
        Event::new(
            0,
            id,
            ts(day),
            "USD",
            EventBody::Sell(Trade::new("AAPL", dec(qty), dec(px))),
        )
    }

    #[test]
    fn long_round_turn_realizes_per_tranche() {
        let mut l = Ledger::new(LedgerConfig::default());
        apply_event(&mut l, &buy("b1", 1, 100, 50), Decimal::ONE).unwrap();
        apply_event(&mut l, &buy("b2", 2, 50, 55), Decimal::ONE).unwrap();
        let out = apply_event(&mut l, &sell("s1", 5, 150, 60), Decimal::ONE).unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].gross_pnl, dec(1000));
        assert_eq!(out.records[1].gross_pnl, dec(250));
        assert_eq!(out.records[0].holding_days, 4);
        assert_eq!(out.records[1].entry_id, "b2");
        assert!(out.round_turn_closed());
        assert_eq!(out.matched_qty(), dec(150));
        assert_eq!(l.position("AAPL").unwrap().realized_pnl, dec(1250));
    }

    #[test]
    fn fees_split_between_entry_and_exit() {
        let mut l = Ledger::new(LedgerConfig::default());
        apply_event(
            &mut l,
            &buy("b1", 1, 100, 50).with_commission(dec(10)),
            Decimal::ONE,
        )
        .unwrap();
        let out = apply_event(
            &mut l,
            &sell("s1", 2, 40, 60).with_commission(dec(2)),
            Decimal::ONE,
        )
        .unwrap();

        let r = &out.records[0];
        assert_eq!(r.fee, dec(6));
        assert_eq!(r.gross_pnl, dec(400));
        assert_eq!(r.net_pnl, dec(394));
        assert!(!out.round_turn_closed());
        assert_eq!(l.position("AAPL").unwrap().fees, dec(12));
    }

    #[test]
    fn short_cover_inverts_sign() {
        let mut l = Ledger::new(LedgerConfig::new(MatchOrder::Fifo, ShortPolicy::Allow));
        let open = apply_event(&mut l, &sell("s1", 1, 10, 100), Decimal::ONE).unwrap();
        assert_eq!(open.after, PositionPhase::Short);
        assert!(open.records.is_empty());

        let out = apply_event(&mut l, &buy("c1", 2, 10, 90), Decimal::ONE).unwrap();
        assert_eq!(out.records[0].side, LotSide::Short);
        assert_eq!(out.records[0].gross_pnl, dec(100));
        assert!(out.round_turn_closed());
        assert_eq!(out.after, PositionPhase::Flat);
    }

    #[test]
    fn oversized_cover_flips_to_long() {
        let mut l = Ledger::new(LedgerConfig::new(MatchOrder::Fifo, ShortPolicy::Allow));
        apply_event(&mut l, &sell("s1", 1, 10, 100), Decimal::ONE).unwrap();
        let out = apply_event(&mut l, &buy("b1", 2, 15, 90), Decimal::ONE).unwrap();

        assert_eq!(out.matched_qty(), dec(10));
        assert_eq!(out.opened.as_ref().map(|t| t.qty), Some(dec(5)));
        assert_eq!(out.before, PositionPhase::Short);
        assert_eq!(out.after, PositionPhase::Long);
        assert!(out.round_turn_closed());
        assert_eq!(l.qty_signed("AAPL"), dec(5));
    }

    #[test]
    fn sell_while_flat_is_insufficient_under_forbid() {
        let mut l = Ledger::new(LedgerConfig::default());
        let err = apply_event(&mut l, &sell("s1", 1, 10, 100), Decimal::ONE).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientQuantity {
                symbol: "AAPL".to_string(),
                requested: dec(10),
                available: Decimal::ZERO,
            }
        );
        assert!(l.positions().is_empty());
    }

    #[test]
    fn fx_adjustment_separates_currency_effect() {
        let mut l = Ledger::new(LedgerConfig::default());
        let mut b = buy("b1", 1, 10, 100);
        b.currency = "EUR".to_string();
        let mut s = sell("s1", 2, 10, 110);
        s.currency = "EUR".to_string();

        apply_event(&mut l, &b, Decimal::new(11, 1)).unwrap();
        let out = apply_event(&mut l, &s, Decimal::new(12, 1)).unwrap();
        let r = &out.records[0];

        // base proceeds 1320 - base cost 1100 = 220 = 120 price + 100 fx
        assert_eq!(r.gross_pnl, dec(120));
        assert_eq!(r.fx_adjustment, dec(100));
    }

    #[test]
    fn cash_events_do_not_touch_ledger() {
        let mut l = Ledger::new(LedgerConfig::default());
        let ev = Event::new(0, "d1", ts(1), "USD", EventBody::Deposit { amount: dec(1000) });
        let out = apply_event(&mut l, &ev, Decimal::ONE).unwrap();
        assert!(out.records.is_empty());
        assert!(!out.round_turn_closed());
        assert!(l.positions().is_empty());
    }

    #[test]
    fn pnl_out_of_range_is_a_ledger_error() {
        let qty = Decimal::from_str_exact("100000000000000000").unwrap();
        let mut l = Ledger::new(LedgerConfig::default());
        let b = Event::new(
            0,
            "b1",
            ts(1),
            "USD",
            EventBody::Buy(Trade::new("AAPL", qty, dec(1))),
        );
        apply_event(&mut l, &b, Decimal::ONE).unwrap();

        let exit = Trade::new("AAPL", dec(1), dec(1_000_000_000_000)).with_gross(dec(1));
        let s = Event::new(
            1,
            "s1",
            ts(2),
            "USD",
            EventBody::Sell(Trade { qty, ..exit }),
        );
        let err = apply_event(&mut l, &s, Decimal::ONE).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Overflow {
                symbol: "AAPL".to_string(),
                what: "gross_pnl",
            }
        );
    }
}

