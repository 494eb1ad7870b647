use chrono::{DateTime, TimeZone, Utc};
use pfh_events::{Event, EventBody, Trade};
use pfh_portfolio::{
    apply_event, Ledger, LedgerConfig, LedgerError, LotSide, MatchOrder, PositionPhase,
    ShortPolicy,
};
use rust_decimal::Decimal;

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, day, 16, 0, 0).unwrap()
}

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

fn trade(index: usize, id: &str, day: u32, buy: bool, qty: i64, px: i64) -> Event {
    let t = Trade::new("AAPL", dec(qty), dec(px));
    let body = if buy { EventBody::Buy(t) } else { EventBody::Sell(t) };
    Event::new(index, id, ts(day), "USD", body)
}

fn seeded(cfg: LedgerConfig) -> Ledger {
    let mut ledger = Ledger::new(cfg);
    apply_event(&mut ledger, &trade(0, "T1", 1, true, 100, 50), Decimal::ONE).unwrap();
    apply_event(&mut ledger, &trade(1, "T2", 2, true, 50, 55), Decimal::ONE).unwrap();
    ledger
}

#[test]
fn scenario_fifo_sell_120_matches_t1_then_t2() {
    let mut ledger = seeded(LedgerConfig::default());
    let out = apply_event(&mut ledger, &trade(2, "S", 3, false, 120, 60), Decimal::ONE).unwrap();

    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].entry_id, "T1");
    assert_eq!(out.records[0].qty, dec(100));
    assert_eq!(out.records[0].entry_price, dec(50));
    assert_eq!(out.records[1].entry_id, "T2");
    assert_eq!(out.records[1].qty, dec(20));
    assert_eq!(out.records[1].entry_price, dec(55));

    // (60-50)*100 + (60-55)*20
    let realized: Decimal = out.records.iter().map(|r| r.gross_pnl).sum();
    assert_eq!(realized, dec(1_100));
    assert_eq!(ledger.qty_signed("AAPL"), dec(30));
}

#[test]
fn scenario_lifo_sell_120_matches_t2_then_t1() {
    let mut ledger = seeded(LedgerConfig::new(MatchOrder::Lifo, ShortPolicy::Forbid));
    let out = apply_event(&mut ledger, &trade(2, "S", 3, false, 120, 60), Decimal::ONE).unwrap();

    let got: Vec<(&str, Decimal)> = out
        .records
        .iter()
        .map(|r| (r.entry_id.as_str(), r.qty))
        .collect();
    assert_eq!(got, vec![("T2", dec(50)), ("T1", dec(70))]);

    // (60-55)*50 + (60-50)*70
    let realized: Decimal = out.records.iter().map(|r| r.gross_pnl).sum();
    assert_eq!(realized, dec(950));

    let pos = ledger.position("AAPL").unwrap();
    assert_eq!(pos.tranches.len(), 1);
    assert_eq!(pos.tranches[0].source_id, "T1");
    assert_eq!(pos.tranches[0].qty, dec(30));
}

#[test]
fn scenario_oversell_forbidden_vs_allowed() {
    // Forbid: 170 against 150 fails and leaves the ledger as it was.
    let mut forbid = seeded(LedgerConfig::default());
    let before = forbid.clone();
    let err = apply_event(&mut forbid, &trade(2, "S", 3, false, 170, 60), Decimal::ONE)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientQuantity { ref requested, ref available, .. }
            if *requested == dec(170) && *available == dec(150)
    ));
    assert_eq!(forbid, before);

    // Exactly 150 under forbid is fine and flattens.
    let mut exact = seeded(LedgerConfig::default());
    let out = apply_event(&mut exact, &trade(2, "S", 3, false, 150, 60), Decimal::ONE).unwrap();
    assert_eq!(out.after, PositionPhase::Flat);
    assert!(out.opened.is_none());

    // Allow: 170 closes 150 long and opens 20 short, both visible.
    let mut allow = seeded(LedgerConfig::new(MatchOrder::Fifo, ShortPolicy::Allow));
    let out = apply_event(&mut allow, &trade(2, "S", 3, false, 170, 60), Decimal::ONE).unwrap();
    assert_eq!(out.matched_qty(), dec(150));
    let opened = out.opened.as_ref().expect("short remainder");
    assert_eq!(opened.qty, dec(20));
    assert_eq!(opened.entry_price, dec(60));
    assert_eq!(out.before, PositionPhase::Long);
    assert_eq!(out.after, PositionPhase::Short);
    assert!(out.round_turn_closed());
    assert_eq!(allow.qty_signed("AAPL"), dec(-20));
    assert_eq!(allow.position("AAPL").unwrap().side, Some(LotSide::Short));
}

#[test]
fn scenario_quantity_conservation_across_partial_closes() {
    let mut ledger = seeded(LedgerConfig::default());
    let sells = [(2, 30), (3, 45), (4, 75)];
    let mut matched = Decimal::ZERO;
    for (i, (day, qty)) in sells.iter().enumerate() {
        let out = apply_event(
            &mut ledger,
            &trade(10 + i, "S", *day, false, *qty, 58),
            Decimal::ONE,
        )
        .unwrap();
        assert_eq!(out.matched_qty(), dec(*qty));
        matched += out.matched_qty();
    }
    assert_eq!(matched, dec(150));
    assert!(ledger.position("AAPL").unwrap().is_flat());
    ledger.verify().unwrap();
}
