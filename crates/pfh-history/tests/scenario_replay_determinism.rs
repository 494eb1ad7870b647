use chrono::NaiveDate;
use pfh_events::{MalformedPolicy, OrderingPolicy, RawEvent};
use pfh_history::{replay, EngineConfig, RunErrorKind};
use pfh_portfolio::{
    CurrencyPair, DividendPolicy, MarkSource, MatchOrder, MissingPricePolicy, PriceTable,
    ShortPolicy,
};
use rust_decimal::Decimal;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

fn feed() -> Vec<RawEvent> {
    vec![
        RawEvent::new("d1", "2024-05-01", "DEPOSIT", "USD").amount("20000"),
        RawEvent::new("b1", "2024-05-02 10:00:00", "BUY", "USD")
            .symbol("AAPL")
            .quantity("100")
            .price("50")
            .commission("1"),
        RawEvent::new("b2", "2024-05-03 10:00:00", "BUY", "USD")
            .symbol("AAPL")
            .quantity("50")
            .price("55")
            .commission("1"),
        RawEvent::new("s1", "2024-05-06 10:00:00", "SELL", "USD")
            .symbol("AAPL")
            .quantity("-120")
            .price("60")
            .commission("1.2"),
        RawEvent::new("dv", "2024-05-07", "DIVIDEND", "USD")
            .symbol("AAPL")
            .amount("7.5"),
        RawEvent::new("w1", "2024-05-08", "WITHDRAWAL", "USD").amount("1000"),
    ]
}

fn prices() -> PriceTable {
    let mut t = PriceTable::new();
    for (d, px) in [(2, "50"), (3, "56"), (6, "61"), (7, "59.5"), (8, "58")] {
        t.insert_price("AAPL", day(d), px.parse().unwrap());
    }
    t
}

#[test]
fn scenario_identical_replays_serialize_identically() {
    let cfg = EngineConfig::default();
    let a = replay(&feed(), &cfg, prices()).unwrap();
    let b = replay(&feed(), &cfg, prices()).unwrap();

    let ja: Vec<String> = a
        .snapshots
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();
    let jb: Vec<String> = b
        .snapshots
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();
    assert_eq!(ja.len(), 6);
    assert_eq!(ja, jb);
}

#[test]
fn scenario_full_feed_metrics() {
    let report = replay(&feed(), &EngineConfig::default(), prices()).unwrap();
    assert_eq!(report.matches.len(), 2);
    assert_eq!(report.matches[0].entry_id, "b1");
    assert_eq!(report.matches[1].qty, dec(20));

    let last = report.last().unwrap();
    let m = &last.metrics;
    // (60-50)*100 + (60-55)*20
    assert_eq!(m.trading_pnl, dec(1_100));
    assert_eq!(m.fees, Decimal::new(32, 1));
    assert_eq!(m.dividends, Decimal::new(75, 1));
    assert_eq!(m.accounting_pnl, m.realized_pnl + m.dividends);
    assert_eq!(m.transactions, 3);
    assert_eq!(m.round_turns, 0);
    assert_eq!(last.dividend_policy, DividendPolicy::Include);

    let view = &last.positions["AAPL"];
    assert_eq!(view.qty, dec(30));
    assert_eq!(view.mark, dec(58));
    assert_eq!(view.mark_source, MarkSource::Quoted);
    assert_eq!(view.tranches.len(), 1);
    assert_eq!(view.tranches[0].source_id, "b2");
}

#[test]
fn scenario_lifo_changes_matches_not_determinism() {
    let cfg = EngineConfig {
        match_order: MatchOrder::Lifo,
        ..EngineConfig::default()
    };
    let report = replay(&feed(), &cfg, prices()).unwrap();
    let ids: Vec<&str> = report.matches.iter().map(|m| m.entry_id.as_str()).collect();
    assert_eq!(ids, vec!["b2", "b1"]);
    // (60-55)*50 + (60-50)*70
    assert_eq!(report.last().unwrap().metrics.trading_pnl, dec(950));
}

#[test]
fn scenario_unordered_feed_reject_or_sort() {
    let mut raws = feed();
    raws.swap(1, 2);

    let err = replay(&raws, &EngineConfig::default(), prices()).unwrap_err();
    assert_eq!(err.event_id, "b1");
    assert!(matches!(err.kind, RunErrorKind::OutOfOrder { .. }));

    let cfg = EngineConfig {
        ordering: OrderingPolicy::Sort,
        ..EngineConfig::default()
    };
    let sorted = replay(&raws, &cfg, prices()).unwrap();
    assert!(sorted.resorted);
    let baseline = replay(&feed(), &EngineConfig::default(), prices()).unwrap();
    assert_eq!(
        sorted.last().unwrap().metrics,
        baseline.last().unwrap().metrics
    );
}

#[test]
fn scenario_malformed_record_fail_vs_skip() {
    let mut raws = feed();
    raws.insert(
        3,
        RawEvent::new("bad", "2024-05-04", "BUY", "USD")
            .symbol("AAPL")
            .quantity("1O0")
            .price("50"),
    );

    let err = replay(&raws, &EngineConfig::default(), prices()).unwrap_err();
    assert_eq!(err.index, 3);
    assert_eq!(err.event_id, "bad");
    assert!(matches!(err.kind, RunErrorKind::Malformed(_)));

    let cfg = EngineConfig {
        malformed: MalformedPolicy::Skip,
        ..EngineConfig::default()
    };
    let report = replay(&raws, &cfg, prices()).unwrap();
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.snapshots.len(), 6);
}

#[test]
fn scenario_short_then_cover_with_fx() {
    let raws = vec![
        RawEvent::new("s1", "2024-05-02", "SELL", "EUR")
            .symbol("SAP")
            .quantity("-10")
            .price("100"),
        RawEvent::new("c1", "2024-05-03", "BUY", "EUR")
            .symbol("SAP")
            .quantity("10")
            .price("90"),
    ];
    let eur_usd = CurrencyPair::new("EUR", "USD");
    let table = PriceTable::new()
        .with_price("SAP", day(2), dec(100))
        .with_price("SAP", day(3), dec(90))
        .with_rate(eur_usd.clone(), day(2), Decimal::new(11, 1))
        .with_rate(eur_usd, day(3), Decimal::new(12, 1));

    let cfg = EngineConfig {
        shorting: ShortPolicy::Allow,
        base_currency: Some("usd".to_string()),
        ..EngineConfig::default()
    };
    let report = replay(&raws, &cfg, table).unwrap();

    let m = &report.matches[0];
    // short: -1 * (90-100) * 10 * 1.2 = 120; fx: -1 * 10 * 100 * 0.1 = -100
    assert_eq!(m.gross_pnl, dec(120));
    assert_eq!(m.fx_adjustment, dec(-100));

    let last = report.last().unwrap();
    // received 1100 USD, paid 1080 USD
    assert_eq!(last.cash, dec(20));
    assert_eq!(last.total_equity, dec(20));
    assert_eq!(last.metrics.accounting_pnl, dec(20));
    assert_eq!(last.metrics.round_turns, 1);
}

#[test]
fn scenario_zero_mark_policy_is_explicit() {
    let raws = vec![RawEvent::new("b1", "2024-05-02", "BUY", "USD")
        .symbol("XYZ")
        .quantity("10")
        .price("5")];
    let cfg = EngineConfig {
        missing_price: MissingPricePolicy::Zero,
        ..EngineConfig::default()
    };
    let report = replay(&raws, &cfg, PriceTable::new()).unwrap();
    let view = &report.last().unwrap().positions["XYZ"];
    assert_eq!(view.mark_source, MarkSource::Zero);
    assert_eq!(view.market_value, Decimal::ZERO);
    assert_eq!(view.unrealized_pnl, dec(-50));
}
