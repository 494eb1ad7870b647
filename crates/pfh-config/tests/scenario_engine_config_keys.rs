use pfh_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};
use pfh_history::{EngineConfig, InsufficientPolicy};
use pfh_portfolio::{DividendPolicy, MatchOrder, MissingPricePolicy, ShortPolicy};

#[test]
fn engine_section_maps_to_typed_config() {
    let yaml = r#"
engine:
  match_order: lifo
  cover_order: fifo
  shorting: allow
  dividends: exclude
  missing_price: zero
  on_insufficient: skip-and-log
  ordering: sort
  quantity_sign: absolute
  base_currency: EUR
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let cfg = loaded.engine_config().unwrap();

    assert_eq!(cfg.match_order, MatchOrder::Lifo);
    assert_eq!(cfg.cover_order, Some(MatchOrder::Fifo));
    assert_eq!(cfg.shorting, ShortPolicy::Allow);
    assert_eq!(cfg.dividends, DividendPolicy::Exclude);
    assert_eq!(cfg.missing_price, MissingPricePolicy::Zero);
    assert_eq!(cfg.on_insufficient, InsufficientPolicy::SkipAndLog);
    assert_eq!(cfg.base_currency.as_deref(), Some("EUR"));
    assert_eq!(cfg.ledger_config().order_for(pfh_portfolio::LotSide::Short), MatchOrder::Fifo);
}

#[test]
fn missing_engine_section_uses_defaults() {
    let loaded = load_layered_yaml_from_strings(&["{}"]).unwrap();
    assert_eq!(loaded.engine_config().unwrap(), EngineConfig::default());

    let partial = load_layered_yaml_from_strings(&["engine:\n  shorting: allow\n"]).unwrap();
    let cfg = partial.engine_config().unwrap();
    assert_eq!(cfg.shorting, ShortPolicy::Allow);
    assert_eq!(cfg.match_order, MatchOrder::Fifo);
}

#[test]
fn bad_policy_value_is_rejected() {
    let loaded = load_layered_yaml_from_strings(&["engine:\n  match_order: hifo\n"]).unwrap();
    let err = loaded.engine_config().unwrap_err();
    assert!(err.to_string().contains("invalid /engine section"));
}

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let yaml = r#"
engine:
  match_order: fifo
  currencies: [USD, EUR]
  typo_key: 1
report:
  title: "Q1"
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/engine/typo_key".to_string(), "/report/title".to_string()]
    );
    assert!(report
        .consumed_prefixes
        .contains(&"/engine/currencies".to_string()));
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&["extra: true\n"]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));

    let clean = load_layered_yaml_from_strings(&["engine:\n  shorting: allow\n"]).unwrap();
    assert!(report_unused_keys(&clean.config_json, UnusedKeyPolicy::Fail)
        .unwrap()
        .is_clean());
}
