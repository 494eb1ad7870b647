//! Command handler modules for pfh.
//!
//! Input loaders shared by command paths live here.

pub mod replay;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use pfh_events::RawEvent;
use pfh_portfolio::{CurrencyPair, PriceTable};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Read a file as UTF-8 text, stripping a leading BOM.
pub fn read_text(path: &Path) -> Result<(Vec<u8>, String)> {
    let bytes = fs::read(path).with_context(|| format!("read failed: {}", path.display()))?;
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    let text = String::from_utf8(body.to_vec())
        .with_context(|| format!("{} must be UTF-8 text", path.display()))?;
    Ok((bytes, text))
}

/// Parse a JSON array of raw events.
pub fn parse_events(raw: &str) -> Result<Vec<RawEvent>> {
    serde_json::from_str(raw.trim()).context("events file must contain a JSON array of events")
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    symbol: String,
    date: String,
    close: String,
}

/// Parse a `symbol,date,close` CSV. A symbol shaped like `EUR/USD` is an FX
/// rate for that pair; anything else is a closing price.
pub fn parse_prices(raw: &str) -> Result<PriceTable> {
    let mut table = PriceTable::new();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    for (i, row) in rdr.deserialize::<PriceRow>().enumerate() {
        // header is line 1
        let line = i + 2;
        let row = row.with_context(|| format!("prices line {line}: bad row"))?;
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("prices line {line}: invalid date '{}'", row.date))?;
        let close = match pfh_events::parse_decimal(&row.close, "close") {
            Ok(v) if v > rust_decimal::Decimal::ZERO => v,
            _ => bail!("prices line {line}: close must be a positive number, got '{}'", row.close),
        };

        if row.symbol.contains('/') {
            let pair = CurrencyPair::parse(&row.symbol)
                .with_context(|| format!("prices line {line}: invalid pair '{}'", row.symbol))?;
            table.insert_rate(pair, date, close);
        } else if row.symbol.is_empty() {
            bail!("prices line {line}: empty symbol");
        } else {
            table.insert_price(row.symbol, date, close);
        }
    }

    Ok(table)
}
