//! Price and FX lookup.
//!
//! [`PriceSource`] is the external capability; [`Pricer`] applies the
//! configured missing-price / missing-rate policies on top of it and keeps
//! the last known values in a [`MarkCache`] that is staged together with the
//! rest of the portfolio state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::snapshot::MarkSource;

// ---------------------------------------------------------------------------
// Currency pair
// ---------------------------------------------------------------------------

/// `from/to`: one unit of `from` is worth `rate` units of `to`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub from: String,
    pub to: String,
}

impl CurrencyPair {
    pub fn new<S: Into<String>>(from: S, to: S) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parse `EUR/USD`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (from, to) = raw.trim().split_once('/')?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            return None;
        }
        Some(Self::new(from.to_ascii_uppercase(), to.to_ascii_uppercase()))
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PricingError {
    PriceUnavailable { symbol: String, date: NaiveDate },
    RateUnavailable { pair: CurrencyPair, date: NaiveDate },
}

impl fmt::Display for PricingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceUnavailable { symbol, date } => {
                write!(f, "price unavailable for {symbol} on {date}")
            }
            Self::RateUnavailable { pair, date } => {
                write!(f, "fx rate unavailable for {pair} on {date}")
            }
        }
    }
}

impl std::error::Error for PricingError {}

// ---------------------------------------------------------------------------
// Source trait + in-memory table
// ---------------------------------------------------------------------------

/// External price/FX capability. Implementations may cache or fetch; the
/// engine calls it synchronously and waits for the answer.
pub trait PriceSource {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PricingError>;
    fn fx_rate(&self, pair: &CurrencyPair, date: NaiveDate) -> Result<Decimal, PricingError>;
}

impl<T: PriceSource + ?Sized> PriceSource for &T {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PricingError> {
        (**self).price(symbol, date)
    }

    fn fx_rate(&self, pair: &CurrencyPair, date: NaiveDate) -> Result<Decimal, PricingError> {
        (**self).fx_rate(pair, date)
    }
}

/// Exact-date lookup table. Identity pairs resolve to 1 and inverse pairs
/// are derived from the stored direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceTable {
    prices: BTreeMap<(String, NaiveDate), Decimal>,
    rates: BTreeMap<(CurrencyPair, NaiveDate), Decimal>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_price<S: Into<String>>(&mut self, symbol: S, date: NaiveDate, price: Decimal) {
        self.prices.insert((symbol.into(), date), price);
    }

    pub fn insert_rate(&mut self, pair: CurrencyPair, date: NaiveDate, rate: Decimal) {
        self.rates.insert((pair, date), rate);
    }

    pub fn with_price<S: Into<String>>(mut self, symbol: S, date: NaiveDate, price: Decimal) -> Self {
        self.insert_price(symbol, date, price);
        self
    }

    pub fn with_rate(mut self, pair: CurrencyPair, date: NaiveDate, rate: Decimal) -> Self {
        self.insert_rate(pair, date, rate);
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len() + self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty() && self.rates.is_empty()
    }
}

impl PriceSource for PriceTable {
    fn price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PricingError> {
        self.prices
            .get(&(symbol.to_string(), date))
            .copied()
            .ok_or_else(|| PricingError::PriceUnavailable {
                symbol: symbol.to_string(),
                date,
            })
    }

    fn fx_rate(&self, pair: &CurrencyPair, date: NaiveDate) -> Result<Decimal, PricingError> {
        if pair.is_identity() {
            return Ok(Decimal::ONE);
        }
        if let Some(r) = self.rates.get(&(pair.clone(), date)) {
            return Ok(*r);
        }
        match self.rates.get(&(pair.inverse(), date)) {
            Some(r) if !r.is_zero() => Ok(Decimal::ONE / *r),
            _ => Err(PricingError::RateUnavailable {
                pair: pair.clone(),
                date,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPricePolicy {
    #[default]
    Fail,
    /// Last quoted mark or execution price for the symbol.
    CarryForward,
    Zero,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingRatePolicy {
    #[default]
    Fail,
    CarryForward,
}

/// Valuation settings shared by matching (FX) and snapshotting (marks).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    /// Reporting currency. `None` treats every currency 1:1.
    pub base_currency: Option<String>,
    pub missing_price: MissingPricePolicy,
    pub missing_rate: MissingRatePolicy,
}

// ---------------------------------------------------------------------------
// Pricer
// ---------------------------------------------------------------------------

/// Last known marks and rates. Part of the staged portfolio state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkCache {
    pub marks: BTreeMap<String, Decimal>,
    pub rates: BTreeMap<CurrencyPair, Decimal>,
}

/// Policy-aware view over a [`PriceSource`].
pub struct Pricer<'a> {
    source: &'a dyn PriceSource,
    valuation: &'a Valuation,
}

impl<'a> Pricer<'a> {
    pub fn new(source: &'a dyn PriceSource, valuation: &'a Valuation) -> Self {
        Self { source, valuation }
    }

    pub fn valuation(&self) -> &Valuation {
        self.valuation
    }

    /// Mark price for `symbol` on `date`, with where it came from.
    pub fn mark(
        &self,
        cache: &mut MarkCache,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<(Decimal, MarkSource), PricingError> {
        match self.source.price(symbol, date) {
            Ok(px) => {
                cache.marks.insert(symbol.to_string(), px);
                Ok((px, MarkSource::Quoted))
            }
            Err(e) => match self.valuation.missing_price {
                MissingPricePolicy::Fail => Err(e),
                MissingPricePolicy::CarryForward => cache
                    .marks
                    .get(symbol)
                    .map(|px| (*px, MarkSource::CarriedForward))
                    .ok_or(e),
                MissingPricePolicy::Zero => Ok((Decimal::ZERO, MarkSource::Zero)),
            },
        }
    }

    /// Rate converting `currency` into the base currency on `date`.
    pub fn rate(
        &self,
        cache: &mut MarkCache,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Decimal, PricingError> {
        let Some(base) = self.valuation.base_currency.as_deref() else {
            return Ok(Decimal::ONE);
        };
        if base == currency {
            return Ok(Decimal::ONE);
        }
        let pair = CurrencyPair::new(currency, base);
        match self.source.fx_rate(&pair, date) {
            Ok(r) => {
                cache.rates.insert(pair, r);
                Ok(r)
            }
            Err(e) => match self.valuation.missing_rate {
                MissingRatePolicy::Fail => Err(e),
                MissingRatePolicy::CarryForward => cache.rates.get(&pair).copied().ok_or(e),
            },
        }
    }

    /// Seed carry-forward with an execution price.
    pub fn observe_execution(&self, cache: &mut MarkCache, symbol: &str, price: Decimal) {
        cache.marks.insert(symbol.to_string(), price);
    }
}
