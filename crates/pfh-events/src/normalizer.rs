//! Event normalization.
//!
//! Converts [`RawEvent`] records into [`Event`] values with exact decimal
//! numerics, a validated kind/sign combination, a resolvable currency, and a
//! guaranteed ascending timestamp order.
//!
//! It does **not**:
//! - decode any file format (the feed parser hands over `RawEvent`s)
//! - perform accounting (that is `pfh-portfolio`)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::raw::RawEvent;
use crate::types::{Event, EventBody, EventKind, Trade};

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What to do when timestamps are not ascending in feed order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    #[default]
    Reject,
    /// Stable sort by timestamp; equal timestamps keep feed order.
    Sort,
}

/// What to do with a record that fails validation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedPolicy {
    #[default]
    Fail,
    /// Batch mode: drop the record and report it in [`NormalizedBatch::rejected`].
    Skip,
}

/// Sign convention of the raw `quantity` field on trades.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantitySign {
    /// BUY > 0, SELL < 0.
    #[default]
    Signed,
    /// BUY > 0, SELL > 0.
    Absolute,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizeConfig {
    pub ordering: OrderingPolicy,
    pub malformed: MalformedPolicy,
    pub quantity_sign: QuantitySign,
    /// Optional allow-list of ISO currency codes. `None` accepts any
    /// well-formed three-letter code.
    pub currencies: Option<BTreeSet<String>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single record was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedReason {
    EmptyId,
    BadTimestamp { raw: String },
    UnknownKind { raw: String },
    MissingSymbol,
    BadNumber { field: &'static str, raw: String },
    /// A value derived from the record is out of decimal range.
    Overflow { field: &'static str },
    ZeroQuantity,
    /// Signed quantity does not match the kind under the configured convention.
    SignMismatch { kind: EventKind, qty: Decimal },
    /// Cash-only kinds must carry zero quantity.
    CashQuantity { kind: EventKind, qty: Decimal },
    NonPositivePrice { price: Decimal },
    NegativeCommission { commission: Decimal },
    NonPositiveAmount { kind: EventKind, amount: Decimal },
    ZeroDividend,
    BadCurrency { raw: String },
    UnlistedCurrency { currency: String },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "event id is empty"),
            Self::BadTimestamp { raw } => write!(f, "timestamp could not be parsed: '{raw}'"),
            Self::UnknownKind { raw } => write!(f, "unknown event kind: '{raw}'"),
            Self::MissingSymbol => write!(f, "trade has no symbol"),
            Self::BadNumber { field, raw } => {
                write!(f, "field '{field}' is not a decimal number: '{raw}'")
            }
            Self::Overflow { field } => {
                write!(f, "field '{field}' is out of decimal range")
            }
            Self::ZeroQuantity => write!(f, "trade quantity is zero"),
            Self::SignMismatch { kind, qty } => {
                write!(f, "quantity {qty} has the wrong sign for {kind}")
            }
            Self::CashQuantity { kind, qty } => {
                write!(f, "{kind} must carry zero quantity, got {qty}")
            }
            Self::NonPositivePrice { price } => write!(f, "price must be > 0, got {price}"),
            Self::NegativeCommission { commission } => {
                write!(f, "commission must be >= 0, got {commission}")
            }
            Self::NonPositiveAmount { kind, amount } => {
                write!(f, "{kind} amount must be > 0, got {amount}")
            }
            Self::ZeroDividend => write!(f, "dividend amount is zero"),
            Self::BadCurrency { raw } => write!(f, "currency is not a 3-letter code: '{raw}'"),
            Self::UnlistedCurrency { currency } => {
                write!(f, "currency '{currency}' is not in the configured list")
            }
        }
    }
}

/// A rejected record, identified by feed index and id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MalformedEvent {
    pub index: usize,
    pub id: String,
    pub reason: MalformedReason,
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed event #{} (id='{}'): {}",
            self.index, self.id, self.reason
        )
    }
}

impl std::error::Error for MalformedEvent {}

/// Ordering invariant violation: `ts` is earlier than its predecessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutOfOrderInput {
    pub index: usize,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub previous_ts: DateTime<Utc>,
}

impl fmt::Display for OutOfOrderInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out-of-order event #{} (id='{}'): {} precedes {}",
            self.index, self.id, self.ts, self.previous_ts
        )
    }
}

impl std::error::Error for OutOfOrderInput {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    Malformed(MalformedEvent),
    OutOfOrder(OutOfOrderInput),
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::Malformed(e) => e.fmt(f),
            NormalizeError::OutOfOrder(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for NormalizeError {}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedBatch {
    /// Events in processing order.
    pub events: Vec<Event>,
    /// Records dropped under [`MalformedPolicy::Skip`].
    pub rejected: Vec<MalformedEvent>,
    /// `true` when [`OrderingPolicy::Sort`] had to reorder the input.
    pub resorted: bool,
}

// ---------------------------------------------------------------------------
// Field coercion
// ---------------------------------------------------------------------------

/// Parse a decimal string exactly.
///
/// Accepts an optional sign, ASCII digits, and at most one `.`. Rejects
/// exponents, `NaN`/`inf`, thousands separators, and anything that would
/// need a locale. Never goes through floating point.
pub fn parse_decimal(raw: &str, field: &'static str) -> Result<Decimal, MalformedReason> {
    let bad = || MalformedReason::BadNumber {
        field,
        raw: raw.to_string(),
    };

    let s = raw.trim();
    let digits = s
        .strip_prefix('-')
        .or_else(|| s.strip_prefix('+'))
        .unwrap_or(s);

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(bad());
    }

    let sign = if s.starts_with('-') { "-" } else { "" };
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let canonical = if frac_part.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac_part}")
    };
    Decimal::from_str(&canonical).map_err(|_| bad())
}

/// Parse an optional numeric field; empty means zero.
fn parse_optional_decimal(raw: &str, field: &'static str) -> Result<Decimal, MalformedReason> {
    if raw.trim().is_empty() {
        Ok(Decimal::ZERO)
    } else {
        parse_decimal(raw, field)
    }
}

/// Parse a feed timestamp. Naive forms are interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_currency(raw: &str, allowed: Option<&BTreeSet<String>>) -> Result<String, MalformedReason> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MalformedReason::BadCurrency {
            raw: raw.to_string(),
        });
    }
    if let Some(list) = allowed {
        if !list.contains(&code) {
            return Err(MalformedReason::UnlistedCurrency { currency: code });
        }
    }
    Ok(code)
}

fn non_empty(opt: &Option<String>) -> Option<String> {
    opt.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a single record found at feed position `index`.
pub fn normalize(
    raw: &RawEvent,
    index: usize,
    cfg: &NormalizeConfig,
) -> Result<Event, MalformedEvent> {
    build_event(raw, index, cfg).map_err(|reason| MalformedEvent {
        index,
        id: raw.id.clone(),
        reason,
    })
}

fn build_event(
    raw: &RawEvent,
    index: usize,
    cfg: &NormalizeConfig,
) -> Result<Event, MalformedReason> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(MalformedReason::EmptyId);
    }
    let ts = parse_timestamp(&raw.timestamp).ok_or_else(|| MalformedReason::BadTimestamp {
        raw: raw.timestamp.clone(),
    })?;
    let kind = EventKind::parse(&raw.kind).ok_or_else(|| MalformedReason::UnknownKind {
        raw: raw.kind.clone(),
    })?;
    let currency = parse_currency(&raw.currency, cfg.currencies.as_ref())?;

    let qty = parse_optional_decimal(&raw.quantity, "quantity")?;
    let commission = parse_optional_decimal(&raw.commission, "commission")?;
    if commission.is_sign_negative() && !commission.is_zero() {
        return Err(MalformedReason::NegativeCommission { commission });
    }

    let body = match kind {
        EventKind::Buy | EventKind::Sell => {
            let symbol = non_empty(&raw.symbol).ok_or(MalformedReason::MissingSymbol)?;
            if qty.is_zero() {
                return Err(MalformedReason::ZeroQuantity);
            }
            let sign_ok = match (cfg.quantity_sign, kind) {
                (QuantitySign::Signed, EventKind::Sell) => qty.is_sign_negative(),
                _ => qty.is_sign_positive(),
            };
            if !sign_ok {
                return Err(MalformedReason::SignMismatch { kind, qty });
            }
            let price = parse_decimal(&raw.price, "price")?;
            if price <= Decimal::ZERO {
                return Err(MalformedReason::NonPositivePrice { price });
            }
            let magnitude = qty.abs();
            let gross = if raw.amount.trim().is_empty() {
                magnitude
                    .checked_mul(price)
                    .ok_or(MalformedReason::Overflow { field: "amount" })?
            } else {
                parse_decimal(&raw.amount, "amount")?.abs()
            };
            let trade = Trade {
                symbol,
                qty: magnitude,
                price,
                gross,
            };
            if kind == EventKind::Buy {
                EventBody::Buy(trade)
            } else {
                EventBody::Sell(trade)
            }
        }
        EventKind::Dividend | EventKind::Deposit | EventKind::Withdrawal => {
            if !qty.is_zero() {
                return Err(MalformedReason::CashQuantity { kind, qty });
            }
            let amount = parse_decimal(&raw.amount, "amount")?;
            match kind {
                EventKind::Dividend => {
                    if amount.is_zero() {
                        return Err(MalformedReason::ZeroDividend);
                    }
                    EventBody::Dividend {
                        symbol: non_empty(&raw.symbol),
                        amount,
                    }
                }
                _ => {
                    if amount <= Decimal::ZERO {
                        return Err(MalformedReason::NonPositiveAmount { kind, amount });
                    }
                    if kind == EventKind::Deposit {
                        EventBody::Deposit { amount }
                    } else {
                        EventBody::Withdrawal { amount }
                    }
                }
            }
        }
    };

    Ok(Event {
        index,
        id: id.to_string(),
        ts,
        currency,
        isin: non_empty(&raw.isin),
        commission,
        body,
    })
}

/// Normalize a whole feed and enforce the ordering invariant.
///
/// Under [`MalformedPolicy::Fail`] the first bad record aborts the batch;
/// under `Skip` it is collected into `rejected` and the rest continue.
/// Ordering is checked on the surviving events.
pub fn normalize_all(
    raws: &[RawEvent],
    cfg: &NormalizeConfig,
) -> Result<NormalizedBatch, NormalizeError> {
    let mut batch = NormalizedBatch::default();

    for (index, raw) in raws.iter().enumerate() {
        match normalize(raw, index, cfg) {
            Ok(ev) => batch.events.push(ev),
            Err(e) => match cfg.malformed {
                MalformedPolicy::Fail => return Err(NormalizeError::Malformed(e)),
                MalformedPolicy::Skip => batch.rejected.push(e),
            },
        }
    }

    if let Err(e) = check_order(&batch.events) {
        match cfg.ordering {
            OrderingPolicy::Reject => return Err(NormalizeError::OutOfOrder(e)),
            OrderingPolicy::Sort => {
                sort_events(&mut batch.events);
                batch.resorted = true;
            }
        }
    }

    Ok(batch)
}

/// Stable sort by `(ts, index)`.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.index.cmp(&b.index)));
}

/// Verify timestamps never decrease. Returns the first offending event.
pub fn check_order(events: &[Event]) -> Result<(), OutOfOrderInput> {
    for pair in events.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.ts < prev.ts {
            return Err(OutOfOrderInput {
                index: cur.index,
                id: cur.id.clone(),
                ts: cur.ts,
                previous_ts: prev.ts,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
