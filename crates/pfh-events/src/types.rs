use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event kind tag (payload-free view of [`EventBody`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Buy,
    Sell,
    Dividend,
    Deposit,
    Withdrawal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Buy => "BUY",
            EventKind::Sell => "SELL",
            EventKind::Dividend => "DIVIDEND",
            EventKind::Deposit => "DEPOSIT",
            EventKind::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Case-insensitive parse of a feed kind string.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(EventKind::Buy),
            "SELL" => Some(EventKind::Sell),
            "DIVIDEND" => Some(EventKind::Dividend),
            "DEPOSIT" => Some(EventKind::Deposit),
            "WITHDRAWAL" => Some(EventKind::Withdrawal),
            _ => None,
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self, EventKind::Buy | EventKind::Sell)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution details of a BUY or SELL.
///
/// `qty` is the unsigned magnitude (> 0); direction lives in the enclosing
/// [`EventBody`] variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub qty: Decimal,
    pub price: Decimal,
    /// Gross notional as reported by the feed (`qty * price` when absent).
    pub gross: Decimal,
}

impl Trade {
    /// # Panics
    /// When `qty * price` is out of decimal range. Feed records go through
    /// the normalizer, which reports that case as malformed instead.
    pub fn new<S: Into<String>>(symbol: S, qty: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            price,
            gross: qty * price,
        }
    }

    pub fn with_gross(mut self, gross: Decimal) -> Self {
        self.gross = gross;
        self
    }
}

/// Closed variant over everything the engine can consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventBody {
    Buy(Trade),
    Sell(Trade),
    Dividend {
        symbol: Option<String>,
        amount: Decimal,
    },
    Deposit {
        amount: Decimal,
    },
    Withdrawal {
        amount: Decimal,
    },
}

/// A normalized, immutable portfolio event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the original feed; tie-breaker for equal timestamps.
    pub index: usize,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub currency: String,
    pub isin: Option<String>,
    /// Absolute commission charged for the event (>= 0).
    pub commission: Decimal,
    pub body: EventBody,
}

impl Event {
    pub fn new<S: Into<String>>(
        index: usize,
        id: S,
        ts: DateTime<Utc>,
        currency: S,
        body: EventBody,
    ) -> Self {
        Self {
            index,
            id: id.into(),
            ts,
            currency: currency.into(),
            isin: None,
            commission: Decimal::ZERO,
            body,
        }
    }

    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_isin<S: Into<String>>(mut self, isin: S) -> Self {
        self.isin = Some(isin.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.body {
            EventBody::Buy(_) => EventKind::Buy,
            EventBody::Sell(_) => EventKind::Sell,
            EventBody::Dividend { .. } => EventKind::Dividend,
            EventBody::Deposit { .. } => EventKind::Deposit,
            EventBody::Withdrawal { .. } => EventKind::Withdrawal,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match &self.body {
            EventBody::Buy(t) | EventBody::Sell(t) => Some(t.symbol.as_str()),
            EventBody::Dividend { symbol, .. } => symbol.as_deref(),
            EventBody::Deposit { .. } | EventBody::Withdrawal { .. } => None,
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match &self.body {
            EventBody::Buy(t) | EventBody::Sell(t) => Some(t),
            _ => None,
        }
    }

    /// Signed quantity: BUY positive, SELL negative, cash events zero.
    pub fn signed_qty(&self) -> Decimal {
        match &self.body {
            EventBody::Buy(t) => t.qty,
            EventBody::Sell(t) => -t.qty,
            _ => Decimal::ZERO,
        }
    }

    /// Calendar date used for price and rate lookups.
    pub fn date(&self) -> NaiveDate {
        self.ts.date_naive()
    }
}
