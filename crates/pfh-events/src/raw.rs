use serde::{Deserialize, Serialize};

/// A single portfolio event exactly as handed over by the feed parser.
///
/// Every numeric field is kept as a decimal string so the normalizer can
/// coerce it without floating-point rounding at the boundary. Empty strings
/// are allowed for fields a given kind does not use (`price`/`amount` on
/// cash events, `commission` when the broker charged nothing).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    /// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD`.
    pub timestamp: String,
    /// `BUY`, `SELL`, `DIVIDEND`, `DEPOSIT` or `WITHDRAWAL` (any case).
    pub kind: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub isin: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub commission: String,
}

impl RawEvent {
    /// Minimal constructor; numeric fields start empty.
    pub fn new<S: Into<String>>(id: S, timestamp: S, kind: S, currency: S) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            kind: kind.into(),
            currency: currency.into(),
            ..Self::default()
        }
    }

    pub fn symbol<S: Into<String>>(mut self, symbol: S) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn quantity<S: Into<String>>(mut self, quantity: S) -> Self {
        self.quantity = quantity.into();
        self
    }

    pub fn price<S: Into<String>>(mut self, price: S) -> Self {
        self.price = price.into();
        self
    }

    pub fn amount<S: Into<String>>(mut self, amount: S) -> Self {
        self.amount = amount.into();
        self
    }

    pub fn commission<S: Into<String>>(mut self, commission: S) -> Self {
        self.commission = commission.into();
        self
    }
}
