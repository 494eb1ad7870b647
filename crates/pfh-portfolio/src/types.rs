use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::arith::{self, Overflow};

/// Direction of an open lot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LotSide {
    Long,
    Short,
}

impl LotSide {
    /// +1 for long lots, -1 for short lots.
    pub fn sign(&self) -> Decimal {
        match self {
            LotSide::Long => Decimal::ONE,
            LotSide::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> LotSide {
        match self {
            LotSide::Long => LotSide::Short,
            LotSide::Short => LotSide::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LotSide::Long => "long",
            LotSide::Short => "short",
        }
    }
}

impl std::fmt::Display for LotSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the tranche sequence a close consumes first.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOrder {
    /// Oldest tranche first (head of the sequence).
    #[default]
    Fifo,
    /// Newest tranche first (tail of the sequence).
    Lifo,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShortPolicy {
    #[default]
    Forbid,
    Allow,
}

/// Ledger-wide matching configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub match_order: MatchOrder,
    /// Order used when covering short tranches. `None` follows `match_order`.
    pub cover_order: Option<MatchOrder>,
    pub shorting: ShortPolicy,
}

impl LedgerConfig {
    pub fn new(match_order: MatchOrder, shorting: ShortPolicy) -> Self {
        Self {
            match_order,
            cover_order: None,
            shorting,
        }
    }

    pub fn with_cover_order(mut self, order: MatchOrder) -> Self {
        self.cover_order = Some(order);
        self
    }

    /// Match order for closing lots of the given side.
    pub fn order_for(&self, closing: LotSide) -> MatchOrder {
        match closing {
            LotSide::Long => self.match_order,
            LotSide::Short => self.cover_order.unwrap_or(self.match_order),
        }
    }
}

/// One still-open acquisition lot.
///
/// `qty` is the remaining magnitude (> 0); direction lives on the owning
/// [`Position`]. `fee` is the not-yet-released part of the opening
/// commission, in the tranche currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    pub source_id: String,
    pub opened_at: DateTime<Utc>,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub isin: Option<String>,
    /// Tranche currency to base currency at opening (1 without a base).
    pub entry_fx: Decimal,
}

impl Tranche {
    pub fn new<S: Into<String>>(
        source_id: S,
        opened_at: DateTime<Utc>,
        qty: Decimal,
        entry_price: Decimal,
        currency: S,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            opened_at,
            qty,
            entry_price,
            fee: Decimal::ZERO,
            currency: currency.into(),
            isin: None,
            entry_fx: Decimal::ONE,
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_isin(mut self, isin: Option<String>) -> Self {
        self.isin = isin;
        self
    }

    pub fn with_entry_fx(mut self, entry_fx: Decimal) -> Self {
        self.entry_fx = entry_fx;
        self
    }

    /// Fee share released when `matched` units are consumed.
    ///
    /// A full match releases the whole remaining fee so no residue is left
    /// behind by rounding.
    pub fn fee_for(&self, matched: Decimal) -> Decimal {
        arith::pro_rata(self.fee, matched, self.qty)
    }

    /// Entry notional in the tranche currency.
    pub fn cost(&self) -> Result<Decimal, Overflow> {
        arith::mul(self.qty, self.entry_price, "cost")
    }

    /// Entry notional in base currency.
    pub fn cost_base(&self) -> Result<Decimal, Overflow> {
        arith::mul(self.cost()?, self.entry_fx, "cost_basis")
    }
}

/// Lifecycle phase of a symbol position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionPhase {
    Flat,
    Long,
    Short,
}

impl From<Option<LotSide>> for PositionPhase {
    fn from(side: Option<LotSide>) -> Self {
        match side {
            None => PositionPhase::Flat,
            Some(LotSide::Long) => PositionPhase::Long,
            Some(LotSide::Short) => PositionPhase::Short,
        }
    }
}

/// Per-symbol aggregate.
///
/// Tranches are always kept oldest -> newest; the match order only picks
/// the end a close starts from. A flat position stays in the ledger so its
/// cumulative realized PnL and fees survive the next round turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// `None` while flat.
    pub side: Option<LotSide>,
    pub tranches: VecDeque<Tranche>,
    /// Cumulative trading PnL realized on this symbol (base currency, fees excluded).
    pub realized_pnl: Decimal,
    /// Cumulative commissions paid on this symbol (base currency).
    pub fees: Decimal,
    pub currency: String,
}

impl Position {
    pub fn new<S: Into<String>>(symbol: S, currency: S) -> Self {
        Self {
            symbol: symbol.into(),
            side: None,
            tranches: VecDeque::new(),
            realized_pnl: Decimal::ZERO,
            fees: Decimal::ZERO,
            currency: currency.into(),
        }
    }

    pub fn phase(&self) -> PositionPhase {
        self.side.into()
    }

    pub fn is_flat(&self) -> bool {
        self.side.is_none()
    }

    /// Sum of remaining tranche quantities. [`crate::Ledger::open`] keeps
    /// this sum in range.
    pub fn qty_abs(&self) -> Decimal {
        self.tranches.iter().map(|t| t.qty).sum()
    }

    /// Net open quantity: positive long, negative short, zero flat.
    pub fn qty_signed(&self) -> Decimal {
        match self.side {
            Some(side) => side.sign() * self.qty_abs(),
            None => Decimal::ZERO,
        }
    }

    /// Quantity-weighted entry price. Display only; PnL never uses it.
    pub fn avg_entry_price(&self) -> Result<Option<Decimal>, Overflow> {
        let qty = self.qty_abs();
        if qty.is_zero() {
            return Ok(None);
        }
        let costs = self
            .tranches
            .iter()
            .map(Tranche::cost)
            .collect::<Result<Vec<_>, _>>()?;
        let cost = arith::sum(costs, "cost")?;
        arith::div(cost, qty, "avg_entry_price").map(Some)
    }

    pub fn first_entry(&self) -> Option<DateTime<Utc>> {
        self.tranches.iter().map(|t| t.opened_at).min()
    }

    /// Fees still held by open tranches (tranche currency). Kept in range
    /// like [`Position::qty_abs`].
    pub fn open_fees(&self) -> Decimal {
        self.tranches.iter().map(|t| t.fee).sum()
    }
}
