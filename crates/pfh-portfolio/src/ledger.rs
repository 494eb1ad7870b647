//! Lot ledger: per-symbol ordered tranches.
//!
//! The ledger owns every [`Position`] and is the only place tranches are
//! created, reduced, or removed. It knows nothing about prices, fees in base
//! currency, or metrics; the matching engine turns its [`CloseOutcome`]s into
//! realized-PnL records.
//!
//! Write surface:
//! - [`Ledger::open`] appends a tranche at the tail (amortized O(1)).
//! - [`Ledger::close`] consumes tranches from the head (FIFO) or the tail
//!   (LIFO) and, when shorting is allowed, opens the opposite side with the
//!   remainder. Availability is checked before anything is mutated.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::arith::{self, Overflow};
use crate::types::{LedgerConfig, LotSide, MatchOrder, Position, PositionPhase, ShortPolicy, Tranche};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Close exceeds the open quantity and shorting is forbidden.
    InsufficientQuantity {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },
    /// A tranche of one side was opened on top of the other side.
    DirectionConflict {
        symbol: String,
        open: LotSide,
        requested: LotSide,
    },
    /// Tranche currency differs from the currency of the open position.
    CurrencyConflict {
        symbol: String,
        position: String,
        requested: String,
    },
    /// A position total or realized amount left the decimal range.
    Overflow { symbol: String, what: &'static str },
    NonPositiveQty { qty: Decimal },
    NonPositivePrice { price: Decimal },
    NegativeFee { fee: Decimal },
    EmptySymbol,
    /// Integrity check failure found by [`Ledger::verify`].
    Corrupt { symbol: String, detail: &'static str },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientQuantity {
                symbol,
                requested,
                available,
            } => write!(
                f,
                "insufficient quantity for {symbol}: requested {requested}, available {available}"
            ),
            Self::DirectionConflict {
                symbol,
                open,
                requested,
            } => write!(
                f,
                "ledger invariant: cannot open {requested} tranche on {open} position {symbol}"
            ),
            Self::CurrencyConflict {
                symbol,
                position,
                requested,
            } => write!(
                f,
                "currency conflict for {symbol}: position is held in {position}, trade is in {requested}"
            ),
            Self::Overflow { symbol, what } => {
                write!(f, "decimal overflow computing {what} for {symbol}")
            }
            Self::NonPositiveQty { qty } => {
                write!(f, "ledger invariant: qty must be > 0, got {qty}")
            }
            Self::NonPositivePrice { price } => {
                write!(f, "ledger invariant: price must be > 0, got {price}")
            }
            Self::NegativeFee { fee } => {
                write!(f, "ledger invariant: fee must be >= 0, got {fee}")
            }
            Self::EmptySymbol => write!(f, "ledger invariant: symbol must not be empty"),
            Self::Corrupt { symbol, detail } => {
                write!(f, "ledger integrity: {symbol}: {detail}")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl LedgerError {
    pub fn overflow(symbol: &str, e: Overflow) -> Self {
        Self::Overflow {
            symbol: symbol.to_string(),
            what: e.what,
        }
    }
}

// ---------------------------------------------------------------------------
// Close result
// ---------------------------------------------------------------------------

/// One tranche consumed (fully or partially) by a close.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrancheMatch {
    /// Tranche state before this match.
    pub tranche: Tranche,
    pub qty: Decimal,
    /// Entry fee released to the realized result.
    pub released_fee: Decimal,
}

impl TrancheMatch {
    pub fn fully_consumed(&self) -> bool {
        self.qty >= self.tranche.qty
    }
}

/// Audit trail of a close: what closed existing tranches and what opened
/// new ones on the other side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseOutcome {
    pub closed_side: LotSide,
    pub order: MatchOrder,
    /// In consumption order.
    pub matches: Vec<TrancheMatch>,
    /// Tranche opened with the quantity left after every lot was consumed.
    pub opened: Option<Tranche>,
}

impl CloseOutcome {
    pub fn closed_qty(&self) -> Decimal {
        self.matches.iter().map(|m| m.qty).sum()
    }

    pub fn opened_qty(&self) -> Decimal {
        self.opened.as_ref().map(|t| t.qty).unwrap_or(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Single-writer owner of all positions. Deterministic; no IO.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    config: LedgerConfig,
    positions: BTreeMap<String, Position>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            positions: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Every symbol ever traded, including flat ones.
    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_flat())
    }

    pub fn phase(&self, symbol: &str) -> PositionPhase {
        self.position(symbol)
            .map(Position::phase)
            .unwrap_or(PositionPhase::Flat)
    }

    pub fn qty_signed(&self, symbol: &str) -> Decimal {
        self.position(symbol)
            .map(Position::qty_signed)
            .unwrap_or(Decimal::ZERO)
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Append `tranche` to the tail of `symbol`'s sequence.
    ///
    /// # Errors
    /// Invalid tranche fields, an open position on the other side or in
    /// another currency, or position totals out of decimal range.
    pub fn open(&mut self, symbol: &str, side: LotSide, tranche: Tranche) -> Result<(), LedgerError> {
        Self::validate(symbol, &tranche)?;
        self.check_currency(symbol, &tranche.currency)?;
        if let Some(pos) = self.position(symbol) {
            if let Some(open) = pos.side {
                if open != side {
                    return Err(LedgerError::DirectionConflict {
                        symbol: symbol.to_string(),
                        open,
                        requested: side,
                    });
                }
            }
            Self::check_room(symbol, pos, &tranche)?;
        }
        let pos = self.entry(symbol, &tranche.currency);
        pos.side = Some(side);
        pos.tranches.push_back(tranche);
        Ok(())
    }

    /// Close `trade.qty` units of `closes`-side lots of `symbol`.
    ///
    /// `trade` describes the closing execution: its price, timestamp, id and
    /// commission become the opposite-side tranche when the close exceeds
    /// the open quantity and shorting is allowed. The match order comes
    /// from the ledger configuration.
    ///
    /// # Errors
    /// [`LedgerError::InsufficientQuantity`] when the close exceeds the
    /// open quantity under [`ShortPolicy::Forbid`];
    /// [`LedgerError::CurrencyConflict`] when `trade` is not in the
    /// currency of the open position. The ledger is not mutated on error.
    pub fn close(
        &mut self,
        symbol: &str,
        closes: LotSide,
        trade: Tranche,
    ) -> Result<CloseOutcome, LedgerError> {
        Self::validate(symbol, &trade)?;
        self.check_currency(symbol, &trade.currency)?;

        let available = match self.position(symbol) {
            Some(p) if p.side == Some(closes) => p.qty_abs(),
            _ => Decimal::ZERO,
        };
        if trade.qty > available && self.config.shorting == ShortPolicy::Forbid {
            return Err(LedgerError::InsufficientQuantity {
                symbol: symbol.to_string(),
                requested: trade.qty,
                available,
            });
        }

        if available.is_zero() {
            if let Some(pos) = self.position(symbol) {
                // The whole trade extends the other side.
                Self::check_room(symbol, pos, &trade)?;
            }
        }

        let order = self.config.order_for(closes);
        let pos = self.entry(symbol, &trade.currency);
        let mut remaining = trade.qty;
        let mut matches = Vec::new();

        if !available.is_zero() {
            while remaining > Decimal::ZERO {
                let lot = match order {
                    MatchOrder::Fifo => pos.tranches.front_mut(),
                    MatchOrder::Lifo => pos.tranches.back_mut(),
                };
                let Some(lot) = lot else { break };

                if lot.qty <= remaining {
                    remaining -= lot.qty;
                    let consumed = match order {
                        MatchOrder::Fifo => pos.tranches.pop_front(),
                        MatchOrder::Lifo => pos.tranches.pop_back(),
                    };
                    if let Some(t) = consumed {
                        matches.push(TrancheMatch {
                            qty: t.qty,
                            released_fee: t.fee,
                            tranche: t,
                        });
                    }
                } else {
                    let before = lot.clone();
                    let released = lot.fee_for(remaining);
                    lot.qty -= remaining;
                    lot.fee -= released;
                    matches.push(TrancheMatch {
                        tranche: before,
                        qty: remaining,
                        released_fee: released,
                    });
                    remaining = Decimal::ZERO;
                }
            }
            if pos.tranches.is_empty() {
                pos.side = None;
            }
        }

        let opened = if remaining > Decimal::ZERO {
            let mut t = trade.clone();
            t.fee = trade.fee_for(remaining);
            t.qty = remaining;
            pos.side = Some(closes.opposite());
            pos.tranches.push_back(t.clone());
            Some(t)
        } else {
            None
        };

        Ok(CloseOutcome {
            closed_side: closes,
            order,
            matches,
            opened,
        })
    }

    /// Add realized trading PnL and fees to a symbol's cumulative totals.
    pub fn book(&mut self, symbol: &str, realized: Decimal, fee: Decimal) -> Result<(), LedgerError> {
        if let Some(pos) = self.positions.get_mut(symbol) {
            let overflow = |e| LedgerError::overflow(symbol, e);
            let realized_pnl = arith::add(pos.realized_pnl, realized, "realized_pnl").map_err(overflow)?;
            let fees = arith::add(pos.fees, fee, "fees").map_err(overflow)?;
            pos.realized_pnl = realized_pnl;
            pos.fees = fees;
        }
        Ok(())
    }

    /// Check structural invariants of every position.
    pub fn verify(&self) -> Result<(), LedgerError> {
        for (symbol, pos) in &self.positions {
            let corrupt = |detail| LedgerError::Corrupt {
                symbol: symbol.clone(),
                detail,
            };
            if pos.side.is_some() == pos.tranches.is_empty() {
                return Err(corrupt("side and tranche presence disagree"));
            }
            for t in &pos.tranches {
                if t.qty <= Decimal::ZERO {
                    return Err(corrupt("tranche with non-positive remaining quantity"));
                }
                if t.fee < Decimal::ZERO {
                    return Err(corrupt("tranche with negative fee"));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// A flat position takes the currency of its next trade.
    fn entry(&mut self, symbol: &str, currency: &str) -> &mut Position {
        let pos = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol, currency));
        if pos.is_flat() && pos.currency != currency {
            pos.currency = currency.to_string();
        }
        pos
    }

    /// Open tranches of one symbol all share the position currency.
    fn check_currency(&self, symbol: &str, currency: &str) -> Result<(), LedgerError> {
        match self.position(symbol) {
            Some(pos) if !pos.is_flat() && pos.currency != currency => {
                Err(LedgerError::CurrencyConflict {
                    symbol: symbol.to_string(),
                    position: pos.currency.clone(),
                    requested: currency.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Keeps [`Position::qty_abs`] and [`Position::open_fees`] in range.
    fn check_room(symbol: &str, pos: &Position, t: &Tranche) -> Result<(), LedgerError> {
        let overflow = |e| LedgerError::overflow(symbol, e);
        arith::add(pos.qty_abs(), t.qty, "position quantity").map_err(overflow)?;
        arith::add(pos.open_fees(), t.fee, "open fees").map_err(overflow)?;
        Ok(())
    }

    fn validate(symbol: &str, t: &Tranche) -> Result<(), LedgerError> {
        if symbol.trim().is_empty() {
            return Err(LedgerError::EmptySymbol);
        }
        if t.qty <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveQty { qty: t.qty });
        }
        if t.entry_price <= Decimal::ZERO {
            return Err(LedgerError::NonPositivePrice {
                price: t.entry_price,
            });
        }
        if t.fee < Decimal::ZERO {
            return Err(LedgerError::NegativeFee { fee: t.fee });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
