//! Metrics aggregator: cumulative performance statistics folded over the
//! event stream in arrival order.
//!
//! Drawdown is "clean": it is measured on trading equity
//! (`total equity - net inflow`), so deposits and withdrawals never move the
//! high-watermark or register as drawdown.

use pfh_events::{Event, EventBody};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::arith::{self, add, mul, sub, Overflow};
use crate::matching::MatchOutcome;

/// Whether dividends count as external inflow or as equity gain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DividendPolicy {
    /// Dividends are added to net inflow (excluded from trading equity).
    #[default]
    Include,
    /// Dividends stay in trading equity.
    Exclude,
}

/// `gross_profit / gross_loss` with explicit edge cases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfitFactor {
    Finite(Decimal),
    /// No losses and a positive gross profit.
    Infinite,
}

impl ProfitFactor {
    pub fn compute(gross_profit: Decimal, gross_loss: Decimal) -> Result<Self, Overflow> {
        if gross_loss.is_zero() {
            if gross_profit > Decimal::ZERO {
                Ok(ProfitFactor::Infinite)
            } else {
                Ok(ProfitFactor::Finite(Decimal::ZERO))
            }
        } else {
            arith::div(gross_profit, gross_loss, "profit_factor").map(ProfitFactor::Finite)
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, ProfitFactor::Infinite)
    }
}

impl std::fmt::Display for ProfitFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfitFactor::Finite(v) => write!(f, "{v}"),
            ProfitFactor::Infinite => f.write_str("inf"),
        }
    }
}

/// Scalar metrics attached to every snapshot. All amounts in base currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub trading_pnl: Decimal,
    pub fees: Decimal,
    pub realized_pnl: Decimal,
    pub fx_adjustment: Decimal,
    pub dividends: Decimal,
    pub accounting_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub net_inflow: Decimal,
    pub matches: u64,
    pub wins: u64,
    pub losses: u64,
    pub scratches: u64,
    pub win_rate: Decimal,
    pub loss_rate: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub expectancy: Decimal,
    pub profit_factor: ProfitFactor,
    pub round_turns: u64,
    pub transactions: u64,
    pub open_positions: usize,
    pub trading_equity: Decimal,
    pub high_watermark: Decimal,
    /// `None` while the watermark is not positive.
    pub drawdown: Option<Decimal>,
    pub drawdown_amount: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_amount: Decimal,
}

/// Running counters. Owned by the portfolio state; single writer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregator {
    pub policy: DividendPolicy,
    pub cash: Decimal,
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub net_inflow: Decimal,
    pub dividends: Decimal,
    pub trading_pnl: Decimal,
    pub fees: Decimal,
    pub fx_adjustment: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub matches: u64,
    pub wins: u64,
    pub losses: u64,
    pub scratches: u64,
    pub round_turns: u64,
    pub transactions: u64,
    pub trading_equity: Decimal,
    pub high_watermark: Decimal,
    /// Ratio; `None` while the watermark is not positive.
    pub drawdown: Option<Decimal>,
    pub drawdown_amount: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_amount: Decimal,
}

impl Aggregator {
    pub fn new(policy: DividendPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Fold one event and its matching outcome. `fx` converts the event
    /// currency into base currency.
    ///
    /// # Errors
    /// [`Overflow`] when a running total leaves the decimal range; `self` may
    /// be partially updated then.
    pub fn apply(&mut self, event: &Event, fx: Decimal, outcome: &MatchOutcome) -> Result<(), Overflow> {
        let commission = mul(event.commission, fx, "fees")?;
        match &event.body {
            EventBody::Buy(t) => {
                let cost = add(mul(t.gross, fx, "cash")?, commission, "cash")?;
                self.cash = sub(self.cash, cost, "cash")?;
                self.fees = add(self.fees, commission, "fees")?;
                self.transactions += 1;
            }
            EventBody::Sell(t) => {
                let proceeds = sub(mul(t.gross, fx, "cash")?, commission, "cash")?;
                self.cash = add(self.cash, proceeds, "cash")?;
                self.fees = add(self.fees, commission, "fees")?;
                self.transactions += 1;
            }
            EventBody::Dividend { amount, .. } => {
                let amount = mul(*amount, fx, "dividends")?;
                self.cash = add(self.cash, sub(amount, commission, "cash")?, "cash")?;
                self.fees = add(self.fees, commission, "fees")?;
                self.dividends = add(self.dividends, amount, "dividends")?;
                if self.policy == DividendPolicy::Include {
                    self.net_inflow = add(self.net_inflow, amount, "net_inflow")?;
                }
            }
            EventBody::Deposit { amount } => {
                let amount = mul(*amount, fx, "deposits")?;
                self.cash = add(self.cash, sub(amount, commission, "cash")?, "cash")?;
                self.fees = add(self.fees, commission, "fees")?;
                self.deposits = add(self.deposits, amount, "deposits")?;
                self.net_inflow = add(self.net_inflow, amount, "net_inflow")?;
            }
            EventBody::Withdrawal { amount } => {
                let amount = mul(*amount, fx, "withdrawals")?;
                self.cash = sub(self.cash, add(amount, commission, "cash")?, "cash")?;
                self.fees = add(self.fees, commission, "fees")?;
                self.withdrawals = add(self.withdrawals, amount, "withdrawals")?;
                self.net_inflow = sub(self.net_inflow, amount, "net_inflow")?;
            }
        }

        for r in &outcome.records {
            self.trading_pnl = add(self.trading_pnl, r.gross_pnl, "trading_pnl")?;
            self.fx_adjustment = add(self.fx_adjustment, r.fx_adjustment, "fx_adjustment")?;
            self.matches += 1;
            if r.net_pnl > Decimal::ZERO {
                self.wins += 1;
                self.gross_profit = add(self.gross_profit, r.net_pnl, "gross_profit")?;
            } else if r.net_pnl < Decimal::ZERO {
                self.losses += 1;
                self.gross_loss = sub(self.gross_loss, r.net_pnl, "gross_loss")?;
            } else {
                self.scratches += 1;
            }
        }

        if outcome.round_turn_closed() {
            self.round_turns += 1;
        }
        Ok(())
    }

    /// Update the watermark and drawdown with the post-event total equity.
    pub fn observe_equity(&mut self, total_equity: Decimal) -> Result<(), Overflow> {
        self.trading_equity = sub(total_equity, self.net_inflow, "trading_equity")?;
        if self.trading_equity > self.high_watermark {
            self.high_watermark = self.trading_equity;
        }
        self.drawdown_amount = sub(self.high_watermark, self.trading_equity, "drawdown")?;
        if self.drawdown_amount > self.max_drawdown_amount {
            self.max_drawdown_amount = self.drawdown_amount;
        }
        self.drawdown = if self.high_watermark > Decimal::ZERO {
            let ratio = arith::div(self.drawdown_amount, self.high_watermark, "drawdown")?;
            Some(ratio.max(Decimal::ZERO))
        } else {
            None
        };
        if let Some(ratio) = self.drawdown {
            if ratio > self.max_drawdown {
                self.max_drawdown = ratio;
            }
        }
        Ok(())
    }

    /// Current drawdown ratio; only defined for a positive watermark.
    pub fn drawdown(&self) -> Option<Decimal> {
        self.drawdown
    }

    pub fn realized_pnl(&self) -> Result<Decimal, Overflow> {
        sub(self.trading_pnl, self.fees, "realized_pnl")
    }

    pub fn accounting_pnl(&self) -> Result<Decimal, Overflow> {
        let with_fx = add(self.realized_pnl()?, self.fx_adjustment, "accounting_pnl")?;
        add(with_fx, self.dividends, "accounting_pnl")
    }

    pub fn metrics(
        &self,
        open_positions: usize,
        unrealized_pnl: Decimal,
    ) -> Result<PerformanceMetrics, Overflow> {
        let ratio = |n: u64| {
            if self.matches == 0 {
                Decimal::ZERO
            } else {
                Decimal::from(n) / Decimal::from(self.matches)
            }
        };
        let avg = |total: Decimal, n: u64| {
            if n == 0 {
                Decimal::ZERO
            } else {
                total / Decimal::from(n)
            }
        };
        let win_rate = ratio(self.wins);
        let loss_rate = ratio(self.losses);
        let avg_win = avg(self.gross_profit, self.wins);
        let avg_loss = avg(self.gross_loss, self.losses);

        Ok(PerformanceMetrics {
            trading_pnl: self.trading_pnl,
            fees: self.fees,
            realized_pnl: self.realized_pnl()?,
            fx_adjustment: self.fx_adjustment,
            dividends: self.dividends,
            accounting_pnl: self.accounting_pnl()?,
            unrealized_pnl,
            deposits: self.deposits,
            withdrawals: self.withdrawals,
            net_inflow: self.net_inflow,
            matches: self.matches,
            wins: self.wins,
            losses: self.losses,
            scratches: self.scratches,
            win_rate,
            loss_rate,
            gross_profit: self.gross_profit,
            gross_loss: self.gross_loss,
            avg_win,
            avg_loss,
            expectancy: win_rate * avg_win - loss_rate * avg_loss,
            profit_factor: ProfitFactor::compute(self.gross_profit, self.gross_loss)?,
            round_turns: self.round_turns,
            transactions: self.transactions,
            open_positions,
            trading_equity: self.trading_equity,
            high_watermark: self.high_watermark,
            drawdown: self.drawdown(),
            drawdown_amount: self.drawdown_amount,
            max_drawdown: self.max_drawdown,
            max_drawdown_amount: self.max_drawdown_amount,
        })
    }
}
