//! End-of-run next-action report built from the final day's state.
//!
//! Every price in the report is either today's close or a level derived
//! from the position (stop, trail, activation). No forecast is made.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;

use super::engine::{entry_decision, trail_trigger, Action, EntryBlock, EntryDecision};
use super::market_filter::{EntryType, RegimeDetail};
use super::ohlcv::Bar;
use super::policy::{StrategyPolicy, TierId};
use super::position::{PositionLedger, TierState};
use super::signal::Signal;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountState {
    pub cash: f64,
    pub shares: f64,
    pub cost_basis: Option<f64>,
    pub position_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pct: Option<f64>,
    pub first_entry: Option<NaiveDate>,
    /// Regime condition the open position was entered under.
    pub entry_type: Option<EntryType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitLevels {
    pub stop_price: f64,
    pub highest_price_since_entry: f64,
    /// Present once the trailing stop is armed.
    pub trail_price: Option<f64>,
    pub activation_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub id: TierId,
    pub min_conf: f64,
    pub buy_frac: f64,
    pub entered: bool,
    pub qualifies: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Notional is sized from today's cash; shares are quoted at today's close.
    Buy {
        tier: TierId,
        notional: f64,
        shares_at_close: f64,
    },
    Wait {
        reason: EntryBlock,
    },
    /// A tier would fire but the cash cannot buy a whole share.
    InsufficientCash {
        tier: TierId,
        notional: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextActionReport {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub change_pct: Option<f64>,
    pub confidence: f64,
    pub market_filter_enabled: bool,
    pub market_favorable: bool,
    /// Condition that allows entries today, `None` when blocked.
    pub entry_type: Option<EntryType>,
    /// Benchmark close, its 120-day mean and the breakout flag behind
    /// today's regime, when the market filter computed them.
    pub regime: Option<RegimeDetail>,
    pub today_action: Action,
    pub account: AccountState,
    pub exit_levels: Option<ExitLevels>,
    pub tiers: Vec<TierStatus>,
    pub recommendation: Recommendation,
}

/// Final-day inputs, captured after today's action was applied.
#[derive(Debug, Clone, Copy)]
pub struct FinalDay<'a> {
    pub bar: &'a Bar,
    pub prev_close: Option<f64>,
    pub signal: &'a Signal,
    pub ledger: &'a PositionLedger,
    pub cash: f64,
    pub action: Action,
    pub entry_type: Option<EntryType>,
    pub regime: Option<RegimeDetail>,
}

/// Tier notional for a given account state: a fraction of the capital
/// allocatable to the ticker, capped by available cash.
pub fn tier_notional(cash: f64, committed: f64, buy_frac: f64) -> f64 {
    ((cash + committed) * buy_frac).min(cash)
}

impl NextActionReport {
    pub fn build(day: &FinalDay<'_>, policy: &StrategyPolicy) -> Self {
        let close = day.bar.close;
        let position = day.ledger.position();

        let account = match position {
            Some(p) => AccountState {
                cash: day.cash,
                shares: p.shares,
                cost_basis: Some(p.cost_basis),
                position_value: p.market_value(close),
                unrealized_pnl: p.unrealized_pnl(close),
                unrealized_pct: Some(p.gain(close)),
                first_entry: p.first_entry(),
                entry_type: Some(p.entry_type),
            },
            None => AccountState {
                cash: day.cash,
                shares: 0.0,
                cost_basis: None,
                position_value: 0.0,
                unrealized_pnl: 0.0,
                unrealized_pct: None,
                first_entry: None,
                entry_type: None,
            },
        };

        let exit_levels = position.map(|p| ExitLevels {
            stop_price: policy.exit.stop_price(p.cost_basis),
            highest_price_since_entry: p.highest_price_since_entry,
            trail_price: trail_trigger(p, close, &policy.exit),
            activation_price: policy.exit.activation_price(p.cost_basis),
        });

        let tier_state = day.ledger.tier_state(&policy.tiers);
        let tiers = policy
            .tiers
            .iter()
            .map(|(id, tier)| TierStatus {
                id,
                min_conf: tier.min_conf,
                buy_frac: tier.buy_frac,
                entered: match &tier_state {
                    TierState::Flat => false,
                    TierState::Partial(entered) => entered.contains(&id),
                    TierState::Full => true,
                },
                qualifies: day.signal.confidence >= tier.min_conf,
            })
            .collect();

        let tomorrow = day.bar.date.succ_opt().unwrap_or(day.bar.date);
        let recommendation = match entry_decision(
            tomorrow,
            day.signal.confidence,
            position,
            day.ledger.last_entry_date(),
            day.entry_type.is_some(),
            policy,
        ) {
            EntryDecision::Blocked(reason) => Recommendation::Wait { reason },
            EntryDecision::Fire(tier) => {
                let buy_frac = policy.tiers.get(tier).map_or(0.0, |t| t.buy_frac);
                let notional =
                    tier_notional(day.cash, day.ledger.committed_capital(), buy_frac);
                if notional >= close {
                    Recommendation::Buy {
                        tier,
                        notional,
                        shares_at_close: notional / close,
                    }
                } else {
                    Recommendation::InsufficientCash { tier, notional }
                }
            }
        };

        NextActionReport {
            ticker: day.ledger.ticker().to_string(),
            date: day.bar.date,
            close,
            change_pct: day.prev_close.map(|prev| day.bar.change_from(prev)),
            confidence: day.signal.confidence,
            market_filter_enabled: policy.exit.use_market_filter,
            market_favorable: day.entry_type.is_some(),
            entry_type: day.entry_type,
            regime: day.regime,
            today_action: day.action,
            account,
            exit_levels,
            tiers,
            recommendation,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Next action: {} as of {}", self.ticker, self.date);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out);

        let _ = write!(out, "  Close:            {:.2}", self.close);
        if let Some(change) = self.change_pct {
            let _ = write!(out, " ({:+.2}%)", change * 100.0);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "  Confidence:       {:.1}%", self.confidence * 100.0);
        let filter = match (self.market_filter_enabled, self.entry_type) {
            (false, _) => "OFF".to_string(),
            (true, Some(entry_type)) => format!("ON (favorable: {entry_type})"),
            (true, None) => "ON (blocked)".to_string(),
        };
        let _ = writeln!(out, "  Market filter:    {filter}");
        if let Some(regime) = &self.regime {
            if let Some(close) = regime.benchmark_close {
                let _ = write!(out, "  Benchmark close:  {close:.2}");
                match regime.benchmark_ma {
                    Some(ma) => {
                        let side = if regime.benchmark_above_ma { "above" } else { "below" };
                        let _ = writeln!(out, " ({side} 120-day mean {ma:.2})");
                    }
                    None => {
                        let _ = writeln!(out, " (120-day mean not yet available)");
                    }
                }
            }
            let _ = writeln!(
                out,
                "  20-day breakout:  {}",
                if regime.ticker_breakout { "yes" } else { "no" }
            );
        }
        let _ = writeln!(out, "  Today's action:   {}", self.today_action);
        let _ = writeln!(out);

        let _ = writeln!(out, "{}", "-".repeat(40));
        let _ = writeln!(out, "Account:");
        let _ = writeln!(out, "  Cash:             {:.2}", self.account.cash);
        match self.account.cost_basis {
            Some(cost) => {
                let _ = writeln!(out, "  Shares:           {:.4}", self.account.shares);
                let _ = writeln!(out, "  Cost basis:       {cost:.2}");
                if let Some(entry_type) = self.account.entry_type {
                    let _ = writeln!(out, "  Entered as:       {entry_type}");
                }
                let _ = writeln!(out, "  Position value:   {:.2}", self.account.position_value);
                let _ = writeln!(
                    out,
                    "  Unrealized P&L:   {:.2} ({:+.2}%)",
                    self.account.unrealized_pnl,
                    self.account.unrealized_pct.unwrap_or(0.0) * 100.0
                );
            }
            None => {
                let _ = writeln!(out, "  Position:         flat");
            }
        }
        let _ = writeln!(out);

        if let Some(levels) = &self.exit_levels {
            let _ = writeln!(out, "{}", "-".repeat(40));
            let _ = writeln!(out, "Exit levels:");
            let _ = writeln!(out, "  Stop loss:        {:.2}", levels.stop_price);
            let _ = writeln!(
                out,
                "  Highest since entry: {:.2}",
                levels.highest_price_since_entry
            );
            match levels.trail_price {
                Some(trail) => {
                    let _ = writeln!(out, "  Trailing stop:    {trail:.2} (armed)");
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  Trailing stop:    arms at close >= {:.2}",
                        levels.activation_price
                    );
                }
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "{}", "-".repeat(40));
        let _ = writeln!(out, "Tiers:");
        for tier in &self.tiers {
            let status = match (tier.entered, tier.qualifies) {
                (true, _) => "entered",
                (false, true) => "qualifies",
                (false, false) => "waiting",
            };
            let _ = writeln!(
                out,
                "  #{} conf >= {:.0}% buy {:.0}%: {status}",
                tier.id,
                tier.min_conf * 100.0,
                tier.buy_frac * 100.0
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "{}", "-".repeat(40));
        let _ = write!(out, "Next session: ");
        match &self.recommendation {
            Recommendation::Buy {
                tier,
                notional,
                shares_at_close,
            } => {
                let _ = writeln!(
                    out,
                    "BUY tier #{tier} for {notional:.2} (~{shares_at_close:.4} shares at today's close)"
                );
            }
            Recommendation::Wait { reason } => {
                let _ = writeln!(out, "WAIT ({reason})");
            }
            Recommendation::InsufficientCash { tier, notional } => {
                let _ = writeln!(
                    out,
                    "WAIT (tier #{tier} notional {notional:.2} below one share)"
                );
            }
        }
        let _ = writeln!(out, "{rule}");
        out
    }
}
