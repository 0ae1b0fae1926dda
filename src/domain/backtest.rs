//! Backtest run loop and run configuration.
//!
//! One run covers one ticker. Per trading day: apply due injections, update
//! the running high, evaluate, apply the action at the close, mark to market.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::engine::{evaluate_day, Action, DayContext};
use super::equity::{EquityPoint, EquityTracker, InjectionSchedule};
use super::error::TiertraderError;
use super::market_filter::{EntryType, MarketRegime};
use super::metrics::{BenchmarkMetrics, Metrics};
use super::ohlcv::{validate_series, Bar};
use super::policy::StrategyPolicy;
use super::position::{Fill, PositionLedger, Trade};
use super::run_id::run_id;
use super::signal::SignalSeries;
use super::summary::{tier_notional, FinalDay, NextActionReport};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Injection {
    pub date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: f64,
    /// Buy-and-hold comparison ticker. `None` benchmarks against the
    /// traded ticker itself.
    pub benchmark: Option<String>,
    pub injections: Vec<Injection>,
    pub yearly_contribution: f64,
    pub risk_free_rate: f64,
}

impl BacktestConfig {
    pub fn schedule(&self) -> InjectionSchedule {
        InjectionSchedule::new(
            self.injections.iter().map(|i| (i.date, i.amount)).collect(),
            self.yearly_contribution,
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// Market data for one run. Bars may start before the run window to warm
/// up the market filter; only bars inside the window are traded.
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    pub ticker: &'a str,
    pub bars: &'a [Bar],
    pub signals: &'a SignalSeries,
    pub benchmark_bars: Option<&'a [Bar]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub ticker: String,
    pub trades: Vec<Trade>,
    pub fills: Vec<Fill>,
    pub equity: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub benchmark: BenchmarkMetrics,
    pub next_action: NextActionReport,
    pub final_cash: f64,
    pub final_shares: f64,
}

/// Audit record of a run: identity, the effective inputs and the results
/// that go into `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub ticker: String,
    pub config: BacktestConfig,
    pub policy: StrategyPolicy,
    pub metrics: Metrics,
    pub benchmark: BenchmarkMetrics,
    pub next_action: NextActionReport,
}

impl RunSummary {
    pub fn new(
        config: &BacktestConfig,
        policy: &StrategyPolicy,
        result: &BacktestResult,
    ) -> Result<Self, TiertraderError> {
        Ok(RunSummary {
            run_id: run_id(&result.ticker, config, policy)?,
            ticker: result.ticker.clone(),
            config: config.clone(),
            policy: policy.clone(),
            metrics: result.metrics.clone(),
            benchmark: result.benchmark.clone(),
            next_action: result.next_action.clone(),
        })
    }
}

pub fn run_backtest(
    inputs: &RunInputs<'_>,
    policy: &StrategyPolicy,
    config: &BacktestConfig,
    regime: &dyn MarketRegime,
) -> Result<BacktestResult, TiertraderError> {
    let ticker = inputs.ticker;
    validate_series(ticker, inputs.bars)?;

    let first_in_window = inputs
        .bars
        .iter()
        .position(|b| config.contains(b.date))
        .ok_or_else(|| TiertraderError::NoData {
            ticker: ticker.to_string(),
            start: config.start_date,
            end: config.end_date,
        })?;
    let days: Vec<&Bar> = inputs.bars[first_in_window..]
        .iter()
        .take_while(|b| b.date <= config.end_date)
        .collect();

    let benchmark_name = config.benchmark.as_deref().unwrap_or(ticker);
    let benchmark_closes: Option<HashMap<NaiveDate, f64>> = match inputs.benchmark_bars {
        Some(bars) => {
            validate_series(benchmark_name, bars)?;
            Some(bars.iter().map(|b| (b.date, b.close)).collect())
        }
        None => None,
    };

    info!(
        ticker,
        start = %config.start_date,
        end = %config.end_date,
        days = days.len(),
        benchmark = benchmark_name,
        "running backtest"
    );

    let mut ledger = PositionLedger::new(ticker);
    let mut tracker = EquityTracker::new(config.initial_cash, config.schedule());
    let mut trades: Vec<Trade> = Vec::new();
    let mut fills: Vec<Fill> = Vec::new();
    let mut last_action = Action::Hold;
    let mut last_entry_type: Option<EntryType> = None;

    for bar in days.iter().copied() {
        let signal = inputs.signals.require(bar.date)?;
        let benchmark_close = match &benchmark_closes {
            Some(closes) => *closes
                .get(&bar.date)
                .ok_or_else(|| TiertraderError::DataGap {
                    ticker: benchmark_name.to_string(),
                    date: bar.date,
                    what: "benchmark bar".to_string(),
                })?,
            None => bar.close,
        };

        let injected = tracker.start_day(bar.date, benchmark_close);
        if injected > 0.0 {
            debug!(ticker, date = %bar.date, amount = injected, "cash injected");
        }
        ledger.observe(bar, &policy.exit);

        let entry_type = if policy.exit.use_market_filter {
            regime.entry_type(bar.date)
        } else {
            Some(EntryType::NoFilter)
        };
        let ctx = DayContext {
            bar,
            signal,
            position: ledger.position(),
            last_entry_date: ledger.last_entry_date(),
            market_favorable: entry_type.is_some(),
        };

        let action = match evaluate_day(&ctx, policy) {
            Action::Hold => Action::Hold,
            Action::BuyTier(tier) => {
                let buy_frac = policy
                    .tiers
                    .get(tier)
                    .map(|t| t.buy_frac)
                    .ok_or_else(|| {
                        TiertraderError::state(ticker, bar.date, format!("unknown tier {tier}"))
                    })?;
                let notional =
                    tier_notional(tracker.cash(), ledger.committed_capital(), buy_frac);
                if notional < bar.close {
                    warn!(
                        ticker,
                        date = %bar.date,
                        tier,
                        notional,
                        close = bar.close,
                        "buy skipped: notional below one share"
                    );
                    Action::Hold
                } else {
                    let entry_type = entry_type.ok_or_else(|| {
                        TiertraderError::state(ticker, bar.date, "entry while the market filter blocks")
                    })?;
                    let fill = ledger.apply_buy(
                        bar.date,
                        tier,
                        bar.close,
                        notional,
                        signal.confidence,
                        entry_type,
                    )?;
                    debug!(
                        ticker,
                        date = %bar.date,
                        tier,
                        price = fill.price,
                        shares = fill.shares,
                        %entry_type,
                        "buy"
                    );
                    tracker.apply_fill(&fill);
                    fills.push(fill);
                    Action::BuyTier(tier)
                }
            }
            Action::SellAll(reason) => {
                let (trade, fill) = ledger.apply_sell(bar.date, bar.close, reason)?;
                debug!(
                    ticker,
                    date = %bar.date,
                    %reason,
                    price = fill.price,
                    pnl_pct = trade.pnl_pct,
                    "sell"
                );
                tracker.apply_fill(&fill);
                fills.push(fill);
                trades.push(trade);
                Action::SellAll(reason)
            }
        };

        tracker.mark(bar.date, bar.close, ledger.shares(), benchmark_close);
        last_action = action;
        last_entry_type = entry_type;
    }

    let last_idx = first_in_window + days.len() - 1;
    let last_bar = &inputs.bars[last_idx];
    let prev_close = last_idx.checked_sub(1).map(|i| inputs.bars[i].close);
    let last_signal = inputs.signals.require(last_bar.date)?;

    let next_action = NextActionReport::build(
        &FinalDay {
            bar: last_bar,
            prev_close,
            signal: last_signal,
            ledger: &ledger,
            cash: tracker.cash(),
            action: last_action,
            entry_type: last_entry_type,
            regime: regime.detail(last_bar.date),
        },
        policy,
    );

    let final_cash = tracker.cash();
    let final_shares = ledger.shares();
    let equity = tracker.into_points();
    let metrics = Metrics::compute(&equity, &trades, config.initial_cash, config.risk_free_rate);
    let benchmark = BenchmarkMetrics::compute(&equity, config.initial_cash);

    info!(
        ticker,
        trades = metrics.trade_count,
        total_return = metrics.total_return,
        max_drawdown = metrics.max_drawdown,
        final_value = metrics.final_value,
        "backtest complete"
    );

    Ok(BacktestResult {
        ticker: ticker.to_string(),
        trades,
        fills,
        equity,
        metrics,
        benchmark,
        next_action,
        final_cash,
        final_shares,
    })
}
