//! Performance metrics over the equity curve and trade log.

use chrono::NaiveDate;
use serde::Serialize;

use super::equity::EquityPoint;
use super::position::Trade;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawdownWindow {
    pub peak_date: NaiveDate,
    pub trough_date: NaiveDate,
    pub recovery_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    /// Worst peak-to-trough decline as a non-positive fraction.
    pub max_drawdown: f64,
    pub drawdown: Option<DrawdownWindow>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub trade_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_duration: f64,
    pub avg_trades_per_month: f64,
    pub exposure_rate: f64,
    pub final_value: f64,
    pub total_injected: f64,
}

/// Buy-and-hold comparison computed from the shadow benchmark column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub final_value: f64,
}

/// Result of the single forward scan over one value column.
#[derive(Debug, Clone, PartialEq)]
struct ReturnPass {
    total_return: f64,
    max_drawdown: f64,
    drawdown: Option<DrawdownWindow>,
    daily_returns: Vec<f64>,
}

impl Metrics {
    pub fn compute(
        equity: &[EquityPoint],
        trades: &[Trade],
        initial_cash: f64,
        risk_free_rate: f64,
    ) -> Self {
        let pass = time_weighted_pass(equity, initial_cash, |p| p.portfolio_value);
        let days = calendar_span(equity);
        let cagr = annualize(pass.total_return, days);

        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&pass.daily_returns, daily_rf);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut gross_win = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut total_duration_days = 0i64;

        for trade in trades {
            let pnl = trade.shares * (trade.exit_price - trade.entry_price);
            if trade.pnl_pct > 0.0 {
                trades_won += 1;
                gross_win += pnl;
            } else if trade.pnl_pct < 0.0 {
                trades_lost += 1;
                gross_loss += pnl.abs();
            }
            total_duration_days += trade.holding_days;
        }

        let trade_count = trades.len();
        let win_rate = if trade_count > 0 {
            trades_won as f64 / trade_count as f64
        } else {
            0.0
        };

        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_trade_duration = if trade_count > 0 {
            total_duration_days as f64 / trade_count as f64
        } else {
            0.0
        };

        let months = days as f64 / DAYS_PER_YEAR * 12.0;
        let avg_trades_per_month = if months > 0.0 {
            trade_count as f64 / months
        } else {
            0.0
        };

        let days_in_position = equity.iter().filter(|p| p.shares > 0.0).count();
        let exposure_rate = if equity.is_empty() {
            0.0
        } else {
            days_in_position as f64 / equity.len() as f64
        };

        Metrics {
            total_return: pass.total_return,
            cagr,
            max_drawdown: pass.max_drawdown,
            drawdown: pass.drawdown,
            sharpe_ratio,
            sortino_ratio,
            trade_count,
            trades_won,
            trades_lost,
            win_rate,
            profit_factor,
            avg_trade_duration,
            avg_trades_per_month,
            exposure_rate,
            final_value: equity.last().map_or(initial_cash, |p| p.portfolio_value),
            total_injected: equity.iter().map(|p| p.injected_cash).sum(),
        }
    }
}

impl BenchmarkMetrics {
    pub fn compute(equity: &[EquityPoint], initial_cash: f64) -> Self {
        let pass = time_weighted_pass(equity, initial_cash, |p| p.benchmark_value);
        BenchmarkMetrics {
            total_return: pass.total_return,
            cagr: annualize(pass.total_return, calendar_span(equity)),
            max_drawdown: pass.max_drawdown,
            final_value: equity.last().map_or(initial_cash, |p| p.benchmark_value),
        }
    }
}

fn calendar_span(equity: &[EquityPoint]) -> i64 {
    match (equity.first(), equity.last()) {
        (Some(first), Some(last)) => (last.date - first.date).num_days(),
        _ => 0,
    }
}

fn annualize(total_return: f64, days: i64) -> f64 {
    if days > 0 && total_return > -1.0 {
        (1.0 + total_return).powf(DAYS_PER_YEAR / days as f64) - 1.0
    } else {
        0.0
    }
}

/// One scan over `value(point)` producing time-weighted daily returns
/// (injections stripped), the compounded total return and the drawdown
/// window of the resulting NAV index.
fn time_weighted_pass<F>(equity: &[EquityPoint], initial_cash: f64, value: F) -> ReturnPass
where
    F: Fn(&EquityPoint) -> f64,
{
    let mut daily_returns = Vec::with_capacity(equity.len());
    let mut prev_value = initial_cash;
    let mut nav = 1.0_f64;

    let mut running_peak = f64::MIN;
    let mut running_peak_date: Option<NaiveDate> = None;
    let mut best_dd = 0.0_f64;
    let mut window: Option<DrawdownWindow> = None;
    // NAV at the peak of the current worst window, for recovery detection
    let mut window_peak_nav = 0.0_f64;

    for point in equity {
        let v = value(point);
        let r = if prev_value > 0.0 {
            (v - point.injected_cash) / prev_value - 1.0
        } else {
            0.0
        };
        daily_returns.push(r);
        nav *= 1.0 + r;
        prev_value = v;

        if nav > running_peak {
            running_peak = nav;
            running_peak_date = Some(point.date);
        }
        let peak_date = running_peak_date.unwrap_or(point.date);

        let dd = if running_peak > 0.0 {
            nav / running_peak - 1.0
        } else {
            0.0
        };

        match window.as_mut() {
            None => {
                window = Some(DrawdownWindow {
                    peak_date,
                    trough_date: point.date,
                    recovery_date: None,
                });
                window_peak_nav = running_peak;
                best_dd = dd;
            }
            Some(w) if dd < best_dd => {
                best_dd = dd;
                w.peak_date = peak_date;
                w.trough_date = point.date;
                w.recovery_date = None;
                window_peak_nav = running_peak;
            }
            Some(w) => {
                if w.recovery_date.is_none() && best_dd < 0.0 && nav >= window_peak_nav {
                    w.recovery_date = Some(point.date);
                }
            }
        }
    }

    ReturnPass {
        total_return: nav - 1.0,
        max_drawdown: best_dd.min(0.0),
        drawdown: window,
        daily_returns,
    }
}

fn compute_risk_adjusted(returns: &[f64], daily_rf: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let excess_return = mean - daily_rf;

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    let downside_sum: f64 = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .sum();
    let downside_stddev = (downside_sum / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    (sharpe, sortino)
}
