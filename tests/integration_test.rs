//! End-to-end runs through the backtest loop with in-memory data.
//!
//! Tests cover:
//! - Reference scenarios: no signal, clean rally, gap-down stop, cooldown
//! - Determinism and reconstruction of cash and shares from fills
//! - Injections and the buy-and-hold benchmark
//! - Market filter warm-up through `cli::run_ticker`
//! - Data gaps and multi-ticker isolation

mod common;

use approx::assert_relative_eq;
use common::*;
use std::path::Path;
use tiertrader::cli::{run_ticker, run_tickers, RunPlan};
use tiertrader::domain::backtest::{
    run_backtest, BacktestConfig, BacktestResult, Injection, RunInputs,
};
use tiertrader::domain::engine::Action;
use tiertrader::domain::error::TiertraderError;
use tiertrader::domain::market_filter::{AlwaysFavorable, EntryType};
use tiertrader::domain::policy::StrategyPolicy;
use tiertrader::domain::position::{ExitReason, FillSide};

fn run(
    closes: &[f64],
    confidences: &[f64],
    policy: &StrategyPolicy,
    config: &BacktestConfig,
) -> Result<BacktestResult, TiertraderError> {
    let b = bars(closes);
    let s = series("NVDA", confidences);
    let inputs = RunInputs {
        ticker: "NVDA",
        bars: &b,
        signals: &s,
        benchmark_bars: None,
    };
    run_backtest(&inputs, policy, config, &AlwaysFavorable)
}

mod scenarios {
    use super::*;

    #[test]
    fn no_signal_means_no_trades_and_flat_value() {
        let closes = [100.0, 104.0, 97.0, 110.0, 90.0, 101.0];
        let result = run(&closes, &[0.0; 6], &policy(&[(0.6, 1.0)]), &config(6, 5_000.0)).unwrap();

        assert!(result.trades.is_empty());
        assert!(result.fills.is_empty());
        assert_eq!(result.equity.len(), 6);
        for point in &result.equity {
            assert_relative_eq!(point.portfolio_value, 5_000.0);
        }
        assert_relative_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
    }

    #[test]
    fn clean_rally_exits_on_trailing_stop() {
        let closes = [
            100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 104.0, 108.0, 112.0, 116.0, 120.0, 122.0,
            121.0, 110.0,
        ];
        let mut conf = [0.9; 14];
        conf[..5].fill(0.0);
        let result = run(&closes, &conf, &policy(&[(0.6, 1.0)]), &config(14, 10_000.0)).unwrap();

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].side, FillSide::Buy);
        assert_eq!(result.fills[0].date, day(5));
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TrailStop);
        assert_eq!(trade.exit_date, day(13));
        assert!(trade.pnl_pct > 0.0);
        assert_relative_eq!(trade.pnl_pct, 0.10, epsilon = 1e-9);
    }

    #[test]
    fn gap_down_stops_out_at_the_close() {
        let closes = [100.0, 85.0, 85.0];
        let result =
            run(&closes, &[0.9, 0.0, 0.0], &policy(&[(0.6, 1.0)]), &config(3, 10_000.0)).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_date, day(1));
        assert_eq!(trade.exit_price, 85.0);
        assert_relative_eq!(trade.pnl_pct, -0.15, epsilon = 1e-9);
    }

    #[test]
    fn cooldown_defers_second_tier() {
        let mut p = policy(&[(0.6, 0.5), (0.8, 0.5)]);
        p.exit.min_days_between_entries = 5;
        let result = run(&[100.0; 8], &[0.9; 8], &p, &config(8, 10_000.0)).unwrap();

        let buys: Vec<_> = result
            .fills
            .iter()
            .filter(|f| f.side == FillSide::Buy)
            .collect();
        assert_eq!(buys.len(), 2);
        assert_eq!(buys[0].date, day(0));
        assert_eq!(buys[0].tier, Some(0));
        assert_eq!(buys[1].date, day(5));
        assert_eq!(buys[1].tier, Some(1));
        assert_relative_eq!(buys[1].notional, 5_000.0, epsilon = 1e-9);
        assert_relative_eq!(result.final_cash, 0.0, epsilon = 1e-9);
    }
}

mod accounting {
    use super::*;

    fn busy_run() -> BacktestResult {
        let closes = [
            100.0, 102.0, 101.0, 125.0, 128.0, 115.0, 90.0, 92.0, 95.0, 97.0, 80.0, 81.0,
        ];
        let conf = [0.75, 0.85, 0.95, 0.9, 0.9, 0.9, 0.7, 0.8, 0.9, 0.9, 0.1, 0.1];
        let p = policy(&[(0.7, 0.3), (0.8, 0.3), (0.9, 0.4)]);
        run(&closes, &conf, &p, &config(12, 2_400.0)).unwrap()
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let a = serde_json::to_string(&busy_run()).unwrap();
        let b = serde_json::to_string(&busy_run()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cash_and_shares_reconstruct_from_fills() {
        let result = busy_run();
        assert!(!result.fills.is_empty());

        let mut cash = 2_400.0;
        let mut shares = 0.0;
        for fill in &result.fills {
            match fill.side {
                FillSide::Buy => {
                    cash -= fill.notional;
                    shares += fill.shares;
                }
                FillSide::Sell => {
                    cash += fill.notional;
                    shares -= fill.shares;
                }
            }
            assert!(shares >= -1e-9);
        }
        assert_relative_eq!(cash, result.final_cash, epsilon = 1e-6);
        assert_relative_eq!(shares, result.final_shares, epsilon = 1e-9);

        let last = result.equity.last().unwrap();
        assert_relative_eq!(last.cash, result.final_cash, epsilon = 1e-6);
        assert_relative_eq!(
            last.portfolio_value,
            last.cash + last.shares * 81.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn every_closed_trade_has_matching_sell_fill() {
        let result = busy_run();
        let sells = result
            .fills
            .iter()
            .filter(|f| f.side == FillSide::Sell)
            .count();
        assert_eq!(sells, result.trades.len());
        for trade in &result.trades {
            assert!(trade.exit_date >= trade.entry_date);
            assert_relative_eq!(trade.proceeds, trade.shares * trade.exit_price, epsilon = 1e-9);
        }
    }
}

mod injections_and_benchmark {
    use super::*;

    #[test]
    fn injection_adds_cash_without_counting_as_return() {
        let mut c = config(6, 10_000.0);
        c.injections = vec![Injection {
            date: day(3),
            amount: 1_000.0,
        }];
        let result = run(&[100.0; 6], &[0.0; 6], &policy(&[(0.6, 1.0)]), &c).unwrap();

        assert_relative_eq!(result.equity[2].portfolio_value, 10_000.0);
        assert_relative_eq!(result.equity[3].portfolio_value, 11_000.0);
        assert_relative_eq!(result.equity[3].injected_cash, 1_000.0);
        assert_relative_eq!(result.metrics.total_injected, 1_000.0);
        assert_relative_eq!(result.metrics.total_return, 0.0, epsilon = 1e-12);
        assert_relative_eq!(result.final_cash, 11_000.0);
    }

    #[test]
    fn benchmark_tracks_buy_and_hold() {
        let b = bars(&[100.0, 100.0, 100.0]);
        let bench = bars(&[50.0, 50.0, 55.0]);
        let s = series("NVDA", &[0.0, 0.0, 0.0]);
        let inputs = RunInputs {
            ticker: "NVDA",
            bars: &b,
            signals: &s,
            benchmark_bars: Some(&bench),
        };
        let mut c = config(3, 10_000.0);
        c.benchmark = Some("QQQ".into());
        let result = run_backtest(&inputs, &policy(&[(0.6, 1.0)]), &c, &AlwaysFavorable).unwrap();

        assert_relative_eq!(result.benchmark.total_return, 0.10, epsilon = 1e-9);
        assert_relative_eq!(result.benchmark.final_value, 11_000.0, epsilon = 1e-6);
        assert_relative_eq!(result.metrics.total_return, 0.0);
    }

    #[test]
    fn missing_benchmark_day_aborts() {
        let mut bench = bars(&[50.0, 50.0, 55.0]);
        bench.remove(1);
        let data = MockDataPort::new()
            .with_bars("NVDA", bars(&[100.0, 100.0, 100.0]))
            .with_signals("NVDA", &[0.0, 0.0, 0.0])
            .with_bars("QQQ", bench);
        let mut c = config(3, 10_000.0);
        c.benchmark = Some("QQQ".into());

        let err = run_ticker(&data, "NVDA", &policy(&[(0.6, 1.0)]), &c).unwrap_err();
        assert!(
            matches!(err, TiertraderError::DataGap { ref ticker, date, .. } if ticker == "QQQ" && date == day(1))
        );
    }
}

mod market_filter {
    use super::*;

    fn breakout_data() -> MockDataPort {
        let mut closes = vec![100.0; 30];
        closes[25..].fill(110.0);
        MockDataPort::new()
            .with_bars("NVDA", bars(&closes))
            .with_signals("NVDA", &[0.9; 30])
            .with_bars("QQQ", bars(&[50.0; 30]))
    }

    #[test]
    fn entry_waits_for_breakout_after_warm_up() {
        let data = breakout_data();
        let mut p = policy(&[(0.6, 1.0)]);
        p.exit.use_market_filter = true;
        let mut c = config(30, 10_000.0);
        c.start_date = day(20);
        c.benchmark = Some("QQQ".into());

        let (summary, result) = run_ticker(&data, "NVDA", &p, &c).unwrap();

        assert_eq!(result.equity.len(), 10);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].date, day(25));
        assert!(summary.next_action.market_filter_enabled);
        assert_eq!(
            summary.next_action.account.entry_type,
            Some(EntryType::Breakout)
        );
    }

    #[test]
    fn ticker_as_its_own_benchmark_blocks_downtrend() {
        let closes: Vec<f64> = (0..300).map(|i| 300.0 - i as f64 * 0.5).collect();
        let data = MockDataPort::new()
            .with_bars("NVDA", bars(&closes))
            .with_signals("NVDA", &[0.9; 300]);
        let mut p = policy(&[(0.6, 1.0)]);
        p.exit.use_market_filter = true;
        let mut c = config(300, 10_000.0);
        c.start_date = day(250);
        c.benchmark = Some("NVDA".into());

        let (summary, result) = run_ticker(&data, "NVDA", &p, &c).unwrap();

        assert!(result.fills.is_empty());
        let report = &summary.next_action;
        assert_eq!(report.entry_type, None);
        let regime = report.regime.unwrap();
        assert!(!regime.benchmark_above_ma);
        assert_eq!(regime.benchmark_close, Some(closes[299]));
        assert!(regime.benchmark_ma.unwrap() > closes[299]);
    }

    #[test]
    fn disabled_filter_enters_on_first_day() {
        let data = breakout_data();
        let mut c = config(30, 10_000.0);
        c.start_date = day(20);
        c.benchmark = Some("QQQ".into());

        let (_, result) = run_ticker(&data, "NVDA", &policy(&[(0.6, 1.0)]), &c).unwrap();
        assert_eq!(result.fills[0].date, day(20));
    }
}

mod data_errors {
    use super::*;

    #[test]
    fn missing_signal_day_is_data_gap() {
        let err = run(&[100.0; 4], &[0.5; 3], &policy(&[(0.6, 1.0)]), &config(4, 1_000.0))
            .unwrap_err();
        assert!(matches!(err, TiertraderError::DataGap { date, .. } if date == day(3)));
    }

    #[test]
    fn unknown_ticker_is_no_data() {
        let data = MockDataPort::new();
        let err = run_ticker(&data, "TSM", &policy(&[(0.6, 1.0)]), &config(3, 1_000.0))
            .unwrap_err();
        assert!(matches!(err, TiertraderError::NoData { .. }));
    }

    #[test]
    fn failing_ticker_does_not_stop_others() {
        let data = MockDataPort::new()
            .with_bars("NVDA", bars(&[100.0, 101.0, 102.0]))
            .with_signals("NVDA", &[0.9, 0.9, 0.9]);
        let reporter = RecordingReportPort::default();
        let plan = RunPlan {
            config: config(3, 1_000.0),
            policies: vec![
                ("NVDA".to_string(), policy(&[(0.6, 1.0)])),
                ("GOOGL".to_string(), policy(&[(0.6, 1.0)])),
            ],
            data_dir: Path::new("unused").to_path_buf(),
            output_dir: Path::new("out").to_path_buf(),
        };

        let outcomes = run_tickers(&data, &reporter, &plan);

        assert_eq!(outcomes.len(), 2);
        let nvda = outcomes.iter().find(|(t, _)| t == "NVDA").unwrap();
        let googl = outcomes.iter().find(|(t, _)| t == "GOOGL").unwrap();
        assert!(nvda.1.is_ok());
        assert!(matches!(googl.1, Err(TiertraderError::NoData { .. })));
        assert_eq!(reporter.written.lock().unwrap().len(), 1);
    }
}

#[test]
fn final_day_reports_todays_action() {
    let result = run(&[100.0, 100.0], &[0.0, 0.9], &policy(&[(0.6, 1.0)]), &config(2, 1_000.0))
        .unwrap();
    assert_eq!(result.next_action.today_action, Action::BuyTier(0));
    assert_eq!(result.next_action.date, day(1));
}
