//! CLI definition and dispatch.

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::file_report_adapter::FileReportAdapter;
use crate::domain::backtest::{run_backtest, BacktestConfig, BacktestResult, Injection, RunInputs, RunSummary};
use crate::domain::config_validation::{validate_backtest_config, validate_policy};
use crate::domain::error::TiertraderError;
use crate::domain::market_filter::{AlwaysFavorable, MarketRegime, TrendBreakoutFilter, FILTER_LOOKBACK_DAYS};
use crate::domain::policy::{ConfidenceTier, ExitPolicy, StrategyPolicy, TierTable};
use crate::domain::run_id::run_id;
use crate::domain::signal::SignalSeries;
use crate::logging::{init_logging, LogFormat};
use crate::ports::config_port::{ConfigPort, TickerOverlay, STRATEGY_SECTION};
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;
use crate::ports::signal_port::SignalPort;

const BACKTEST_SECTION: &str = "backtest";

#[derive(Parser, Debug)]
#[command(name = "tiertrader", about = "Confidence-tiered strategy backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest for one or more tickers
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, conflicts_with = "tickers")]
        ticker: Option<String>,
        /// Comma separated list of tickers
        #[arg(long)]
        tickers: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file without reading any data
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub ticker: Option<String>,
    pub tickers: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub output: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Everything a run needs, fully validated.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: BacktestConfig,
    pub policies: Vec<(String, StrategyPolicy)>,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(&cli.log_level, cli.log_format);
    match cli.command {
        Command::Backtest {
            config,
            ticker,
            tickers,
            start,
            end,
            output,
            data_dir,
            dry_run,
        } => {
            let overrides = RunOverrides {
                ticker,
                tickers,
                start,
                end,
                output,
                data_dir,
            };
            if dry_run {
                run_dry_run(&config, &overrides)
            } else {
                run_backtest_command(&config, &overrides)
            }
        }
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TiertraderError> {
    FileConfigAdapter::from_file(path).map_err(|e| TiertraderError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn report_failure(err: &TiertraderError) -> ExitCode {
    error!("{err}");
    err.into()
}

fn run_backtest_command(config_path: &Path, overrides: &RunOverrides) -> ExitCode {
    info!(config = %config_path.display(), "loading config");
    let plan = match load_config(config_path).and_then(|c| plan_run(&c, config_path, overrides)) {
        Ok(p) => p,
        Err(e) => return report_failure(&e),
    };

    let data = CsvAdapter::new(plan.data_dir.clone());
    let reporter = FileReportAdapter::new();
    let outcomes = run_tickers(&data, &reporter, &plan);

    let mut first_failure: Option<ExitCode> = None;
    for (ticker, outcome) in &outcomes {
        match outcome {
            Ok((summary, result, dir)) => print_run(summary, result, dir),
            Err(e) => {
                error!(ticker = %ticker, "{e}");
                first_failure.get_or_insert_with(|| e.into());
            }
        }
    }
    first_failure.unwrap_or(ExitCode::SUCCESS)
}

pub type TickerOutcome = Result<(RunSummary, BacktestResult, PathBuf), TiertraderError>;

/// Runs every planned ticker in parallel. Each run owns its own state;
/// a failing ticker does not stop the others.
pub fn run_tickers<D, R>(data: &D, reporter: &R, plan: &RunPlan) -> Vec<(String, TickerOutcome)>
where
    D: DataPort + SignalPort + Sync,
    R: ReportPort + Sync,
{
    plan.policies
        .par_iter()
        .map(|(ticker, policy)| {
            let outcome = run_ticker(data, ticker, policy, &plan.config).and_then(
                |(summary, result)| {
                    let dir = reporter.write(&summary, &result, &plan.output_dir)?;
                    Ok((summary, result, dir))
                },
            );
            (ticker.clone(), outcome)
        })
        .collect()
}

/// Loads the data for one ticker and runs it. The market filter, when
/// enabled, is warmed up on history before the run window.
pub fn run_ticker<D>(
    data: &D,
    ticker: &str,
    policy: &StrategyPolicy,
    config: &BacktestConfig,
) -> Result<(RunSummary, BacktestResult), TiertraderError>
where
    D: DataPort + SignalPort,
{
    let fetch_start = if policy.exit.use_market_filter {
        config.start_date - Duration::days(FILTER_LOOKBACK_DAYS)
    } else {
        config.start_date
    };

    let bars = data.fetch_bars(ticker, fetch_start, config.end_date)?;
    let signals = SignalSeries::new(
        ticker,
        data.fetch_signals(ticker, config.start_date, config.end_date)?,
    )?;
    let benchmark_bars = match config.benchmark.as_deref() {
        Some(b) if !b.eq_ignore_ascii_case(ticker) => {
            Some(data.fetch_bars(b, fetch_start, config.end_date)?)
        }
        _ => None,
    };

    let regime: Box<dyn MarketRegime> = if policy.exit.use_market_filter {
        // a benchmark naming the ticker itself gates on the ticker's own mean
        let filter_benchmark = config
            .benchmark
            .as_ref()
            .map(|_| benchmark_bars.as_deref().unwrap_or(bars.as_slice()));
        Box::new(TrendBreakoutFilter::new(&bars, filter_benchmark))
    } else {
        Box::new(AlwaysFavorable)
    };

    let inputs = RunInputs {
        ticker,
        bars: &bars,
        signals: &signals,
        benchmark_bars: benchmark_bars.as_deref(),
    };
    let result = run_backtest(&inputs, policy, config, regime.as_ref())?;
    let summary = RunSummary::new(config, policy, &result)?;
    Ok((summary, result))
}

fn print_run(summary: &RunSummary, result: &BacktestResult, dir: &Path) {
    let m = &result.metrics;
    println!("\n=== {} ({}) ===", summary.ticker, summary.run_id);
    println!("Final Value:      {:.2}", m.final_value);
    println!("Total Injected:   {:.2}", m.total_injected);
    println!("Total Return:     {:.2}%", m.total_return * 100.0);
    println!("CAGR:             {:.2}%", m.cagr * 100.0);
    println!("Max Drawdown:     {:.2}%", m.max_drawdown * 100.0);
    if let Some(w) = &m.drawdown {
        let recovery = w
            .recovery_date
            .map_or_else(|| "not recovered".to_string(), |d| d.to_string());
        println!("  window:         {} -> {} ({recovery})", w.peak_date, w.trough_date);
    }
    println!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    println!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    println!("Trades:           {}", m.trade_count);
    println!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    println!("Exposure:         {:.1}%", m.exposure_rate * 100.0);
    println!("Benchmark Return: {:.2}%", result.benchmark.total_return * 100.0);
    println!("Report:           {}", dir.display());
}

pub fn run_dry_run(config_path: &Path, overrides: &RunOverrides) -> ExitCode {
    let plan = match load_config(config_path).and_then(|c| plan_run(&c, config_path, overrides)) {
        Ok(p) => p,
        Err(e) => return report_failure(&e),
    };

    println!("Run window: {} to {}", plan.config.start_date, plan.config.end_date);
    println!("Initial cash: {:.2}", plan.config.initial_cash);
    if let Some(b) = &plan.config.benchmark {
        println!("Benchmark: {b}");
    }
    println!("Data dir: {}", plan.data_dir.display());
    println!("Output dir: {}", plan.output_dir.display());
    for (ticker, policy) in &plan.policies {
        let id = match run_id(ticker, &plan.config, policy) {
            Ok(id) => id,
            Err(e) => return report_failure(&e),
        };
        println!("\n{ticker} ({id})");
        for (tier_id, tier) in policy.tiers.iter() {
            println!(
                "  tier {tier_id}: conf >= {:.2} buys {:.0}%",
                tier.min_conf,
                tier.buy_frac * 100.0
            );
        }
        let exit = &policy.exit;
        println!(
            "  stop {:.1}% | trail arms at +{:.1}% | trail {:.1}%/{:.1}% above +{:.1}%",
            exit.stop_loss_pct * 100.0,
            exit.take_profit_activation_pct * 100.0,
            exit.trail_stop_low_pct * 100.0,
            exit.trail_stop_high_pct * 100.0,
            exit.high_profit_threshold_pct * 100.0
        );
        println!(
            "  cooldown {} days | market filter {}",
            exit.min_days_between_entries,
            if exit.use_market_filter { "on" } else { "off" }
        );
    }
    println!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    info!(config = %config_path.display(), "validating");
    match load_config(config_path)
        .and_then(|c| plan_run(&c, config_path, &RunOverrides::default()))
    {
        Ok(plan) => {
            println!(
                "Configuration is valid: {} ticker(s)",
                plan.policies.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_failure(&e),
    }
}

/// Builds and validates the full run plan. No market data is touched.
pub fn plan_run(
    adapter: &dyn ConfigPort,
    config_path: &Path,
    overrides: &RunOverrides,
) -> Result<RunPlan, TiertraderError> {
    let mut config = build_backtest_config(adapter)?;
    if let Some(start) = overrides.start {
        config.start_date = start;
    }
    if let Some(end) = overrides.end {
        config.end_date = end;
    }
    if overrides.start.is_some() || overrides.end.is_some() {
        let (start, end) = (config.start_date, config.end_date);
        config.injections.retain(|injection| {
            let inside = injection.date >= start && injection.date <= end;
            if !inside {
                warn!(
                    date = %injection.date,
                    amount = injection.amount,
                    "injection outside the overridden run window dropped"
                );
            }
            inside
        });
    }
    validate_backtest_config(&config)?;

    let tickers = resolve_tickers(
        adapter,
        overrides.ticker.as_deref(),
        overrides.tickers.as_deref(),
    )?;
    let policies = tickers
        .into_iter()
        .map(|ticker| {
            let policy = build_policy(adapter, &ticker)?;
            Ok((ticker, policy))
        })
        .collect::<Result<Vec<_>, TiertraderError>>()?;

    let base_dir = config_path.parent().unwrap_or(Path::new("."));
    let from_config = |key: &str, default: &str| {
        let value = adapter
            .get_string(BACKTEST_SECTION, key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string());
        base_dir.join(value.trim())
    };
    let data_dir = overrides
        .data_dir
        .clone()
        .unwrap_or_else(|| from_config("data_dir", "data"));
    let output_dir = overrides
        .output
        .clone()
        .unwrap_or_else(|| from_config("output_dir", "backtests"));

    Ok(RunPlan {
        config,
        policies,
        data_dir,
        output_dir,
    })
}

fn parse_value<T>(adapter: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, TiertraderError>
where
    T: FromStr,
    T::Err: Display,
{
    match adapter.get_string(section, key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TiertraderError::config_invalid(section, key, format!("{:?}: {e}", raw.trim()))),
        _ => Ok(None),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(section: &str, key: &str, value: &str) -> Result<NaiveDate, TiertraderError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        TiertraderError::config_invalid(section, key, format!("invalid date {value:?} (expected YYYY-MM-DD)"))
    })
}

fn required_date(adapter: &dyn ConfigPort, key: &str) -> Result<NaiveDate, TiertraderError> {
    let raw = adapter
        .get_string(BACKTEST_SECTION, key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TiertraderError::ConfigMissing {
            section: BACKTEST_SECTION.into(),
            key: key.into(),
        })?;
    parse_date(BACKTEST_SECTION, key, &raw)
}

/// Parses `date:amount, date:amount`.
pub fn parse_injections(value: &str) -> Result<Vec<Injection>, TiertraderError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|token| {
            let (date, amount) = token.split_once(':').ok_or_else(|| {
                TiertraderError::config_invalid(
                    BACKTEST_SECTION,
                    "injections",
                    format!("expected date:amount, got {token:?}"),
                )
            })?;
            let amount = amount.trim().parse::<f64>().map_err(|e| {
                TiertraderError::config_invalid(BACKTEST_SECTION, "injections", format!("{token:?}: {e}"))
            })?;
            Ok(Injection {
                date: parse_date(BACKTEST_SECTION, "injections", date)?,
                amount,
            })
        })
        .collect()
}

/// Parses `min_conf:buy_frac, min_conf:buy_frac`.
pub fn parse_tiers(section: &str, value: &str) -> Result<Vec<ConfidenceTier>, TiertraderError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|token| {
            let invalid = |reason: String| {
                TiertraderError::config_invalid(section, "conf_thresholds", reason)
            };
            let (min_conf, buy_frac) = token
                .split_once(':')
                .ok_or_else(|| invalid(format!("expected min_conf:buy_frac, got {token:?}")))?;
            let min_conf = min_conf
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(format!("{token:?}: {e}")))?;
            let buy_frac = buy_frac
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid(format!("{token:?}: {e}")))?;
            Ok(ConfidenceTier { min_conf, buy_frac })
        })
        .collect()
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TiertraderError> {
    let start_date = required_date(adapter, "start_date")?;
    let end_date = required_date(adapter, "end_date")?;

    let initial_cash = parse_value::<f64>(adapter, BACKTEST_SECTION, "initial_cash")?.ok_or_else(|| {
        TiertraderError::ConfigMissing {
            section: BACKTEST_SECTION.into(),
            key: "initial_cash".into(),
        }
    })?;

    let injections = match adapter.get_string(BACKTEST_SECTION, "injections") {
        Some(raw) => parse_injections(&raw)?,
        None => Vec::new(),
    };

    Ok(BacktestConfig {
        start_date,
        end_date,
        initial_cash,
        benchmark: adapter
            .get_string(BACKTEST_SECTION, "benchmark")
            .map(|b| b.trim().to_uppercase())
            .filter(|b| !b.is_empty()),
        injections,
        yearly_contribution: parse_value(adapter, BACKTEST_SECTION, "yearly_contribution")?
            .unwrap_or(0.0),
        risk_free_rate: parse_value(adapter, BACKTEST_SECTION, "risk_free_rate")?.unwrap_or(0.0),
    })
}

/// Effective strategy for `ticker`: `[strategy]` with `[strategy.<ticker>]`
/// keys layered on top, validated.
pub fn build_policy(adapter: &dyn ConfigPort, ticker: &str) -> Result<StrategyPolicy, TiertraderError> {
    let overlay = TickerOverlay::new(adapter, ticker);
    let defaults = ExitPolicy::default();

    // errors name the section the offending key actually came from
    let located = |err: TiertraderError| match err {
        TiertraderError::ConfigInvalid { key, reason, .. } => TiertraderError::ConfigInvalid {
            section: overlay.section_for(&key).to_string(),
            key,
            reason,
        },
        other => other,
    };
    let pct = |key: &str, default: f64| -> Result<f64, TiertraderError> {
        Ok(parse_value::<f64>(&overlay, STRATEGY_SECTION, key)
            .map_err(located)?
            .unwrap_or(default))
    };

    let raw_tiers = overlay
        .get_string(STRATEGY_SECTION, "conf_thresholds")
        .ok_or_else(|| TiertraderError::ConfigMissing {
            section: STRATEGY_SECTION.into(),
            key: "conf_thresholds".into(),
        })?;
    let tiers = parse_tiers(overlay.section_for("conf_thresholds"), &raw_tiers)?;

    let use_market_filter = match overlay.get_string(STRATEGY_SECTION, "use_market_filter") {
        Some(raw) if !raw.trim().is_empty() => parse_flag(&raw).ok_or_else(|| {
            TiertraderError::config_invalid(
                overlay.section_for("use_market_filter"),
                "use_market_filter",
                format!("expected a boolean, got {:?}", raw.trim()),
            )
        })?,
        _ => defaults.use_market_filter,
    };

    let exit = ExitPolicy {
        stop_loss_pct: pct("stop_loss_pct", defaults.stop_loss_pct)?,
        take_profit_activation_pct: pct(
            "take_profit_activation_pct",
            defaults.take_profit_activation_pct,
        )?,
        trail_stop_low_pct: pct("trail_stop_low_pct", defaults.trail_stop_low_pct)?,
        trail_stop_high_pct: pct("trail_stop_high_pct", defaults.trail_stop_high_pct)?,
        high_profit_threshold_pct: pct(
            "high_profit_threshold_pct",
            defaults.high_profit_threshold_pct,
        )?,
        min_days_between_entries: parse_value::<i64>(&overlay, STRATEGY_SECTION, "min_days_between_entries")
            .map_err(located)?
            .unwrap_or(defaults.min_days_between_entries),
        use_market_filter,
        signal_exit_below: parse_value::<f64>(&overlay, STRATEGY_SECTION, "signal_exit_below")
            .map_err(located)?,
    };

    let policy = StrategyPolicy {
        tiers: TierTable::new(tiers),
        exit,
    };
    validate_policy(&policy, STRATEGY_SECTION).map_err(located)?;
    Ok(policy)
}

/// Ticker list, by precedence: `--ticker`, `--tickers`, then
/// `[backtest] tickers`, then `[backtest] ticker`. Upper-cased, no
/// duplicates.
pub fn resolve_tickers(
    adapter: &dyn ConfigPort,
    ticker: Option<&str>,
    tickers: Option<&str>,
) -> Result<Vec<String>, TiertraderError> {
    let raw = ticker
        .map(str::to_string)
        .or_else(|| tickers.map(str::to_string))
        .or_else(|| adapter.get_string(BACKTEST_SECTION, "tickers"))
        .or_else(|| adapter.get_string(BACKTEST_SECTION, "ticker"))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TiertraderError::ConfigMissing {
            section: BACKTEST_SECTION.into(),
            key: "tickers".into(),
        })?;

    let mut out: Vec<String> = Vec::new();
    for token in raw.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(TiertraderError::config_invalid(
                BACKTEST_SECTION,
                "tickers",
                "empty ticker in list",
            ));
        }
        let ticker = trimmed.to_uppercase();
        if out.contains(&ticker) {
            return Err(TiertraderError::config_invalid(
                BACKTEST_SECTION,
                "tickers",
                format!("duplicate ticker {ticker}"),
            ));
        }
        out.push(ticker);
    }
    Ok(out)
}
