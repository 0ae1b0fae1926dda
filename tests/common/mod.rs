#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiertrader::domain::backtest::{BacktestConfig, BacktestResult, RunSummary};
use tiertrader::domain::error::TiertraderError;
pub use tiertrader::domain::ohlcv::Bar;
use tiertrader::domain::policy::{ConfidenceTier, ExitPolicy, StrategyPolicy, TierTable};
pub use tiertrader::domain::signal::{Signal, SignalSeries};
use tiertrader::ports::data_port::DataPort;
use tiertrader::ports::report_port::ReportPort;
use tiertrader::ports::signal_port::SignalPort;

/// In-memory bars and signals keyed by upper-case ticker.
#[derive(Default)]
pub struct MockDataPort {
    pub bars: HashMap<String, Vec<Bar>>,
    pub signals: HashMap<String, Vec<Signal>>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, ticker: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(ticker.to_uppercase(), bars);
        self
    }

    pub fn with_signals(mut self, ticker: &str, confidences: &[f64]) -> Self {
        self.signals
            .insert(ticker.to_uppercase(), signals(ticker, confidences));
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, TiertraderError> {
        let bars = self
            .bars
            .get(&ticker.to_uppercase())
            .ok_or_else(|| TiertraderError::NoData {
                ticker: ticker.to_string(),
                start: start_date,
                end: end_date,
            })?;
        Ok(bars
            .iter()
            .filter(|b| b.date >= start_date && b.date <= end_date)
            .cloned()
            .collect())
    }
}

impl SignalPort for MockDataPort {
    fn fetch_signals(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Signal>, TiertraderError> {
        let signals = self
            .signals
            .get(&ticker.to_uppercase())
            .ok_or_else(|| TiertraderError::NoData {
                ticker: ticker.to_string(),
                start: start_date,
                end: end_date,
            })?;
        Ok(signals
            .iter()
            .filter(|s| s.date >= start_date && s.date <= end_date)
            .cloned()
            .collect())
    }
}

/// Records the run ids it was asked to write.
#[derive(Default)]
pub struct RecordingReportPort {
    pub written: Mutex<Vec<String>>,
}

impl ReportPort for RecordingReportPort {
    fn write(
        &self,
        summary: &RunSummary,
        _result: &BacktestResult,
        output_dir: &Path,
    ) -> Result<PathBuf, TiertraderError> {
        if let Ok(mut written) = self.written.lock() {
            written.push(summary.run_id.clone());
        }
        Ok(output_dir.join(&summary.run_id))
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Day `i` of the test calendar, counting from 2024-01-01.
pub fn day(i: usize) -> NaiveDate {
    date(2024, 1, 1) + Duration::days(i as i64)
}

/// One flat bar per calendar day from [`day`]`(0)`.
pub fn bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            date: day(i),
            open: c,
            high: c,
            low: c,
            close: c,
        })
        .collect()
}

pub fn signals(ticker: &str, confidences: &[f64]) -> Vec<Signal> {
    confidences
        .iter()
        .enumerate()
        .map(|(i, &c)| Signal {
            date: day(i),
            ticker: ticker.to_uppercase(),
            confidence: c,
        })
        .collect()
}

pub fn series(ticker: &str, confidences: &[f64]) -> SignalSeries {
    SignalSeries::new(ticker, signals(ticker, confidences)).unwrap()
}

pub fn tiers(pairs: &[(f64, f64)]) -> TierTable {
    TierTable::new(
        pairs
            .iter()
            .map(|&(min_conf, buy_frac)| ConfidenceTier { min_conf, buy_frac })
            .collect(),
    )
}

pub fn policy(pairs: &[(f64, f64)]) -> StrategyPolicy {
    StrategyPolicy {
        tiers: tiers(pairs),
        exit: ExitPolicy::default(),
    }
}

pub fn config(days: usize, initial_cash: f64) -> BacktestConfig {
    BacktestConfig {
        start_date: day(0),
        end_date: day(days - 1),
        initial_cash,
        benchmark: None,
        injections: vec![],
        yearly_contribution: 0.0,
        risk_free_rate: 0.0,
    }
}
