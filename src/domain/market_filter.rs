//! Market-regime capability consulted before entries.
//!
//! The engine only asks whether entries are allowed on a day and why.
//! [`TrendBreakoutFilter`] is the stock regime: favorable when the benchmark
//! closes above its 120-day mean, or when the ticker breaks out above its
//! prior 20-day high.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::ohlcv::Bar;

pub const BENCHMARK_MA_WINDOW: usize = 120;
pub const BREAKOUT_WINDOW: usize = 20;

/// Calendar days of history to load ahead of the run start so both windows
/// are warm on day one.
pub const FILTER_LOOKBACK_DAYS: i64 = 200;

/// Regime condition an entry was allowed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Market filter disabled.
    NoFilter,
    BullMarket,
    Breakout,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryType::NoFilter => "no_filter",
            EntryType::BullMarket => "bull_market",
            EntryType::Breakout => "breakout",
        };
        f.write_str(s)
    }
}

pub trait MarketRegime {
    /// Condition that allows entries on `date`, or `None` when blocked.
    fn entry_type(&self, date: NaiveDate) -> Option<EntryType>;

    /// Inputs behind the decision, for regimes that compute them.
    fn detail(&self, _date: NaiveDate) -> Option<RegimeDetail> {
        None
    }

    fn is_favorable(&self, date: NaiveDate) -> bool {
        self.entry_type(date).is_some()
    }
}

/// Regime used when the market filter is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFavorable;

impl MarketRegime for AlwaysFavorable {
    fn entry_type(&self, _date: NaiveDate) -> Option<EntryType> {
        Some(EntryType::NoFilter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeDetail {
    /// Last benchmark close on or before the day, if a benchmark is loaded.
    pub benchmark_close: Option<f64>,
    /// 120-day mean of the benchmark close, once the window is full.
    pub benchmark_ma: Option<f64>,
    pub benchmark_above_ma: bool,
    pub ticker_breakout: bool,
}

impl RegimeDetail {
    pub fn entry_type(&self) -> Option<EntryType> {
        if self.benchmark_above_ma {
            Some(EntryType::BullMarket)
        } else if self.ticker_breakout {
            Some(EntryType::Breakout)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BenchmarkReading {
    close: f64,
    ma: Option<f64>,
}

impl BenchmarkReading {
    fn above_ma(&self) -> bool {
        self.ma.is_some_and(|ma| self.close > ma)
    }
}

#[derive(Debug, Clone)]
pub struct TrendBreakoutFilter {
    by_date: HashMap<NaiveDate, RegimeDetail>,
}

impl TrendBreakoutFilter {
    /// Both series must be ascending by date. Without a benchmark the
    /// benchmark leg counts as favorable. Pass the ticker's own bars as the
    /// benchmark to gate entries on the ticker's 120-day mean.
    pub fn new(ticker_bars: &[Bar], benchmark_bars: Option<&[Bar]>) -> Self {
        let benchmark = benchmark_bars.map(benchmark_readings);
        let breakouts = ticker_breakouts(ticker_bars);

        let by_date = ticker_bars
            .iter()
            .zip(breakouts)
            .map(|(bar, ticker_breakout)| {
                let detail = match &benchmark {
                    None => RegimeDetail {
                        benchmark_close: None,
                        benchmark_ma: None,
                        benchmark_above_ma: true,
                        ticker_breakout,
                    },
                    Some(readings) => {
                        // last known benchmark reading on or before this date
                        let reading = readings.range(..=bar.date).next_back().map(|(_, r)| *r);
                        RegimeDetail {
                            benchmark_close: reading.map(|r| r.close),
                            benchmark_ma: reading.and_then(|r| r.ma),
                            benchmark_above_ma: reading.is_some_and(|r| r.above_ma()),
                            ticker_breakout,
                        }
                    }
                };
                (bar.date, detail)
            })
            .collect();

        Self { by_date }
    }
}

impl MarketRegime for TrendBreakoutFilter {
    fn entry_type(&self, date: NaiveDate) -> Option<EntryType> {
        self.by_date.get(&date).and_then(RegimeDetail::entry_type)
    }

    fn detail(&self, date: NaiveDate) -> Option<RegimeDetail> {
        self.by_date.get(&date).copied()
    }
}

fn benchmark_readings(bars: &[Bar]) -> BTreeMap<NaiveDate, BenchmarkReading> {
    let mut out = BTreeMap::new();
    let mut window_sum = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        window_sum += bar.close;
        if i >= BENCHMARK_MA_WINDOW {
            window_sum -= bars[i - BENCHMARK_MA_WINDOW].close;
        }
        let ma = (i + 1 >= BENCHMARK_MA_WINDOW).then(|| window_sum / BENCHMARK_MA_WINDOW as f64);
        out.insert(
            bar.date,
            BenchmarkReading {
                close: bar.close,
                ma,
            },
        );
    }
    out
}

fn ticker_breakouts(bars: &[Bar]) -> Vec<bool> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            if i < BREAKOUT_WINDOW {
                return false;
            }
            let prior_high = bars[i - BREAKOUT_WINDOW..i]
                .iter()
                .map(|b| b.high)
                .fold(f64::MIN, f64::max);
            bar.close > prior_high
        })
        .collect()
}
