//! CSV file data adapter.
//!
//! Layout under the data directory:
//! `{TICKER}.csv` with `date,open,high,low,close[,volume]` and
//! `{TICKER}_signals.csv` with `date,confidence`.

use crate::domain::error::TiertraderError;
use crate::domain::ohlcv::Bar;
use crate::domain::signal::Signal;
use crate::ports::data_port::DataPort;
use crate::ports::signal_port::SignalPort;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct BarRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    date: NaiveDate,
    confidence: f64,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn bars_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", ticker.to_uppercase()))
    }

    fn signals_path(&self, ticker: &str) -> PathBuf {
        self.base_path
            .join(format!("{}_signals.csv", ticker.to_uppercase()))
    }

    /// Reads every row of `path` whose date lies in the window. A missing
    /// file means no data for the ticker.
    fn read_rows<R, F>(
        &self,
        path: &PathBuf,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        date_of: F,
    ) -> Result<Vec<R>, TiertraderError>
    where
        R: for<'de> Deserialize<'de>,
        F: Fn(&R) -> NaiveDate,
    {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TiertraderError::NoData {
                ticker: ticker.to_string(),
                start: start_date,
                end: end_date,
            },
            _ => TiertraderError::Io(e),
        })?;

        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        let mut rows = Vec::new();
        for (line, result) in rdr.deserialize::<R>().enumerate() {
            let row = result.map_err(|e| TiertraderError::DataInvalid {
                ticker: ticker.to_string(),
                reason: format!("{} row {}: {}", path.display(), line + 1, e),
            })?;
            let date = date_of(&row);
            if date >= start_date && date <= end_date {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, TiertraderError> {
        let path = self.bars_path(ticker);
        let rows: Vec<BarRow> =
            self.read_rows(&path, ticker, start_date, end_date, |r: &BarRow| r.date)?;
        Ok(rows
            .into_iter()
            .map(|r| Bar {
                date: r.date,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
            })
            .collect())
    }
}

impl SignalPort for CsvAdapter {
    fn fetch_signals(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Signal>, TiertraderError> {
        let path = self.signals_path(ticker);
        let rows: Vec<SignalRow> =
            self.read_rows(&path, ticker, start_date, end_date, |r: &SignalRow| r.date)?;
        Ok(rows
            .into_iter()
            .map(|r| Signal {
                date: r.date,
                ticker: ticker.to_uppercase(),
                confidence: r.confidence,
            })
            .collect())
    }
}
