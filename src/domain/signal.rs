//! Per-day model confidence signal.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use super::error::TiertraderError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub date: NaiveDate,
    pub ticker: String,
    pub confidence: f64,
}

/// Signals for one ticker keyed by date.
#[derive(Debug, Clone, Default)]
pub struct SignalSeries {
    ticker: String,
    by_date: HashMap<NaiveDate, Signal>,
}

impl SignalSeries {
    /// Index a signal list. Rejects confidences outside [0, 1], foreign
    /// tickers and duplicate dates.
    pub fn new(ticker: &str, signals: Vec<Signal>) -> Result<Self, TiertraderError> {
        let mut by_date = HashMap::with_capacity(signals.len());
        for signal in signals {
            if !signal.ticker.eq_ignore_ascii_case(ticker) {
                return Err(TiertraderError::DataInvalid {
                    ticker: ticker.to_string(),
                    reason: format!("signal for {} on {}", signal.ticker, signal.date),
                });
            }
            if !(0.0..=1.0).contains(&signal.confidence) {
                return Err(TiertraderError::DataInvalid {
                    ticker: ticker.to_string(),
                    reason: format!(
                        "confidence {} outside [0, 1] on {}",
                        signal.confidence, signal.date
                    ),
                });
            }
            let date = signal.date;
            if by_date.insert(date, signal).is_some() {
                return Err(TiertraderError::DataInvalid {
                    ticker: ticker.to_string(),
                    reason: format!("duplicate signal on {date}"),
                });
            }
        }
        Ok(Self {
            ticker: ticker.to_string(),
            by_date,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&Signal> {
        self.by_date.get(&date)
    }

    /// Signal for a required trading day; absence is a data gap.
    pub fn require(&self, date: NaiveDate) -> Result<&Signal, TiertraderError> {
        self.get(date).ok_or_else(|| TiertraderError::DataGap {
            ticker: self.ticker.clone(),
            date,
            what: "signal".to_string(),
        })
    }
}
