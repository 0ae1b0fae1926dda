//! Daily price bar representation.

use chrono::NaiveDate;
use serde::Serialize;

use super::error::TiertraderError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    /// Percentage change of close against another close.
    pub fn change_from(&self, prev_close: f64) -> f64 {
        if prev_close > 0.0 {
            self.close / prev_close - 1.0
        } else {
            0.0
        }
    }
}

/// Checks that a bar series is strictly ascending by date with positive
/// finite prices. The run loop relies on both.
pub fn validate_series(ticker: &str, bars: &[Bar]) -> Result<(), TiertraderError> {
    for bar in bars {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(TiertraderError::DataInvalid {
                ticker: ticker.to_string(),
                reason: format!("non-positive or non-finite price on {}", bar.date),
            });
        }
    }
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(TiertraderError::DataInvalid {
                ticker: ticker.to_string(),
                reason: format!(
                    "bars out of order or duplicated at {} -> {}",
                    pair[0].date, pair[1].date
                ),
            });
        }
    }
    Ok(())
}
