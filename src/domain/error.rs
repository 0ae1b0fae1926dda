//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for tiertrader.
#[derive(Debug, thiserror::Error)]
pub enum TiertraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {ticker} between {start} and {end}")]
    NoData {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("data gap for {ticker} on {date}: missing {what}")]
    DataGap {
        ticker: String,
        date: NaiveDate,
        what: String,
    },

    #[error("invalid data for {ticker}: {reason}")]
    DataInvalid { ticker: String, reason: String },

    #[error("state error for {ticker} on {date}: {reason}")]
    State {
        ticker: String,
        date: NaiveDate,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TiertraderError {
    pub fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TiertraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn state(ticker: &str, date: NaiveDate, reason: impl Into<String>) -> Self {
        TiertraderError::State {
            ticker: ticker.to_string(),
            date,
            reason: reason.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TiertraderError::ConfigParse { .. }
                | TiertraderError::ConfigMissing { .. }
                | TiertraderError::ConfigInvalid { .. }
        )
    }
}

impl From<&TiertraderError> for std::process::ExitCode {
    fn from(err: &TiertraderError) -> Self {
        let code: u8 = match err {
            TiertraderError::Io(_) => 1,
            TiertraderError::ConfigParse { .. }
            | TiertraderError::ConfigMissing { .. }
            | TiertraderError::ConfigInvalid { .. } => 2,
            TiertraderError::NoData { .. }
            | TiertraderError::DataGap { .. }
            | TiertraderError::DataInvalid { .. } => 5,
            TiertraderError::State { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
