//! Model confidence access port.

use crate::domain::error::TiertraderError;
use crate::domain::signal::Signal;
use chrono::NaiveDate;

pub trait SignalPort {
    fn fetch_signals(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Signal>, TiertraderError>;
}
