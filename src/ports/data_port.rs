//! Price data access port.

use crate::domain::error::TiertraderError;
use crate::domain::ohlcv::Bar;
use chrono::NaiveDate;

pub trait DataPort {
    /// Daily bars for `ticker` with `start_date <= date <= end_date`,
    /// ascending by date.
    fn fetch_bars(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, TiertraderError>;
}
