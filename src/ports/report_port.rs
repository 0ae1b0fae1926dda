//! Report generation port.

use crate::domain::backtest::{BacktestResult, RunSummary};
use crate::domain::error::TiertraderError;
use std::path::{Path, PathBuf};

/// Port for persisting a finished run.
pub trait ReportPort {
    /// Writes every artifact of the run and returns the run directory.
    fn write(
        &self,
        summary: &RunSummary,
        result: &BacktestResult,
        output_dir: &Path,
    ) -> Result<PathBuf, TiertraderError>;
}
