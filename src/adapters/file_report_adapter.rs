//! Run artifacts on the local filesystem.
//!
//! `{output_dir}/{run_id}/` receives `trades.csv`, `fills.csv`,
//! `equity.csv`, `metrics.json`, `summary.json` and `next_action.txt`.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::backtest::{BacktestResult, RunSummary};
use crate::domain::error::TiertraderError;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileReportAdapter;

impl FileReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn csv_error(path: &Path, err: csv::Error) -> TiertraderError {
    TiertraderError::Io(std::io::Error::other(format!(
        "failed to write {}: {err}",
        path.display()
    )))
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), TiertraderError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TiertraderError> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    fs::write(path, json)?;
    Ok(())
}

impl ReportPort for FileReportAdapter {
    fn write(
        &self,
        summary: &RunSummary,
        result: &BacktestResult,
        output_dir: &Path,
    ) -> Result<PathBuf, TiertraderError> {
        let run_dir = output_dir.join(&summary.run_id);
        fs::create_dir_all(&run_dir)?;

        write_csv(&run_dir.join("trades.csv"), &result.trades)?;
        write_csv(&run_dir.join("fills.csv"), &result.fills)?;
        write_csv(&run_dir.join("equity.csv"), &result.equity)?;
        write_json(&run_dir.join("metrics.json"), &result.metrics)?;
        write_json(&run_dir.join("summary.json"), summary)?;
        fs::write(run_dir.join("next_action.txt"), result.next_action.render())?;

        tracing::info!(ticker = %summary.ticker, dir = %run_dir.display(), "report written");
        Ok(run_dir)
    }
}
