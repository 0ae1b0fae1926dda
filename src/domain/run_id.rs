//! Deterministic run identifiers.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::backtest::BacktestConfig;
use super::error::TiertraderError;
use super::policy::StrategyPolicy;

#[derive(Serialize)]
struct RunIdentity<'a> {
    ticker: &'a str,
    config: &'a BacktestConfig,
    policy: &'a StrategyPolicy,
}

/// `bt_` followed by the first 8 hex chars of SHA-256 over the canonical
/// JSON of the inputs. Identical inputs give identical ids.
pub fn run_id(
    ticker: &str,
    config: &BacktestConfig,
    policy: &StrategyPolicy,
) -> Result<String, TiertraderError> {
    let canonical = serde_json::to_vec(&RunIdentity {
        ticker,
        config,
        policy,
    })
    .map_err(std::io::Error::from)?;
    let digest = Sha256::digest(&canonical);
    let hex = hex::encode(digest);
    Ok(format!("bt_{}", &hex[..8]))
}
