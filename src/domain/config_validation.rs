//! Configuration validation.
//!
//! Runs on the typed run config and policy before any data is read.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::TiertraderError;
use crate::domain::policy::{ExitPolicy, StrategyPolicy};

const BUY_FRAC_TOLERANCE: f64 = 1e-9;

pub fn validate_backtest_config(config: &BacktestConfig) -> Result<(), TiertraderError> {
    if config.start_date > config.end_date {
        return Err(TiertraderError::config_invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    if !(config.initial_cash > 0.0 && config.initial_cash.is_finite()) {
        return Err(TiertraderError::config_invalid(
            "backtest",
            "initial_cash",
            "initial_cash must be positive",
        ));
    }
    if !(config.yearly_contribution >= 0.0 && config.yearly_contribution.is_finite()) {
        return Err(TiertraderError::config_invalid(
            "backtest",
            "yearly_contribution",
            "yearly_contribution must be non-negative",
        ));
    }
    if !(0.0..1.0).contains(&config.risk_free_rate) {
        return Err(TiertraderError::config_invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    for injection in &config.injections {
        if !(injection.amount > 0.0 && injection.amount.is_finite()) {
            return Err(TiertraderError::config_invalid(
                "backtest",
                "injections",
                format!("injection on {} must be positive", injection.date),
            ));
        }
        if !config.contains(injection.date) {
            return Err(TiertraderError::config_invalid(
                "backtest",
                "injections",
                format!("injection on {} is outside the run window", injection.date),
            ));
        }
    }
    Ok(())
}

/// `section` names the INI section the policy came from, for messages.
pub fn validate_policy(policy: &StrategyPolicy, section: &str) -> Result<(), TiertraderError> {
    if policy.tiers.is_empty() {
        return Err(TiertraderError::config_invalid(
            section,
            "conf_thresholds",
            "at least one tier is required",
        ));
    }
    let mut prev_min: Option<f64> = None;
    for (id, tier) in policy.tiers.iter() {
        if !(0.0..=1.0).contains(&tier.min_conf) {
            return Err(TiertraderError::config_invalid(
                section,
                "conf_thresholds",
                format!("tier {id} min_conf {} outside [0, 1]", tier.min_conf),
            ));
        }
        if !(tier.buy_frac > 0.0 && tier.buy_frac <= 1.0) {
            return Err(TiertraderError::config_invalid(
                section,
                "conf_thresholds",
                format!("tier {id} buy_frac {} outside (0, 1]", tier.buy_frac),
            ));
        }
        if prev_min == Some(tier.min_conf) {
            return Err(TiertraderError::config_invalid(
                section,
                "conf_thresholds",
                format!("duplicate min_conf {}", tier.min_conf),
            ));
        }
        prev_min = Some(tier.min_conf);
    }
    let total = policy.tiers.total_buy_frac();
    if total > 1.0 + BUY_FRAC_TOLERANCE {
        return Err(TiertraderError::config_invalid(
            section,
            "conf_thresholds",
            format!("buy fractions sum to {total:.4}, above 1.0"),
        ));
    }
    validate_exit_policy(&policy.exit, section)
}

fn validate_exit_policy(exit: &ExitPolicy, section: &str) -> Result<(), TiertraderError> {
    let pcts = [
        ("stop_loss_pct", exit.stop_loss_pct),
        ("take_profit_activation_pct", exit.take_profit_activation_pct),
        ("trail_stop_low_pct", exit.trail_stop_low_pct),
        ("trail_stop_high_pct", exit.trail_stop_high_pct),
        ("high_profit_threshold_pct", exit.high_profit_threshold_pct),
    ];
    for (key, value) in pcts {
        if !(0.0..=1.0).contains(&value) {
            return Err(TiertraderError::config_invalid(
                section,
                key,
                format!("{key} must be in [0, 1], got {value}"),
            ));
        }
    }
    if exit.min_days_between_entries < 0 {
        return Err(TiertraderError::config_invalid(
            section,
            "min_days_between_entries",
            "min_days_between_entries must be non-negative",
        ));
    }
    if let Some(floor) = exit.signal_exit_below {
        if !(0.0..=1.0).contains(&floor) {
            return Err(TiertraderError::config_invalid(
                section,
                "signal_exit_below",
                "signal_exit_below must be in [0, 1]",
            ));
        }
    }
    Ok(())
}
