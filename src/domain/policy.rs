//! Entry tiers and exit policy for a run.

use serde::Serialize;

/// Index of a tier in its [`TierTable`] (ascending by `min_conf`).
pub type TierId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceTier {
    pub min_conf: f64,
    pub buy_frac: f64,
}

/// Tiers sorted ascending by `min_conf`. Entries consume them in this order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierTable {
    tiers: Vec<ConfidenceTier>,
}

impl TierTable {
    pub fn new(mut tiers: Vec<ConfidenceTier>) -> Self {
        tiers.sort_by(|a, b| a.min_conf.total_cmp(&b.min_conf));
        Self { tiers }
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn get(&self, id: TierId) -> Option<&ConfidenceTier> {
        self.tiers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TierId, &ConfidenceTier)> {
        self.tiers.iter().enumerate()
    }

    pub fn total_buy_frac(&self) -> f64 {
        self.tiers.iter().map(|t| t.buy_frac).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitPolicy {
    pub stop_loss_pct: f64,
    pub take_profit_activation_pct: f64,
    pub trail_stop_low_pct: f64,
    pub trail_stop_high_pct: f64,
    pub high_profit_threshold_pct: f64,
    pub min_days_between_entries: i64,
    pub use_market_filter: bool,
    /// Close the position when confidence drops below this value.
    pub signal_exit_below: Option<f64>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        ExitPolicy {
            stop_loss_pct: 0.08,
            take_profit_activation_pct: 0.20,
            trail_stop_low_pct: 0.08,
            trail_stop_high_pct: 0.17,
            high_profit_threshold_pct: 0.25,
            min_days_between_entries: 0,
            use_market_filter: false,
            signal_exit_below: None,
        }
    }
}

impl ExitPolicy {
    pub fn stop_price(&self, cost_basis: f64) -> f64 {
        cost_basis * (1.0 - self.stop_loss_pct)
    }

    pub fn activation_price(&self, cost_basis: f64) -> f64 {
        cost_basis * (1.0 + self.take_profit_activation_pct)
    }

    /// Trail width for a given peak gain: the tighter band applies once the
    /// peak gain reaches `high_profit_threshold_pct`.
    pub fn trail_pct(&self, peak_gain: f64) -> f64 {
        if peak_gain >= self.high_profit_threshold_pct {
            self.trail_stop_high_pct
        } else {
            self.trail_stop_low_pct
        }
    }
}

/// Effective per-ticker strategy: the tier table plus the exit policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyPolicy {
    pub tiers: TierTable,
    pub exit: ExitPolicy,
}
