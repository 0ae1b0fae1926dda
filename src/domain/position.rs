//! Position state, trade records and the per-ticker ledger.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

use super::error::TiertraderError;
use super::market_filter::EntryType;
use super::ohlcv::Bar;
use super::policy::{ExitPolicy, TierId, TierTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailStop,
    SignalExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailStop => "TRAIL_STOP",
            ExitReason::SignalExit => "SIGNAL_EXIT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub shares: f64,
    pub cost_basis: f64,
    pub entered_tiers: BTreeSet<TierId>,
    pub entry_dates: Vec<NaiveDate>,
    pub entry_prices: Vec<f64>,
    /// Signal confidence on each entry day, parallel to `entry_dates`.
    pub entry_confidences: Vec<f64>,
    /// Regime condition of the opening entry.
    pub entry_type: EntryType,
    pub highest_price_since_entry: f64,
    /// Latched once the close-based gain reaches the activation threshold.
    pub trail_armed: bool,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn cost(&self) -> f64 {
        self.shares * self.cost_basis
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares * (price - self.cost_basis)
    }

    pub fn gain(&self, price: f64) -> f64 {
        price / self.cost_basis - 1.0
    }

    pub fn peak_gain(&self) -> f64 {
        self.gain(self.highest_price_since_entry)
    }

    pub fn first_entry(&self) -> Option<NaiveDate> {
        self.entry_dates.first().copied()
    }

    pub fn opening_confidence(&self) -> f64 {
        self.entry_confidences.first().copied().unwrap_or(0.0)
    }

    /// Trail trigger price for the current running high. Only binding
    /// once the trail is armed.
    pub fn trail_level(&self, policy: &ExitPolicy) -> f64 {
        let pct = policy.trail_pct(self.peak_gain());
        self.highest_price_since_entry * (1.0 - pct)
    }
}

/// Tier consumption of the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierState {
    Flat,
    Partial(BTreeSet<TierId>),
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub ticker: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub proceeds: f64,
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
    pub holding_days: i64,
    pub entry_confidence: f64,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillSide {
    Buy,
    Sell,
}

/// One ledger mutation. Replaying fills reproduces cash and shares.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub date: NaiveDate,
    pub side: FillSide,
    pub tier: Option<TierId>,
    pub price: f64,
    pub shares: f64,
    pub notional: f64,
}

/// Owns the position of a single ticker.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    ticker: String,
    position: Option<Position>,
    last_entry_date: Option<NaiveDate>,
}

impl PositionLedger {
    pub fn new(ticker: &str) -> Self {
        PositionLedger {
            ticker: ticker.to_string(),
            position: None,
            last_entry_date: None,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }

    pub fn shares(&self) -> f64 {
        self.position.as_ref().map_or(0.0, |p| p.shares)
    }

    /// Most recent entry date of this ticker, kept across positions.
    pub fn last_entry_date(&self) -> Option<NaiveDate> {
        self.last_entry_date
    }

    /// Capital already committed to the open position, at cost.
    pub fn committed_capital(&self) -> f64 {
        self.position.as_ref().map_or(0.0, Position::cost)
    }

    pub fn tier_state(&self, tiers: &TierTable) -> TierState {
        match &self.position {
            None => TierState::Flat,
            Some(p) if p.entered_tiers.len() >= tiers.len() => TierState::Full,
            Some(p) => TierState::Partial(p.entered_tiers.clone()),
        }
    }

    /// Daily update of the running high and the trail latch. O(1).
    pub fn observe(&mut self, bar: &Bar, policy: &ExitPolicy) {
        if let Some(p) = self.position.as_mut() {
            if bar.high > p.highest_price_since_entry {
                p.highest_price_since_entry = bar.high;
            }
            if !p.trail_armed && p.gain(bar.close) >= policy.take_profit_activation_pct {
                p.trail_armed = true;
            }
        }
    }

    pub fn apply_buy(
        &mut self,
        date: NaiveDate,
        tier: TierId,
        price: f64,
        notional: f64,
        confidence: f64,
        entry_type: EntryType,
    ) -> Result<Fill, TiertraderError> {
        if !(price > 0.0 && price.is_finite()) {
            return Err(TiertraderError::state(
                &self.ticker,
                date,
                format!("buy at non-positive price {price}"),
            ));
        }
        if !(notional > 0.0 && notional.is_finite()) {
            return Err(TiertraderError::state(
                &self.ticker,
                date,
                format!("buy with non-positive notional {notional}"),
            ));
        }
        let new_shares = notional / price;

        match self.position.as_mut() {
            Some(p) => {
                if p.entered_tiers.contains(&tier) {
                    return Err(TiertraderError::state(
                        &self.ticker,
                        date,
                        format!("tier {tier} already entered"),
                    ));
                }
                let total = p.shares + new_shares;
                p.cost_basis = (p.shares * p.cost_basis + new_shares * price) / total;
                p.shares = total;
                p.entered_tiers.insert(tier);
                p.entry_dates.push(date);
                p.entry_prices.push(price);
                p.entry_confidences.push(confidence);
                if price > p.highest_price_since_entry {
                    p.highest_price_since_entry = price;
                }
            }
            None => {
                self.position = Some(Position {
                    ticker: self.ticker.clone(),
                    shares: new_shares,
                    cost_basis: price,
                    entered_tiers: BTreeSet::from([tier]),
                    entry_dates: vec![date],
                    entry_prices: vec![price],
                    entry_confidences: vec![confidence],
                    entry_type,
                    highest_price_since_entry: price,
                    trail_armed: false,
                });
            }
        }
        self.last_entry_date = Some(date);

        Ok(Fill {
            date,
            side: FillSide::Buy,
            tier: Some(tier),
            price,
            shares: new_shares,
            notional,
        })
    }

    /// Liquidates the whole position at `price`.
    pub fn apply_sell(
        &mut self,
        date: NaiveDate,
        price: f64,
        reason: ExitReason,
    ) -> Result<(Trade, Fill), TiertraderError> {
        let position = match self.position.take() {
            Some(p) if p.shares > 0.0 => p,
            _ => {
                return Err(TiertraderError::state(
                    &self.ticker,
                    date,
                    "sell with zero shares",
                ));
            }
        };
        let entry_date = position.first_entry().unwrap_or(date);
        let proceeds = position.shares * price;

        let trade = Trade {
            ticker: self.ticker.clone(),
            entry_date,
            exit_date: date,
            entry_price: position.cost_basis,
            exit_price: price,
            shares: position.shares,
            proceeds,
            pnl_pct: (price - position.cost_basis) / position.cost_basis,
            exit_reason: reason,
            holding_days: (date - entry_date).num_days(),
            entry_confidence: position.opening_confidence(),
            entry_type: position.entry_type,
        };
        let fill = Fill {
            date,
            side: FillSide::Sell,
            tier: None,
            price,
            shares: position.shares,
            notional: proceeds,
        };
        Ok((trade, fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::ConfidenceTier;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(day: u32, high: f64, close: f64) -> Bar {
        Bar {
            date: d(day),
            open: close,
            high,
            low: close.min(high) - 1.0,
            close,
        }
    }

    fn two_tiers() -> TierTable {
        TierTable::new(vec![
            ConfidenceTier { min_conf: 0.6, buy_frac: 0.5 },
            ConfidenceTier { min_conf: 0.8, buy_frac: 0.5 },
        ])
    }

    #[test]
    fn first_buy_opens_position() {
        let mut ledger = PositionLedger::new("NVDA");
        let fill = ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();
        assert_eq!(fill.side, FillSide::Buy);
        assert!((fill.shares - 10.0).abs() < 1e-12);

        let p = ledger.position().unwrap();
        assert!((p.shares - 10.0).abs() < 1e-12);
        assert!((p.cost_basis - 100.0).abs() < 1e-12);
        assert!((p.highest_price_since_entry - 100.0).abs() < 1e-12);
        assert_eq!(ledger.last_entry_date(), Some(d(2)));
    }

    #[test]
    fn second_buy_averages_cost_basis() {
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();
        ledger.apply_buy(d(5), 1, 120.0, 1200.0, 0.9, EntryType::NoFilter).unwrap();

        let p = ledger.position().unwrap();
        assert!((p.shares - 20.0).abs() < 1e-12);
        // (10*100 + 10*120) / 20
        assert!((p.cost_basis - 110.0).abs() < 1e-12);
        assert_eq!(p.entry_dates, vec![d(2), d(5)]);
        assert_eq!(ledger.tier_state(&two_tiers()), TierState::Full);
    }

    #[test]
    fn reentering_a_tier_is_state_error() {
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();
        let err = ledger.apply_buy(d(3), 0, 101.0, 500.0, 0.9, EntryType::NoFilter).unwrap_err();
        assert!(matches!(err, TiertraderError::State { .. }));
    }

    #[test]
    fn sell_on_flat_ledger_is_state_error() {
        let mut ledger = PositionLedger::new("NVDA");
        let err = ledger.apply_sell(d(2), 100.0, ExitReason::StopLoss).unwrap_err();
        assert!(err.to_string().contains("sell with zero shares"));
    }

    #[test]
    fn sell_emits_trade_and_clears_position() {
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.72, EntryType::Breakout).unwrap();
        ledger.apply_buy(d(4), 1, 110.0, 1100.0, 0.91, EntryType::BullMarket).unwrap();
        assert_eq!(ledger.position().unwrap().entry_confidences, vec![0.72, 0.91]);
        let (trade, fill) = ledger.apply_sell(d(12), 121.0, ExitReason::TrailStop).unwrap();

        assert_eq!(trade.entry_date, d(2));
        assert_eq!(trade.holding_days, 10);
        assert!((trade.entry_price - 105.0).abs() < 1e-12);
        assert!((trade.pnl_pct - (121.0 - 105.0) / 105.0).abs() < 1e-12);
        assert_eq!(trade.exit_reason, ExitReason::TrailStop);
        assert_eq!(trade.entry_confidence, 0.72);
        assert_eq!(trade.entry_type, EntryType::Breakout);
        assert!((fill.notional - 20.0 * 121.0).abs() < 1e-9);

        assert!(!ledger.is_open());
        assert_eq!(ledger.shares(), 0.0);
        assert_eq!(ledger.tier_state(&two_tiers()), TierState::Flat);
        // cooldown anchor survives the close
        assert_eq!(ledger.last_entry_date(), Some(d(4)));
    }

    #[test]
    fn observe_tracks_running_high_and_arms_trail() {
        let policy = ExitPolicy::default();
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();

        ledger.observe(&bar(3, 112.0, 110.0), &policy);
        let p = ledger.position().unwrap();
        assert_eq!(p.highest_price_since_entry, 112.0);
        assert!(!p.trail_armed);

        ledger.observe(&bar(4, 108.0, 105.0), &policy);
        assert_eq!(ledger.position().unwrap().highest_price_since_entry, 112.0);

        ledger.observe(&bar(5, 125.0, 121.0), &policy);
        let p = ledger.position().unwrap();
        assert_eq!(p.highest_price_since_entry, 125.0);
        assert!(p.trail_armed);

        // latch holds after the gain recedes
        ledger.observe(&bar(6, 116.0, 115.0), &policy);
        assert!(ledger.position().unwrap().trail_armed);
    }

    #[test]
    fn trail_level_uses_band_for_peak_gain() {
        let policy = ExitPolicy::default();
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();
        let trail = ledger.position().unwrap().trail_level(&policy);
        assert!((trail - 92.0).abs() < 1e-9);

        ledger.observe(&bar(3, 122.0, 121.0), &policy);
        let trail = ledger.position().unwrap().trail_level(&policy);
        assert!((trail - 122.0 * 0.92).abs() < 1e-9);

        ledger.observe(&bar(4, 130.0, 129.0), &policy);
        let trail = ledger.position().unwrap().trail_level(&policy);
        assert!((trail - 130.0 * 0.83).abs() < 1e-9);
    }

    #[test]
    fn tier_state_partial() {
        let mut ledger = PositionLedger::new("NVDA");
        ledger.apply_buy(d(2), 0, 100.0, 1000.0, 0.9, EntryType::NoFilter).unwrap();
        assert_eq!(
            ledger.tier_state(&two_tiers()),
            TierState::Partial(BTreeSet::from([0]))
        );
    }

    #[test]
    fn invalid_buy_inputs_rejected() {
        let mut ledger = PositionLedger::new("NVDA");
        assert!(ledger.apply_buy(d(2), 0, 0.0, 1000.0, 0.9, EntryType::NoFilter).is_err());
        assert!(ledger.apply_buy(d(2), 0, 100.0, 0.0, 0.9, EntryType::NoFilter).is_err());
        assert!(!ledger.is_open());
    }
}
