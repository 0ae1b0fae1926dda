//! Daily decision function: exits first, then tiered entries.
//!
//! At most one action fires per ticker per day. Fills are assumed at the
//! day's close; there is no intraday fill modelling.

use chrono::NaiveDate;
use serde::Serialize;

use super::ohlcv::Bar;
use super::policy::{ExitPolicy, StrategyPolicy, TierId, TierTable};
use super::position::{ExitReason, Position};
use super::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Hold,
    BuyTier(TierId),
    SellAll(ExitReason),
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Hold => f.write_str("HOLD"),
            Action::BuyTier(id) => write!(f, "BUY_TIER({id})"),
            Action::SellAll(reason) => write!(f, "SELL_ALL({reason})"),
        }
    }
}

/// Why no tier can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryBlock {
    NoQualifyingTier,
    AllTiersEntered,
    Cooldown { until: NaiveDate },
    MarketFilter,
}

impl std::fmt::Display for EntryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryBlock::NoQualifyingTier => f.write_str("confidence below every open tier"),
            EntryBlock::AllTiersEntered => f.write_str("all tiers already entered"),
            EntryBlock::Cooldown { until } => write!(f, "entry cooldown until {until}"),
            EntryBlock::MarketFilter => f.write_str("market filter unfavorable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Fire(TierId),
    Blocked(EntryBlock),
}

/// Everything the engine looks at for one ticker on one day.
#[derive(Debug, Clone, Copy)]
pub struct DayContext<'a> {
    pub bar: &'a Bar,
    pub signal: &'a Signal,
    pub position: Option<&'a Position>,
    pub last_entry_date: Option<NaiveDate>,
    pub market_favorable: bool,
}

pub fn evaluate_day(ctx: &DayContext<'_>, policy: &StrategyPolicy) -> Action {
    if let Some(position) = ctx.position {
        if let Some(reason) = exit_reason(ctx.bar.close, ctx.signal.confidence, position, &policy.exit)
        {
            return Action::SellAll(reason);
        }
    }

    match entry_decision(
        ctx.bar.date,
        ctx.signal.confidence,
        ctx.position,
        ctx.last_entry_date,
        ctx.market_favorable,
        policy,
    ) {
        EntryDecision::Fire(tier) => Action::BuyTier(tier),
        EntryDecision::Blocked(_) => Action::Hold,
    }
}

/// Exit check in precedence order: stop loss, trailing stop, signal exit.
pub fn exit_reason(
    close: f64,
    confidence: f64,
    position: &Position,
    policy: &ExitPolicy,
) -> Option<ExitReason> {
    if close <= policy.stop_price(position.cost_basis) {
        return Some(ExitReason::StopLoss);
    }
    if let Some(trail) = trail_trigger(position, close, policy) {
        if close < trail {
            return Some(ExitReason::TrailStop);
        }
    }
    if let Some(floor) = policy.signal_exit_below {
        if confidence < floor {
            return Some(ExitReason::SignalExit);
        }
    }
    None
}

/// Trail price if the trail is armed, counting today's close as a possible
/// arming event.
pub fn trail_trigger(position: &Position, close: f64, policy: &ExitPolicy) -> Option<f64> {
    let armed =
        position.trail_armed || position.gain(close) >= policy.take_profit_activation_pct;
    armed.then(|| position.trail_level(policy))
}

/// Lowest unentered tier whose threshold the confidence meets.
pub fn next_tier(
    tiers: &TierTable,
    confidence: f64,
    position: Option<&Position>,
) -> Result<TierId, EntryBlock> {
    let entered = |id: TierId| position.is_some_and(|p| p.entered_tiers.contains(&id));
    let mut any_open = false;
    for (id, tier) in tiers.iter() {
        if entered(id) {
            continue;
        }
        any_open = true;
        if confidence >= tier.min_conf {
            return Ok(id);
        }
    }
    if any_open {
        Err(EntryBlock::NoQualifyingTier)
    } else {
        Err(EntryBlock::AllTiersEntered)
    }
}

pub fn entry_decision(
    date: NaiveDate,
    confidence: f64,
    position: Option<&Position>,
    last_entry_date: Option<NaiveDate>,
    market_favorable: bool,
    policy: &StrategyPolicy,
) -> EntryDecision {
    let tier = match next_tier(&policy.tiers, confidence, position) {
        Ok(tier) => tier,
        Err(block) => return EntryDecision::Blocked(block),
    };

    let cooldown = policy.exit.min_days_between_entries;
    if let Some(last) = last_entry_date {
        if cooldown > 0 && (date - last).num_days() < cooldown {
            return EntryDecision::Blocked(EntryBlock::Cooldown {
                until: last + chrono::Duration::days(cooldown),
            });
        }
    }

    if policy.exit.use_market_filter && !market_favorable {
        return EntryDecision::Blocked(EntryBlock::MarketFilter);
    }

    EntryDecision::Fire(tier)
}
