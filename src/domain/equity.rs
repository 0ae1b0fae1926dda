//! Daily mark-to-market, buy-and-hold benchmark and cash injections.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

use super::position::{Fill, FillSide};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub benchmark_value: f64,
    /// External capital added on this day, before the close.
    pub injected_cash: f64,
    pub cash: f64,
    pub shares: f64,
}

/// External capital added on configured dates, plus an optional yearly
/// contribution on the first trading day of each new calendar year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionSchedule {
    events: BTreeMap<NaiveDate, f64>,
    yearly_contribution: f64,
}

impl InjectionSchedule {
    pub fn new(events: Vec<(NaiveDate, f64)>, yearly_contribution: f64) -> Self {
        let mut map = BTreeMap::new();
        for (date, amount) in events {
            *map.entry(date).or_insert(0.0) += amount;
        }
        Self {
            events: map,
            yearly_contribution,
        }
    }

    /// Amount due on trading day `date` given the previous trading day.
    /// Events on non-trading days roll forward to the next trading day.
    pub fn due(&self, prev: Option<NaiveDate>, date: NaiveDate) -> f64 {
        let explicit: f64 = match prev {
            Some(p) if p < date => self
                .events
                .range(p.succ_opt().unwrap_or(date)..=date)
                .map(|(_, a)| *a)
                .sum(),
            Some(_) => 0.0,
            None => self.events.range(..=date).map(|(_, a)| *a).sum(),
        };
        let yearly = match prev {
            Some(p) if p.year() != date.year() => self.yearly_contribution,
            _ => 0.0,
        };
        explicit + yearly
    }
}

#[derive(Debug, Clone)]
pub struct EquityTracker {
    initial_cash: f64,
    cash: f64,
    benchmark_shares: f64,
    schedule: InjectionSchedule,
    last_date: Option<NaiveDate>,
    pending_injection: f64,
    points: Vec<EquityPoint>,
}

impl EquityTracker {
    pub fn new(initial_cash: f64, schedule: InjectionSchedule) -> Self {
        EquityTracker {
            initial_cash,
            cash: initial_cash,
            benchmark_shares: 0.0,
            schedule,
            last_date: None,
            pending_injection: 0.0,
            points: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Applies the injection due today to both the strategy cash and the
    /// benchmark shadow portfolio. The benchmark buys in full on day one.
    pub fn start_day(&mut self, date: NaiveDate, benchmark_close: f64) -> f64 {
        let injected = self.schedule.due(self.last_date, date);
        self.cash += injected;
        self.pending_injection = injected;

        if self.last_date.is_none() {
            self.benchmark_shares = (self.initial_cash + injected) / benchmark_close;
        } else if injected > 0.0 {
            self.benchmark_shares += injected / benchmark_close;
        }
        injected
    }

    pub fn apply_fill(&mut self, fill: &Fill) {
        match fill.side {
            FillSide::Buy => self.cash -= fill.notional,
            FillSide::Sell => self.cash += fill.notional,
        }
    }

    /// Records the close snapshot for the day.
    pub fn mark(
        &mut self,
        date: NaiveDate,
        close: f64,
        shares: f64,
        benchmark_close: f64,
    ) -> &EquityPoint {
        self.points.push(EquityPoint {
            date,
            portfolio_value: self.cash + shares * close,
            benchmark_value: self.benchmark_shares * benchmark_close,
            injected_cash: self.pending_injection,
            cash: self.cash,
            shares,
        });
        self.pending_injection = 0.0;
        self.last_date = Some(date);
        &self.points[self.points.len() - 1]
    }

    pub fn into_points(self) -> Vec<EquityPoint> {
        self.points
    }
}
