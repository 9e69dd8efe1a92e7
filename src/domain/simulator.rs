//! Date-by-date portfolio return simulation.
//!
//! For each calendar step `(prior, t)` the portfolio return is
//! `Σ w[s] · r[s, t]`, where `w` is the latest weight vector decided on or
//! before `prior`. The weights are looked up through [`PriorDate`], so a
//! vector dated `t` can never be applied to the return of `t`.
//!
//! [`PriorDate`]: crate::domain::calendar::PriorDate

use crate::domain::calendar::{Step, TradingCalendar};
use crate::domain::returns::{PortfolioReturnSeries, ReturnPoint, ReturnSeries};
use crate::domain::weights::WeightTimeline;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// One symbol's share of a day's portfolio return.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub symbol: String,
    /// Weight applied; 0.0 for symbols that traded but were not held.
    pub weight: f64,
    /// Return on the attributed date; `None` when the symbol has none.
    pub ret: Option<f64>,
    pub contribution: f64,
}

/// Full decomposition of one date's portfolio return.
#[derive(Debug, Clone, PartialEq)]
pub struct DayAttribution {
    pub date: NaiveDate,
    pub prior: NaiveDate,
    /// Effective date of the weight vector that was applied.
    pub weights_date: NaiveDate,
    pub rows: Vec<Contribution>,
    pub total: f64,
}

impl DayAttribution {
    pub fn row(&self, symbol: &str) -> Option<&Contribution> {
        self.rows.iter().find(|c| c.symbol == symbol)
    }
}

/// Why a date produced no return, or the return it produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Computed(DayAttribution),
    MissingPriorWeight,
    CalendarGap,
}

/// Recoverable conditions met during a run. Nothing here is an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulationReport {
    pub simulated: usize,
    pub missing_prior_weight: usize,
    pub calendar_gaps: Vec<NaiveDate>,
    /// Held (non-zero weight) symbols that had no return on the date.
    pub missing_returns: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub series: PortfolioReturnSeries,
    pub report: SimulationReport,
}

pub struct PortfolioReturnSimulator<'a> {
    calendar: &'a TradingCalendar,
    timeline: &'a WeightTimeline,
    returns: &'a ReturnSeries,
}

impl<'a> PortfolioReturnSimulator<'a> {
    pub fn new(
        calendar: &'a TradingCalendar,
        timeline: &'a WeightTimeline,
        returns: &'a ReturnSeries,
    ) -> Self {
        Self {
            calendar,
            timeline,
            returns,
        }
    }

    pub fn evaluate(&self, step: Step) -> DayOutcome {
        let Some(vector) = self.timeline.as_of(step.prior) else {
            return DayOutcome::MissingPriorWeight;
        };

        let traded = self.returns.symbols_on(step.date);
        if traded.is_empty() {
            return DayOutcome::CalendarGap;
        }

        let symbols: BTreeSet<&str> = vector.symbols().chain(traded.iter().copied()).collect();
        let rows: Vec<Contribution> = symbols
            .into_iter()
            .map(|symbol| {
                let weight = vector.get(symbol).unwrap_or(0.0);
                let ret = self.returns.get(symbol, step.date);
                let contribution = match ret {
                    Some(r) => weight * r,
                    None => 0.0,
                };
                Contribution {
                    symbol: symbol.to_string(),
                    weight,
                    ret,
                    contribution,
                }
            })
            .collect();
        let total = rows.iter().map(|c| c.contribution).sum();

        DayOutcome::Computed(DayAttribution {
            date: step.date,
            prior: step.prior.date(),
            weights_date: vector.date,
            rows,
            total,
        })
    }

    /// Decomposes a single date; `None` if the date is off-calendar, first
    /// on the calendar, or produced no return.
    pub fn attribute(&self, date: NaiveDate) -> Option<DayAttribution> {
        let prior = self.calendar.prior_of(date)?;
        match self.evaluate(Step { prior, date }) {
            DayOutcome::Computed(a) => Some(a),
            _ => None,
        }
    }

    pub fn run(&self) -> Simulation {
        let mut points = Vec::with_capacity(self.calendar.len());
        let mut report = SimulationReport::default();

        for step in self.calendar.steps() {
            match self.evaluate(step) {
                DayOutcome::Computed(day) => {
                    report.missing_returns += day
                        .rows
                        .iter()
                        .filter(|c| c.ret.is_none() && c.weight != 0.0)
                        .count();
                    report.simulated += 1;
                    points.push(ReturnPoint {
                        date: day.date,
                        ret: day.total,
                    });
                }
                DayOutcome::MissingPriorWeight => {
                    debug!(date = %step.date, "no weight vector before date, skipped");
                    report.missing_prior_weight += 1;
                }
                DayOutcome::CalendarGap => {
                    warn!(date = %step.date, "no symbol has a return on calendar date, dropped");
                    report.calendar_gaps.push(step.date);
                }
            }
        }

        info!(
            simulated = report.simulated,
            missing_prior_weight = report.missing_prior_weight,
            calendar_gaps = report.calendar_gaps.len(),
            missing_returns = report.missing_returns,
            "simulation complete"
        );

        Simulation {
            series: PortfolioReturnSeries::from_sorted(points),
            report,
        }
    }
}
