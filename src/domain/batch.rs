//! Dense grid computation of portfolio returns.
//!
//! A second, independent route to the same numbers the date-by-date
//! simulator produces: weights are laid out as a date × symbol grid
//! forward-filled row by row, returns as a second grid, and the portfolio
//! return on row `i` is the dot product of weight row `i - 1` with return row
//! `i`. [`overlay_returns`] goes one step further and derives strategy
//! returns straight from a baseline series without touching weights at all.

use crate::domain::calendar::TradingCalendar;
use crate::domain::overlay::Overlay;
use crate::domain::regime::RegimeFlags;
use crate::domain::returns::{PortfolioReturnSeries, ReturnPoint, ReturnSeries};
use crate::domain::simulator::{Contribution, DayAttribution, Simulation, SimulationReport};
use crate::domain::verify::Attribution;
use crate::domain::weights::WeightTimeline;
use chrono::NaiveDate;
use std::collections::BTreeSet;

pub struct BatchSimulator {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    /// Row-major weights; rows before the first vector are `None`.
    weights: Vec<Option<Vec<f64>>>,
    weights_dates: Vec<Option<NaiveDate>>,
    /// Row-major returns, `dates.len() * symbols.len()`.
    returns: Vec<Option<f64>>,
}

impl BatchSimulator {
    pub fn new(
        calendar: &TradingCalendar,
        timeline: &WeightTimeline,
        returns: &ReturnSeries,
    ) -> Self {
        let universe: BTreeSet<String> = timeline
            .universe()
            .into_iter()
            .chain(returns.symbols().map(str::to_string))
            .collect();
        let symbols: Vec<String> = universe.into_iter().collect();
        let dates = calendar.dates().to_vec();

        // Forward fill: each row carries the newest vector dated on or
        // before that row's date. A new vector replaces the whole row.
        let mut weights = Vec::with_capacity(dates.len());
        let mut weights_dates = Vec::with_capacity(dates.len());
        let mut vectors = timeline.vectors().peekable();
        let mut current: Option<(NaiveDate, Vec<f64>)> = None;
        for &date in &dates {
            while let Some(v) = vectors.next_if(|v| v.date <= date) {
                let row = symbols
                    .iter()
                    .map(|s| v.get(s).unwrap_or(0.0))
                    .collect();
                current = Some((v.date, row));
            }
            weights.push(current.as_ref().map(|(_, row)| row.clone()));
            weights_dates.push(current.as_ref().map(|(d, _)| *d));
        }

        let mut grid = Vec::with_capacity(dates.len() * symbols.len());
        for &date in &dates {
            grid.extend(symbols.iter().map(|s| returns.get(s, date)));
        }

        Self {
            dates,
            symbols,
            weights,
            weights_dates,
            returns: grid,
        }
    }

    fn return_row(&self, i: usize) -> &[Option<f64>] {
        let n = self.symbols.len();
        &self.returns[i * n..(i + 1) * n]
    }

    fn dot(weights: &[f64], returns: &[Option<f64>]) -> f64 {
        weights
            .iter()
            .zip(returns)
            .map(|(w, r)| match r {
                Some(r) => w * r,
                None => 0.0,
            })
            .sum()
    }

    pub fn run(&self) -> Simulation {
        let mut points = Vec::with_capacity(self.dates.len());
        let mut report = SimulationReport::default();

        for i in 1..self.dates.len() {
            let Some(weights) = &self.weights[i - 1] else {
                report.missing_prior_weight += 1;
                continue;
            };
            let rets = self.return_row(i);
            if rets.iter().all(Option::is_none) {
                report.calendar_gaps.push(self.dates[i]);
                continue;
            }
            report.missing_returns += weights
                .iter()
                .zip(rets)
                .filter(|(w, r)| **w != 0.0 && r.is_none())
                .count();
            report.simulated += 1;
            points.push(ReturnPoint {
                date: self.dates[i],
                ret: Self::dot(weights, rets),
            });
        }

        Simulation {
            series: PortfolioReturnSeries::from_sorted(points),
            report,
        }
    }
}

impl Attribution for BatchSimulator {
    fn attribute(&self, date: NaiveDate) -> Option<DayAttribution> {
        let i = self.dates.binary_search(&date).ok().filter(|&i| i > 0)?;
        let weights = self.weights[i - 1].as_ref()?;
        let weights_date = self.weights_dates[i - 1]?;
        let rets = self.return_row(i);
        if rets.iter().all(Option::is_none) {
            return None;
        }
        let rows: Vec<Contribution> = self
            .symbols
            .iter()
            .zip(weights.iter().zip(rets))
            .filter(|(_, (w, r))| **w != 0.0 || r.is_some())
            .map(|(symbol, (&weight, &ret))| Contribution {
                symbol: symbol.clone(),
                weight,
                ret,
                contribution: ret.map(|r| weight * r).unwrap_or(0.0),
            })
            .collect();
        Some(DayAttribution {
            date,
            prior: self.dates[i - 1],
            weights_date,
            rows,
            total: Self::dot(weights, rets),
        })
    }
}

/// Strategy returns computed from the baseline series alone.
///
/// The flag that governs date `t` is the one on the prior calendar date,
/// matching the weights that were in force. Valid only for a baseline whose
/// vectors are rebalanced every date, sum to one, and hold neither the hedge
/// nor a banned symbol; under those conditions it agrees with simulating the
/// overlaid timeline.
pub fn overlay_returns(
    overlay: &Overlay,
    calendar: &TradingCalendar,
    baseline: &PortfolioReturnSeries,
    flags: &RegimeFlags,
    returns: &ReturnSeries,
) -> PortfolioReturnSeries {
    let points = baseline
        .points()
        .iter()
        .map(|p| {
            let stop = calendar
                .prior_of(p.date)
                .is_some_and(|prior| flags.is_stop(prior.date()));
            let ret = match overlay {
                Overlay::Passthrough => p.ret,
                _ if !stop => p.ret,
                Overlay::ZeroOut => 0.0,
                Overlay::HalfSize { factor } => factor * p.ret,
                Overlay::BlendedHedge {
                    fraction,
                    hedge_symbol,
                    ..
                } => {
                    let hedge = returns.get(hedge_symbol, p.date).unwrap_or(0.0);
                    fraction * p.ret + (1.0 - fraction) * hedge
                }
            };
            ReturnPoint { date: p.date, ret }
        })
        .collect();
    PortfolioReturnSeries::from_sorted(points)
}
