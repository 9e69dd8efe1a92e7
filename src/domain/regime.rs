//! Risk-off regime detection.
//!
//! `STOP[t]` is true when both the rolling sum of excess return and the
//! rolling sum of benchmark return, taken over the `window` observations
//! ending the day before `t`, are negative. The detector only ever sees a
//! [`PriorHistory`], which by construction ends strictly before `t`.

use crate::domain::error::WeightsimError;
use crate::domain::returns::{BenchmarkSeries, PortfolioReturnSeries};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeObservation {
    pub date: NaiveDate,
    pub portfolio: f64,
    pub benchmark: f64,
}

impl RegimeObservation {
    pub fn excess(&self) -> f64 {
        self.portfolio - self.benchmark
    }
}

/// Portfolio and benchmark returns aligned on their common dates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegimeInput {
    observations: Vec<RegimeObservation>,
}

impl RegimeInput {
    pub fn new(observations: Vec<RegimeObservation>) -> Result<Self, WeightsimError> {
        if let Some(w) = observations.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(WeightsimError::invalid_input(
                "regime input",
                format!("dates not strictly increasing at {}", w[1].date),
            ));
        }
        Ok(Self { observations })
    }

    /// Inner join: dates missing from either side are left out.
    pub fn align(portfolio: &PortfolioReturnSeries, benchmark: &BenchmarkSeries) -> Self {
        let observations = portfolio
            .points()
            .iter()
            .filter_map(|p| {
                benchmark.get(p.date).map(|b| RegimeObservation {
                    date: p.date,
                    portfolio: p.ret,
                    benchmark: b,
                })
            })
            .collect();
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[RegimeObservation] {
        &self.observations
    }

    /// Everything strictly before the observation at `index`.
    pub fn history_before(&self, index: usize) -> PriorHistory<'_> {
        let end = index.min(self.observations.len());
        PriorHistory {
            observations: &self.observations[..end],
        }
    }
}

/// Observations ending strictly before the date being flagged.
#[derive(Debug, Clone, Copy)]
pub struct PriorHistory<'a> {
    observations: &'a [RegimeObservation],
}

impl PriorHistory<'_> {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Rolling sums feeding one decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingSums {
    pub observations: usize,
    pub excess: f64,
    pub benchmark: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegimeDetector {
    window: usize,
}

impl RegimeDetector {
    pub fn new(window: usize) -> Result<Self, WeightsimError> {
        if window == 0 {
            return Err(WeightsimError::ConfigInvalid {
                section: "simulation".into(),
                key: "windows".into(),
                reason: "rolling window must be at least 1".into(),
            });
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Sums over the most recent `window` observations (fewer if the
    /// history is shorter). `None` when there is no history at all.
    pub fn rolling_sums(&self, history: PriorHistory<'_>) -> Option<RollingSums> {
        if history.is_empty() {
            return None;
        }
        let start = history.len().saturating_sub(self.window);
        let tail = &history.observations[start..];
        let mut excess = 0.0;
        let mut benchmark = 0.0;
        for o in tail {
            excess += o.excess();
            benchmark += o.benchmark;
        }
        Some(RollingSums {
            observations: tail.len(),
            excess,
            benchmark,
        })
    }

    pub fn is_stop(&self, history: PriorHistory<'_>) -> bool {
        match self.rolling_sums(history) {
            Some(s) => s.excess < 0.0 && s.benchmark < 0.0,
            None => false,
        }
    }

    pub fn detect(&self, input: &RegimeInput) -> RegimeFlags {
        let flags: BTreeMap<NaiveDate, bool> = input
            .observations
            .iter()
            .enumerate()
            .map(|(i, o)| (o.date, self.is_stop(input.history_before(i))))
            .collect();
        let regime = RegimeFlags {
            window: self.window,
            flags,
        };
        let summary = regime.summary();
        info!(
            window = summary.window,
            stop_days = summary.stop_days,
            stop_pct = summary.stop_pct,
            first_stop = ?summary.first_stop,
            "regime flags computed"
        );
        regime
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeSummary {
    pub window: usize,
    pub days: usize,
    pub stop_days: usize,
    pub stop_pct: f64,
    pub first_stop: Option<NaiveDate>,
}

/// Per-date STOP flags for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeFlags {
    window: usize,
    flags: BTreeMap<NaiveDate, bool>,
}

impl RegimeFlags {
    pub fn from_map(window: usize, flags: BTreeMap<NaiveDate, bool>) -> Self {
        Self { window, flags }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Dates the detector never saw are not risk-off.
    pub fn is_stop(&self, date: NaiveDate) -> bool {
        self.flags.get(&date).copied().unwrap_or(false)
    }

    pub fn get(&self, date: NaiveDate) -> Option<bool> {
        self.flags.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, bool)> + '_ {
        self.flags.iter().map(|(d, f)| (*d, *f))
    }

    pub fn stop_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.flags.iter().filter(|(_, f)| **f).map(|(d, _)| *d)
    }

    pub fn summary(&self) -> RegimeSummary {
        let days = self.flags.len();
        let stop_days = self.stop_dates().count();
        let stop_pct = if days > 0 {
            stop_days as f64 / days as f64 * 100.0
        } else {
            0.0
        };
        RegimeSummary {
            window: self.window,
            days,
            stop_days,
            stop_pct,
            first_stop: self.stop_dates().next(),
        }
    }
}
