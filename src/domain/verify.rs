//! Equivalence checks between two independently computed return series.

use crate::domain::error::WeightsimError;
use crate::domain::returns::PortfolioReturnSeries;
use crate::domain::simulator::{DayAttribution, PortfolioReturnSimulator};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Anything that can explain how it arrived at a date's portfolio return.
pub trait Attribution {
    fn attribute(&self, date: NaiveDate) -> Option<DayAttribution>;
}

impl Attribution for PortfolioReturnSimulator<'_> {
    fn attribute(&self, date: NaiveDate) -> Option<DayAttribution> {
        PortfolioReturnSimulator::attribute(self, date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalenceRow {
    pub date: NaiveDate,
    pub left: f64,
    pub right: f64,
    pub diff: f64,
    pub abs_diff: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquivalenceReport {
    pub tolerance: f64,
    pub rows: Vec<EquivalenceRow>,
    pub only_left: Vec<NaiveDate>,
    pub only_right: Vec<NaiveDate>,
    /// NaN if any common date has a non-finite difference.
    pub max_abs_diff: f64,
    pub mean_abs_diff: f64,
    pub cumulative_left: f64,
    pub cumulative_right: f64,
    pub cumulative_diff: f64,
    pub first_mismatch: Option<NaiveDate>,
    pub matched: bool,
}

impl EquivalenceReport {
    pub fn common_dates(&self) -> usize {
        self.rows.len()
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &EquivalenceRow> {
        let tol = self.tolerance;
        self.rows.iter().filter(move |r| !(r.abs_diff < tol))
    }

    /// The `n` rows with the largest absolute difference, largest first.
    /// Ties keep date order.
    pub fn worst(&self, n: usize) -> Vec<&EquivalenceRow> {
        let mut rows: Vec<&EquivalenceRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| b.abs_diff.total_cmp(&a.abs_diff));
        rows.truncate(n);
        rows
    }

    /// Decomposes the first mismatching date followed by the `n` worst
    /// mismatching dates, each date once.
    pub fn diagnose(
        &self,
        n: usize,
        left: &dyn Attribution,
        right: &dyn Attribution,
    ) -> Vec<MismatchDiagnostic> {
        let tol = self.tolerance;
        let mut seen = BTreeSet::new();
        self.first_mismatch
            .into_iter()
            .chain(
                self.worst(n)
                    .into_iter()
                    .filter(|r| !(r.abs_diff < tol))
                    .map(|r| r.date),
            )
            .filter(|d| seen.insert(*d))
            .map(|d| diagnose(d, left, right))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalenceVerifier {
    tolerance: f64,
}

impl Default for EquivalenceVerifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EquivalenceVerifier {
    pub fn new(tolerance: f64) -> Result<Self, WeightsimError> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(WeightsimError::ConfigInvalid {
                section: "simulation".into(),
                key: "tolerance".into(),
                reason: "tolerance must be a positive number".into(),
            });
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn compare(
        &self,
        left: &PortfolioReturnSeries,
        right: &PortfolioReturnSeries,
    ) -> EquivalenceReport {
        let right_map: BTreeMap<NaiveDate, f64> =
            right.points().iter().map(|p| (p.date, p.ret)).collect();
        let left_dates: BTreeSet<NaiveDate> = left.dates().collect();

        let mut rows = Vec::new();
        let mut only_left = Vec::new();
        for p in left.points() {
            match right_map.get(&p.date) {
                Some(&r) => {
                    let diff = p.ret - r;
                    rows.push(EquivalenceRow {
                        date: p.date,
                        left: p.ret,
                        right: r,
                        diff,
                        abs_diff: diff.abs(),
                    });
                }
                None => only_left.push(p.date),
            }
        }
        let only_right: Vec<NaiveDate> = right
            .dates()
            .filter(|d| !left_dates.contains(d))
            .collect();

        let max_abs_diff = rows.iter().fold(0.0_f64, |acc, r| {
            if acc.is_nan() || r.abs_diff.is_nan() {
                f64::NAN
            } else {
                acc.max(r.abs_diff)
            }
        });
        let mean_abs_diff = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|r| r.abs_diff).sum::<f64>() / rows.len() as f64
        };
        let cumulative_left = rows.iter().fold(1.0, |acc, r| acc * (1.0 + r.left)) - 1.0;
        let cumulative_right = rows.iter().fold(1.0, |acc, r| acc * (1.0 + r.right)) - 1.0;
        let tol = self.tolerance;
        let first_mismatch = rows.iter().find(|r| !(r.abs_diff < tol)).map(|r| r.date);
        let matched = !rows.is_empty() && first_mismatch.is_none();

        let report = EquivalenceReport {
            tolerance: tol,
            rows,
            only_left,
            only_right,
            max_abs_diff,
            mean_abs_diff,
            cumulative_left,
            cumulative_right,
            cumulative_diff: cumulative_left - cumulative_right,
            first_mismatch,
            matched,
        };

        if report.matched {
            info!(
                common_dates = report.common_dates(),
                max_abs_diff = report.max_abs_diff,
                "series match"
            );
        } else {
            warn!(
                common_dates = report.common_dates(),
                max_abs_diff = report.max_abs_diff,
                first_mismatch = ?report.first_mismatch,
                only_left = report.only_left.len(),
                only_right = report.only_right.len(),
                "series do not match"
            );
        }
        report
    }
}

/// One symbol's contribution on each side of a mismatching date.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolDiff {
    pub symbol: String,
    pub left_weight: f64,
    pub right_weight: f64,
    pub left_ret: Option<f64>,
    pub right_ret: Option<f64>,
    pub left_contribution: f64,
    pub right_contribution: f64,
    pub diff: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MismatchDiagnostic {
    pub date: NaiveDate,
    pub left: Option<DayAttribution>,
    pub right: Option<DayAttribution>,
    /// Ranked by absolute contribution difference, largest first.
    pub symbols: Vec<SymbolDiff>,
}

pub fn diagnose(
    date: NaiveDate,
    left: &dyn Attribution,
    right: &dyn Attribution,
) -> MismatchDiagnostic {
    let left_day = left.attribute(date);
    let right_day = right.attribute(date);

    let symbols: BTreeSet<&str> = left_day
        .iter()
        .chain(right_day.iter())
        .flat_map(|a| a.rows.iter().map(|c| c.symbol.as_str()))
        .collect();

    let side = |day: &Option<DayAttribution>, symbol: &str| {
        day.as_ref()
            .and_then(|a| a.row(symbol))
            .map(|c| (c.weight, c.ret, c.contribution))
            .unwrap_or((0.0, None, 0.0))
    };

    let mut diffs: Vec<SymbolDiff> = symbols
        .into_iter()
        .map(|symbol| {
            let (lw, lr, lc) = side(&left_day, symbol);
            let (rw, rr, rc) = side(&right_day, symbol);
            SymbolDiff {
                symbol: symbol.to_string(),
                left_weight: lw,
                right_weight: rw,
                left_ret: lr,
                right_ret: rr,
                left_contribution: lc,
                right_contribution: rc,
                diff: lc - rc,
            }
        })
        .collect();
    diffs.sort_by(|a, b| b.diff.abs().total_cmp(&a.diff.abs()));

    MismatchDiagnostic {
        date,
        left: left_day,
        right: right_day,
        symbols: diffs,
    }
}
