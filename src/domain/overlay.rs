//! Regime-conditional weight transforms.
//!
//! Each variant carries its own parameters and checks its own sum
//! post-condition after every transform. A failed post-condition is an
//! [`WeightsimError::InvariantViolation`] for that date; the vector is never
//! clamped or renormalized to hide it.

use crate::domain::error::WeightsimError;
use crate::domain::regime::RegimeFlags;
use crate::domain::weights::{WeightTimeline, WeightVector};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Allowed deviation of a blended-hedge vector's total from 1.0.
pub const SUM_TOLERANCE: f64 = 1e-6;

pub const DEFAULT_HEDGE_FRACTION: f64 = 0.75;
pub const DEFAULT_HALF_SIZE_FACTOR: f64 = 0.5;

/// Relative tolerance for the half-size scaling identity.
const SCALE_TOLERANCE: f64 = 1e-12;

/// Overlay names as they appear in configuration and output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverlayKind {
    Passthrough,
    ZeroOut,
    BlendedHedge,
    HalfSize,
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayKind::Passthrough => "baseline",
            OverlayKind::ZeroOut => "zero_out",
            OverlayKind::BlendedHedge => "blended_hedge",
            OverlayKind::HalfSize => "half_size",
        }
    }
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "baseline" | "passthrough" => Ok(OverlayKind::Passthrough),
            "zero_out" => Ok(OverlayKind::ZeroOut),
            "blended_hedge" => Ok(OverlayKind::BlendedHedge),
            "half_size" => Ok(OverlayKind::HalfSize),
            other => Err(format!("unknown overlay '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    /// Leaves every vector untouched.
    Passthrough,
    /// Full de-risk: all weights to zero on stop dates.
    ZeroOut,
    /// Partial de-risk into a hedge instrument. Always sums to 1.
    BlendedHedge {
        fraction: f64,
        hedge_symbol: String,
        banned_symbols: BTreeSet<String>,
    },
    /// Partial de-risk into cash: every weight scaled by `factor` on stop dates.
    HalfSize { factor: f64 },
}

fn overlay_invalid(key: &str, reason: impl Into<String>) -> WeightsimError {
    WeightsimError::ConfigInvalid {
        section: "overlay".into(),
        key: key.into(),
        reason: reason.into(),
    }
}

impl Overlay {
    pub fn blended_hedge(
        fraction: f64,
        hedge_symbol: impl Into<String>,
        banned_symbols: BTreeSet<String>,
    ) -> Result<Self, WeightsimError> {
        let hedge_symbol = hedge_symbol.into();
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(overlay_invalid(
                "hedge_fraction",
                "hedge_fraction must be in (0, 1]",
            ));
        }
        if hedge_symbol.trim().is_empty() {
            return Err(overlay_invalid("hedge_symbol", "hedge_symbol must not be empty"));
        }
        if banned_symbols.contains(&hedge_symbol) {
            return Err(overlay_invalid(
                "banned_symbols",
                format!("hedge symbol {hedge_symbol} cannot also be banned"),
            ));
        }
        Ok(Overlay::BlendedHedge {
            fraction,
            hedge_symbol,
            banned_symbols,
        })
    }

    pub fn half_size(factor: f64) -> Result<Self, WeightsimError> {
        if !(factor.is_finite() && (0.0..=1.0).contains(&factor)) {
            return Err(overlay_invalid(
                "half_size_factor",
                "half_size_factor must be in [0, 1]",
            ));
        }
        Ok(Overlay::HalfSize { factor })
    }

    pub fn kind(&self) -> OverlayKind {
        match self {
            Overlay::Passthrough => OverlayKind::Passthrough,
            Overlay::ZeroOut => OverlayKind::ZeroOut,
            Overlay::BlendedHedge { .. } => OverlayKind::BlendedHedge,
            Overlay::HalfSize { .. } => OverlayKind::HalfSize,
        }
    }

    pub fn hedge_symbol(&self) -> Option<&str> {
        match self {
            Overlay::BlendedHedge { hedge_symbol, .. } => Some(hedge_symbol),
            _ => None,
        }
    }

    pub fn apply(&self, vector: &WeightVector, is_stop: bool) -> Result<WeightVector, WeightsimError> {
        match self {
            Overlay::Passthrough => Ok(vector.clone()),
            Overlay::ZeroOut => self.zero_out(vector, is_stop),
            Overlay::HalfSize { factor } => self.scale(vector, is_stop, *factor),
            Overlay::BlendedHedge {
                fraction,
                hedge_symbol,
                banned_symbols,
            } => self.blend(vector, is_stop, *fraction, hedge_symbol, banned_symbols),
        }
    }

    /// Applies the overlay to every vector using the flag of the vector's
    /// own effective date. The first violation aborts the whole timeline.
    pub fn apply_timeline(
        &self,
        timeline: &WeightTimeline,
        flags: &RegimeFlags,
    ) -> Result<WeightTimeline, WeightsimError> {
        timeline.map_vectors(|v| self.apply(v, flags.is_stop(v.date)))
    }

    fn violation(&self, date: NaiveDate, reason: String) -> WeightsimError {
        WeightsimError::InvariantViolation {
            strategy: self.kind().to_string(),
            date,
            reason,
        }
    }

    fn check_finite(&self, out: &WeightVector) -> Result<(), WeightsimError> {
        match out.weights.iter().find(|(_, w)| !w.is_finite()) {
            Some((symbol, w)) => Err(self.violation(out.date, format!("weight for {symbol} is {w}"))),
            None => Ok(()),
        }
    }

    fn zero_out(&self, vector: &WeightVector, is_stop: bool) -> Result<WeightVector, WeightsimError> {
        if !is_stop {
            return Ok(vector.clone());
        }
        let out = WeightVector::new(
            vector.date,
            vector.weights.keys().map(|s| (s.clone(), 0.0)).collect(),
        );
        let total = out.total();
        if total != 0.0 {
            return Err(self.violation(vector.date, format!("weights sum to {total}, expected 0")));
        }
        Ok(out)
    }

    fn scale(
        &self,
        vector: &WeightVector,
        is_stop: bool,
        factor: f64,
    ) -> Result<WeightVector, WeightsimError> {
        if !is_stop {
            return Ok(vector.clone());
        }
        let out = WeightVector::new(
            vector.date,
            vector
                .weights
                .iter()
                .map(|(s, w)| (s.clone(), w * factor))
                .collect(),
        );
        let expected = factor * vector.total();
        let total = out.total();
        self.check_finite(&out)?;
        let bound = SCALE_TOLERANCE * expected.abs().max(1.0);
        if !((total - expected).abs() <= bound) {
            return Err(self.violation(
                vector.date,
                format!("weights sum to {total}, expected {expected}"),
            ));
        }
        Ok(out)
    }

    fn blend(
        &self,
        vector: &WeightVector,
        is_stop: bool,
        fraction: f64,
        hedge_symbol: &str,
        banned: &BTreeSet<String>,
    ) -> Result<WeightVector, WeightsimError> {
        let is_core = |s: &str| s != hedge_symbol && !banned.contains(s);
        let core_sum: f64 = vector
            .weights
            .iter()
            .filter(|(s, _)| is_core(s))
            .map(|(_, w)| *w)
            .sum();

        if !(core_sum > 0.0) {
            return Err(self.violation(
                vector.date,
                format!("non-hedge weights sum to {core_sum}, cannot rescale"),
            ));
        }

        let (target, hedge_weight) = if is_stop {
            (fraction, 1.0 - fraction)
        } else {
            (1.0, 0.0)
        };

        let mut weights: BTreeMap<String, f64> = vector
            .weights
            .iter()
            .map(|(s, w)| {
                let w = if is_core(s) { w * (target / core_sum) } else { 0.0 };
                (s.clone(), w)
            })
            .collect();
        if is_stop || weights.contains_key(hedge_symbol) {
            weights.insert(hedge_symbol.to_string(), hedge_weight);
        }

        let out = WeightVector::new(vector.date, weights);
        self.check_finite(&out)?;
        let total = out.total();
        if !((total - 1.0).abs() <= SUM_TOLERANCE) {
            return Err(self.violation(
                vector.date,
                format!("weights sum to {total}, expected 1 (stop={is_stop})"),
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Overlay::Passthrough | Overlay::ZeroOut => write!(f, "{}", self.kind()),
            Overlay::BlendedHedge {
                fraction,
                hedge_symbol,
                ..
            } => write!(f, "{}({fraction}, {hedge_symbol})", self.kind()),
            Overlay::HalfSize { factor } => write!(f, "{}({factor})", self.kind()),
        }
    }
}

/// Post-transform breakdown of one flagged date.
#[derive(Debug, Clone, PartialEq)]
pub struct StopDayCheck {
    pub date: NaiveDate,
    pub hedge_weight: f64,
    pub non_hedge_sum: f64,
    pub total: f64,
}

/// One row per flagged date that has a vector in `overlaid`.
pub fn stop_day_checks(
    overlaid: &WeightTimeline,
    flags: &RegimeFlags,
    hedge_symbol: Option<&str>,
) -> Vec<StopDayCheck> {
    flags
        .stop_dates()
        .filter_map(|date| overlaid.get(date))
        .map(|v| {
            let hedge_weight = hedge_symbol.and_then(|h| v.get(h)).unwrap_or(0.0);
            let total = v.total();
            StopDayCheck {
                date: v.date,
                hedge_weight,
                non_hedge_sum: total - hedge_weight,
                total,
            }
        })
        .collect()
}
