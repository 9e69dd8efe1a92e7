//! Per-symbol daily returns, the benchmark series and the simulator's
//! output series.

use crate::domain::error::WeightsimError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One price row from the upstream price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub adj_close: Option<f64>,
}

/// Which price column a symbol's returns were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceBasis {
    AdjustedClose,
    Close,
}

/// Daily simple returns per symbol. A symbol's first observation has no
/// return: the date is absent, not zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReturnSeries {
    by_symbol: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    basis: BTreeMap<String, PriceBasis>,
}

impl ReturnSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Period-over-period percent change of each symbol's price. Adjusted
    /// close is used for a symbol when every one of its observations carries
    /// it; otherwise the plain close is used for that symbol.
    pub fn from_prices(prices: &[PriceObservation]) -> Result<Self, WeightsimError> {
        let mut grouped: BTreeMap<&str, BTreeMap<NaiveDate, &PriceObservation>> = BTreeMap::new();
        for obs in prices {
            let per_symbol = grouped.entry(obs.symbol.as_str()).or_default();
            if per_symbol.insert(obs.date, obs).is_some() {
                return Err(WeightsimError::invalid_input(
                    "prices",
                    format!("duplicate price for {} on {}", obs.symbol, obs.date),
                ));
            }
        }

        let mut series = Self::new();
        for (symbol, observations) in grouped {
            let basis = if observations.values().all(|o| o.adj_close.is_some()) {
                PriceBasis::AdjustedClose
            } else {
                PriceBasis::Close
            };
            let price = |o: &PriceObservation| match basis {
                PriceBasis::AdjustedClose => o.adj_close.unwrap_or(o.close),
                PriceBasis::Close => o.close,
            };

            let mut returns = BTreeMap::new();
            let mut prev: Option<f64> = None;
            for (date, obs) in &observations {
                let current = price(*obs);
                if let Some(p) = prev {
                    if p.is_finite() && p > 0.0 && current.is_finite() {
                        returns.insert(*date, current / p - 1.0);
                    }
                }
                prev = Some(current);
            }
            series.basis.insert(symbol.to_string(), basis);
            series.by_symbol.insert(symbol.to_string(), returns);
        }
        Ok(series)
    }

    /// Inserts an already-computed return. Used by fixtures and by sources
    /// that deliver returns directly.
    pub fn insert(&mut self, symbol: &str, date: NaiveDate, ret: f64) {
        self.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(date, ret);
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.by_symbol.get(symbol).and_then(|m| m.get(&date)).copied()
    }

    pub fn basis(&self, symbol: &str) -> Option<PriceBasis> {
        self.basis.get(symbol).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.by_symbol.keys().map(String::as_str)
    }

    /// Symbols with a defined return on `date`, in symbol order.
    pub fn symbols_on(&self, date: NaiveDate) -> BTreeSet<&str> {
        self.by_symbol
            .iter()
            .filter(|(_, m)| m.contains_key(&date))
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn has_any_on(&self, date: NaiveDate) -> bool {
        self.by_symbol.values().any(|m| m.contains_key(&date))
    }

    /// Every date on which at least one symbol has a return.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.by_symbol
            .values()
            .flat_map(|m| m.keys().copied())
            .collect()
    }

    pub fn iter_symbol(&self, symbol: &str) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.by_symbol
            .get(symbol)
            .into_iter()
            .flat_map(|m| m.iter().map(|(d, r)| (*d, *r)))
    }
}

/// One `(date, ret)` row of the benchmark source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub date: NaiveDate,
    pub ret: f64,
}

/// Benchmark daily returns, consumed only by the regime detector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BenchmarkSeries {
    values: BTreeMap<NaiveDate, f64>,
}

impl BenchmarkSeries {
    pub fn from_records(records: &[BenchmarkRecord]) -> Result<Self, WeightsimError> {
        let mut values = BTreeMap::new();
        for r in records {
            if !r.ret.is_finite() {
                return Err(WeightsimError::invalid_input(
                    "benchmark",
                    format!("non-finite return on {}", r.date),
                ));
            }
            if values.insert(r.date, r.ret).is_some() {
                return Err(WeightsimError::invalid_input(
                    "benchmark",
                    format!("duplicate return on {}", r.date),
                ));
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.values.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.values.iter().map(|(d, r)| (*d, *r))
    }
}

impl FromIterator<(NaiveDate, f64)> for BenchmarkSeries {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub date: NaiveDate,
    pub ret: f64,
}

/// Date-ordered portfolio returns produced by a simulation path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortfolioReturnSeries {
    points: Vec<ReturnPoint>,
}

impl PortfolioReturnSeries {
    /// Points must be strictly increasing in date.
    pub fn new(points: Vec<ReturnPoint>) -> Result<Self, WeightsimError> {
        if let Some(w) = points.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(WeightsimError::invalid_input(
                "returns",
                format!("dates not strictly increasing at {}", w[1].date),
            ));
        }
        Ok(Self { points })
    }

    pub(crate) fn from_sorted(points: Vec<ReturnPoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].date < w[1].date));
        Self { points }
    }

    pub fn points(&self) -> &[ReturnPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].ret)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    /// Running compounded growth `Π(1 + r)` aligned with the points.
    pub fn cumulative_curve(&self) -> Vec<f64> {
        let mut acc = 1.0;
        self.points
            .iter()
            .map(|p| {
                acc *= 1.0 + p.ret;
                acc
            })
            .collect()
    }

    /// Total compounded return over the whole series.
    pub fn cumulative_return(&self) -> f64 {
        self.points.iter().fold(1.0, |acc, p| acc * (1.0 + p.ret)) - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn obs(symbol: &str, date: &str, close: f64, adj: Option<f64>) -> PriceObservation {
        PriceObservation {
            symbol: symbol.into(),
            date: d(date),
            close,
            adj_close: adj,
        }
    }

    #[test]
    fn first_observation_has_no_return() {
        let rs = ReturnSeries::from_prices(&[
            obs("A", "2024-01-02", 100.0, None),
            obs("A", "2024-01-03", 110.0, None),
        ])
        .unwrap();
        assert_eq!(rs.get("A", d("2024-01-02")), None);
        assert_relative_eq!(rs.get("A", d("2024-01-03")).unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn adjusted_close_is_preferred() {
        let rs = ReturnSeries::from_prices(&[
            obs("A", "2024-01-02", 100.0, Some(50.0)),
            obs("A", "2024-01-03", 100.0, Some(55.0)),
        ])
        .unwrap();
        assert_eq!(rs.basis("A"), Some(PriceBasis::AdjustedClose));
        assert_relative_eq!(rs.get("A", d("2024-01-03")).unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn falls_back_to_close_when_adjusted_is_incomplete() {
        let rs = ReturnSeries::from_prices(&[
            obs("A", "2024-01-02", 100.0, Some(50.0)),
            obs("A", "2024-01-03", 120.0, None),
        ])
        .unwrap();
        assert_eq!(rs.basis("A"), Some(PriceBasis::Close));
        assert_relative_eq!(rs.get("A", d("2024-01-03")).unwrap(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn unsorted_prices_are_ordered_per_symbol() {
        let rs = ReturnSeries::from_prices(&[
            obs("A", "2024-01-04", 121.0, None),
            obs("A", "2024-01-02", 100.0, None),
            obs("A", "2024-01-03", 110.0, None),
        ])
        .unwrap();
        assert_relative_eq!(rs.get("A", d("2024-01-04")).unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn zero_previous_price_yields_absent_return() {
        let rs = ReturnSeries::from_prices(&[
            obs("A", "2024-01-02", 0.0, None),
            obs("A", "2024-01-03", 10.0, None),
        ])
        .unwrap();
        assert_eq!(rs.get("A", d("2024-01-03")), None);
    }

    #[test]
    fn duplicate_price_is_rejected() {
        let err = ReturnSeries::from_prices(&[
            obs("A", "2024-01-02", 1.0, None),
            obs("A", "2024-01-02", 2.0, None),
        ])
        .unwrap_err();
        assert!(matches!(err, WeightsimError::InvalidInput { .. }));
    }

    #[test]
    fn symbols_on_lists_only_defined_returns() {
        let mut rs = ReturnSeries::new();
        rs.insert("A", d("2024-01-03"), 0.01);
        rs.insert("B", d("2024-01-04"), 0.02);
        let on: Vec<&str> = rs.symbols_on(d("2024-01-03")).into_iter().collect();
        assert_eq!(on, vec!["A"]);
        assert!(!rs.has_any_on(d("2024-01-05")));
    }

    #[test]
    fn portfolio_series_rejects_unordered_points() {
        let err = PortfolioReturnSeries::new(vec![
            ReturnPoint { date: d("2024-01-03"), ret: 0.0 },
            ReturnPoint { date: d("2024-01-02"), ret: 0.0 },
        ])
        .unwrap_err();
        assert!(matches!(err, WeightsimError::InvalidInput { .. }));
    }

    #[test]
    fn cumulative_return_compounds() {
        let s = PortfolioReturnSeries::new(vec![
            ReturnPoint { date: d("2024-01-02"), ret: 0.1 },
            ReturnPoint { date: d("2024-01-03"), ret: -0.1 },
        ])
        .unwrap();
        assert_relative_eq!(s.cumulative_return(), 1.1 * 0.9 - 1.0, epsilon = 1e-12);
        let curve = s.cumulative_curve();
        assert_relative_eq!(curve[0], 1.1, epsilon = 1e-12);
        assert_relative_eq!(curve[1], 0.99, epsilon = 1e-12);
        assert_eq!(s.get(d("2024-01-03")), Some(-0.1));
    }

    #[test]
    fn benchmark_rejects_duplicates() {
        let err = BenchmarkSeries::from_records(&[
            BenchmarkRecord { date: d("2024-01-02"), ret: 0.01 },
            BenchmarkRecord { date: d("2024-01-02"), ret: 0.02 },
        ])
        .unwrap_err();
        assert!(matches!(err, WeightsimError::InvalidInput { .. }));
    }
}
