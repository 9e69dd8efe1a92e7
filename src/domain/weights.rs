//! Dated weight vectors and the causal as-of timeline.

use crate::domain::calendar::{PriorDate, TradingCalendar};
use crate::domain::error::WeightsimError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One `(date, symbol, weight)` row as delivered by the upstream selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub weight: f64,
}

/// Target weights decided on `date`. Symbols are kept ordered so that every
/// summation over a vector happens in the same order on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    pub date: NaiveDate,
    pub weights: BTreeMap<String, f64>,
}

impl WeightVector {
    pub fn new(date: NaiveDate, weights: BTreeMap<String, f64>) -> Self {
        Self { date, weights }
    }

    pub fn from_pairs<S: Into<String>>(date: NaiveDate, pairs: Vec<(S, f64)>) -> Self {
        Self {
            date,
            weights: pairs.into_iter().map(|(s, w)| (s.into(), w)).collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.weights.get(symbol).copied()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Copy with every listed symbol forced to zero. Symbols not held are
    /// left absent.
    pub fn with_zeroed(&self, symbols: &BTreeSet<String>) -> Self {
        let weights = self
            .weights
            .iter()
            .map(|(s, w)| {
                let w = if symbols.contains(s) { 0.0 } else { *w };
                (s.clone(), w)
            })
            .collect();
        Self {
            date: self.date,
            weights,
        }
    }

    pub fn to_records(&self) -> Vec<WeightRecord> {
        self.weights
            .iter()
            .map(|(symbol, &weight)| WeightRecord {
                date: self.date,
                symbol: symbol.clone(),
                weight,
            })
            .collect()
    }
}

/// Weight vectors keyed by effective date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightTimeline {
    vectors: BTreeMap<NaiveDate, WeightVector>,
}

impl WeightTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups flat records into vectors. A repeated `(date, symbol)` or a
    /// non-finite weight is rejected.
    pub fn from_records(records: &[WeightRecord]) -> Result<Self, WeightsimError> {
        let mut vectors: BTreeMap<NaiveDate, WeightVector> = BTreeMap::new();
        for rec in records {
            if !rec.weight.is_finite() {
                return Err(WeightsimError::invalid_input(
                    "weights",
                    format!("non-finite weight for {} on {}", rec.symbol, rec.date),
                ));
            }
            let vector = vectors
                .entry(rec.date)
                .or_insert_with(|| WeightVector::new(rec.date, BTreeMap::new()));
            if vector.weights.insert(rec.symbol.clone(), rec.weight).is_some() {
                return Err(WeightsimError::invalid_input(
                    "weights",
                    format!("duplicate weight for {} on {}", rec.symbol, rec.date),
                ));
            }
        }
        Ok(Self { vectors })
    }

    pub fn from_vectors<I>(vectors: I) -> Result<Self, WeightsimError>
    where
        I: IntoIterator<Item = WeightVector>,
    {
        let mut timeline = Self::new();
        for v in vectors {
            timeline.insert(v)?;
        }
        Ok(timeline)
    }

    pub fn insert(&mut self, vector: WeightVector) -> Result<(), WeightsimError> {
        if self.vectors.contains_key(&vector.date) {
            return Err(WeightsimError::invalid_input(
                "weights",
                format!("duplicate weight vector for {}", vector.date),
            ));
        }
        self.vectors.insert(vector.date, vector);
        Ok(())
    }

    /// The latest vector decided on or before `prior`, i.e. strictly before
    /// the date whose return is being computed.
    pub fn as_of(&self, prior: PriorDate) -> Option<&WeightVector> {
        self.vectors
            .range(..=prior.date())
            .next_back()
            .map(|(_, v)| v)
    }

    /// One vector per calendar date from the first decision on: the latest
    /// vector decided on or before that date, re-dated to it.
    pub fn forward_filled(&self, calendar: &TradingCalendar) -> Self {
        let vectors = calendar
            .dates()
            .iter()
            .filter_map(|&date| {
                self.vectors
                    .range(..=date)
                    .next_back()
                    .map(|(_, v)| (date, WeightVector::new(date, v.weights.clone())))
            })
            .collect();
        Self { vectors }
    }

    pub fn get(&self, date: NaiveDate) -> Option<&WeightVector> {
        self.vectors.get(&date)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.vectors.keys().next().copied()
    }

    pub fn vectors(&self) -> impl Iterator<Item = &WeightVector> {
        self.vectors.values()
    }

    /// All symbols that appear in any vector.
    pub fn universe(&self) -> BTreeSet<String> {
        self.vectors
            .values()
            .flat_map(|v| v.weights.keys().cloned())
            .collect()
    }

    pub fn map_vectors<F>(&self, mut f: F) -> Result<Self, WeightsimError>
    where
        F: FnMut(&WeightVector) -> Result<WeightVector, WeightsimError>,
    {
        let mut vectors = BTreeMap::new();
        for (date, v) in &self.vectors {
            vectors.insert(*date, f(v)?);
        }
        Ok(Self { vectors })
    }

    pub fn to_records(&self) -> Vec<WeightRecord> {
        self.vectors.values().flat_map(|v| v.to_records()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::TradingCalendar;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rec(date: &str, symbol: &str, weight: f64) -> WeightRecord {
        WeightRecord {
            date: d(date),
            symbol: symbol.into(),
            weight,
        }
    }

    #[test]
    fn from_records_groups_by_date() {
        let tl = WeightTimeline::from_records(&[
            rec("2024-01-02", "A", 0.5),
            rec("2024-01-02", "B", 0.5),
            rec("2024-01-04", "A", 1.0),
        ])
        .unwrap();
        assert_eq!(tl.len(), 2);
        assert_eq!(tl.get(d("2024-01-02")).unwrap().len(), 2);
        assert_eq!(tl.get(d("2024-01-04")).unwrap().get("A"), Some(1.0));
    }

    #[test]
    fn from_records_rejects_duplicate_symbol() {
        let err = WeightTimeline::from_records(&[
            rec("2024-01-02", "A", 0.5),
            rec("2024-01-02", "A", 0.3),
        ])
        .unwrap_err();
        assert!(matches!(err, WeightsimError::InvalidInput { .. }));
    }

    #[test]
    fn forward_filled_holds_each_decision_until_the_next() {
        let tl = WeightTimeline::from_records(&[
            rec("2024-01-03", "A", 1.0),
            rec("2024-01-05", "B", 1.0),
        ])
        .unwrap();
        let cal = TradingCalendar::new(vec![
            d("2024-01-02"),
            d("2024-01-03"),
            d("2024-01-04"),
            d("2024-01-05"),
            d("2024-01-08"),
        ])
        .unwrap();
        let daily = tl.forward_filled(&cal);
        assert_eq!(daily.len(), 4);
        assert!(daily.get(d("2024-01-02")).is_none());
        let held = daily.get(d("2024-01-04")).unwrap();
        assert_eq!(held.date, d("2024-01-04"));
        assert_eq!(held.get("A"), Some(1.0));
        assert_eq!(daily.get(d("2024-01-08")).unwrap().get("B"), Some(1.0));
        assert_eq!(daily.get(d("2024-01-08")).unwrap().get("A"), None);
    }

    #[test]
    fn from_records_rejects_nan() {
        let err = WeightTimeline::from_records(&[rec("2024-01-02", "A", f64::NAN)]).unwrap_err();
        assert!(matches!(err, WeightsimError::InvalidInput { .. }));
    }

    #[test]
    fn as_of_never_returns_same_day_vector() {
        let tl = WeightTimeline::from_records(&[
            rec("2024-01-02", "A", 1.0),
            rec("2024-01-03", "B", 1.0),
        ])
        .unwrap();
        let cal = TradingCalendar::new(vec![d("2024-01-02"), d("2024-01-03"), d("2024-01-04")])
            .unwrap();

        let prior = cal.prior_of(d("2024-01-03")).unwrap();
        let v = tl.as_of(prior).unwrap();
        assert_eq!(v.date, d("2024-01-02"));

        let prior = cal.prior_of(d("2024-01-04")).unwrap();
        assert_eq!(tl.as_of(prior).unwrap().date, d("2024-01-03"));
    }

    #[test]
    fn as_of_carries_forward_between_rebalances() {
        let tl = WeightTimeline::from_records(&[rec("2024-01-02", "A", 1.0)]).unwrap();
        let cal = TradingCalendar::new(vec![
            d("2024-01-01"),
            d("2024-01-02"),
            d("2024-01-03"),
            d("2024-01-04"),
        ])
        .unwrap();
        assert!(tl.as_of(cal.prior_of(d("2024-01-02")).unwrap()).is_none());
        assert_eq!(
            tl.as_of(cal.prior_of(d("2024-01-04")).unwrap()).unwrap().date,
            d("2024-01-02")
        );
    }

    #[test]
    fn with_zeroed_keeps_other_weights() {
        let v = WeightVector::from_pairs(d("2024-01-02"), vec![("A", 0.6), ("B", 0.4)]);
        let excluded: BTreeSet<String> = ["B".to_string()].into_iter().collect();
        let z = v.with_zeroed(&excluded);
        assert_eq!(z.get("A"), Some(0.6));
        assert_eq!(z.get("B"), Some(0.0));
    }

    #[test]
    fn universe_collects_all_symbols() {
        let tl = WeightTimeline::from_records(&[
            rec("2024-01-02", "A", 0.5),
            rec("2024-01-03", "C", 0.5),
        ])
        .unwrap();
        let u: Vec<String> = tl.universe().into_iter().collect();
        assert_eq!(u, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn records_round_trip_through_timeline() {
        let records = vec![
            rec("2024-01-02", "A", 0.25),
            rec("2024-01-02", "B", 0.75),
            rec("2024-01-03", "A", 1.0),
        ];
        let tl = WeightTimeline::from_records(&records).unwrap();
        assert_eq!(tl.to_records(), records);
    }
}
