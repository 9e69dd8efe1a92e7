//! Strategy configuration: one overlay evaluated under one regime window.

use crate::domain::calendar::TradingCalendar;
use crate::domain::error::WeightsimError;
use crate::domain::overlay::Overlay;
use crate::domain::regime::RegimeFlags;
use crate::domain::weights::WeightTimeline;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub name: String,
    pub window: usize,
    pub overlay: Overlay,
    /// Forced to zero in every vector before the overlay runs.
    pub excluded_symbols: BTreeSet<String>,
}

impl StrategyConfig {
    pub fn new(overlay: Overlay, window: usize) -> Self {
        Self {
            name: format!("{}_w{window}", overlay.kind()),
            window,
            overlay,
            excluded_symbols: BTreeSet::new(),
        }
    }

    pub fn with_excluded(mut self, excluded: BTreeSet<String>) -> Self {
        self.excluded_symbols = excluded;
        self
    }

    /// Holds the timeline on every calendar date, then applies exclusions
    /// and the overlay under each date's own flag. A stop that starts
    /// between two decisions takes effect on its first flagged date.
    pub fn apply(
        &self,
        calendar: &TradingCalendar,
        timeline: &WeightTimeline,
        flags: &RegimeFlags,
    ) -> Result<WeightTimeline, WeightsimError> {
        let daily = timeline.forward_filled(calendar);
        if self.excluded_symbols.is_empty() {
            return self.overlay.apply_timeline(&daily, flags);
        }
        daily.map_vectors(|v| {
            let cleaned = v.with_zeroed(&self.excluded_symbols);
            self.overlay.apply(&cleaned, flags.is_stop(v.date))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::weights::WeightVector;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn calendar(dates: &[&str]) -> TradingCalendar {
        TradingCalendar::new(dates.iter().map(|s| d(s)).collect()).unwrap()
    }

    #[test]
    fn default_name_combines_overlay_and_window() {
        let s = StrategyConfig::new(Overlay::ZeroOut, 120);
        assert_eq!(s.name, "zero_out_w120");
        assert!(s.excluded_symbols.is_empty());
    }

    #[test]
    fn exclusions_apply_before_overlay() {
        let tl = WeightTimeline::from_vectors(vec![WeightVector::from_pairs(
            d("2024-03-01"),
            vec![("A", 0.5), ("B", 0.5)],
        )])
        .unwrap();
        let flags = RegimeFlags::from_map(60, [(d("2024-03-01"), false)].into_iter().collect());
        let overlay = Overlay::blended_hedge(0.75, "INV", BTreeSet::new()).unwrap();
        let s = StrategyConfig::new(overlay, 60).with_excluded(["B".to_string()].into());
        let out = s.apply(&calendar(&["2024-03-01"]), &tl, &flags).unwrap();
        let v = out.get(d("2024-03-01")).unwrap();
        assert_eq!(v.get("A"), Some(1.0));
        assert_eq!(v.get("B"), Some(0.0));
    }

    #[test]
    fn passthrough_without_exclusions_is_identity() {
        let tl = WeightTimeline::from_vectors(vec![WeightVector::from_pairs(
            d("2024-03-01"),
            vec![("A", 0.2)],
        )])
        .unwrap();
        let flags = RegimeFlags::from_map(60, Default::default());
        let s = StrategyConfig::new(Overlay::Passthrough, 60);
        assert_eq!(s.apply(&calendar(&["2024-03-01"]), &tl, &flags).unwrap(), tl);
    }

    #[test]
    fn stop_between_decisions_applies_to_held_vector() {
        let tl = WeightTimeline::from_vectors(vec![WeightVector::from_pairs(
            d("2024-03-01"),
            vec![("A", 1.0)],
        )])
        .unwrap();
        let cal = calendar(&["2024-03-01", "2024-03-04", "2024-03-05", "2024-03-06"]);
        let flags = RegimeFlags::from_map(
            5,
            [
                (d("2024-03-04"), false),
                (d("2024-03-05"), true),
                (d("2024-03-06"), true),
            ]
            .into_iter()
            .collect(),
        );
        let out = StrategyConfig::new(Overlay::ZeroOut, 5)
            .apply(&cal, &tl, &flags)
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.get(d("2024-03-04")).unwrap().get("A"), Some(1.0));
        assert_eq!(out.get(d("2024-03-05")).unwrap().get("A"), Some(0.0));
        assert_eq!(out.get(d("2024-03-06")).unwrap().get("A"), Some(0.0));
    }
}
