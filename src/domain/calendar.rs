//! Trading calendar: the ordered set of valid trading dates.
//!
//! Every other series is sequenced against the calendar. The only way to
//! obtain a [`PriorDate`] is from the calendar itself, which is what makes
//! same-day weight lookups impossible to express in the simulator.

use crate::domain::error::WeightsimError;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// The trading date immediately preceding some date `t` on the calendar.
///
/// Cannot be constructed outside this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriorDate(NaiveDate);

impl PriorDate {
    pub fn date(self) -> NaiveDate {
        self.0
    }
}

/// One step of the date loop: the date being computed and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub prior: PriorDate,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Builds a calendar from dates that must already be strictly increasing.
    pub fn new(dates: Vec<NaiveDate>) -> Result<Self, WeightsimError> {
        if let Some(pair) = dates.windows(2).find(|w| w[0] >= w[1]) {
            let reason = if pair[0] == pair[1] {
                format!("duplicate date {}", pair[0])
            } else {
                format!("{} follows {} out of order", pair[1], pair[0])
            };
            return Err(WeightsimError::CalendarInvalid { reason });
        }
        Ok(Self { dates })
    }

    /// Union of arbitrary date collections, sorted and de-duplicated.
    pub fn from_unordered<I>(dates: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: unique.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }

    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// The calendar date immediately before `date`, if `date` is on the
    /// calendar and is not its first date.
    pub fn prior_of(&self, date: NaiveDate) -> Option<PriorDate> {
        match self.position(date) {
            Some(i) if i > 0 => Some(PriorDate(self.dates[i - 1])),
            _ => None,
        }
    }

    /// Every date except the first, paired with its predecessor.
    pub fn steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.dates.windows(2).map(|w| Step {
            prior: PriorDate(w[0]),
            date: w[1],
        })
    }

    /// Sub-calendar of dates within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            dates: self
                .dates
                .iter()
                .copied()
                .filter(|d| *d >= start && *d <= end)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn new_accepts_strictly_increasing() {
        let cal = TradingCalendar::new(vec![d("2024-01-02"), d("2024-01-03"), d("2024-01-05")])
            .unwrap();
        assert_eq!(cal.len(), 3);
        assert_eq!(cal.first(), Some(d("2024-01-02")));
        assert_eq!(cal.last(), Some(d("2024-01-05")));
    }

    #[test]
    fn new_rejects_duplicates() {
        let err = TradingCalendar::new(vec![d("2024-01-02"), d("2024-01-02")]).unwrap_err();
        assert!(
            matches!(err, WeightsimError::CalendarInvalid { reason } if reason.contains("duplicate"))
        );
    }

    #[test]
    fn new_rejects_out_of_order() {
        let err = TradingCalendar::new(vec![d("2024-01-03"), d("2024-01-02")]).unwrap_err();
        assert!(matches!(err, WeightsimError::CalendarInvalid { .. }));
    }

    #[test]
    fn from_unordered_merges_and_sorts() {
        let cal = TradingCalendar::from_unordered(vec![
            d("2024-01-05"),
            d("2024-01-01"),
            d("2024-01-03"),
            d("2024-01-01"),
        ]);
        assert_eq!(
            cal.dates(),
            &[d("2024-01-01"), d("2024-01-03"), d("2024-01-05")]
        );
    }

    #[test]
    fn prior_of_is_the_preceding_trading_date() {
        let cal = TradingCalendar::new(vec![d("2024-01-02"), d("2024-01-05"), d("2024-01-08")])
            .unwrap();
        assert_eq!(cal.prior_of(d("2024-01-08")).map(PriorDate::date), Some(d("2024-01-05")));
        assert!(cal.prior_of(d("2024-01-02")).is_none());
        assert!(cal.prior_of(d("2024-01-06")).is_none());
    }

    #[test]
    fn steps_skip_the_first_date() {
        let cal = TradingCalendar::new(vec![d("2024-01-02"), d("2024-01-03"), d("2024-01-04")])
            .unwrap();
        let steps: Vec<Step> = cal.steps().collect();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].prior.date(), d("2024-01-02"));
        assert_eq!(steps[0].date, d("2024-01-03"));
        assert_eq!(steps[1].prior.date(), d("2024-01-03"));
        assert_eq!(steps[1].date, d("2024-01-04"));
    }

    #[test]
    fn empty_calendar_has_no_steps() {
        let cal = TradingCalendar::new(vec![]).unwrap();
        assert!(cal.is_empty());
        assert_eq!(cal.steps().count(), 0);
    }

    #[test]
    fn between_is_inclusive() {
        let cal = TradingCalendar::from_unordered(vec![
            d("2024-01-01"),
            d("2024-01-02"),
            d("2024-01-03"),
            d("2024-01-04"),
        ]);
        let sub = cal.between(d("2024-01-02"), d("2024-01-03"));
        assert_eq!(sub.dates(), &[d("2024-01-02"), d("2024-01-03")]);
    }
}
