//! Market data access port trait.

use crate::domain::calendar::TradingCalendar;
use crate::domain::error::WeightsimError;
use crate::domain::returns::{BenchmarkSeries, PriceObservation};
use crate::domain::weights::WeightTimeline;

pub trait MarketDataPort {
    /// Trading dates. Sources without an explicit calendar derive it from
    /// the union of price dates.
    fn load_calendar(&self) -> Result<TradingCalendar, WeightsimError>;

    fn load_weights(&self) -> Result<WeightTimeline, WeightsimError>;

    fn load_prices(&self) -> Result<Vec<PriceObservation>, WeightsimError>;

    fn load_benchmark(&self) -> Result<BenchmarkSeries, WeightsimError>;
}
