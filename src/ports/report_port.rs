//! Result output port trait.

use crate::domain::error::WeightsimError;
use crate::domain::metrics::Metrics;
use crate::domain::regime::RegimeFlags;
use crate::domain::returns::PortfolioReturnSeries;
use crate::domain::verify::{EquivalenceReport, MismatchDiagnostic};
use crate::domain::weights::WeightTimeline;
use std::path::PathBuf;

/// Port for persisting run artifacts. Each call writes one named artifact
/// and returns where it went.
pub trait ResultSink {
    fn write_returns(
        &self,
        name: &str,
        series: &PortfolioReturnSeries,
    ) -> Result<PathBuf, WeightsimError>;

    fn write_flags(&self, name: &str, flags: &RegimeFlags) -> Result<PathBuf, WeightsimError>;

    fn write_weights(
        &self,
        name: &str,
        timeline: &WeightTimeline,
    ) -> Result<PathBuf, WeightsimError>;

    /// Writes the per-date comparison and, when `diagnostics` is non-empty,
    /// the per-symbol breakdown of the mismatching dates.
    fn write_equivalence(
        &self,
        name: &str,
        report: &EquivalenceReport,
        diagnostics: &[MismatchDiagnostic],
    ) -> Result<PathBuf, WeightsimError>;

    fn write_metrics(
        &self,
        name: &str,
        rows: &[(String, Metrics)],
    ) -> Result<PathBuf, WeightsimError>;
}
