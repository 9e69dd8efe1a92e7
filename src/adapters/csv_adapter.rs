//! CSV file adapters for market data input and run artifacts.
//!
//! Every input file must carry a header row naming its columns. Columns are
//! matched by name, never by position, and a missing required column is
//! rejected before any row is read.

use crate::domain::calendar::TradingCalendar;
use crate::domain::config_validation::DataPaths;
use crate::domain::error::WeightsimError;
use crate::domain::metrics::Metrics;
use crate::domain::regime::RegimeFlags;
use crate::domain::returns::{
    BenchmarkRecord, BenchmarkSeries, PortfolioReturnSeries, PriceObservation, ReturnPoint,
};
use crate::domain::simulator::DayAttribution;
use crate::domain::verify::{EquivalenceReport, MismatchDiagnostic};
use crate::domain::weights::{WeightRecord, WeightTimeline};
use crate::ports::data_port::MarketDataPort;
use crate::ports::report_port::ResultSink;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CALENDAR_COLUMNS: &[&str] = &["date"];
pub const WEIGHT_COLUMNS: &[&str] = &["date", "symbol", "weight"];
pub const PRICE_COLUMNS: &[&str] = &["symbol", "date", "close"];
pub const BENCHMARK_COLUMNS: &[&str] = &["date", "ret"];
pub const RETURN_COLUMNS: &[&str] = &["date", "ret"];

fn open_reader(path: &Path, required: &[&str]) -> Result<csv::Reader<File>, WeightsimError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| WeightsimError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
    let headers = rdr.headers().map_err(|e| WeightsimError::Data {
        reason: format!("failed to read header of {}: {}", path.display(), e),
    })?;
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(WeightsimError::invalid_input(
                path.display().to_string(),
                format!("missing column '{column}'"),
            ));
        }
    }
    Ok(rdr)
}

fn read_rows<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>, WeightsimError> {
    let mut rdr = open_reader(path, required)?;
    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row: T = result.map_err(|e| WeightsimError::Data {
            // +2: one for the header, one for 1-based line numbers.
            reason: format!("{} line {}: {}", path.display(), i + 2, e),
        })?;
        rows.push(row);
    }
    debug!(path = %path.display(), rows = rows.len(), "csv loaded");
    Ok(rows)
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    date: NaiveDate,
}

pub fn read_calendar(path: &Path) -> Result<TradingCalendar, WeightsimError> {
    let rows: Vec<CalendarRow> = read_rows(path, CALENDAR_COLUMNS)?;
    TradingCalendar::new(rows.into_iter().map(|r| r.date).collect())
}

pub fn read_weights(path: &Path) -> Result<WeightTimeline, WeightsimError> {
    let rows: Vec<WeightRecord> = read_rows(path, WEIGHT_COLUMNS)?;
    WeightTimeline::from_records(&rows)
}

pub fn read_prices(path: &Path) -> Result<Vec<PriceObservation>, WeightsimError> {
    read_rows(path, PRICE_COLUMNS)
}

pub fn read_benchmark(path: &Path) -> Result<BenchmarkSeries, WeightsimError> {
    let rows: Vec<BenchmarkRecord> = read_rows(path, BENCHMARK_COLUMNS)?;
    BenchmarkSeries::from_records(&rows)
}

/// A previously written returns file. Extra columns are ignored.
pub fn read_returns(path: &Path) -> Result<PortfolioReturnSeries, WeightsimError> {
    let rows: Vec<ReturnPoint> = read_rows(path, RETURN_COLUMNS)?;
    PortfolioReturnSeries::new(rows)
}

/// Reads the files named in a `[data]` config section.
pub struct CsvAdapter {
    paths: DataPaths,
}

impl CsvAdapter {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }
}

impl MarketDataPort for CsvAdapter {
    fn load_calendar(&self) -> Result<TradingCalendar, WeightsimError> {
        match &self.paths.calendar {
            Some(path) => read_calendar(path),
            None => {
                let prices = self.load_prices()?;
                Ok(TradingCalendar::from_unordered(prices.iter().map(|p| p.date)))
            }
        }
    }

    fn load_weights(&self) -> Result<WeightTimeline, WeightsimError> {
        read_weights(&self.paths.weights)
    }

    fn load_prices(&self) -> Result<Vec<PriceObservation>, WeightsimError> {
        read_prices(&self.paths.prices)
    }

    fn load_benchmark(&self) -> Result<BenchmarkSeries, WeightsimError> {
        read_benchmark(self.paths.benchmark()?)
    }
}

#[derive(Serialize)]
struct ReturnRow {
    date: NaiveDate,
    ret: f64,
    cumulative: f64,
}

#[derive(Serialize)]
struct FlagRow {
    date: NaiveDate,
    stop: bool,
}

#[derive(Serialize)]
struct EquivalenceRowOut {
    date: NaiveDate,
    left: f64,
    right: f64,
    diff: f64,
    abs_diff: f64,
}

#[derive(Serialize)]
struct BreakdownRow<'a> {
    date: NaiveDate,
    side: &'a str,
    symbol: &'a str,
    weight: f64,
    ret: Option<f64>,
    contribution: f64,
}

#[derive(Serialize)]
struct MetricsRow<'a> {
    strategy: &'a str,
    days: usize,
    cumulative_return: f64,
    annualized_return: f64,
    alpha_sharpe: Option<f64>,
    max_drawdown: f64,
}

/// Writes artifacts as `<output_dir>/<name>.csv`. Floats use the shortest
/// representation that parses back to the same value.
pub struct CsvResultSink {
    output_dir: PathBuf,
}

impl CsvResultSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.csv"))
    }

    fn write_all<T: Serialize>(
        &self,
        name: &str,
        rows: impl IntoIterator<Item = T>,
    ) -> Result<PathBuf, WeightsimError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.path_for(name);
        let data_err = |e: csv::Error| WeightsimError::Data {
            reason: format!("failed to write {}: {}", path.display(), e),
        };
        let mut wtr = csv::Writer::from_path(&path).map_err(data_err)?;
        for row in rows {
            wtr.serialize(row).map_err(data_err)?;
        }
        wtr.flush()?;
        debug!(path = %path.display(), "csv written");
        Ok(path)
    }
}

fn breakdown_rows<'a>(
    side: &'a str,
    day: &'a Option<DayAttribution>,
) -> impl Iterator<Item = BreakdownRow<'a>> {
    day.iter().flat_map(move |a| {
        a.rows.iter().map(move |c| BreakdownRow {
            date: a.date,
            side,
            symbol: c.symbol.as_str(),
            weight: c.weight,
            ret: c.ret,
            contribution: c.contribution,
        })
    })
}

impl ResultSink for CsvResultSink {
    fn write_returns(
        &self,
        name: &str,
        series: &PortfolioReturnSeries,
    ) -> Result<PathBuf, WeightsimError> {
        let curve = series.cumulative_curve();
        self.write_all(
            name,
            series
                .points()
                .iter()
                .zip(curve)
                .map(|(p, growth)| ReturnRow {
                    date: p.date,
                    ret: p.ret,
                    cumulative: growth - 1.0,
                }),
        )
    }

    fn write_flags(&self, name: &str, flags: &RegimeFlags) -> Result<PathBuf, WeightsimError> {
        self.write_all(name, flags.iter().map(|(date, stop)| FlagRow { date, stop }))
    }

    fn write_weights(
        &self,
        name: &str,
        timeline: &WeightTimeline,
    ) -> Result<PathBuf, WeightsimError> {
        self.write_all(name, timeline.to_records())
    }

    fn write_equivalence(
        &self,
        name: &str,
        report: &EquivalenceReport,
        diagnostics: &[MismatchDiagnostic],
    ) -> Result<PathBuf, WeightsimError> {
        let path = self.write_all(
            name,
            report.rows.iter().map(|r| EquivalenceRowOut {
                date: r.date,
                left: r.left,
                right: r.right,
                diff: r.diff,
                abs_diff: r.abs_diff,
            }),
        )?;
        if !diagnostics.is_empty() {
            self.write_all(
                &format!("{name}_breakdown"),
                diagnostics.iter().flat_map(|d| {
                    breakdown_rows("left", &d.left).chain(breakdown_rows("right", &d.right))
                }),
            )?;
        }
        Ok(path)
    }

    fn write_metrics(
        &self,
        name: &str,
        rows: &[(String, Metrics)],
    ) -> Result<PathBuf, WeightsimError> {
        self.write_all(
            name,
            rows.iter().map(|(strategy, m)| MetricsRow {
                strategy: strategy.as_str(),
                days: m.days,
                cumulative_return: m.cumulative_return,
                annualized_return: m.annualized_return,
                alpha_sharpe: m.alpha_sharpe,
                max_drawdown: m.max_drawdown,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::verify::EquivalenceVerifier;
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn read_weights_groups_rows() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "w.csv",
            "date,symbol,weight\n2024-01-02,A,0.6\n2024-01-02,B,0.4\n2024-01-03,A,1\n",
        );
        let tl = read_weights(&path).unwrap();
        assert_eq!(tl.len(), 2);
        assert_eq!(tl.get(d("2024-01-02")).unwrap().get("B"), Some(0.4));
    }

    #[test]
    fn columns_are_matched_by_name() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "w.csv", "weight,symbol,date\n0.5,A,2024-01-02\n");
        let tl = read_weights(&path).unwrap();
        assert_eq!(tl.get(d("2024-01-02")).unwrap().get("A"), Some(0.5));
    }

    #[test]
    fn missing_column_names_file_and_column() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "w.csv", "date,ticker,weight\n2024-01-02,A,0.5\n");
        let err = read_weights(&path).unwrap_err();
        match err {
            WeightsimError::InvalidInput {
                source_name,
                reason,
            } => {
                assert!(source_name.ends_with("w.csv"));
                assert!(reason.contains("symbol"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_value_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "w.csv", "date,symbol,weight\n2024-01-02,A,0.5\n2024-01-03,A,lots\n");
        let err = read_weights(&path).unwrap_err();
        assert!(matches!(err, WeightsimError::Data { ref reason } if reason.contains("line 3")));
    }

    #[test]
    fn prices_accept_empty_or_absent_adj_close() {
        let dir = TempDir::new().unwrap();
        let with = write(
            &dir,
            "p1.csv",
            "symbol,date,close,adj_close\nA,2024-01-02,100,99.5\nA,2024-01-03,101,\n",
        );
        let rows = read_prices(&with).unwrap();
        assert_eq!(rows[0].adj_close, Some(99.5));
        assert_eq!(rows[1].adj_close, None);

        let without = write(&dir, "p2.csv", "symbol,date,close\nA,2024-01-02,100\n");
        assert_eq!(read_prices(&without).unwrap()[0].adj_close, None);
    }

    #[test]
    fn calendar_defaults_to_price_dates() {
        let dir = TempDir::new().unwrap();
        let prices = write(
            &dir,
            "p.csv",
            "symbol,date,close\nB,2024-01-03,10\nA,2024-01-02,100\nA,2024-01-03,101\n",
        );
        let adapter = CsvAdapter::new(DataPaths {
            calendar: None,
            weights: dir.path().join("unused.csv"),
            prices,
            benchmark: None,
            output_dir: dir.path().to_path_buf(),
        });
        let cal = adapter.load_calendar().unwrap();
        assert_eq!(cal.dates(), &[d("2024-01-02"), d("2024-01-03")]);
        assert!(matches!(
            adapter.load_benchmark(),
            Err(WeightsimError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn unsorted_calendar_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "cal.csv", "date\n2024-01-03\n2024-01-02\n");
        assert!(matches!(
            read_calendar(&path),
            Err(WeightsimError::CalendarInvalid { .. })
        ));
    }

    #[test]
    fn returns_round_trip_exactly() {
        let dir = TempDir::new().unwrap();
        let series = PortfolioReturnSeries::new(vec![
            ReturnPoint { date: d("2024-01-02"), ret: 0.1 + 0.2 },
            ReturnPoint { date: d("2024-01-03"), ret: -1.0 / 3.0 },
            ReturnPoint { date: d("2024-01-04"), ret: 1e-17 },
        ])
        .unwrap();
        let sink = CsvResultSink::new(dir.path());
        let path = sink.write_returns("baseline", &series).unwrap();
        let back = read_returns(&path).unwrap();
        let bits = |s: &PortfolioReturnSeries| -> Vec<u64> {
            s.points().iter().map(|p| p.ret.to_bits()).collect()
        };
        assert_eq!(bits(&back), bits(&series));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("date,ret,cumulative\n"));
    }

    #[test]
    fn flags_file_has_date_and_stop() {
        let dir = TempDir::new().unwrap();
        let flags = RegimeFlags::from_map(
            60,
            [(d("2024-01-02"), false), (d("2024-01-03"), true)].into_iter().collect(),
        );
        let path = CsvResultSink::new(dir.path()).write_flags("flags_w60", &flags).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text, "date,stop\n2024-01-02,false\n2024-01-03,true\n");
    }

    #[test]
    fn weights_round_trip_through_sink() {
        let dir = TempDir::new().unwrap();
        let src = write(
            &dir,
            "w.csv",
            "date,symbol,weight\n2024-01-02,A,0.3333333333333333\n2024-01-02,B,0.6666666666666667\n",
        );
        let tl = read_weights(&src).unwrap();
        let out = CsvResultSink::new(dir.path().join("out"))
            .write_weights("weights", &tl)
            .unwrap();
        assert_eq!(read_weights(&out).unwrap(), tl);
    }

    #[test]
    fn equivalence_without_diagnostics_writes_one_file() {
        let dir = TempDir::new().unwrap();
        let s = PortfolioReturnSeries::new(vec![ReturnPoint {
            date: d("2024-01-02"),
            ret: 0.01,
        }])
        .unwrap();
        let report = EquivalenceVerifier::default().compare(&s, &s);
        let sink = CsvResultSink::new(dir.path());
        let path = sink.write_equivalence("eq", &report, &[]).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("date,left,right,diff,abs_diff\n"));
        assert!(!sink.path_for("eq_breakdown").exists());
    }
}
