#![allow(dead_code)]

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use weightsim::domain::calendar::TradingCalendar;
use weightsim::domain::error::WeightsimError;
use weightsim::domain::metrics::Metrics;
use weightsim::domain::regime::RegimeFlags;
use weightsim::domain::returns::{
    BenchmarkRecord, BenchmarkSeries, PortfolioReturnSeries, PriceObservation, ReturnSeries,
};
use weightsim::domain::verify::{EquivalenceReport, MismatchDiagnostic};
use weightsim::domain::weights::{WeightRecord, WeightTimeline};
use weightsim::ports::data_port::MarketDataPort;
use weightsim::ports::report_port::ResultSink;

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// `n` consecutive weekdays starting at `start` (or the next weekday).
pub fn weekdays(start: &str, n: usize) -> Vec<NaiveDate> {
    let mut d = date(start);
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(d);
        }
        d += Duration::days(1);
    }
    out
}

/// Synthetic market: random-walk prices, random positive weights summing
/// to 1 on every `rebalance_every`-th date, and a random benchmark.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    pub prices: Vec<PriceObservation>,
    pub weights: Vec<WeightRecord>,
    pub benchmark: Vec<BenchmarkRecord>,
}

impl Fixture {
    pub fn generate(seed: u64, days: usize, n_symbols: usize, rebalance_every: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dates = weekdays("2018-01-01", days);
        let symbols: Vec<String> = (0..n_symbols).map(|i| format!("S{i:02}")).collect();

        let mut prices = Vec::with_capacity(days * n_symbols);
        for symbol in &symbols {
            let mut close = rng.gen_range(20.0..200.0);
            for &d in &dates {
                prices.push(PriceObservation {
                    symbol: symbol.clone(),
                    date: d,
                    close,
                    adj_close: None,
                });
                close *= 1.0 + rng.gen_range(-0.03..0.031);
            }
        }

        let mut weights = Vec::new();
        for (i, &d) in dates.iter().enumerate() {
            if i % rebalance_every.max(1) != 0 {
                continue;
            }
            let raw: Vec<f64> = symbols.iter().map(|_| rng.gen_range(0.1..1.0)).collect();
            let sum: f64 = raw.iter().sum();
            for (symbol, w) in symbols.iter().zip(raw) {
                weights.push(WeightRecord {
                    date: d,
                    symbol: symbol.clone(),
                    weight: w / sum,
                });
            }
        }

        let benchmark = dates
            .iter()
            .map(|&d| BenchmarkRecord {
                date: d,
                ret: rng.gen_range(-0.02..0.021),
            })
            .collect();

        Self {
            dates,
            symbols,
            prices,
            weights,
            benchmark,
        }
    }

    pub fn calendar(&self) -> TradingCalendar {
        TradingCalendar::new(self.dates.clone()).unwrap()
    }

    pub fn timeline(&self) -> WeightTimeline {
        WeightTimeline::from_records(&self.weights).unwrap()
    }

    pub fn returns(&self) -> ReturnSeries {
        ReturnSeries::from_prices(&self.prices).unwrap()
    }

    pub fn benchmark_series(&self) -> BenchmarkSeries {
        BenchmarkSeries::from_records(&self.benchmark).unwrap()
    }

    pub fn data_port(&self) -> MockDataPort {
        MockDataPort::new()
            .with_calendar(self.dates.clone())
            .with_weights(self.weights.clone())
            .with_prices(self.prices.clone())
            .with_benchmark(self.benchmark.clone())
    }

    /// Writes the fixture as CSV files plus a run config under `dir`.
    /// Returns the config path.
    pub fn write_files(&self, dir: &Path, extra_ini: &str) -> PathBuf {
        let mut calendar = String::from("date\n");
        for d in &self.dates {
            calendar.push_str(&format!("{d}\n"));
        }
        fs::write(dir.join("calendar.csv"), calendar).unwrap();

        let mut weights = String::from("date,symbol,weight\n");
        for r in &self.weights {
            weights.push_str(&format!("{},{},{}\n", r.date, r.symbol, r.weight));
        }
        fs::write(dir.join("weights.csv"), weights).unwrap();

        let mut prices = String::from("symbol,date,close\n");
        for p in &self.prices {
            prices.push_str(&format!("{},{},{}\n", p.symbol, p.date, p.close));
        }
        fs::write(dir.join("prices.csv"), prices).unwrap();

        let mut bench = String::from("date,ret\n");
        for b in &self.benchmark {
            bench.push_str(&format!("{},{}\n", b.date, b.ret));
        }
        fs::write(dir.join("benchmark.csv"), bench).unwrap();

        let ini = format!(
            "[data]\ncalendar = {}\nweights = {}\nprices = {}\nbenchmark = {}\noutput_dir = {}\n{extra_ini}",
            dir.join("calendar.csv").display(),
            dir.join("weights.csv").display(),
            dir.join("prices.csv").display(),
            dir.join("benchmark.csv").display(),
            dir.join("out").display(),
        );
        let config = dir.join("run.ini");
        fs::write(&config, ini).unwrap();
        config
    }
}

/// In-memory market data with optional injected failures.
#[derive(Debug, Default)]
pub struct MockDataPort {
    pub calendar: Vec<NaiveDate>,
    pub weights: Vec<WeightRecord>,
    pub prices: Vec<PriceObservation>,
    pub benchmark: Vec<BenchmarkRecord>,
    pub weights_error: Option<String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(mut self, dates: Vec<NaiveDate>) -> Self {
        self.calendar = dates;
        self
    }

    pub fn with_weights(mut self, weights: Vec<WeightRecord>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_prices(mut self, prices: Vec<PriceObservation>) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_benchmark(mut self, benchmark: Vec<BenchmarkRecord>) -> Self {
        self.benchmark = benchmark;
        self
    }

    pub fn with_weights_error(mut self, reason: &str) -> Self {
        self.weights_error = Some(reason.to_string());
        self
    }
}

impl MarketDataPort for MockDataPort {
    fn load_calendar(&self) -> Result<TradingCalendar, WeightsimError> {
        TradingCalendar::new(self.calendar.clone())
    }

    fn load_weights(&self) -> Result<WeightTimeline, WeightsimError> {
        if let Some(reason) = &self.weights_error {
            return Err(WeightsimError::Data {
                reason: reason.clone(),
            });
        }
        WeightTimeline::from_records(&self.weights)
    }

    fn load_prices(&self) -> Result<Vec<PriceObservation>, WeightsimError> {
        Ok(self.prices.clone())
    }

    fn load_benchmark(&self) -> Result<BenchmarkSeries, WeightsimError> {
        BenchmarkSeries::from_records(&self.benchmark)
    }
}

/// Sink that only records which artifacts were written.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub written: RefCell<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.written.borrow().clone()
    }

    fn record(&self, name: &str) -> Result<PathBuf, WeightsimError> {
        self.written.borrow_mut().push(name.to_string());
        Ok(PathBuf::from(format!("{name}.csv")))
    }
}

impl ResultSink for RecordingSink {
    fn write_returns(
        &self,
        name: &str,
        _series: &PortfolioReturnSeries,
    ) -> Result<PathBuf, WeightsimError> {
        self.record(name)
    }

    fn write_flags(&self, name: &str, _flags: &RegimeFlags) -> Result<PathBuf, WeightsimError> {
        self.record(name)
    }

    fn write_weights(
        &self,
        name: &str,
        _timeline: &WeightTimeline,
    ) -> Result<PathBuf, WeightsimError> {
        self.record(name)
    }

    fn write_equivalence(
        &self,
        name: &str,
        _report: &EquivalenceReport,
        _diagnostics: &[MismatchDiagnostic],
    ) -> Result<PathBuf, WeightsimError> {
        self.record(name)
    }

    fn write_metrics(
        &self,
        name: &str,
        _rows: &[(String, Metrics)],
    ) -> Result<PathBuf, WeightsimError> {
        self.record(name)
    }
}
