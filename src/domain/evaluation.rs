//! Strategy grid: every configured overlay under every regime window, run
//! from one shared baseline.
//!
//! Each (overlay, window) combination is an independent unit of work. A
//! combination that hits an invariant violation is reported in its own slot
//! and the others still complete. With the `parallel` feature the
//! combinations run on the rayon pool; results come back in input order
//! either way.

use crate::domain::calendar::TradingCalendar;
use crate::domain::error::WeightsimError;
use crate::domain::metrics::{Metrics, YearlyPerformance, yearly_performance};
use crate::domain::overlay::{Overlay, StopDayCheck, stop_day_checks};
use crate::domain::regime::{RegimeDetector, RegimeFlags, RegimeInput};
use crate::domain::returns::{BenchmarkSeries, ReturnSeries};
use crate::domain::simulator::{PortfolioReturnSimulator, Simulation};
use crate::domain::strategy::StrategyConfig;
use crate::domain::weights::WeightTimeline;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct EvaluationInputs<'a> {
    pub calendar: &'a TradingCalendar,
    pub timeline: &'a WeightTimeline,
    pub returns: &'a ReturnSeries,
    pub benchmark: &'a BenchmarkSeries,
}

impl EvaluationInputs<'_> {
    /// Hash of every input value, by f64 bit pattern.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.calendar.dates().hash(&mut h);
        for v in self.timeline.vectors() {
            v.date.hash(&mut h);
            for (symbol, w) in &v.weights {
                symbol.hash(&mut h);
                w.to_bits().hash(&mut h);
            }
        }
        for symbol in self.returns.symbols() {
            symbol.hash(&mut h);
            for (date, r) in self.returns.iter_symbol(symbol) {
                date.hash(&mut h);
                r.to_bits().hash(&mut h);
            }
        }
        for (date, r) in self.benchmark.iter() {
            date.hash(&mut h);
            r.to_bits().hash(&mut h);
        }
        h.finish()
    }
}

fn strategy_fingerprint(config: &StrategyConfig) -> u64 {
    let mut h = DefaultHasher::new();
    config.window.hash(&mut h);
    config.excluded_symbols.hash(&mut h);
    config.overlay.kind().hash(&mut h);
    match &config.overlay {
        Overlay::Passthrough | Overlay::ZeroOut => {}
        Overlay::BlendedHedge {
            fraction,
            hedge_symbol,
            banned_symbols,
        } => {
            fraction.to_bits().hash(&mut h);
            hedge_symbol.hash(&mut h);
            banned_symbols.hash(&mut h);
        }
        Overlay::HalfSize { factor } => factor.to_bits().hash(&mut h),
    }
    h.finish()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub weights: WeightTimeline,
    pub simulation: Simulation,
    pub metrics: Metrics,
    pub stop_checks: Vec<StopDayCheck>,
}

#[derive(Debug)]
pub struct CombinationResult {
    pub config: StrategyConfig,
    pub outcome: Result<StrategyOutcome, WeightsimError>,
    pub cached: bool,
}

#[derive(Debug)]
pub struct Evaluation {
    pub baseline: Simulation,
    pub baseline_metrics: Metrics,
    pub baseline_yearly: Vec<YearlyPerformance>,
    pub flags: BTreeMap<usize, RegimeFlags>,
    pub results: Vec<CombinationResult>,
}

impl Evaluation {
    pub fn failures(&self) -> impl Iterator<Item = &CombinationResult> {
        self.results.iter().filter(|r| r.outcome.is_err())
    }
}

/// Runs strategy grids and remembers finished combinations.
#[derive(Debug, Default)]
pub struct Evaluator {
    parallel: bool,
    cache: HashMap<(u64, u64), StrategyOutcome>,
}

impl Evaluator {
    pub fn new(parallel: bool) -> Self {
        Self {
            parallel,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn run(
        &mut self,
        inputs: EvaluationInputs<'_>,
        strategies: &[StrategyConfig],
    ) -> Result<Evaluation, WeightsimError> {
        let baseline =
            PortfolioReturnSimulator::new(inputs.calendar, inputs.timeline, inputs.returns).run();
        if baseline.series.is_empty() {
            return Err(WeightsimError::NoData {
                reason: "baseline simulation produced no returns".into(),
            });
        }
        let baseline_metrics = Metrics::compute(&baseline.series, inputs.benchmark);
        let baseline_yearly = yearly_performance(&baseline.series, inputs.benchmark);

        let regime_input = RegimeInput::align(&baseline.series, inputs.benchmark);
        let windows: BTreeSet<usize> = strategies.iter().map(|s| s.window).collect();
        let mut flags = BTreeMap::new();
        for window in windows {
            flags.insert(window, RegimeDetector::new(window)?.detect(&regime_input));
        }

        let input_fp = inputs.fingerprint();
        let keys: Vec<(u64, u64)> = strategies
            .iter()
            .map(|s| (input_fp, strategy_fingerprint(s)))
            .collect();
        let pending: Vec<usize> = (0..strategies.len())
            .filter(|&i| !self.cache.contains_key(&keys[i]))
            .collect();

        let computed = self.run_pending(inputs, strategies, &flags, &pending);
        let mut computed: BTreeMap<usize, Result<StrategyOutcome, WeightsimError>> =
            pending.into_iter().zip(computed).collect();

        let mut results = Vec::with_capacity(strategies.len());
        for (i, config) in strategies.iter().enumerate() {
            let (outcome, cached) = match computed.remove(&i) {
                Some(outcome) => (outcome, false),
                None => match self.cache.get(&keys[i]) {
                    Some(hit) => (Ok(hit.clone()), true),
                    None => continue,
                },
            };
            match &outcome {
                Ok(o) if !cached => {
                    self.cache.insert(keys[i], o.clone());
                }
                Err(e) => {
                    warn!(strategy = %config.name, window = config.window, error = %e, "strategy failed");
                }
                _ => {}
            }
            results.push(CombinationResult {
                config: config.clone(),
                outcome,
                cached,
            });
        }

        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        info!(
            combinations = results.len(),
            failed,
            cached = results.iter().filter(|r| r.cached).count(),
            "evaluation grid complete"
        );

        Ok(Evaluation {
            baseline,
            baseline_metrics,
            baseline_yearly,
            flags,
            results,
        })
    }

    fn run_pending(
        &self,
        inputs: EvaluationInputs<'_>,
        strategies: &[StrategyConfig],
        flags: &BTreeMap<usize, RegimeFlags>,
        pending: &[usize],
    ) -> Vec<Result<StrategyOutcome, WeightsimError>> {
        let one = |&i: &usize| {
            let config = &strategies[i];
            match flags.get(&config.window) {
                Some(f) => run_strategy(inputs, config, f),
                None => Err(WeightsimError::Data {
                    reason: format!("no regime flags for window {}", config.window),
                }),
            }
        };

        #[cfg(feature = "parallel")]
        let outcomes = if self.parallel {
            use rayon::prelude::*;
            pending.par_iter().map(one).collect()
        } else {
            pending.iter().map(one).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes = pending.iter().map(one).collect();

        outcomes
    }
}

/// Overlay the timeline under `flags` and simulate the result.
pub fn run_strategy(
    inputs: EvaluationInputs<'_>,
    config: &StrategyConfig,
    flags: &RegimeFlags,
) -> Result<StrategyOutcome, WeightsimError> {
    let weights = config.apply(inputs.calendar, inputs.timeline, flags)?;
    let simulation = PortfolioReturnSimulator::new(inputs.calendar, &weights, inputs.returns).run();
    let metrics = Metrics::compute(&simulation.series, inputs.benchmark);
    let stop_checks = stop_day_checks(&weights, flags, config.overlay.hedge_symbol());
    Ok(StrategyOutcome {
        weights,
        simulation,
        metrics,
        stop_checks,
    })
}
