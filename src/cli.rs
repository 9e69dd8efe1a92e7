//! CLI definition and dispatch.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{CsvAdapter, CsvResultSink, read_returns};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::batch::{BatchSimulator, overlay_returns};
use crate::domain::calendar::TradingCalendar;
use crate::domain::config_validation::{RunConfig, load_run_config};
use crate::domain::error::WeightsimError;
use crate::domain::evaluation::{Evaluation, EvaluationInputs, Evaluator};
use crate::domain::metrics::Metrics;
use crate::domain::regime::{RegimeDetector, RegimeFlags, RegimeInput};
use crate::domain::returns::ReturnSeries;
use crate::domain::simulator::{PortfolioReturnSimulator, Simulation};
use crate::domain::verify::{EquivalenceReport, EquivalenceVerifier, MismatchDiagnostic};
use crate::domain::weights::WeightTimeline;
use crate::ports::data_port::MarketDataPort;
use crate::ports::report_port::ResultSink;

/// Exit code when two series disagree beyond tolerance.
pub const MISMATCH_EXIT: u8 = 6;

#[derive(Parser, Debug)]
#[command(
    name = "weightsim",
    about = "Weight-to-return portfolio simulation with regime overlays"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Config file plus per-run overrides of its `[data]` and `[simulation]` keys.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(short, long)]
    pub config: PathBuf,
    #[arg(long)]
    pub weights: Option<PathBuf>,
    #[arg(long)]
    pub prices: Option<PathBuf>,
    #[arg(long)]
    pub benchmark: Option<PathBuf>,
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Comma-separated rolling windows, e.g. 60,120
    #[arg(long)]
    pub windows: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(long)]
    pub left: PathBuf,
    #[arg(long)]
    pub right: PathBuf,
    #[arg(long)]
    pub tolerance: Option<f64>,
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Number of worst dates to decompose
    #[arg(long, default_value_t = 10)]
    pub top: usize,
    /// Config whose data is used to decompose mismatching dates
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Weights behind the left file, replacing the config's
    #[arg(long, requires = "config")]
    pub left_weights: Option<PathBuf>,
    /// Weights behind the right file; without it the right side is the
    /// grid path over the left data
    #[arg(long, requires = "config")]
    pub right_weights: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate the baseline portfolio return series
    Simulate {
        #[command(flatten)]
        args: ConfigArgs,
        /// Recompute through the grid path and compare
        #[arg(long)]
        check: bool,
    },
    /// Compute risk-off flags for each configured window
    Regime {
        #[command(flatten)]
        args: ConfigArgs,
    },
    /// Run every overlay under every window
    Evaluate {
        #[command(flatten)]
        args: ConfigArgs,
        /// Run combinations one at a time
        #[arg(long)]
        serial: bool,
        /// Compare each weight-path series with its return-space counterpart
        #[arg(long)]
        cross_check: bool,
    },
    /// Compare two return series files
    Verify {
        #[command(flatten)]
        args: VerifyArgs,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Simulate { args, check } => run_simulate(&args, check),
        Command::Regime { args } => run_regime(&args),
        Command::Evaluate {
            args,
            serial,
            cross_check,
        } => run_evaluate(&args, serial, cross_check),
        Command::Verify { args } => run_verify(&args),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(e: &WeightsimError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

pub fn apply_overrides(adapter: &mut FileConfigAdapter, args: &ConfigArgs) {
    let paths = [
        ("weights", &args.weights),
        ("prices", &args.prices),
        ("benchmark", &args.benchmark),
        ("output_dir", &args.output_dir),
    ];
    for (key, value) in paths {
        if let Some(p) = value {
            adapter.set("data", key, p.display().to_string());
        }
    }
    if let Some(w) = &args.windows {
        adapter.set("simulation", "windows", w.clone());
    }
}

pub fn load_config(args: &ConfigArgs) -> Result<RunConfig, WeightsimError> {
    eprintln!("Loading config from {}", args.config.display());
    let mut adapter = FileConfigAdapter::from_file(&args.config)?;
    apply_overrides(&mut adapter, args);
    load_run_config(&adapter)
}

/// Inputs shared by every pipeline.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub calendar: TradingCalendar,
    pub timeline: WeightTimeline,
    pub returns: ReturnSeries,
}

pub fn load_market_data(port: &dyn MarketDataPort) -> Result<MarketData, WeightsimError> {
    let timeline = port.load_weights()?;
    if timeline.is_empty() {
        return Err(WeightsimError::NoData {
            reason: "no weight vectors".into(),
        });
    }
    let prices = port.load_prices()?;
    let returns = ReturnSeries::from_prices(&prices)?;
    let calendar = port.load_calendar()?;
    if calendar.len() < 2 {
        return Err(WeightsimError::NoData {
            reason: format!("calendar has {} date(s), need at least 2", calendar.len()),
        });
    }
    eprintln!(
        "Loaded {} weight vectors, {} symbols, {} calendar dates",
        timeline.len(),
        returns.symbols().count(),
        calendar.len()
    );
    Ok(MarketData {
        calendar,
        timeline,
        returns,
    })
}

fn simulate(market: &MarketData) -> Simulation {
    PortfolioReturnSimulator::new(&market.calendar, &market.timeline, &market.returns).run()
}

#[derive(Debug)]
pub struct SimulateOutcome {
    pub simulation: Simulation,
    pub check: Option<EquivalenceReport>,
    pub written: Vec<PathBuf>,
}

pub fn simulate_pipeline(
    data: &dyn MarketDataPort,
    sink: &dyn ResultSink,
    tolerance: f64,
    check: bool,
) -> Result<SimulateOutcome, WeightsimError> {
    let market = load_market_data(data)?;
    let simulation = simulate(&market);
    if simulation.series.is_empty() {
        return Err(WeightsimError::NoData {
            reason: "simulation produced no returns".into(),
        });
    }
    let mut written = vec![sink.write_returns("baseline_returns", &simulation.series)?];

    let check = if check {
        let simulator =
            PortfolioReturnSimulator::new(&market.calendar, &market.timeline, &market.returns);
        let batch = BatchSimulator::new(&market.calendar, &market.timeline, &market.returns);
        let report = EquivalenceVerifier::new(tolerance)?
            .compare(&simulation.series, &batch.run().series);
        let diagnostics = report.diagnose(10, &simulator, &batch);
        written.push(sink.write_equivalence("baseline_check", &report, &diagnostics)?);
        Some(report)
    } else {
        None
    };

    Ok(SimulateOutcome {
        simulation,
        check,
        written,
    })
}

fn print_simulation(sim: &Simulation) {
    let r = &sim.report;
    eprintln!("\n=== Simulation ===");
    eprintln!("Dates simulated:       {}", r.simulated);
    eprintln!("No prior weights:      {}", r.missing_prior_weight);
    eprintln!("Calendar gaps:         {}", r.calendar_gaps.len());
    eprintln!("Missing held returns:  {}", r.missing_returns);
    eprintln!(
        "Cumulative return:     {:.2}%",
        sim.series.cumulative_return() * 100.0
    );
}

fn print_equivalence(label: &str, report: &EquivalenceReport) {
    let verdict = if report.matched { "PASS" } else { "FAIL" };
    eprintln!(
        "{label}: {verdict} ({} common dates, max |diff| {:.3e}, mean |diff| {:.3e}, cumulative diff {:.3e})",
        report.common_dates(),
        report.max_abs_diff,
        report.mean_abs_diff,
        report.cumulative_diff,
    );
    if !report.matched {
        for row in report.worst(10) {
            eprintln!(
                "  {}  left {:+.10}  right {:+.10}  diff {:+.3e}",
                row.date, row.left, row.right, row.diff
            );
        }
    }
}

fn run_simulate(args: &ConfigArgs, check: bool) -> ExitCode {
    let config = match load_config(args) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let data = CsvAdapter::new(config.data.clone());
    let sink = CsvResultSink::new(&config.data.output_dir);

    let outcome = match simulate_pipeline(&data, &sink, config.tolerance, check) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };
    print_simulation(&outcome.simulation);
    for path in &outcome.written {
        eprintln!("Written: {}", path.display());
    }
    match &outcome.check {
        Some(report) => {
            print_equivalence("Grid check", report);
            if report.matched {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(MISMATCH_EXIT)
            }
        }
        None => ExitCode::SUCCESS,
    }
}

#[derive(Debug)]
pub struct RegimeOutcome {
    pub baseline: Simulation,
    pub flags: Vec<RegimeFlags>,
    pub written: Vec<PathBuf>,
}

pub fn regime_pipeline(
    data: &dyn MarketDataPort,
    sink: &dyn ResultSink,
    windows: &[usize],
) -> Result<RegimeOutcome, WeightsimError> {
    let market = load_market_data(data)?;
    let benchmark = data.load_benchmark()?;
    let baseline = simulate(&market);
    let input = RegimeInput::align(&baseline.series, &benchmark);
    if input.is_empty() {
        return Err(WeightsimError::NoData {
            reason: "portfolio and benchmark share no dates".into(),
        });
    }

    let mut flags = Vec::with_capacity(windows.len());
    let mut written = Vec::with_capacity(windows.len());
    for &window in windows {
        let f = RegimeDetector::new(window)?.detect(&input);
        written.push(sink.write_flags(&format!("flags_w{window}"), &f)?);
        flags.push(f);
    }
    Ok(RegimeOutcome {
        baseline,
        flags,
        written,
    })
}

fn run_regime(args: &ConfigArgs) -> ExitCode {
    let config = match load_config(args) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let data = CsvAdapter::new(config.data.clone());
    let sink = CsvResultSink::new(&config.data.output_dir);

    let outcome = match regime_pipeline(&data, &sink, &config.windows) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };
    eprintln!("\n=== Regime ===");
    for f in &outcome.flags {
        let s = f.summary();
        let first = s
            .first_stop
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  window {:>4}: {} / {} stop days ({:.1}%), first {}",
            s.window, s.stop_days, s.days, s.stop_pct, first
        );
    }
    for path in &outcome.written {
        eprintln!("Written: {}", path.display());
    }
    ExitCode::SUCCESS
}

#[derive(Debug)]
pub struct EvaluateOutcome {
    pub evaluation: Evaluation,
    pub cross_checks: Vec<(String, EquivalenceReport)>,
    pub written: Vec<PathBuf>,
}

/// Baseline, flags, every (overlay, window) combination, and their
/// artifacts. A failing combination is reported in the evaluation and
/// skipped when writing; the rest are still written.
pub fn evaluate_pipeline(
    data: &dyn MarketDataPort,
    sink: &dyn ResultSink,
    config: &RunConfig,
    cross_check: bool,
) -> Result<EvaluateOutcome, WeightsimError> {
    let market = load_market_data(data)?;
    let benchmark = data.load_benchmark()?;
    let inputs = EvaluationInputs {
        calendar: &market.calendar,
        timeline: &market.timeline,
        returns: &market.returns,
        benchmark: &benchmark,
    };
    let strategies = config.strategies();
    eprintln!(
        "Evaluating {} combinations ({} overlays x {} windows)",
        strategies.len(),
        config.overlays.len(),
        config.windows.len()
    );
    let evaluation = Evaluator::new(config.parallel).run(inputs, &strategies)?;

    let mut written = vec![sink.write_returns("baseline_returns", &evaluation.baseline.series)?];
    for (window, flags) in &evaluation.flags {
        written.push(sink.write_flags(&format!("flags_w{window}"), flags)?);
    }

    let verifier = EquivalenceVerifier::new(config.tolerance)?;
    let mut metrics = vec![("baseline".to_string(), evaluation.baseline_metrics.clone())];
    let mut cross_checks = Vec::new();
    for result in &evaluation.results {
        let Ok(outcome) = &result.outcome else {
            continue;
        };
        let name = &result.config.name;
        written.push(sink.write_returns(&format!("{name}_returns"), &outcome.simulation.series)?);
        written.push(sink.write_weights(&format!("{name}_weights"), &outcome.weights)?);
        metrics.push((name.clone(), outcome.metrics.clone()));

        if cross_check {
            if let Some(flags) = evaluation.flags.get(&result.config.window) {
                let expected = overlay_returns(
                    &result.config.overlay,
                    &market.calendar,
                    &evaluation.baseline.series,
                    flags,
                    &market.returns,
                );
                let report = verifier.compare(&outcome.simulation.series, &expected);
                written.push(sink.write_equivalence(&format!("{name}_cross_check"), &report, &[])?);
                cross_checks.push((name.clone(), report));
            }
        }
    }
    written.push(sink.write_metrics("metrics", &metrics)?);

    Ok(EvaluateOutcome {
        evaluation,
        cross_checks,
        written,
    })
}

fn print_evaluation(outcome: &EvaluateOutcome) {
    let eval = &outcome.evaluation;
    let print_row = |name: &str, m: &Metrics| {
        let sharpe = m
            .alpha_sharpe
            .map(|s| format!("{s:5.2}"))
            .unwrap_or_else(|| "  n/a".to_string());
        eprintln!(
            "  {:<24} cum {:>8.2}%  ann {:>7.2}%  alpha sharpe {}  maxDD -{:.1}%",
            name,
            m.cumulative_return * 100.0,
            m.annualized_return * 100.0,
            sharpe,
            m.max_drawdown * 100.0
        );
    };

    eprintln!("\n=== Strategies ===");
    print_row("baseline", &eval.baseline_metrics);
    for result in &eval.results {
        match &result.outcome {
            Ok(o) => {
                print_row(&result.config.name, &o.metrics);
                if !o.stop_checks.is_empty() {
                    eprintln!("    {} stop days checked", o.stop_checks.len());
                }
            }
            Err(e) => eprintln!("  {:<24} FAILED: {e}", result.config.name),
        }
    }
    if !eval.baseline_yearly.is_empty() {
        eprintln!("\n=== Baseline by year ===");
        for y in &eval.baseline_yearly {
            eprintln!(
                "  {}  port {:+.2}%  bench {:+.2}%  alpha {:+.2}%",
                y.year,
                y.portfolio_return * 100.0,
                y.benchmark_return * 100.0,
                y.relative_alpha * 100.0
            );
        }
    }
    for (name, report) in &outcome.cross_checks {
        print_equivalence(&format!("Cross-check {name}"), report);
    }
}

fn run_evaluate(args: &ConfigArgs, serial: bool, cross_check: bool) -> ExitCode {
    let mut config = match load_config(args) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    if serial {
        config.parallel = false;
    }
    let data = CsvAdapter::new(config.data.clone());
    let sink = CsvResultSink::new(&config.data.output_dir);

    let outcome = match evaluate_pipeline(&data, &sink, &config, cross_check) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };
    print_evaluation(&outcome);
    eprintln!("\nWritten {} files to {}", outcome.written.len(), config.data.output_dir.display());

    if let Some(failed) = outcome.evaluation.failures().next() {
        if let Err(e) = &failed.outcome {
            return e.into();
        }
    }
    if outcome.cross_checks.iter().any(|(_, r)| !r.matched) {
        return ExitCode::from(MISMATCH_EXIT);
    }
    ExitCode::SUCCESS
}

/// Market data behind each side of a comparison.
#[derive(Clone, Copy)]
pub struct Decomposition<'a> {
    pub left: &'a dyn MarketDataPort,
    /// `None` replays the left data through the grid path.
    pub right: Option<&'a dyn MarketDataPort>,
}

#[derive(Debug)]
pub struct VerifyOutcome {
    pub report: EquivalenceReport,
    pub diagnostics: Vec<MismatchDiagnostic>,
}

/// Compares two returns files. With market data, mismatching dates are
/// decomposed per symbol through a simulator on each side.
pub fn verify_pipeline(
    left: &Path,
    right: &Path,
    sink: &dyn ResultSink,
    tolerance: f64,
    top: usize,
    sources: Option<Decomposition<'_>>,
) -> Result<VerifyOutcome, WeightsimError> {
    let left_series = read_returns(left)?;
    let right_series = read_returns(right)?;
    let report = EquivalenceVerifier::new(tolerance)?.compare(&left_series, &right_series);

    let diagnostics = match sources {
        Some(sources) if !report.matched => {
            let lm = load_market_data(sources.left)?;
            let left_sim = PortfolioReturnSimulator::new(&lm.calendar, &lm.timeline, &lm.returns);
            match sources.right {
                Some(port) => {
                    let rm = load_market_data(port)?;
                    let right_sim =
                        PortfolioReturnSimulator::new(&rm.calendar, &rm.timeline, &rm.returns);
                    report.diagnose(top, &left_sim, &right_sim)
                }
                None => {
                    let batch = BatchSimulator::new(&lm.calendar, &lm.timeline, &lm.returns);
                    report.diagnose(top, &left_sim, &batch)
                }
            }
        }
        _ => Vec::new(),
    };
    sink.write_equivalence("equivalence", &report, &diagnostics)?;
    Ok(VerifyOutcome {
        report,
        diagnostics,
    })
}

fn print_diagnostics(diagnostics: &[MismatchDiagnostic]) {
    for diag in diagnostics {
        let Some(worst) = diag.symbols.first() else {
            continue;
        };
        eprintln!(
            "  {}  largest gap {}: weight {:.6} vs {:.6}, contribution {:+.3e} vs {:+.3e}",
            diag.date,
            worst.symbol,
            worst.left_weight,
            worst.right_weight,
            worst.left_contribution,
            worst.right_contribution
        );
    }
}

fn run_verify(args: &VerifyArgs) -> ExitCode {
    let config = match &args.config {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            match FileConfigAdapter::from_file(path).and_then(|a| load_run_config(&a)) {
                Ok(c) => Some(c),
                Err(e) => return fail(&e),
            }
        }
        None => None,
    };
    let tolerance = args
        .tolerance
        .or(config.as_ref().map(|c| c.tolerance))
        .unwrap_or(crate::domain::verify::DEFAULT_TOLERANCE);
    let output_dir = args
        .output_dir
        .clone()
        .or(config.as_ref().map(|c| c.data.output_dir.clone()))
        .unwrap_or_else(|| PathBuf::from("."));
    let side = |weights: &Option<PathBuf>| {
        config.as_ref().map(|c| {
            let mut paths = c.data.clone();
            if let Some(w) = weights {
                paths.weights = w.clone();
            }
            CsvAdapter::new(paths)
        })
    };
    let left_data = side(&args.left_weights);
    let right_data = args.right_weights.as_ref().and(side(&args.right_weights));
    let sources = left_data.as_ref().map(|l| Decomposition {
        left: l,
        right: right_data.as_ref().map(|r| r as &dyn MarketDataPort),
    });
    let sink = CsvResultSink::new(&output_dir);

    eprintln!("Comparing {} with {}", args.left.display(), args.right.display());
    let outcome = match verify_pipeline(
        &args.left,
        &args.right,
        &sink,
        tolerance,
        args.top,
        sources,
    ) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };
    let report = &outcome.report;
    print_equivalence("Equivalence", report);
    if !report.only_left.is_empty() || !report.only_right.is_empty() {
        eprintln!(
            "  dates only in left: {}, only in right: {}",
            report.only_left.len(),
            report.only_right.len()
        );
    }
    print_diagnostics(&outcome.diagnostics);
    eprintln!("Written: {}", sink.path_for("equivalence").display());
    if report.matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(MISMATCH_EXIT)
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let config = match FileConfigAdapter::from_file(config_path).and_then(|a| load_run_config(&a)) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    eprintln!("Config validated successfully");
    eprintln!("\nData:");
    eprintln!("  weights:   {}", config.data.weights.display());
    eprintln!("  prices:    {}", config.data.prices.display());
    match &config.data.calendar {
        Some(p) => eprintln!("  calendar:  {}", p.display()),
        None => eprintln!("  calendar:  (derived from price dates)"),
    }
    match &config.data.benchmark {
        Some(p) => eprintln!("  benchmark: {}", p.display()),
        None => eprintln!("  benchmark: (none; regime and evaluate unavailable)"),
    }
    eprintln!("  output:    {}", config.data.output_dir.display());
    eprintln!("\nSimulation:");
    let windows: Vec<String> = config.windows.iter().map(|w| w.to_string()).collect();
    eprintln!("  windows:   {}", windows.join(", "));
    eprintln!("  tolerance: {:e}", config.tolerance);
    eprintln!("\nStrategies:");
    for s in config.strategies() {
        eprintln!("  {:<24} {}", s.name, s.overlay);
    }
    ExitCode::SUCCESS
}
