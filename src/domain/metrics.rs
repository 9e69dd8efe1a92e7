//! Performance metrics of a daily return series against the benchmark.

use crate::domain::returns::{BenchmarkSeries, PortfolioReturnSeries};
use chrono::Datelike;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Days where both the strategy and the benchmark have a return.
    pub days: usize,
    pub cumulative_return: f64,
    pub annualized_return: f64,
    /// Annualized mean excess return over its annualized sample deviation.
    /// `None` when the deviation is zero or undefined.
    pub alpha_sharpe: Option<f64>,
    /// Largest peak-to-trough decline of the compounded curve, as a
    /// positive fraction.
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearlyPerformance {
    pub year: i32,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
    pub relative_alpha: f64,
}

impl Metrics {
    pub fn compute(series: &PortfolioReturnSeries, benchmark: &BenchmarkSeries) -> Self {
        let aligned = align(series, benchmark);
        let port: Vec<f64> = aligned.iter().map(|(_, p, _)| *p).collect();
        let alpha: Vec<f64> = aligned.iter().map(|(_, p, b)| p - b).collect();

        let cumulative_return = compound(&port);
        let days = port.len();
        let years = days as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && cumulative_return.is_finite() {
            (1.0 + cumulative_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        Metrics {
            days,
            cumulative_return,
            annualized_return,
            alpha_sharpe: compute_alpha_sharpe(&alpha),
            max_drawdown: compute_drawdown(&port),
        }
    }
}

/// Calendar-year compounded returns of the strategy and the benchmark over
/// their common dates.
pub fn yearly_performance(
    series: &PortfolioReturnSeries,
    benchmark: &BenchmarkSeries,
) -> Vec<YearlyPerformance> {
    let mut out: Vec<YearlyPerformance> = Vec::new();
    let mut port_growth = 1.0;
    let mut bench_growth = 1.0;
    let mut current: Option<i32> = None;

    for (date, p, b) in align(series, benchmark) {
        let year = date.year();
        if let Some(y) = current.filter(|y| *y != year) {
            out.push(year_row(y, port_growth, bench_growth));
            port_growth = 1.0;
            bench_growth = 1.0;
        }
        current = Some(year);
        port_growth *= 1.0 + p;
        bench_growth *= 1.0 + b;
    }
    if let Some(y) = current {
        out.push(year_row(y, port_growth, bench_growth));
    }
    out
}

fn year_row(year: i32, port_growth: f64, bench_growth: f64) -> YearlyPerformance {
    YearlyPerformance {
        year,
        portfolio_return: port_growth - 1.0,
        benchmark_return: bench_growth - 1.0,
        relative_alpha: port_growth - bench_growth,
    }
}

fn align(
    series: &PortfolioReturnSeries,
    benchmark: &BenchmarkSeries,
) -> Vec<(chrono::NaiveDate, f64, f64)> {
    series
        .points()
        .iter()
        .filter_map(|p| benchmark.get(p.date).map(|b| (p.date, p.ret, b)))
        .collect()
}

fn compound(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

fn compute_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;

    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

fn compute_alpha_sharpe(alpha: &[f64]) -> Option<f64> {
    if alpha.len() < 2 {
        return None;
    }
    let n = alpha.len() as f64;
    let mean = alpha.iter().sum::<f64>() / n;
    // Sample deviation (n - 1).
    let variance = alpha.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    if stddev > 0.0 {
        Some(mean * TRADING_DAYS_PER_YEAR / stddev)
    } else {
        None
    }
}
