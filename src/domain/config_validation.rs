//! Configuration validation.
//!
//! Reads every `[data]`, `[simulation]` and `[overlay]` field, checks it,
//! and builds a [`RunConfig`] before any data is loaded.

use crate::domain::error::WeightsimError;
use crate::domain::overlay::{
    DEFAULT_HALF_SIZE_FACTOR, DEFAULT_HEDGE_FRACTION, Overlay, OverlayKind,
};
use crate::domain::strategy::StrategyConfig;
use crate::domain::verify::DEFAULT_TOLERANCE;
use crate::ports::config_port::ConfigPort;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub const DEFAULT_WINDOWS: [usize; 2] = [60, 120];
const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone, PartialEq)]
pub struct DataPaths {
    pub calendar: Option<PathBuf>,
    pub weights: PathBuf,
    pub prices: PathBuf,
    pub benchmark: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl DataPaths {
    pub fn benchmark(&self) -> Result<&PathBuf, WeightsimError> {
        self.benchmark
            .as_ref()
            .ok_or_else(|| WeightsimError::ConfigMissing {
                section: "data".to_string(),
                key: "benchmark".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub data: DataPaths,
    pub windows: Vec<usize>,
    pub tolerance: f64,
    pub parallel: bool,
    pub excluded_symbols: BTreeSet<String>,
    pub overlays: Vec<Overlay>,
}

impl RunConfig {
    /// Every overlay under every window, overlays outermost.
    pub fn strategies(&self) -> Vec<StrategyConfig> {
        self.overlays
            .iter()
            .flat_map(|overlay| {
                self.windows.iter().map(move |&w| {
                    StrategyConfig::new(overlay.clone(), w)
                        .with_excluded(self.excluded_symbols.clone())
                })
            })
            .collect()
    }
}

pub fn load_run_config(config: &dyn ConfigPort) -> Result<RunConfig, WeightsimError> {
    Ok(RunConfig {
        data: validate_data_config(config)?,
        windows: validate_windows(config)?,
        tolerance: validate_tolerance(config)?,
        parallel: config.get_bool("simulation", "parallel", true),
        excluded_symbols: symbol_set(config, "simulation", "excluded_symbols"),
        overlays: validate_overlay_config(config)?,
    })
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<DataPaths, WeightsimError> {
    Ok(DataPaths {
        calendar: optional_path(config, "calendar"),
        weights: required_path(config, "weights")?,
        prices: required_path(config, "prices")?,
        benchmark: optional_path(config, "benchmark"),
        output_dir: optional_path(config, "output_dir")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
    })
}

fn optional_path(config: &dyn ConfigPort, key: &str) -> Option<PathBuf> {
    config
        .get_string("data", key)
        .filter(|s| !s.trim().is_empty())
        .map(|s| PathBuf::from(s.trim()))
}

fn required_path(config: &dyn ConfigPort, key: &str) -> Result<PathBuf, WeightsimError> {
    optional_path(config, key).ok_or_else(|| WeightsimError::ConfigMissing {
        section: "data".to_string(),
        key: key.to_string(),
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> WeightsimError {
    WeightsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn validate_windows(config: &dyn ConfigPort) -> Result<Vec<usize>, WeightsimError> {
    let Some(items) = config.get_list("simulation", "windows") else {
        return Ok(DEFAULT_WINDOWS.to_vec());
    };
    if items.is_empty() {
        return Err(invalid("simulation", "windows", "at least one window is required"));
    }
    let mut windows = Vec::with_capacity(items.len());
    for item in items {
        match item.parse::<usize>() {
            Ok(w) if w >= 1 => {
                if !windows.contains(&w) {
                    windows.push(w);
                }
            }
            _ => {
                return Err(invalid(
                    "simulation",
                    "windows",
                    format!("'{item}' is not a positive integer"),
                ));
            }
        }
    }
    Ok(windows)
}

/// A present but unparseable number is an error, not the default.
fn parse_double(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, WeightsimError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(section, key, format!("'{s}' is not a number"))),
    }
}

fn validate_tolerance(config: &dyn ConfigPort) -> Result<f64, WeightsimError> {
    let value = parse_double(config, "simulation", "tolerance", DEFAULT_TOLERANCE)?;
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid("simulation", "tolerance", "tolerance must be positive"));
    }
    Ok(value)
}

fn symbol_set(config: &dyn ConfigPort, section: &str, key: &str) -> BTreeSet<String> {
    config
        .get_list(section, key)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

pub fn validate_overlay_config(config: &dyn ConfigPort) -> Result<Vec<Overlay>, WeightsimError> {
    let kinds: Vec<OverlayKind> = match config.get_list("overlay", "strategies") {
        None => vec![
            OverlayKind::ZeroOut,
            OverlayKind::BlendedHedge,
            OverlayKind::HalfSize,
        ],
        Some(items) => {
            let mut kinds = Vec::new();
            for item in items {
                let kind = item
                    .parse::<OverlayKind>()
                    .map_err(|reason| invalid("overlay", "strategies", reason))?;
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            kinds
        }
    };

    kinds
        .into_iter()
        .map(|kind| match kind {
            OverlayKind::Passthrough => Ok(Overlay::Passthrough),
            OverlayKind::ZeroOut => Ok(Overlay::ZeroOut),
            OverlayKind::HalfSize => Overlay::half_size(parse_double(
                config,
                "overlay",
                "half_size_factor",
                DEFAULT_HALF_SIZE_FACTOR,
            )?),
            OverlayKind::BlendedHedge => {
                let hedge_symbol = config
                    .get_string("overlay", "hedge_symbol")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| WeightsimError::ConfigMissing {
                        section: "overlay".to_string(),
                        key: "hedge_symbol".to_string(),
                    })?;
                let fraction =
                    parse_double(config, "overlay", "hedge_fraction", DEFAULT_HEDGE_FRACTION)?;
                Overlay::blended_hedge(
                    fraction,
                    hedge_symbol,
                    symbol_set(config, "overlay", "banned_symbols"),
                )
            }
        })
        .collect()
}
