//! Core domain types and logic.

pub mod calendar;
pub mod weights;
pub mod returns;
pub mod simulator;
pub mod batch;
pub mod regime;
pub mod overlay;
pub mod strategy;
pub mod verify;
pub mod evaluation;
pub mod metrics;
pub mod config_validation;
pub mod error;
