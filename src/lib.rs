//! weightsim: weight-to-return portfolio simulation with a causal risk-off
//! regime overlay and equivalence verification.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], command-line entry points in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
