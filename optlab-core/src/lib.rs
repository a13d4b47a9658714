//! OptLab Core: option domain types and the leaf collaborators of the scoring engine.
//!
//! This crate contains everything the funnel and the Monte Carlo core consume
//! but do not orchestrate:
//! - Domain types (legs, candidate structures, metrics reports, diagnostics, episodes)
//! - Return distribution contract with Laplace, Student-t and Normal families
//! - Option pricer contract with a Black-Scholes implementation
//! - Market data provider contract with a primary/fallback chain
//! - Episode selectors, deterministic RNG hierarchy, resource footprint guard

pub mod data;
pub mod distributions;
pub mod domain;
pub mod pricing;
pub mod resources;
pub mod rng;
pub mod selectors;
pub mod stats;
