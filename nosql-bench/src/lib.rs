//! Benchmark infrastructure for the nosql drivers.
//!
//! Every benchmark runs the same workload against each embedded backend so
//! the numbers are directly comparable.

pub mod config;
pub mod data_gen;
pub mod stores;
