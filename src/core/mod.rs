//! Core domain types, configuration and pure derivations

pub mod analytics;
pub mod cache;
pub mod config;
pub mod log;
pub mod model;
pub mod sources;

// Re-export main types for cleaner imports
pub use model::{DashboardSnapshot, Network, Sourced};
pub use sources::{BlockExplorer, ChainIndexer, ExpenseSource, PriceOracle};
