//! Aggregation coordinator core.
//!
//! Drives a pool of connected provers from per-batch validity proofs toward a
//! single final proof for the settlement layer. One
//! [`AggregationScheduler`](scheduler::AggregationScheduler) runs per
//! connected prover; claims on the shared proof table go through
//! [`ProofRepository`](repository::ProofRepository), which serializes them so
//! no two provers ever work on overlapping batch ranges.

pub mod config;
pub mod errors;
pub mod input;
pub mod profitability;
pub mod prover;
pub mod repository;
pub mod scheduler;
pub mod server;
pub mod settlement;
pub mod submitter;

pub use config::AggregatorConfig;
pub use errors::{AggregatorError, ProverError, SettlementError};
pub use server::AggregatorServer;
