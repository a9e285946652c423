//! Proof and batch state types plus the contract the aggregator core uses to
//! talk to the persistence layer.
//!
//! Only the transactional *contract* of the storage engine is in scope here.
//! Multi-record operations on [`StateDb`] are all-or-nothing; how an
//! implementation achieves that (SQL transactions, a single lock, ...) is its
//! own business. [`MemStateDb`] is the in-memory reference implementation used
//! by tests and dev deployments.

pub mod errors;
pub mod mem;
pub mod traits;
pub mod types;

pub use errors::{DbError, DbResult};
pub use mem::MemStateDb;
pub use traits::StateDb;
pub use types::{Batch, BatchRange, ProofRecord};
