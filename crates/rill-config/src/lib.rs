//! Rill Config
//!
//! This crate contains the serializable configuration types for Rill.
//! Everything here is plain data: it is built once at process start (from
//! flags, environment, or a config file) and handed to the engine and store
//! constructors by reference.
//!
//! - [`EngineConfig`] controls how a step is executed (hop policy, CAS retry
//!   budget, cleanup).
//! - [`StoreConfig`] selects the StateStore and DataStore backends.
//! - [`ExecutionMode`] and [`BranchFailure`] are the per-edge and
//!   per-controller knobs used by workflow definitions.

mod engine;
mod enums;
mod store;

pub use engine::{EngineConfig, HopPolicy, RetryConfig};
pub use enums::{BranchFailure, ExecutionMode};
pub use store::{DataBackend, StateBackend, StoreConfig};
