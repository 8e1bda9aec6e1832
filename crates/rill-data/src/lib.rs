//! Rill Data
//!
//! This crate provides the blob store for intermediate payloads: node outputs
//! that cross a `Data` edge, branch inputs, and per-branch aggregation
//! results. Entries are grouped by request so a finished request can be
//! cleared in one call.
//!
//! Keys are opaque to the store. The engine derives them from node keys
//! (`foreach-branch[0]/foreach-node2`, `foreach-branch[0]#result`, ...).

mod fs;
mod memory;

pub use fs::FsDataStore;
pub use memory::MemoryDataStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Error type for data store operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
  /// Nothing is stored under the key.
  #[error("data not found: {0}")]
  NotFound(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The store could not be reached.
  #[error("data store unavailable: {0}")]
  Unavailable(String),
}

/// Payload storage trait.
///
/// A `put` must be durable when it returns: the engine publishes the key to
/// other steps right after. Writing the same key twice with the same payload
/// is harmless, which is what makes re-delivered steps safe.
#[async_trait]
pub trait DataStore: Send + Sync {
  async fn put(&self, request_id: &str, key: &str, payload: Bytes) -> Result<(), DataError>;

  async fn get(&self, request_id: &str, key: &str) -> Result<Bytes, DataError>;

  /// Drop every entry of a request.
  async fn clear(&self, request_id: &str) -> Result<(), DataError>;
}
