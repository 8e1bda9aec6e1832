//! Rill State
//!
//! This crate provides the consistent key/value store that holds per-request
//! progress records. Every write is a compare-and-set against the revision the
//! writer last read, which is what lets concurrent steps of the same request
//! update one record without losing each other's changes.
//!
//! The [`StateStore`] trait defines:
//! - `get` returning the value together with its revision
//! - `set` with an expected revision (`None` meaning "must not exist yet")
//! - `delete`
//!
//! Implementations: [`MemoryStateStore`] for tests and single-process runs,
//! [`SqliteStateStore`] for durable storage.

mod memory;
mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

use async_trait::async_trait;

/// A stored value and the revision it was written at.
///
/// Revisions start at 1 and increase by one on every successful `set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
  pub value: Vec<u8>,
  pub revision: u64,
}

/// Error type for state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  /// No value is stored under the key.
  #[error("not found: {0}")]
  NotFound(String),

  /// The stored revision does not match the expected one.
  #[error("revision conflict on {key}: expected {expected:?}, found {actual:?}")]
  Conflict {
    key: String,
    expected: Option<u64>,
    actual: Option<u64>,
  },

  /// The store could not be reached; the operation may be retried.
  #[error("state store unavailable: {0}")]
  Unavailable(String),

  /// A stored entry could not be interpreted.
  #[error("corrupt state entry: {0}")]
  Codec(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

impl StateError {
  /// Conflicts and transient outages are worth retrying.
  pub fn is_retryable(&self) -> bool {
    match self {
      StateError::Conflict { .. } | StateError::Unavailable(_) => true,
      StateError::Database(err) => matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
      ),
      StateError::NotFound(_) | StateError::Codec(_) => false,
    }
  }
}

/// Consistent key/value store with optimistic concurrency.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Read the value stored under `key`.
  async fn get(&self, key: &str) -> Result<Versioned, StateError>;

  /// Write `value` if the stored revision equals `expected` (`None`: the key
  /// must not exist). Returns the new revision.
  async fn set(&self, key: &str, value: Vec<u8>, expected: Option<u64>) -> Result<u64, StateError>;

  /// Remove `key`. Removing a missing key is not an error.
  async fn delete(&self, key: &str) -> Result<(), StateError>;
}
