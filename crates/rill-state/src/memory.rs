use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{StateError, StateStore, Versioned};

/// In-process state store.
///
/// All operations take one lock, so every `set` is trivially atomic. State is
/// lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  entries: Mutex<HashMap<String, Versioned>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Versioned>>, StateError> {
    self
      .entries
      .lock()
      .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn get(&self, key: &str) -> Result<Versioned, StateError> {
    self
      .lock()?
      .get(key)
      .cloned()
      .ok_or_else(|| StateError::NotFound(key.to_string()))
  }

  async fn set(&self, key: &str, value: Vec<u8>, expected: Option<u64>) -> Result<u64, StateError> {
    let mut entries = self.lock()?;
    let actual = entries.get(key).map(|entry| entry.revision);
    if actual != expected {
      return Err(StateError::Conflict {
        key: key.to_string(),
        expected,
        actual,
      });
    }

    let revision = actual.unwrap_or(0) + 1;
    entries.insert(key.to_string(), Versioned { value, revision });
    Ok(revision)
  }

  async fn delete(&self, key: &str) -> Result<(), StateError> {
    self.lock()?.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_then_update() {
    let store = MemoryStateStore::new();

    let first = store.set("progress/a", b"one".to_vec(), None).await.unwrap();
    assert_eq!(first, 1);

    let second = store.set("progress/a", b"two".to_vec(), Some(1)).await.unwrap();
    assert_eq!(second, 2);

    let stored = store.get("progress/a").await.unwrap();
    assert_eq!(stored.value, b"two");
    assert_eq!(stored.revision, 2);
  }

  #[tokio::test]
  async fn test_stale_revision_conflicts() {
    let store = MemoryStateStore::new();
    store.set("k", b"v1".to_vec(), None).await.unwrap();
    store.set("k", b"v2".to_vec(), Some(1)).await.unwrap();

    let err = store.set("k", b"v3".to_vec(), Some(1)).await.unwrap_err();
    assert!(matches!(
      err,
      StateError::Conflict {
        expected: Some(1),
        actual: Some(2),
        ..
      }
    ));
    assert!(err.is_retryable());
    assert_eq!(store.get("k").await.unwrap().value, b"v2");
  }

  #[tokio::test]
  async fn test_create_only_and_missing_key() {
    let store = MemoryStateStore::new();
    store.set("k", b"v".to_vec(), None).await.unwrap();

    assert!(matches!(
      store.set("k", b"again".to_vec(), None).await,
      Err(StateError::Conflict { .. })
    ));
    assert!(matches!(
      store.set("other", b"v".to_vec(), Some(1)).await,
      Err(StateError::Conflict { actual: None, .. })
    ));
    assert!(matches!(
      store.get("other").await,
      Err(StateError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_delete() {
    let store = MemoryStateStore::new();
    store.set("k", b"v".to_vec(), None).await.unwrap();
    store.delete("k").await.unwrap();
    store.delete("k").await.unwrap();

    assert!(matches!(store.get("k").await, Err(StateError::NotFound(_))));
    assert_eq!(store.set("k", b"v".to_vec(), None).await.unwrap(), 1);
  }
}
