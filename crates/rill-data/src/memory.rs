use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{DataError, DataStore};

type Entries = HashMap<String, HashMap<String, Bytes>>;

/// In-process data store, one map per request.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
  requests: Mutex<Entries>,
}

impl MemoryDataStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keys currently stored for a request, sorted.
  pub fn keys(&self, request_id: &str) -> Vec<String> {
    let mut keys: Vec<String> = self
      .lock()
      .map(|requests| {
        requests
          .get(request_id)
          .map(|entries| entries.keys().cloned().collect())
          .unwrap_or_default()
      })
      .unwrap_or_default();
    keys.sort();
    keys
  }

  fn lock(&self) -> Result<MutexGuard<'_, Entries>, DataError> {
    self
      .requests
      .lock()
      .map_err(|_| DataError::Unavailable("memory store lock poisoned".to_string()))
  }
}

#[async_trait]
impl DataStore for MemoryDataStore {
  async fn put(&self, request_id: &str, key: &str, payload: Bytes) -> Result<(), DataError> {
    self
      .lock()?
      .entry(request_id.to_string())
      .or_default()
      .insert(key.to_string(), payload);
    Ok(())
  }

  async fn get(&self, request_id: &str, key: &str) -> Result<Bytes, DataError> {
    self
      .lock()?
      .get(request_id)
      .and_then(|entries| entries.get(key))
      .cloned()
      .ok_or_else(|| DataError::NotFound(format!("{request_id}/{key}")))
  }

  async fn clear(&self, request_id: &str) -> Result<(), DataError> {
    self.lock()?.remove(request_id);
    Ok(())
  }
}
