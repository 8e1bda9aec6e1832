use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{DataError, DataStore};

/// Filesystem-based data store.
///
/// Each request gets a directory under the base path; each entry is a file in
/// it named after the percent-encoded key:
///
/// ```text
/// {base_path}/{request_id}/foreach-branch%5B0%5D%2Fforeach-node2
/// ```
///
/// Writes go to a temporary file that is renamed into place, so readers never
/// see a partially written payload.
pub struct FsDataStore {
  base_path: PathBuf,
  sequence: AtomicU64,
}

impl FsDataStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
      sequence: AtomicU64::new(0),
    }
  }

  fn request_dir(&self, request_id: &str) -> PathBuf {
    self.base_path.join(encode(request_id))
  }

  fn key_to_path(&self, request_id: &str, key: &str) -> PathBuf {
    self.request_dir(request_id).join(encode(key))
  }
}

/// Everything outside `[A-Za-z0-9._-]`, including `/`, so a key never escapes
/// its request directory.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

fn encode(component: &str) -> String {
  let encoded = utf8_percent_encode(component, FILE_NAME).to_string();
  // a leading dot would make "." and ".." valid names
  match encoded.strip_prefix('.') {
    Some(rest) => format!("%2E{rest}"),
    None => encoded,
  }
}

fn not_found(err: std::io::Error, what: String) -> DataError {
  if err.kind() == ErrorKind::NotFound {
    DataError::NotFound(what)
  } else {
    DataError::Io(err)
  }
}

#[async_trait]
impl DataStore for FsDataStore {
  async fn put(&self, request_id: &str, key: &str, payload: Bytes) -> Result<(), DataError> {
    let path = self.key_to_path(request_id, key);
    let dir = self.request_dir(request_id);
    fs::create_dir_all(&dir).await?;

    let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
    let partial = dir.join(format!(
      "~{}.{}.{sequence}",
      encode(key),
      std::process::id()
    ));

    let mut file = File::create(&partial).await?;
    file.write_all(&payload).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&partial, &path).await?;
    Ok(())
  }

  async fn get(&self, request_id: &str, key: &str) -> Result<Bytes, DataError> {
    let path = self.key_to_path(request_id, key);
    let file = File::open(&path)
      .await
      .map_err(|e| not_found(e, format!("{request_id}/{key}")))?;

    let buffer = ReaderStream::new(file)
      .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
        buffer.extend_from_slice(&chunk);
        Ok(buffer)
      })
      .await?;
    Ok(buffer.freeze())
  }

  async fn clear(&self, request_id: &str) -> Result<(), DataError> {
    match fs::remove_dir_all(self.request_dir(request_id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(DataError::Io(e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_keeps_keys_inside_request_dir() {
    assert_eq!(encode("end-node"), "end-node");
    assert_eq!(
      encode("foreach-branch[0]/foreach-node2"),
      "foreach-branch%5B0%5D%2Fforeach-node2"
    );
    assert_eq!(encode("#result"), "%23result");
    assert_eq!(encode(".."), "%2E.");
    assert_eq!(encode(".env.v1"), "%2Eenv.v1");
    assert_eq!(encode("clé~"), "cl%C3%A9%7E");
    assert_ne!(encode("a/b"), encode("a%2Fb"));
  }

  #[tokio::test]
  async fn test_put_get_clear() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsDataStore::new(dir.path());

    store
      .put("req-1", "foreach-branch[0]#result", Bytes::from_static(b"aa"))
      .await
      .unwrap();
    assert_eq!(
      store.get("req-1", "foreach-branch[0]#result").await.unwrap(),
      Bytes::from_static(b"aa")
    );

    store
      .put("req-1", "foreach-branch[0]#result", Bytes::from_static(b"bb"))
      .await
      .unwrap();
    assert_eq!(
      store.get("req-1", "foreach-branch[0]#result").await.unwrap(),
      Bytes::from_static(b"bb")
    );

    store.clear("req-1").await.unwrap();
    store.clear("req-1").await.unwrap();
    assert!(matches!(
      store.get("req-1", "foreach-branch[0]#result").await,
      Err(DataError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_empty_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsDataStore::new(dir.path());

    store.put("r", "k", Bytes::new()).await.unwrap();
    assert!(store.get("r", "k").await.unwrap().is_empty());
  }
}
