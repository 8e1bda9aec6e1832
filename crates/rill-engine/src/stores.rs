use std::sync::Arc;

use rill_config::{DataBackend, StateBackend, StoreConfig};
use rill_data::{DataStore, FsDataStore, MemoryDataStore};
use rill_state::{MemoryStateStore, SqliteStateStore, StateStore};
use tracing::info;

use crate::error::EngineError;

/// The store pair an engine runs against.
#[derive(Clone)]
pub struct Stores {
  pub state: Arc<dyn StateStore>,
  pub data: Arc<dyn DataStore>,
}

impl Stores {
  /// Open the backends selected by `config`. Called once at startup.
  pub async fn open(config: &StoreConfig) -> Result<Self, EngineError> {
    let state: Arc<dyn StateStore> = match &config.state {
      StateBackend::Memory => Arc::new(MemoryStateStore::new()),
      StateBackend::Sqlite { url } => Arc::new(SqliteStateStore::connect(url).await?),
    };

    let data: Arc<dyn DataStore> = match &config.data {
      DataBackend::Memory => Arc::new(MemoryDataStore::new()),
      DataBackend::Fs { path } => Arc::new(FsDataStore::new(path)),
    };

    info!(state = ?config.state, data = ?config.data, "stores_opened");
    Ok(Self { state, data })
  }

  pub fn memory() -> Self {
    Self {
      state: Arc::new(MemoryStateStore::new()),
      data: Arc::new(MemoryDataStore::new()),
    }
  }
}
