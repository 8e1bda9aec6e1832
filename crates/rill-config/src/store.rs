use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Backend holding execution progress records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateBackend {
  /// Process-local map. Progress is lost when the process exits.
  #[default]
  Memory,
  /// SQLite database, e.g. `sqlite://rill.db?mode=rwc`.
  Sqlite { url: String },
}

/// Backend holding intermediate payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataBackend {
  #[default]
  Memory,
  /// One directory per request below `path`.
  Fs { path: PathBuf },
}

/// Store selection for a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub state: StateBackend,
  pub data: DataBackend,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_store_config_tagged_backends() {
    let config: StoreConfig = serde_json::from_value(serde_json::json!({
      "state": { "type": "sqlite", "url": "sqlite::memory:" },
      "data": { "type": "fs", "path": "/tmp/rill" }
    }))
    .unwrap();

    assert_eq!(
      config.state,
      StateBackend::Sqlite {
        url: "sqlite::memory:".to_string()
      }
    );
    assert_eq!(
      config.data,
      DataBackend::Fs {
        path: PathBuf::from("/tmp/rill")
      }
    );
  }

  #[test]
  fn test_store_config_defaults_to_memory() {
    let config: StoreConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, StoreConfig::default());
  }
}
