use rill_config::ExecutionMode;
use serde::{Deserialize, Serialize};

/// A directed link between two nodes of the same DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
  #[serde(default)]
  pub mode: ExecutionMode,
}

impl Edge {
  pub fn new(from: impl Into<String>, to: impl Into<String>, mode: ExecutionMode) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      mode,
    }
  }
}
