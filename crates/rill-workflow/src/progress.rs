use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::NodeKey;

/// Status of a node instance within a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  #[default]
  Pending,
  Running,
  Completed,
  Failed,
}

impl NodeStatus {
  /// Completed or Failed.
  pub fn is_settled(self) -> bool {
    matches!(self, NodeStatus::Completed | NodeStatus::Failed)
  }
}

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
  #[default]
  NotStarted,
  Running,
  Completed,
  Failed,
}

impl RequestState {
  pub fn is_terminal(self) -> bool {
    matches!(self, RequestState::Completed | RequestState::Failed)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProgress {
  pub status: NodeStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Whether a controller's aggregator has run.
///
/// `Claimed` is taken in the same update that observes the last branch
/// settling, so only one step ever runs the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationState {
  #[default]
  Waiting,
  Claimed,
  Done,
}

/// Branch bookkeeping for one controller instance.
///
/// The branch set is fixed when the controller splits; it is never extended
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerProgress {
  pub branches: BTreeMap<String, NodeStatus>,
  pub aggregation: AggregationState,
}

impl ControllerProgress {
  pub fn new<'a>(keys: impl IntoIterator<Item = &'a String>) -> Self {
    Self {
      branches: keys
        .into_iter()
        .map(|key| (key.clone(), NodeStatus::Running))
        .collect(),
      aggregation: AggregationState::Waiting,
    }
  }

  /// Every instantiated branch is Completed or Failed.
  pub fn is_settled(&self) -> bool {
    self.branches.values().all(|status| status.is_settled())
  }

  pub fn completed_keys(&self) -> Vec<&str> {
    self.keys_with(NodeStatus::Completed)
  }

  pub fn failed_keys(&self) -> Vec<&str> {
    self.keys_with(NodeStatus::Failed)
  }

  fn keys_with(&self, wanted: NodeStatus) -> Vec<&str> {
    self
      .branches
      .iter()
      .filter(|(_, status)| **status == wanted)
      .map(|(key, _)| key.as_str())
      .collect()
  }
}

/// Per-request progress record.
///
/// Node and controller entries are keyed by the rendered [`NodeKey`]. A node
/// without an entry is Pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
  pub request_id: String,
  pub state: RequestState,
  #[serde(default)]
  pub nodes: BTreeMap<String, NodeProgress>,
  #[serde(default)]
  pub controllers: BTreeMap<String, ControllerProgress>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl ExecutionProgress {
  pub fn new(request_id: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      request_id: request_id.into(),
      state: RequestState::NotStarted,
      nodes: BTreeMap::new(),
      controllers: BTreeMap::new(),
      last_error: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn status(&self, key: &NodeKey) -> NodeStatus {
    self
      .nodes
      .get(&key.to_string())
      .map(|node| node.status)
      .unwrap_or_default()
  }

  pub fn node(&self, key: &NodeKey) -> Option<&NodeProgress> {
    self.nodes.get(&key.to_string())
  }

  pub fn set_status(&mut self, key: &NodeKey, status: NodeStatus) {
    self.nodes.entry(key.to_string()).or_default().status = status;
  }

  pub fn fail_node(&mut self, key: &NodeKey, error: impl Into<String>) {
    let node = self.nodes.entry(key.to_string()).or_default();
    node.status = NodeStatus::Failed;
    node.error = Some(error.into());
  }

  pub fn controller(&self, key: &NodeKey) -> Option<&ControllerProgress> {
    self.controllers.get(&key.to_string())
  }

  pub fn controller_mut(&mut self, key: &NodeKey) -> Option<&mut ControllerProgress> {
    self.controllers.get_mut(&key.to_string())
  }

  pub fn insert_controller(&mut self, key: &NodeKey, controller: ControllerProgress) {
    self.controllers.insert(key.to_string(), controller);
  }

  /// Mark the whole request Failed.
  pub fn fail(&mut self, error: impl Into<String>) {
    self.state = RequestState::Failed;
    self.last_error = Some(error.into());
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn touch(&mut self) {
    self.updated_at = Utc::now();
  }

  pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::Scope;

  #[test]
  fn test_missing_node_is_pending() {
    let progress = ExecutionProgress::new("req-1");
    assert_eq!(progress.status(&NodeKey::root("start")), NodeStatus::Pending);
    assert_eq!(progress.state, RequestState::NotStarted);
  }

  #[test]
  fn test_fail_node_records_error() {
    let mut progress = ExecutionProgress::new("req-1");
    let key = Scope::root().child("foreach-branch", "1").node("foreach-node1");
    progress.fail_node(&key, "boom");

    let node = progress.node(&key).unwrap();
    assert_eq!(node.status, NodeStatus::Failed);
    assert_eq!(node.error.as_deref(), Some("boom"));
    assert!(progress.nodes.contains_key("foreach-branch[1]/foreach-node1"));
  }

  #[test]
  fn test_controller_settles_when_all_branches_do() {
    let keys = ["0".to_string(), "1".to_string(), "2".to_string()];
    let mut controller = ControllerProgress::new(&keys);
    assert!(!controller.is_settled());

    controller.branches.insert("0".into(), NodeStatus::Completed);
    controller.branches.insert("1".into(), NodeStatus::Failed);
    assert!(!controller.is_settled());

    controller.branches.insert("2".into(), NodeStatus::Completed);
    assert!(controller.is_settled());
    assert_eq!(controller.completed_keys(), ["0", "2"]);
    assert_eq!(controller.failed_keys(), ["1"]);
  }

  #[test]
  fn test_record_survives_json() {
    let mut progress = ExecutionProgress::new("req-1");
    progress.state = RequestState::Running;
    progress.set_status(&NodeKey::root("start-node"), NodeStatus::Completed);
    progress.insert_controller(
      &NodeKey::root("foreach-branch"),
      ControllerProgress::new(&["0".to_string()]),
    );

    let decoded = ExecutionProgress::decode(&progress.encode().unwrap()).unwrap();
    assert_eq!(decoded, progress);

    let json: serde_json::Value = serde_json::from_slice(&progress.encode().unwrap()).unwrap();
    assert_eq!(json["state"], "running");
    assert_eq!(json["nodes"]["start-node"]["status"], "completed");
    assert_eq!(json["controllers"]["foreach-branch"]["aggregation"], "waiting");
  }
}
