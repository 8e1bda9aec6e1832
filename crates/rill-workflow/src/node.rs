use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rill_config::{BranchFailure, ExecutionMode};

use crate::branch::Branch;
use crate::error::NodeError;

/// Error type returned by user-supplied workflow functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single payload transformation within a node.
pub type Modifier = Arc<dyn Fn(Bytes) -> Result<Bytes, BoxError> + Send + Sync>;

/// Merges a keyed set of payloads (branch outputs or predecessor outputs)
/// into one. Keys are visited in lexicographic order.
pub type Aggregator = Arc<dyn Fn(BTreeMap<String, Bytes>) -> Result<Bytes, BoxError> + Send + Sync>;

/// A named executable unit of a workflow.
///
/// A node runs its modifiers in declaration order. A node with several
/// incoming edges first combines its predecessors' outputs with its
/// aggregator. A node carrying a [`Branch`] is a branch controller: after its
/// modifiers run, the payload is split into branches, and the aggregator
/// merges the branch results into the controller's output.
pub struct Node {
  name: String,
  modifiers: Vec<Modifier>,
  aggregator: Option<Aggregator>,
  pub(crate) branch: Option<Branch>,
  failure: BranchFailure,
  branch_mode: ExecutionMode,
}

impl Node {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      modifiers: Vec::new(),
      aggregator: None,
      branch: None,
      failure: BranchFailure::default(),
      branch_mode: ExecutionMode::default(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Append a modifier to the chain.
  pub fn modify<F>(&mut self, modifier: F) -> &mut Self
  where
    F: Fn(Bytes) -> Result<Bytes, BoxError> + Send + Sync + 'static,
  {
    self.modifiers.push(Arc::new(modifier));
    self
  }

  /// Set the aggregator used for joins and branch results.
  pub fn aggregator<F>(&mut self, aggregator: F) -> &mut Self
  where
    F: Fn(BTreeMap<String, Bytes>) -> Result<Bytes, BoxError> + Send + Sync + 'static,
  {
    self.aggregator = Some(Arc::new(aggregator));
    self
  }

  /// Partial-failure policy, consulted only for branch controllers.
  pub fn on_branch_failure(&mut self, policy: BranchFailure) -> &mut Self {
    self.failure = policy;
    self
  }

  /// Whether branch inputs must be stored before the branches run.
  pub fn branch_mode(&mut self, mode: ExecutionMode) -> &mut Self {
    self.branch_mode = mode;
    self
  }

  pub fn branch(&self) -> Option<&Branch> {
    self.branch.as_ref()
  }

  pub fn is_controller(&self) -> bool {
    self.branch.is_some()
  }

  pub fn has_aggregator(&self) -> bool {
    self.aggregator.is_some()
  }

  pub fn failure_policy(&self) -> BranchFailure {
    self.failure
  }

  pub fn execution_mode(&self) -> ExecutionMode {
    self.branch_mode
  }

  /// Run the modifier chain.
  ///
  /// The first failing modifier aborts the chain; later modifiers never see
  /// the payload. Zero modifiers is the identity.
  pub fn execute(&self, payload: Bytes) -> Result<Bytes, NodeError> {
    self
      .modifiers
      .iter()
      .enumerate()
      .try_fold(payload, |data, (index, modifier)| {
        modifier(data).map_err(|source| NodeError::Modifier {
          node: self.name.clone(),
          index,
          source,
        })
      })
  }

  /// Combine keyed inputs with the node's aggregator.
  pub fn aggregate(&self, inputs: BTreeMap<String, Bytes>) -> Result<Bytes, NodeError> {
    let aggregator = self
      .aggregator
      .as_ref()
      .ok_or_else(|| NodeError::MissingAggregator {
        node: self.name.clone(),
      })?;

    aggregator(inputs).map_err(|source| NodeError::Aggregation {
      node: self.name.clone(),
      source,
    })
  }

  pub(crate) fn set_aggregator(&mut self, aggregator: Aggregator) {
    self.aggregator = Some(aggregator);
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("name", &self.name)
      .field("modifiers", &self.modifiers.len())
      .field("aggregator", &self.aggregator.is_some())
      .field("branch", &self.branch)
      .field("failure", &self.failure)
      .field("branch_mode", &self.branch_mode)
      .finish()
  }
}
