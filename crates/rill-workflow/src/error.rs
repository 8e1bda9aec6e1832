use thiserror::Error;

use crate::node::BoxError;

/// Errors found while building or validating a workflow definition.
///
/// These are fatal at startup: a workflow that fails validation never runs.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("cycle detected in {dag} involving: {}", nodes.join(", "))]
  CyclicGraph { dag: String, nodes: Vec<String> },

  #[error("node '{node}' in {dag} has no incoming edge and is not the start node")]
  DisconnectedNode { dag: String, node: String },

  #[error("duplicate node '{node}' in {dag}")]
  DuplicateNode { dag: String, node: String },

  #[error("duplicate edge {from} -> {to} in {dag}")]
  DuplicateEdge {
    dag: String,
    from: String,
    to: String,
  },

  #[error("edge in {dag} references unknown node '{node}'")]
  UnknownNode { dag: String, node: String },

  #[error(
    "invalid node name '{node}' in {dag}: names must be non-empty and must not contain \
     '/', '[', ']' or '#'"
  )]
  InvalidNodeName { dag: String, node: String },

  #[error("{dag} has no nodes")]
  EmptyDag { dag: String },

  #[error("{dag} has more than one terminal node: {}", nodes.join(", "))]
  MultipleTerminals { dag: String, nodes: Vec<String> },

  #[error("node '{node}' in {dag} joins several edges but has no aggregator")]
  MissingAggregator { dag: String, node: String },

  #[error("branch controller '{node}' in {dag} has several incoming edges; join them first")]
  JoinedController { dag: String, node: String },

  #[error("conditional branch '{node}' in {dag} declares no conditions")]
  NoConditions { dag: String, node: String },

  #[error("{0}")]
  Custom(String),
}

/// Errors raised while executing a single node.
#[derive(Debug, Error)]
pub enum NodeError {
  #[error("modifier #{index} of node '{node}' failed: {source}")]
  Modifier {
    node: String,
    index: usize,
    #[source]
    source: BoxError,
  },

  #[error("aggregator of node '{node}' failed: {source}")]
  Aggregation {
    node: String,
    #[source]
    source: BoxError,
  },

  #[error("node '{node}' has no aggregator")]
  MissingAggregator { node: String },

  #[error("splitter of node '{node}' failed: {source}")]
  Split {
    node: String,
    #[source]
    source: BoxError,
  },

  #[error("node '{node}' selected undeclared condition '{condition}'")]
  UnknownCondition { node: String, condition: String },

  #[error("node '{node}' produced no branches")]
  NoBranches { node: String },
}
