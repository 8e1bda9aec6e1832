//! Rill Workflow
//!
//! This crate provides the workflow model for Rill: a directed acyclic graph
//! of named nodes, each running a chain of modifiers, connected by edges that
//! carry an execution mode. Branch controller nodes own nested DAG templates
//! that are instantiated at run time, once per branch key.
//!
//! A [`Dag`] is built once (usually through [`Dag::define`]), validated, and
//! then shared read-only by every request. Per-request state lives in an
//! [`ExecutionProgress`] record, which the engine keeps in a StateStore.
//!
//! Key properties:
//! - Graph structure is validated (acyclic, single start, single terminal,
//!   no orphans, joins have aggregators)
//! - Node instances are addressed by [`NodeKey`], which includes the branch
//!   frames enclosing them
//! - [`Dag::ready_nodes`] is the scheduling predicate used by the engine

mod branch;
mod dag;
mod edge;
mod error;
mod graph;
mod key;
mod node;
mod progress;

pub use branch::{Branch, Selector, Splitter};
pub use dag::Dag;
pub use edge::Edge;
pub use error::{DefinitionError, NodeError};
pub use graph::Graph;
pub use key::{Frame, NodeKey, Scope};
pub use node::{Aggregator, BoxError, Modifier, Node};
pub use progress::{
  AggregationState, ControllerProgress, ExecutionProgress, NodeProgress, NodeStatus, RequestState,
};

pub use rill_config::{BranchFailure, ExecutionMode};
