//! Execution events and notifiers for observability.
//!
//! Events are emitted as a request moves through the workflow so consumers
//! can observe progress, stream it to a UI, or assert on it in tests. The
//! progress record stays the source of truth; events are best effort.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during request execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// A request record was created.
  RequestStarted { request_id: String },

  /// A node instance has started executing.
  NodeStarted { request_id: String, node: String },

  /// A node instance was marked Completed.
  NodeCompleted { request_id: String, node: String },

  /// A node instance was marked Failed.
  NodeFailed {
    request_id: String,
    node: String,
    error: String,
  },

  /// A branch controller instantiated its branches.
  BranchesSplit {
    request_id: String,
    controller: String,
    branches: Vec<String>,
  },

  /// A branch controller's aggregator ran over its completed branches.
  AggregationCompleted {
    request_id: String,
    controller: String,
    branches: usize,
  },

  /// The terminal node completed.
  RequestCompleted { request_id: String },

  /// The request failed or was cancelled.
  RequestFailed { request_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them (persist, broadcast, log, ignore, etc.). Steps of the same
/// request may run concurrently, so events of different nodes can interleave.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls a step.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with the receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
