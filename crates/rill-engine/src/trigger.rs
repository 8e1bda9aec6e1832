use bytes::Bytes;
use rill_workflow::{NodeKey, RequestState};
use serde::{Deserialize, Serialize};

/// What an invocation of [`Engine::step`](crate::Engine::step) reacts to.
///
/// Triggers are plain data so an invoker can queue them, ship them to another
/// process, or deliver them twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
  /// Begin (or resume) a request with its input payload.
  Start { payload: Bytes },
  /// A node instance finished. `output` is `None` when the payload was
  /// already written to the DataStore.
  Completed {
    node: NodeKey,
    output: Option<Bytes>,
  },
}

impl Trigger {
  pub fn kind(&self) -> &'static str {
    match self {
      Trigger::Start { .. } => "start",
      Trigger::Completed { .. } => "completed",
    }
  }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
  pub request_id: String,
  /// Request state after the step.
  pub status: RequestState,
  /// Hops to deliver as further invocations (per-node hop policy only).
  pub next: Vec<Trigger>,
  /// Final payload, when the request completed during this step.
  pub output: Option<Bytes>,
}

impl StepOutcome {
  pub(crate) fn idle(request_id: &str, status: RequestState) -> Self {
    Self {
      request_id: request_id.to_string(),
      status,
      next: Vec::new(),
      output: None,
    }
  }
}
