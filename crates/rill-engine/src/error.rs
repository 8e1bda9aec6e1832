use rill_data::DataError;
use rill_state::StateError;
use rill_workflow::DefinitionError;

/// Errors returned by engine operations.
///
/// Modifier, splitter and aggregator failures are not errors at this level:
/// they are recorded in the progress record and the step succeeds.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("invalid workflow: {0}")]
  Definition(#[from] DefinitionError),

  #[error("unknown request: {0}")]
  UnknownRequest(String),

  #[error("request {request_id} is terminated: {reason}")]
  RequestTerminated { request_id: String, reason: String },

  #[error("state store error: {0}")]
  State(#[from] StateError),

  #[error("data store error: {0}")]
  Data(#[from] DataError),

  #[error("gave up updating request {request_id} after {attempts} conflicting attempts")]
  Conflict { request_id: String, attempts: u32 },

  #[error("progress record encoding error: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("no input payload available for node {node}")]
  MissingPayload { node: String },

  #[error("node {node} is not part of the workflow")]
  UnknownNode { node: String },

  #[error("task join error: {0}")]
  Join(String),
}

impl EngineError {
  /// Errors after which the request cannot make progress on its own.
  pub fn fails_request(&self) -> bool {
    matches!(
      self,
      EngineError::State(_)
        | EngineError::Data(_)
        | EngineError::Conflict { .. }
        | EngineError::Codec(_)
        | EngineError::MissingPayload { .. }
        | EngineError::Join(_)
    )
  }
}
