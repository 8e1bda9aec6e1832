use serde::{Deserialize, Serialize};

/// Durability requirement of an edge (or of a branch controller's inputs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
  /// The payload is written to the DataStore before the successor becomes
  /// ready and read back when it runs.
  #[default]
  Data,
  /// The payload travels inline with the invocation; no persistence.
  Execution,
}

impl ExecutionMode {
  pub fn is_durable(self) -> bool {
    matches!(self, ExecutionMode::Data)
  }
}

/// What a branch controller does when one of its branches fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchFailure {
  /// Wait for every branch, then aggregate over the ones that completed.
  #[default]
  Aggregate,
  /// Fail the controller as soon as any branch fails.
  FailFast,
}
