use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How far a single step is allowed to walk the graph before handing control
/// back to the invoker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopPolicy {
  /// Keep executing ready nodes inside the current invocation until nothing
  /// is left to do.
  #[default]
  Inline,
  /// Execute the nodes made ready by the trigger, then return their
  /// completions as hops for the invoker to deliver separately.
  PerNode,
}

/// Retry budget for optimistic-concurrency conflicts and transient store
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  /// Delay before the second attempt; doubles on each further attempt.
  pub initial_backoff_ms: u64,
  /// Upper bound for a single delay.
  pub max_backoff_ms: u64,
}

impl RetryConfig {
  /// Delay to wait after `attempt` (1-based) failed.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let millis = self
      .initial_backoff_ms
      .saturating_mul(1u64 << exponent)
      .min(self.max_backoff_ms);
    Duration::from_millis(millis)
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 16,
      initial_backoff_ms: 2,
      max_backoff_ms: 200,
    }
  }
}

/// Configuration for the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub hop_policy: HopPolicy,
  pub retry: RetryConfig,
  /// Delete a request's intermediate data once it completes successfully.
  pub cleanup_on_complete: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let retry = RetryConfig {
      max_attempts: 5,
      initial_backoff_ms: 10,
      max_backoff_ms: 50,
    };

    assert_eq!(retry.backoff(1), Duration::from_millis(10));
    assert_eq!(retry.backoff(2), Duration::from_millis(20));
    assert_eq!(retry.backoff(3), Duration::from_millis(40));
    assert_eq!(retry.backoff(4), Duration::from_millis(50));
    assert_eq!(retry.backoff(40), Duration::from_millis(50));
  }

  #[test]
  fn test_engine_config_from_partial_json() {
    let config: EngineConfig =
      serde_json::from_str(r#"{ "hop_policy": "per_node", "retry": { "max_attempts": 3 } }"#)
        .unwrap();

    assert_eq!(config.hop_policy, HopPolicy::PerNode);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.max_backoff_ms, RetryConfig::default().max_backoff_ms);
    assert!(!config.cleanup_on_complete);
  }
}
