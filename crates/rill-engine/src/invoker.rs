//! In-process invoker with channel-based triggering.
//!
//! Stands in for a FaaS platform: every step runs as its own tokio task, and
//! every hop a step returns becomes a new, concurrent invocation. Requests are
//! submitted through an mpsc channel.

use rill_workflow::{ExecutionProgress, RequestState};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::trigger::{StepOutcome, Trigger};

/// A step to deliver to the engine.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub request_id: String,
  pub trigger: Trigger,
}

impl Invocation {
  /// Start a new request under a generated id.
  pub fn start(payload: bytes::Bytes) -> Self {
    Self {
      request_id: uuid::Uuid::new_v4().to_string(),
      trigger: Trigger::Start { payload },
    }
  }
}

/// Drives requests to completion by invoking the engine once per trigger.
///
/// # Usage
///
/// ```ignore
/// let invoker = LocalInvoker::new(engine);
///
/// // Get sender for external triggers
/// let sender = invoker.sender();
///
/// // Start the invocation loop
/// let cancel = CancellationToken::new();
/// invoker.start(cancel).await?;
/// ```
pub struct LocalInvoker {
  sender: mpsc::Sender<Invocation>,
  receiver: mpsc::Receiver<Invocation>,
  engine: Engine,
}

impl LocalInvoker {
  pub fn new(engine: Engine) -> Self {
    Self::with_buffer_size(engine, 100)
  }

  pub fn with_buffer_size(engine: Engine, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
    }
  }

  /// Get a sender handle for submitting requests.
  pub fn sender(&self) -> mpsc::Sender<Invocation> {
    self.sender.clone()
  }

  pub fn engine(&self) -> &Engine {
    &self.engine
  }

  /// Run the invocation loop until cancelled or every sender is dropped.
  /// Each received invocation is driven to completion in the background.
  pub async fn start(self, cancel: CancellationToken) -> Result<(), EngineError> {
    let LocalInvoker {
      sender,
      mut receiver,
      engine,
    } = self;
    // only handles given out through `sender()` keep the loop alive
    drop(sender);

    info!("invoker_started");
    let mut requests = JoinSet::new();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("invoker_cancelled");
          break;
        }
        invocation = receiver.recv() => {
          let Some(invocation) = invocation else {
            info!("invoker_channel_closed");
            break;
          };
          let engine = engine.clone();
          let cancel = cancel.child_token();
          requests.spawn(async move {
            let request_id = invocation.request_id.clone();
            match drive(engine, invocation, cancel).await {
              Ok(progress) => info!(request_id, state = ?progress.state, "request_settled"),
              Err(e) => error!(request_id, error = %e, "request_driver_failed"),
            }
          });
        }
      }
    }

    while requests.join_next().await.is_some() {}
    Ok(())
  }

  /// Drive one request without the loop.
  pub async fn execute_once(
    &self,
    invocation: Invocation,
    cancel: CancellationToken,
  ) -> Result<ExecutionProgress, EngineError> {
    drive(self.engine.clone(), invocation, cancel).await
  }
}

/// Deliver `invocation` and every hop it produces, each as a concurrent step,
/// until no hop is left. Cancelling marks the request Failed.
pub async fn drive(
  engine: Engine,
  invocation: Invocation,
  cancel: CancellationToken,
) -> Result<ExecutionProgress, EngineError> {
  let request_id = invocation.request_id;
  let mut steps: JoinSet<Result<StepOutcome, EngineError>> = JoinSet::new();
  spawn_step(&mut steps, &engine, &request_id, invocation.trigger);

  loop {
    let joined = tokio::select! {
      _ = cancel.cancelled() => {
        steps.abort_all();
        let state = engine.cancel(&request_id, "invocation cancelled").await?;
        debug!(request_id, ?state, "invocation_cancelled");
        break;
      }
      joined = steps.join_next() => joined,
    };

    let Some(joined) = joined else { break };
    match joined.map_err(|e| EngineError::Join(e.to_string()))? {
      Ok(outcome) => {
        for hop in outcome.next {
          spawn_step(&mut steps, &engine, &request_id, hop);
        }
      }
      // a sibling step failed the request; remaining hops are moot
      Err(EngineError::RequestTerminated { .. }) => {}
      Err(e) => {
        steps.abort_all();
        return Err(e);
      }
    }
  }

  let progress = engine.progress(&request_id).await?;
  if progress.state == RequestState::Running {
    warn!(request_id, "request_stalled");
  }
  Ok(progress)
}

fn spawn_step(
  steps: &mut JoinSet<Result<StepOutcome, EngineError>>,
  engine: &Engine,
  request_id: &str,
  trigger: Trigger,
) {
  let engine = engine.clone();
  let request_id = request_id.to_string();
  steps.spawn(async move { engine.step(&request_id, trigger).await });
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use bytes::Bytes;
  use rill_config::{EngineConfig, HopPolicy};
  use rill_data::MemoryDataStore;
  use rill_state::MemoryStateStore;
  use rill_workflow::Dag;

  use super::*;

  fn upper_engine() -> Engine {
    let dag = Dag::define(|dag| {
      dag
        .node("upper")
        .modify(|data| Ok(Bytes::from(String::from_utf8_lossy(&data).to_uppercase())));
      dag.node("done");
      dag.edge("upper", "done");
      Ok(())
    })
    .unwrap();

    Engine::new(
      dag,
      Arc::new(MemoryStateStore::new()),
      Arc::new(MemoryDataStore::new()),
      EngineConfig {
        hop_policy: HopPolicy::PerNode,
        ..EngineConfig::default()
      },
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_execute_once_follows_hops() {
    let invoker = LocalInvoker::new(upper_engine());
    let invocation = Invocation::start(Bytes::from_static(b"abc"));
    let request_id = invocation.request_id.clone();

    let progress = invoker
      .execute_once(invocation, CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(progress.state, RequestState::Completed);
    assert_eq!(
      invoker.engine().result(&request_id).await.unwrap(),
      Some(Bytes::from_static(b"ABC"))
    );
  }

  #[tokio::test]
  async fn test_loop_drives_submitted_requests() {
    let invoker = LocalInvoker::new(upper_engine());
    let engine = invoker.engine().clone();
    let sender = invoker.sender();

    let invocation = Invocation::start(Bytes::from_static(b"xyz"));
    let request_id = invocation.request_id.clone();
    sender.send(invocation).await.unwrap();
    drop(sender);

    // the loop exits once every sender is gone and in-flight requests settle
    let cancel = CancellationToken::new();
    invoker.start(cancel).await.unwrap();

    assert_eq!(
      engine.result(&request_id).await.unwrap(),
      Some(Bytes::from_static(b"XYZ"))
    );
  }

  #[tokio::test]
  async fn test_cancellation_stops_loop() {
    let invoker = LocalInvoker::new(upper_engine());
    let _sender = invoker.sender();
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let handle = tokio::spawn(async move { invoker.start(cancel_clone).await });

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    cancel.cancel();

    let result = handle.await.unwrap();
    assert!(result.is_ok());
  }
}
