//! Step-based execution engine.
//!
//! A step reacts to one [`Trigger`]: it records the triggering transition,
//! claims and runs the nodes that became ready, and either keeps going until
//! nothing is left (`HopPolicy::Inline`) or hands further completions back as
//! hops (`HopPolicy::PerNode`). Everything a later step needs lives in the
//! StateStore (progress record) and DataStore (payloads), so any engine
//! instance over the same stores can take the next step.
//!
//! Progress record updates are optimistic compare-and-set transactions.
//! Payloads are always written before the transaction that publishes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{join_all, try_join_all};
use rill_config::{EngineConfig, HopPolicy};
use rill_data::{DataError, DataStore};
use rill_state::{StateError, StateStore};
use rill_workflow::{
  AggregationState, BranchFailure, ControllerProgress, Dag, ExecutionProgress, Graph, Node,
  NodeError, NodeKey, NodeStatus, RequestState, Scope,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::keys;
use crate::trigger::{StepOutcome, Trigger};

/// Unit of work inside a step.
#[derive(Debug)]
enum Work {
  /// Execute a claimed node. `None` input is loaded from the DataStore.
  Run {
    node: NodeKey,
    input: Option<Bytes>,
  },
  /// Persist the output if needed and record the completion.
  Complete {
    node: NodeKey,
    output: Option<Bytes>,
  },
  /// Persist the output if needed and return the completion as a hop.
  Yield { node: NodeKey, output: Bytes },
  /// Record a node failure and cascade it.
  Fail { node: NodeKey, error: String },
  /// Run a claimed aggregation over the listed branches.
  Aggregate {
    controller: NodeKey,
    branches: Vec<String>,
  },
}

#[derive(Default)]
struct Effect {
  work: Vec<Work>,
  hops: Vec<Trigger>,
  output: Option<Bytes>,
}

impl Effect {
  fn work(work: Vec<Work>) -> Self {
    Self {
      work,
      ..Self::default()
    }
  }
}

/// Result of applying a completion to the progress record.
#[derive(Default)]
struct Applied {
  work: Vec<Work>,
  /// The node transitioned to Completed (false for a re-delivery).
  completed: bool,
  /// The request transitioned to Completed.
  finished: bool,
}

/// The workflow execution engine.
///
/// Cheap to clone; clones share the DAG, stores, config and notifier.
#[derive(Clone)]
pub struct Engine {
  dag: Arc<Dag>,
  state: Arc<dyn StateStore>,
  data: Arc<dyn DataStore>,
  config: Arc<EngineConfig>,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Engine {
  /// Create an engine for a workflow. The DAG is validated here; an invalid
  /// definition never executes.
  pub fn new(
    dag: impl Into<Arc<Dag>>,
    state: Arc<dyn StateStore>,
    data: Arc<dyn DataStore>,
    config: EngineConfig,
  ) -> Result<Self, EngineError> {
    let dag = dag.into();
    dag.validate()?;

    Ok(Self {
      dag,
      state,
      data,
      config: Arc::new(config),
      notifier: Arc::new(NoopNotifier),
    })
  }

  /// Replace the notifier.
  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Start a new request under a generated id.
  pub async fn start(&self, payload: Bytes) -> Result<StepOutcome, EngineError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    self.step(&request_id, Trigger::Start { payload }).await
  }

  /// Execute one step of a request.
  ///
  /// Re-delivering a trigger is safe: completions already recorded are not
  /// counted again, and successors that never finished are re-issued.
  #[instrument(skip_all, fields(request_id = %request_id, trigger = trigger.kind()))]
  pub async fn step(&self, request_id: &str, trigger: Trigger) -> Result<StepOutcome, EngineError> {
    debug!("step_started");

    match self.try_step(request_id, trigger).await {
      Ok(outcome) => Ok(outcome),
      Err(err) => {
        if err.fails_request() {
          self.abandon(request_id, &err).await;
        }
        error!(error = %err, "step_failed");
        Err(err)
      }
    }
  }

  /// Read the progress record of a request.
  pub async fn progress(&self, request_id: &str) -> Result<ExecutionProgress, EngineError> {
    match self.state.get(&keys::progress_key(request_id)).await {
      Ok(stored) => Ok(ExecutionProgress::decode(&stored.value)?),
      Err(StateError::NotFound(_)) => Err(EngineError::UnknownRequest(request_id.to_string())),
      Err(err) => Err(err.into()),
    }
  }

  /// Final output of a completed request; `None` while it is still running.
  /// The output outlives `cleanup_on_complete` and is only removed by
  /// [`Engine::purge`].
  pub async fn result(&self, request_id: &str) -> Result<Option<Bytes>, EngineError> {
    let progress = self.progress(request_id).await?;
    match progress.state {
      RequestState::Completed => Ok(Some(
        self.data.get(request_id, keys::REQUEST_RESULT).await?,
      )),
      RequestState::Failed => Err(terminated(&progress)),
      _ => Ok(None),
    }
  }

  /// Mark a request Failed. Later steps are rejected. Cancelling a request
  /// that already finished leaves it untouched.
  pub async fn cancel(&self, request_id: &str, reason: &str) -> Result<RequestState, EngineError> {
    let (state, cancelled) = self
      .transact(request_id, false, |progress| {
        if progress.is_terminal() {
          return (progress.state, false);
        }
        progress.fail(format!("cancelled: {reason}"));
        (progress.state, true)
      })
      .await?;

    if cancelled {
      warn!(request_id, reason, "request_cancelled");
      self.notifier.notify(ExecutionEvent::RequestFailed {
        request_id: request_id.to_string(),
        error: format!("cancelled: {reason}"),
      });
    }
    Ok(state)
  }

  /// Delete everything stored for a request.
  pub async fn purge(&self, request_id: &str) -> Result<(), EngineError> {
    self.data.clear(request_id).await?;
    self.state.delete(&keys::progress_key(request_id)).await?;
    debug!(request_id, "request_purged");
    Ok(())
  }

  async fn try_step(&self, request_id: &str, trigger: Trigger) -> Result<StepOutcome, EngineError> {
    let initial = match trigger {
      Trigger::Start { payload } => self.start_request(request_id, payload).await?,
      Trigger::Completed { node, output } => {
        let progress = self.progress(request_id).await?;
        match progress.state {
          RequestState::Failed => return Err(terminated(&progress)),
          RequestState::Completed => {
            debug!(node = %node, "step_ignored");
            return Ok(StepOutcome::idle(request_id, RequestState::Completed));
          }
          _ => vec![Work::Complete { node, output }],
        }
      }
    };

    let effect = self.drive(request_id, initial).await?;
    let status = self.progress(request_id).await?.state;

    Ok(StepOutcome {
      request_id: request_id.to_string(),
      status,
      next: effect.hops,
      output: effect.output,
    })
  }

  /// Process work in waves; items of one wave run as concurrent tasks.
  async fn drive(&self, request_id: &str, initial: Vec<Work>) -> Result<Effect, EngineError> {
    let mut pending = initial;
    let mut result = Effect::default();

    while !pending.is_empty() {
      let handles: Vec<_> = pending
        .drain(..)
        .map(|work| tokio::spawn(self.clone().process(request_id.to_string(), work)))
        .collect();

      for joined in join_all(handles).await {
        let effect = joined.map_err(|e| EngineError::Join(e.to_string()))??;
        pending.extend(effect.work);
        result.hops.extend(effect.hops);
        if effect.output.is_some() {
          result.output = effect.output;
        }
      }
    }

    Ok(result)
  }

  async fn process(self, request_id: String, work: Work) -> Result<Effect, EngineError> {
    match work {
      Work::Run { node, input } => Ok(Effect::work(self.run(&request_id, node, input).await?)),
      Work::Complete { node, output } => self.complete(&request_id, node, output).await,
      Work::Yield { node, output } => self.yield_hop(&request_id, node, output).await,
      Work::Fail { node, error } => self.fail(&request_id, node, error).await,
      Work::Aggregate {
        controller,
        branches,
      } => Ok(Effect::work(
        self.aggregate(&request_id, controller, branches).await?,
      )),
    }
  }

  async fn start_request(
    &self,
    request_id: &str,
    payload: Bytes,
  ) -> Result<Vec<Work>, EngineError> {
    let start = self
      .dag
      .start_node()
      .map(|node| NodeKey::root(node.name()))
      .ok_or_else(|| EngineError::UnknownNode {
        node: "<start>".to_string(),
      })?;

    let (created, claimed, state) = self
      .transact(request_id, true, |progress| {
        let created = progress.state == RequestState::NotStarted;
        if progress.is_terminal() {
          return (created, false, progress.state);
        }
        progress.state = RequestState::Running;
        let claimed = match progress.status(&start) {
          NodeStatus::Pending => {
            progress.set_status(&start, NodeStatus::Running);
            true
          }
          NodeStatus::Running => true,
          _ => false,
        };
        (created, claimed, progress.state)
      })
      .await?;

    if state == RequestState::Failed {
      return Err(terminated(&self.progress(request_id).await?));
    }

    if created {
      info!("request_started");
      self.notifier.notify(ExecutionEvent::RequestStarted {
        request_id: request_id.to_string(),
      });
    }

    Ok(if claimed {
      vec![Work::Run {
        node: start,
        input: Some(payload),
      }]
    } else {
      Vec::new()
    })
  }

  async fn run(
    &self,
    request_id: &str,
    key: NodeKey,
    input: Option<Bytes>,
  ) -> Result<Vec<Work>, EngineError> {
    let dag = self.scope_dag(&key)?;
    let node = dag.get_node(&key.name).ok_or_else(|| unknown(&key))?;

    debug!(request_id, node = %key, "node_started");
    self.notifier.notify(ExecutionEvent::NodeStarted {
      request_id: request_id.to_string(),
      node: key.to_string(),
    });

    let input = match input {
      Some(input) => input,
      None => match self.load_input(request_id, dag, &key, node).await? {
        Ok(input) => input,
        Err(err) => return Ok(vec![failed(key, err)]),
      },
    };

    let output = match node.execute(input) {
      Ok(output) => output,
      Err(err) => return Ok(vec![failed(key, err)]),
    };

    if node.is_controller() {
      return self.split(request_id, key, node, output).await;
    }
    Ok(vec![self.finish(key, output)])
  }

  /// Input of a node that was not handed one inline: the branch input for a
  /// branch start, the predecessor's output, or the aggregated outputs of
  /// every predecessor for a join.
  async fn load_input(
    &self,
    request_id: &str,
    dag: &Dag,
    key: &NodeKey,
    node: &Node,
  ) -> Result<Result<Bytes, NodeError>, EngineError> {
    let graph = dag.graph();
    match graph.upstream(&key.name) {
      [] if key.scope.is_root() => Err(EngineError::MissingPayload {
        node: key.to_string(),
      }),
      [] => {
        let payload = self
          .fetch(request_id, &keys::branch_input_key(&key.scope), key)
          .await?;
        Ok(Ok(payload))
      }
      [single] => {
        let payload = self
          .fetch(request_id, &keys::output_key(&key.sibling(single)), key)
          .await?;
        Ok(Ok(payload))
      }
      upstream => {
        let mut inputs = BTreeMap::new();
        for name in upstream {
          let payload = self
            .fetch(request_id, &keys::output_key(&key.sibling(name)), key)
            .await?;
          inputs.insert(name.clone(), payload);
        }
        Ok(node.aggregate(inputs))
      }
    }
  }

  async fn fetch(
    &self,
    request_id: &str,
    data_key: &str,
    node: &NodeKey,
  ) -> Result<Bytes, EngineError> {
    match self.data.get(request_id, data_key).await {
      Ok(payload) => Ok(payload),
      Err(DataError::NotFound(_)) => Err(EngineError::MissingPayload {
        node: node.to_string(),
      }),
      Err(err) => Err(err.into()),
    }
  }

  /// Split a controller's payload and claim the start node of every branch.
  ///
  /// The branch set is recorded once; a re-delivered run reuses it and only
  /// re-issues branch starts that never finished.
  async fn split(
    &self,
    request_id: &str,
    key: NodeKey,
    node: &Node,
    payload: Bytes,
  ) -> Result<Vec<Work>, EngineError> {
    let Some(branch) = node.branch() else {
      return Ok(vec![self.finish(key, payload)]);
    };

    let branches = match branch.split(node.name(), &payload) {
      Ok(branches) => branches,
      Err(err) => return Ok(vec![failed(key, err)]),
    };

    let durable = node.execution_mode().is_durable();
    if durable {
      try_join_all(branches.iter().map(|(branch_key, input)| {
        let data_key = keys::branch_input_key(&key.scope.child(&key.name, branch_key));
        let input = input.clone();
        async move { self.data.put(request_id, &data_key, input).await }
      }))
      .await?;
    }

    let starts = self
      .transact(request_id, false, |progress| {
        if progress.is_terminal() || progress.status(&key) != NodeStatus::Running {
          return Vec::new();
        }
        if progress.controller(&key).is_none() {
          progress.insert_controller(&key, ControllerProgress::new(branches.keys()));
        }

        let active: Vec<String> = progress
          .controller(&key)
          .map(|controller| {
            controller
              .branches
              .iter()
              .filter(|(_, status)| **status == NodeStatus::Running)
              .map(|(branch_key, _)| branch_key.clone())
              .collect()
          })
          .unwrap_or_default();

        let mut starts = Vec::new();
        for branch_key in active {
          let Some(start) = branch.template(&branch_key).and_then(Dag::start_node) else {
            continue;
          };
          let start_key = key.scope.child(&key.name, &branch_key).node(start.name());
          match progress.status(&start_key) {
            NodeStatus::Pending => {
              progress.set_status(&start_key, NodeStatus::Running);
              starts.push((branch_key, start_key));
            }
            NodeStatus::Running => starts.push((branch_key, start_key)),
            _ => {}
          }
        }
        starts
      })
      .await?;

    info!(request_id, node = %key, branches = branches.len(), "branches_split");
    self.notifier.notify(ExecutionEvent::BranchesSplit {
      request_id: request_id.to_string(),
      controller: key.to_string(),
      branches: branches.keys().cloned().collect(),
    });

    Ok(
      starts
        .into_iter()
        .map(|(branch_key, start)| Work::Run {
          node: start,
          input: if durable {
            None
          } else {
            branches.get(&branch_key).cloned()
          },
        })
        .collect(),
    )
  }

  /// Run a claimed aggregation. The output is stored before it is published,
  /// so a step that resumes the aggregation replays it instead of running the
  /// aggregator again.
  async fn aggregate(
    &self,
    request_id: &str,
    controller: NodeKey,
    branches: Vec<String>,
  ) -> Result<Vec<Work>, EngineError> {
    let node = self
      .dag
      .node_at(&controller)
      .ok_or_else(|| unknown(&controller))?;

    let stored = keys::aggregate_key(&controller);
    match self.data.get(request_id, &stored).await {
      Ok(output) => {
        debug!(request_id, node = %controller, "aggregation_replayed");
        return Ok(vec![self.finish(controller, output)]);
      }
      Err(DataError::NotFound(_)) => {}
      Err(err) => return Err(err.into()),
    }

    let mut inputs = BTreeMap::new();
    for branch in branches {
      let scope = controller.scope.child(&controller.name, &branch);
      let payload = self
        .fetch(request_id, &keys::branch_result_key(&scope), &controller)
        .await?;
      inputs.insert(branch, payload);
    }

    let count = inputs.len();
    match node.aggregate(inputs) {
      Ok(output) => {
        self.data.put(request_id, &stored, output.clone()).await?;
        info!(request_id, node = %controller, branches = count, "aggregation_completed");
        self.notifier.notify(ExecutionEvent::AggregationCompleted {
          request_id: request_id.to_string(),
          controller: controller.to_string(),
          branches: count,
        });
        Ok(vec![self.finish(controller, output)])
      }
      Err(err) => Ok(vec![failed(controller, err)]),
    }
  }

  /// What happens to a node output produced inside this step.
  fn finish(&self, node: NodeKey, output: Bytes) -> Work {
    match self.config.hop_policy {
      HopPolicy::Inline => Work::Complete {
        node,
        output: Some(output),
      },
      HopPolicy::PerNode => Work::Yield { node, output },
    }
  }

  async fn yield_hop(
    &self,
    request_id: &str,
    key: NodeKey,
    output: Bytes,
  ) -> Result<Effect, EngineError> {
    let dag = self.scope_dag(&key)?;
    let persisted = self.persist(request_id, dag, &key, &output).await?;
    debug!(request_id, node = %key, persisted, "hop_yielded");

    Ok(Effect {
      hops: vec![Trigger::Completed {
        node: key,
        output: (!persisted).then_some(output),
      }],
      ..Effect::default()
    })
  }

  async fn complete(
    &self,
    request_id: &str,
    key: NodeKey,
    output: Option<Bytes>,
  ) -> Result<Effect, EngineError> {
    let dag = self.scope_dag(&key)?;
    let graph = dag.graph();

    if let Some(payload) = &output {
      self.persist(request_id, dag, &key, payload).await?;
    }

    let applied = self
      .transact(request_id, false, |progress| {
        self.apply_completion(progress, dag, &graph, &key)
      })
      .await?;

    if applied.completed {
      info!(request_id, node = %key, "node_completed");
      self.notifier.notify(ExecutionEvent::NodeCompleted {
        request_id: request_id.to_string(),
        node: key.to_string(),
      });
    } else {
      debug!(request_id, node = %key, "completion_redelivered");
    }

    let mut effect = Effect::default();
    for work in applied.work {
      effect.work.push(match work {
        Work::Run { node, input: None } => {
          let input = handoff(dag, &graph, &key, &node, output.as_ref());
          Work::Run { node, input }
        }
        other => other,
      });
    }

    if applied.finished {
      let result = match output {
        Some(output) => output,
        None => self.data.get(request_id, keys::REQUEST_RESULT).await?,
      };
      info!(request_id, "request_completed");
      self.notifier.notify(ExecutionEvent::RequestCompleted {
        request_id: request_id.to_string(),
      });
      if self.config.cleanup_on_complete {
        self.data.clear(request_id).await?;
        self
          .data
          .put(request_id, keys::REQUEST_RESULT, result.clone())
          .await?;
      }
      effect.output = Some(result);
    }

    Ok(effect)
  }

  async fn fail(
    &self,
    request_id: &str,
    key: NodeKey,
    error: String,
  ) -> Result<Effect, EngineError> {
    warn!(request_id, node = %key, error = %error, "node_failed");

    let (work, request_failed, reason) = self
      .transact(request_id, false, |progress| {
        let was_failed = progress.state == RequestState::Failed;
        let work = self.apply_failure(progress, &key, error.clone());
        let request_failed = !was_failed && progress.state == RequestState::Failed;
        (work, request_failed, progress.last_error.clone())
      })
      .await?;

    self.notifier.notify(ExecutionEvent::NodeFailed {
      request_id: request_id.to_string(),
      node: key.to_string(),
      error,
    });

    if request_failed {
      let reason = reason.unwrap_or_default();
      error!(request_id, error = %reason, "request_failed");
      self.notifier.notify(ExecutionEvent::RequestFailed {
        request_id: request_id.to_string(),
        error: reason,
      });
    }

    Ok(Effect::work(work))
  }

  /// Write a node output where its consumers will look for it. Returns
  /// whether anything was written.
  async fn persist(
    &self,
    request_id: &str,
    dag: &Dag,
    key: &NodeKey,
    output: &Bytes,
  ) -> Result<bool, EngineError> {
    match durable_key(dag, &dag.graph(), key) {
      Some(data_key) => {
        self.data.put(request_id, &data_key, output.clone()).await?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn apply_completion(
    &self,
    progress: &mut ExecutionProgress,
    dag: &Dag,
    graph: &Graph,
    key: &NodeKey,
  ) -> Applied {
    let mut applied = Applied::default();
    if progress.is_terminal() {
      return applied;
    }
    if !scope_active(progress, &key.scope) {
      applied.work = self.resume_aggregation(progress, graph, key);
      return applied;
    }

    let duplicate = match progress.status(key) {
      NodeStatus::Completed => true,
      NodeStatus::Failed => return applied,
      _ => false,
    };

    if !duplicate {
      progress.set_status(key, NodeStatus::Completed);
      if let Some(controller) = progress.controller_mut(key) {
        controller.aggregation = AggregationState::Done;
      }
      applied.completed = true;
    }

    if graph.is_terminal(&key.name) {
      if duplicate {
        return applied;
      }
      match key.scope.split_last() {
        None => {
          progress.state = RequestState::Completed;
          applied.finished = true;
        }
        Some((parent, frame)) => {
          let controller = parent.node(&frame.controller);
          applied.work =
            self.settle_branch(progress, &controller, &frame.branch, NodeStatus::Completed);
        }
      }
      return applied;
    }

    let ready = dag.ready_nodes(progress, &key.scope);
    for next in graph.downstream(&key.name) {
      let next_key = key.sibling(next);
      if ready.contains(next) {
        progress.set_status(&next_key, NodeStatus::Running);
        applied.work.push(Work::Run {
          node: next_key,
          input: None,
        });
      } else if duplicate && progress.status(&next_key) == NodeStatus::Running {
        applied.work.push(Work::Run {
          node: next_key,
          input: None,
        });
      }
    }
    applied
  }

  /// Mark a node Failed and cascade: the request for a root node, the
  /// enclosing branch otherwise.
  fn apply_failure(
    &self,
    progress: &mut ExecutionProgress,
    key: &NodeKey,
    error: String,
  ) -> Vec<Work> {
    if progress.is_terminal() || progress.status(key).is_settled() {
      return Vec::new();
    }

    progress.fail_node(key, error.clone());
    match key.scope.split_last() {
      None => {
        progress.fail(format!("node '{key}' failed: {error}"));
        Vec::new()
      }
      Some((parent, frame)) => {
        let controller = parent.node(&frame.controller);
        self.settle_branch(progress, &controller, &frame.branch, NodeStatus::Failed)
      }
    }
  }

  /// Record the outcome of one branch and decide what the controller does
  /// next. Exactly one caller observes the transition that claims the
  /// aggregation.
  fn settle_branch(
    &self,
    progress: &mut ExecutionProgress,
    controller: &NodeKey,
    branch: &str,
    outcome: NodeStatus,
  ) -> Vec<Work> {
    let running = progress.status(controller) == NodeStatus::Running;
    let policy = self
      .dag
      .node_at(controller)
      .map(Node::failure_policy)
      .unwrap_or_default();

    let Some(state) = progress.controller_mut(controller) else {
      return Vec::new();
    };
    match state.branches.get(branch) {
      Some(status) if !status.is_settled() => {}
      _ => return Vec::new(),
    }
    state.branches.insert(branch.to_string(), outcome);

    if !running || state.aggregation != AggregationState::Waiting {
      return Vec::new();
    }

    if outcome == NodeStatus::Failed && policy == BranchFailure::FailFast {
      state.aggregation = AggregationState::Done;
      return self.apply_failure(progress, controller, format!("branch '{branch}' failed"));
    }

    if !state.is_settled() {
      return Vec::new();
    }

    let completed: Vec<String> = state
      .completed_keys()
      .into_iter()
      .map(str::to_string)
      .collect();
    if completed.is_empty() {
      state.aggregation = AggregationState::Done;
      return self.apply_failure(progress, controller, "every branch failed".to_string());
    }

    state.aggregation = AggregationState::Claimed;
    vec![Work::Aggregate {
      controller: controller.clone(),
      branches: completed,
    }]
  }

  /// A re-delivered completion of the terminal node whose branch claimed the
  /// aggregation. If the controller is still waiting for it, the claim was
  /// lost with the step that held it and the aggregation is issued again.
  fn resume_aggregation(
    &self,
    progress: &ExecutionProgress,
    graph: &Graph,
    key: &NodeKey,
  ) -> Vec<Work> {
    if !graph.is_terminal(&key.name) || progress.status(key) != NodeStatus::Completed {
      return Vec::new();
    }
    let Some((parent, frame)) = key.scope.split_last() else {
      return Vec::new();
    };
    let controller = parent.node(&frame.controller);
    if !scope_active(progress, &parent) || progress.status(&controller) != NodeStatus::Running {
      return Vec::new();
    }

    match progress.controller(&controller) {
      Some(state) if state.aggregation == AggregationState::Claimed => {
        vec![Work::Aggregate {
          branches: state
            .completed_keys()
            .into_iter()
            .map(str::to_string)
            .collect(),
          controller,
        }]
      }
      _ => Vec::new(),
    }
  }

  /// Read, apply, compare-and-set; retried with backoff on conflict.
  ///
  /// `apply` may run several times and must only depend on the record it is
  /// given. A record left unchanged is not written back.
  async fn transact<T, F>(
    &self,
    request_id: &str,
    seed: bool,
    mut apply: F,
  ) -> Result<T, EngineError>
  where
    F: FnMut(&mut ExecutionProgress) -> T,
  {
    let key = keys::progress_key(request_id);
    let retry = &self.config.retry;
    let mut attempt = 0;

    loop {
      attempt += 1;

      let (mut progress, revision) = match self.state.get(&key).await {
        Ok(stored) => (ExecutionProgress::decode(&stored.value)?, Some(stored.revision)),
        Err(StateError::NotFound(_)) if seed => (ExecutionProgress::new(request_id), None),
        Err(StateError::NotFound(_)) => {
          return Err(EngineError::UnknownRequest(request_id.to_string()));
        }
        Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
          debug!(request_id, attempt, error = %err, "state_read_retry");
          tokio::time::sleep(retry.backoff(attempt)).await;
          continue;
        }
        Err(err) => return Err(err.into()),
      };

      let before = progress.clone();
      let value = apply(&mut progress);
      if revision.is_some() && progress == before {
        return Ok(value);
      }

      progress.touch();
      match self.state.set(&key, progress.encode()?, revision).await {
        Ok(_) => return Ok(value),
        Err(err) if err.is_retryable() => {
          if attempt >= retry.max_attempts {
            return Err(match err {
              StateError::Conflict { .. } => EngineError::Conflict {
                request_id: request_id.to_string(),
                attempts: attempt,
              },
              other => other.into(),
            });
          }
          debug!(request_id, attempt, error = %err, "state_write_retry");
          tokio::time::sleep(retry.backoff(attempt)).await;
        }
        Err(err) => return Err(err.into()),
      }
    }
  }

  /// Best-effort: mark the request Failed after an error the engine cannot
  /// recover from.
  async fn abandon(&self, request_id: &str, err: &EngineError) {
    let reason = err.to_string();
    let result = self
      .transact(request_id, false, |progress| {
        if !progress.is_terminal() {
          progress.fail(reason.clone());
        }
      })
      .await;

    match result {
      Ok(()) => self.notifier.notify(ExecutionEvent::RequestFailed {
        request_id: request_id.to_string(),
        error: reason,
      }),
      Err(e) => warn!(request_id, error = %e, "request_fail_mark_failed"),
    }
  }

  /// The DAG instantiated by the node's scope, checking the node exists.
  fn scope_dag(&self, key: &NodeKey) -> Result<&Dag, EngineError> {
    self
      .dag
      .resolve(&key.scope)
      .filter(|dag| dag.get_node(&key.name).is_some())
      .ok_or_else(|| unknown(key))
  }
}

/// DataStore key under which a node's output must be stored, if any.
///
/// Terminal outputs are always stored (branch aggregation buffer or request
/// result). Otherwise the output is stored when a successor reads it back: a
/// `Data` edge, or any edge into a join.
fn durable_key(dag: &Dag, graph: &Graph, key: &NodeKey) -> Option<String> {
  if graph.is_terminal(&key.name) {
    return Some(if key.scope.is_root() {
      keys::REQUEST_RESULT.to_string()
    } else {
      keys::branch_result_key(&key.scope)
    });
  }

  let read_back = graph.downstream(&key.name).iter().any(|next| {
    graph.is_join_point(next)
      || dag
        .edge_between(&key.name, next)
        .is_none_or(|edge| edge.mode.is_durable())
  });
  read_back.then(|| keys::output_key(key))
}

/// Inline input for a successor across an `Execution` edge.
fn handoff(
  dag: &Dag,
  graph: &Graph,
  from: &NodeKey,
  to: &NodeKey,
  output: Option<&Bytes>,
) -> Option<Bytes> {
  if from.scope != to.scope || graph.is_join_point(&to.name) {
    return None;
  }
  let edge = dag.edge_between(&from.name, &to.name)?;
  if edge.mode.is_durable() {
    None
  } else {
    output.cloned()
  }
}

/// Every enclosing controller and branch is still running.
fn scope_active(progress: &ExecutionProgress, scope: &Scope) -> bool {
  let mut current = Scope::root();
  for frame in scope.frames() {
    let controller = current.node(&frame.controller);
    if progress.status(&controller) != NodeStatus::Running {
      return false;
    }
    let branch_running = progress
      .controller(&controller)
      .and_then(|state| state.branches.get(&frame.branch))
      .is_some_and(|status| *status == NodeStatus::Running);
    if !branch_running {
      return false;
    }
    current = current.child(&frame.controller, &frame.branch);
  }
  true
}

fn failed(node: NodeKey, err: NodeError) -> Work {
  Work::Fail {
    node,
    error: err.to_string(),
  }
}

fn unknown(key: &NodeKey) -> EngineError {
  EngineError::UnknownNode {
    node: key.to_string(),
  }
}

fn terminated(progress: &ExecutionProgress) -> EngineError {
  EngineError::RequestTerminated {
    request_id: progress.request_id.clone(),
    reason: progress
      .last_error
      .clone()
      .unwrap_or_else(|| "request failed".to_string()),
  }
}
