//! Rill Engine
//!
//! This crate executes [`rill_workflow::Dag`] workflows one step at a time.
//! A step is meant to fit one stateless function invocation: it reads the
//! request's progress record, does the work the trigger unlocks, and writes
//! everything the next invocation needs back to the stores.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LocalInvoker                         │
//! │  - owns mpsc channel of invocations                         │
//! │  - runs each step as a task, feeds hops back concurrently   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ step(request_id, trigger)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Engine                            │
//! │  - claims ready nodes, runs modifier chains                 │
//! │  - splits branches, claims and runs aggregation once        │
//! │  - CAS transactions on the progress record                  │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//!   StateStore (progress/<id>)      DataStore (node outputs, branch
//!                                   inputs, aggregation buffers)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = Engine::new(dag, stores.state, stores.data, EngineConfig::default())?;
//!
//! let outcome = engine.step("req-1", Trigger::Start { payload }).await?;
//! assert_eq!(outcome.status, RequestState::Completed);
//! ```

mod engine;
mod error;
mod events;
mod invoker;
mod keys;
mod stores;
mod trigger;

pub use engine::Engine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use invoker::{Invocation, LocalInvoker, drive};
pub use keys::{
  REQUEST_RESULT, aggregate_key, branch_input_key, branch_result_key, output_key, progress_key,
};
pub use stores::Stores;
pub use trigger::{StepOutcome, Trigger};
