//! The branching workflow run by `rill run`.
//!
//! ```text
//!              ┌─> foreach-branch ─────┐
//! start-node ──┼─> parallel-node ──────┼─> end-node
//!              └─> conditional-branch ─┘
//! ```
//!
//! Inside each foreach branch the second node gets its input straight from
//! the first one, and conditional branches get theirs from the controller,
//! without going through the data store.

use std::collections::BTreeMap;

use bytes::Bytes;
use rill_workflow::{BoxError, Dag, DefinitionError, ExecutionMode};
use serde_json::Value;

pub const CONDITIONS: [&str; 2] = ["condition1", "condition2"];

/// Used when the request arrives without a payload.
const DEFAULT_PAYLOAD: &str = "aa-bb-cc";

fn text(data: &Bytes) -> String {
  String::from_utf8_lossy(data).into_owned()
}

fn map(
  f: fn(&str) -> String,
) -> impl Fn(Bytes) -> Result<Bytes, BoxError> + Send + Sync + 'static {
  move |data| Ok(Bytes::from(f(&text(&data))))
}

/// Merge inputs into one JSON object. Inputs that are JSON themselves are
/// nested as values, everything else becomes a string.
fn to_json(inputs: BTreeMap<String, Bytes>) -> Result<Bytes, BoxError> {
  let object: serde_json::Map<String, Value> = inputs
    .into_iter()
    .map(|(key, data)| {
      let value = serde_json::from_slice(&data).unwrap_or_else(|_| Value::String(text(&data)));
      (key, value)
    })
    .collect();
  Ok(Bytes::from(serde_json::to_vec(&object)?))
}

fn or_default(payload: &str) -> String {
  match payload.trim() {
    "" => DEFAULT_PAYLOAD.to_string(),
    trimmed => trimmed.to_string(),
  }
}

fn foreach_template() -> Dag {
  let mut dag = Dag::new();
  dag.node("foreach-node1").modify(map(|s| s.to_uppercase()));
  dag
    .node("foreach-node2")
    .modify(map(|s| format!("{}{}", s.chars().rev().collect::<String>(), s.len())));
  dag.edge_with_mode("foreach-node1", "foreach-node2", ExecutionMode::Execution);
  dag
}

fn condition_template(condition: &str, f: fn(&str) -> String) -> Dag {
  let first = format!("{condition}-node1");
  let second = format!("{condition}-node2");

  let mut dag = Dag::new();
  dag.node(&first).modify(map(|s| format!("<{s}>")));
  dag.node(&second).modify(map(f));
  dag.edge(&first, &second);
  dag
}

/// Build the workflow. `conditions` are the conditional branches to take,
/// whatever the payload.
pub fn workflow(conditions: Vec<String>) -> Result<Dag, DefinitionError> {
  Dag::define(move |dag| {
    dag.node("start-node").modify(map(or_default));

    dag.foreach_branch(
      "foreach-branch",
      |data| {
        Ok(
          text(data)
            .split('-')
            .enumerate()
            .map(|(i, part)| (i.to_string(), Bytes::from(part.to_string())))
            .collect(),
        )
      },
      to_json,
      foreach_template(),
    );

    dag
      .node("parallel-node")
      .modify(map(|s| format!("mod1({s})")))
      .modify(map(|s| format!("mod2({s})")));

    dag
      .conditional_branch(
        "conditional-branch",
        move |_| Ok(conditions.clone()),
        to_json,
        [
          ("condition1", condition_template("condition1", |s| s.to_uppercase())),
          ("condition2", condition_template("condition2", |s| s.repeat(2))),
        ],
      )
      .branch_mode(ExecutionMode::Execution);

    dag.node("end-node").aggregator(to_json);

    for middle in ["foreach-branch", "parallel-node", "conditional-branch"] {
      dag.edge("start-node", middle);
      dag.edge(middle, "end-node");
    }
    Ok(())
  })
}
