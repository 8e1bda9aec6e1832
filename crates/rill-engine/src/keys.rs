//! Store keys derived from node keys.
//!
//! ```text
//! progress/<request-id>          progress record (StateStore)
//! foreach-branch[0]/node1        output of a node feeding a Data edge or a join
//! foreach-branch[0]#input        input of a branch (stored when the branch mode is Data)
//! foreach-branch[0]#result       aggregation buffer entry of a branch
//! foreach-branch#aggregate       aggregated output of a controller, kept for replay
//! #result                        final output of the request
//! ```
//!
//! Node names cannot contain `#`, so the suffixed forms never collide with
//! node outputs.

use rill_workflow::{NodeKey, Scope};

pub const REQUEST_RESULT: &str = "#result";

pub fn progress_key(request_id: &str) -> String {
  format!("progress/{request_id}")
}

pub fn output_key(node: &NodeKey) -> String {
  node.to_string()
}

pub fn branch_input_key(scope: &Scope) -> String {
  format!("{scope}#input")
}

pub fn branch_result_key(scope: &Scope) -> String {
  format!("{scope}#result")
}

pub fn aggregate_key(controller: &NodeKey) -> String {
  format!("{controller}#aggregate")
}
