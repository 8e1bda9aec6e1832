//! Addressing of node instances across nested branches.
//!
//! A node defined inside a branch template runs once per branch key, so its
//! name alone is not unique within a request. A [`NodeKey`] combines the
//! [`Scope`] (the chain of controller/branch frames enclosing the instance)
//! with the node name. Its string form is used as the key in progress records
//! and data stores:
//!
//! ```text
//! end-node
//! foreach-branch[0]/node1
//! outer[a]/inner[b%2Fc]/node
//! ```
//!
//! Branch keys are user data, so the delimiters are percent-escaped.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Characters that delimit scopes and data keys.
const BRANCH_KEY: &AsciiSet = &CONTROLS.add(b'%').add(b'/').add(b'[').add(b']').add(b'#');

/// One level of branch nesting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Frame {
  /// Name of the branch controller node (in the enclosing scope).
  pub controller: String,
  /// Branch key produced by the controller's splitter.
  pub branch: String,
}

/// The chain of branch frames enclosing a node instance. Empty for the root
/// DAG.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(Vec<Frame>);

impl Scope {
  pub fn root() -> Self {
    Self::default()
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  pub fn frames(&self) -> &[Frame] {
    &self.0
  }

  /// The scope of branch `branch` of controller `controller`, nested in this
  /// scope.
  pub fn child(&self, controller: &str, branch: &str) -> Scope {
    let mut frames = self.0.clone();
    frames.push(Frame {
      controller: controller.to_string(),
      branch: branch.to_string(),
    });
    Scope(frames)
  }

  /// Split off the innermost frame. `None` for the root scope.
  pub fn split_last(&self) -> Option<(Scope, &Frame)> {
    let (last, rest) = self.0.split_last()?;
    Some((Scope(rest.to_vec()), last))
  }

  /// Key of the node `name` inside this scope.
  pub fn node(&self, name: &str) -> NodeKey {
    NodeKey {
      scope: self.clone(),
      name: name.to_string(),
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, frame) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("/")?;
      }
      write!(
        f,
        "{}[{}]",
        frame.controller,
        utf8_percent_encode(&frame.branch, BRANCH_KEY)
      )?;
    }
    Ok(())
  }
}

/// Address of a node instance within a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
  pub scope: Scope,
  pub name: String,
}

impl NodeKey {
  /// Key of a node in the root DAG.
  pub fn root(name: &str) -> Self {
    Scope::root().node(name)
  }

  /// Key of a sibling node in the same scope.
  pub fn sibling(&self, name: &str) -> NodeKey {
    self.scope.node(name)
  }
}

impl fmt::Display for NodeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.scope.is_root() {
      f.write_str(&self.name)
    } else {
      write!(f, "{}/{}", self.scope, self.name)
    }
  }
}
