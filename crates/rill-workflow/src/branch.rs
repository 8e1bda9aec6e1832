use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::dag::Dag;
use crate::error::NodeError;
use crate::node::BoxError;

/// Splits a controller's payload into keyed branch payloads (`ForEach`).
pub type Splitter = Arc<dyn Fn(&Bytes) -> Result<BTreeMap<String, Bytes>, BoxError> + Send + Sync>;

/// Picks the active conditions for a payload (`Conditional`).
pub type Selector = Arc<dyn Fn(&Bytes) -> Result<Vec<String>, BoxError> + Send + Sync>;

/// The dynamic part of a branch controller node.
///
/// The controller owns its DAG templates. A branch instance at run time only
/// owns progress state, never a copy of the template.
pub enum Branch {
  /// One template, instantiated once per key returned by the splitter. The
  /// number of keys is only known at run time.
  ForEach { splitter: Splitter, template: Dag },
  /// One template per declared condition; the selector picks which ones run.
  Conditional {
    selector: Selector,
    templates: BTreeMap<String, Dag>,
  },
}

impl Branch {
  /// Compute the branch set for `payload`.
  ///
  /// The result is fixed for the request once recorded; an empty set is an
  /// error since no branch could ever complete.
  pub fn split(&self, node: &str, payload: &Bytes) -> Result<BTreeMap<String, Bytes>, NodeError> {
    let branches = match self {
      Branch::ForEach { splitter, .. } => splitter(payload).map_err(|source| NodeError::Split {
        node: node.to_string(),
        source,
      })?,
      Branch::Conditional {
        selector,
        templates,
      } => {
        let selected = selector(payload).map_err(|source| NodeError::Split {
          node: node.to_string(),
          source,
        })?;

        let mut branches = BTreeMap::new();
        for condition in selected {
          if !templates.contains_key(&condition) {
            return Err(NodeError::UnknownCondition {
              node: node.to_string(),
              condition,
            });
          }
          branches.insert(condition, payload.clone());
        }
        branches
      }
    };

    if branches.is_empty() {
      return Err(NodeError::NoBranches {
        node: node.to_string(),
      });
    }

    Ok(branches)
  }

  /// Template that runs for `branch_key`.
  pub fn template(&self, branch_key: &str) -> Option<&Dag> {
    match self {
      Branch::ForEach { template, .. } => Some(template),
      Branch::Conditional { templates, .. } => templates.get(branch_key),
    }
  }

  /// All templates with a label for error reporting.
  pub fn templates(&self) -> Vec<(String, &Dag)> {
    match self {
      Branch::ForEach { template, .. } => vec![("*".to_string(), template)],
      Branch::Conditional { templates, .. } => templates
        .iter()
        .map(|(condition, dag)| (condition.clone(), dag))
        .collect(),
    }
  }
}

impl fmt::Debug for Branch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Branch::ForEach { template, .. } => f
        .debug_struct("ForEach")
        .field("template", template)
        .finish_non_exhaustive(),
      Branch::Conditional { templates, .. } => f
        .debug_struct("Conditional")
        .field("templates", templates)
        .finish_non_exhaustive(),
    }
  }
}
