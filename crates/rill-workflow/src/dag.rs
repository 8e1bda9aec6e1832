use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rill_config::ExecutionMode;

use crate::branch::Branch;
use crate::edge::Edge;
use crate::error::DefinitionError;
use crate::graph::Graph;
use crate::key::{NodeKey, Scope};
use crate::node::{BoxError, Node};
use crate::progress::{ExecutionProgress, NodeStatus};

const ROOT_LABEL: &str = "workflow";
const RESERVED: [char; 4] = ['/', '[', ']', '#'];

/// A workflow graph: nodes, edges, and (through branch controller nodes)
/// nested templates.
///
/// Construction methods never fail; problems such as duplicate names are
/// recorded and reported by [`Dag::validate`]. Once validated, a DAG is
/// treated as immutable and shared by all requests.
#[derive(Default)]
pub struct Dag {
  nodes: Vec<Node>,
  index: HashMap<String, usize>,
  edges: Vec<Edge>,
  deferred: Vec<DefinitionError>,
}

impl Dag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build and validate a workflow in one go.
  ///
  /// This is the definition surface: it runs once at process start, never
  /// per request.
  ///
  /// ```ignore
  /// let dag = Dag::define(|dag| {
  ///   dag.node("start").modify(|data| Ok(data));
  ///   dag.node("end").modify(|data| Ok(data));
  ///   dag.edge("start", "end");
  ///   Ok(())
  /// })?;
  /// ```
  pub fn define<F>(define: F) -> Result<Self, DefinitionError>
  where
    F: FnOnce(&mut Dag) -> Result<(), DefinitionError>,
  {
    let mut dag = Dag::new();
    define(&mut dag)?;
    dag.validate()?;
    Ok(dag)
  }

  /// Get the node called `name`, creating it if needed.
  pub fn node(&mut self, name: &str) -> &mut Node {
    let position = match self.index.get(name) {
      Some(position) => *position,
      None => self.push(Node::new(name)),
    };
    &mut self.nodes[position]
  }

  /// Add a fully built node. Fails if the name is taken.
  pub fn add_node(&mut self, node: Node) -> Result<&mut Node, DefinitionError> {
    if self.index.contains_key(node.name()) {
      return Err(DefinitionError::DuplicateNode {
        dag: ROOT_LABEL.to_string(),
        node: node.name().to_string(),
      });
    }
    let position = self.push(node);
    Ok(&mut self.nodes[position])
  }

  /// Add a `Data`-mode edge.
  pub fn edge(&mut self, from: &str, to: &str) -> &mut Self {
    self.edge_with_mode(from, to, ExecutionMode::Data)
  }

  /// Add an edge with an explicit execution mode.
  pub fn edge_with_mode(&mut self, from: &str, to: &str, mode: ExecutionMode) -> &mut Self {
    if self.edge_between(from, to).is_some() {
      self.deferred.push(DefinitionError::DuplicateEdge {
        dag: ROOT_LABEL.to_string(),
        from: from.to_string(),
        to: to.to_string(),
      });
    } else {
      self.edges.push(Edge::new(from, to, mode));
    }
    self
  }

  /// Add a `ForEach` branch controller.
  ///
  /// `splitter` maps the controller's payload to keyed branch payloads; each
  /// key runs its own instance of `template`; `aggregator` merges the branch
  /// results into the controller's output.
  pub fn foreach_branch<S, A>(
    &mut self,
    name: &str,
    splitter: S,
    aggregator: A,
    template: Dag,
  ) -> &mut Node
  where
    S: Fn(&Bytes) -> Result<BTreeMap<String, Bytes>, BoxError> + Send + Sync + 'static,
    A: Fn(BTreeMap<String, Bytes>) -> Result<Bytes, BoxError> + Send + Sync + 'static,
  {
    let node = self.controller(name);
    node.set_aggregator(Arc::new(aggregator));
    node.branch = Some(Branch::ForEach {
      splitter: Arc::new(splitter),
      template,
    });
    node
  }

  /// Add a `Conditional` branch controller.
  ///
  /// `templates` declares the condition universe, one template per
  /// condition. `selector` picks the active subset for each request.
  pub fn conditional_branch<S, A, I, K>(
    &mut self,
    name: &str,
    selector: S,
    aggregator: A,
    templates: I,
  ) -> &mut Node
  where
    S: Fn(&Bytes) -> Result<Vec<String>, BoxError> + Send + Sync + 'static,
    A: Fn(BTreeMap<String, Bytes>) -> Result<Bytes, BoxError> + Send + Sync + 'static,
    I: IntoIterator<Item = (K, Dag)>,
    K: Into<String>,
  {
    let templates = templates
      .into_iter()
      .map(|(condition, dag)| (condition.into(), dag))
      .collect();

    let node = self.controller(name);
    node.set_aggregator(Arc::new(aggregator));
    node.branch = Some(Branch::Conditional {
      selector: Arc::new(selector),
      templates,
    });
    node
  }

  pub fn get_node(&self, name: &str) -> Option<&Node> {
    self.index.get(name).map(|position| &self.nodes[*position])
  }

  /// Nodes in insertion order.
  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.iter()
  }

  pub fn edge_between(&self, from: &str, to: &str) -> Option<&Edge> {
    self.edges.iter().find(|e| e.from == from && e.to == to)
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(self.nodes.iter().map(Node::name), &self.edges)
  }

  /// The node with no incoming edges (first in insertion order if the
  /// definition is invalid).
  pub fn start_node(&self) -> Option<&Node> {
    let graph = self.graph();
    let name = graph.entry_points().first()?;
    self.get_node(name)
  }

  /// The node with no outgoing edges.
  pub fn terminal_node(&self) -> Option<&Node> {
    let graph = self.graph();
    let name = graph.terminal_points().first()?;
    self.get_node(name)
  }

  /// The DAG that a scope executes: the root for the root scope, otherwise
  /// the template selected by each frame in turn.
  pub fn resolve(&self, scope: &Scope) -> Option<&Dag> {
    let mut dag = self;
    for frame in scope.frames() {
      dag = dag
        .get_node(&frame.controller)?
        .branch()?
        .template(&frame.branch)?;
    }
    Some(dag)
  }

  /// Look up the definition of a node instance.
  pub fn node_at(&self, key: &NodeKey) -> Option<&Node> {
    self.resolve(&key.scope)?.get_node(&key.name)
  }

  /// Nodes of this DAG, instantiated in `scope`, that may run now: still
  /// Pending, with every predecessor Completed.
  ///
  /// Branch controllers only reach Completed once their branches have been
  /// aggregated, so a successor of a controller is never ready early.
  pub fn ready_nodes(&self, progress: &ExecutionProgress, scope: &Scope) -> Vec<String> {
    let graph = self.graph();
    self
      .nodes
      .iter()
      .map(Node::name)
      .filter(|name| progress.status(&scope.node(name)) == NodeStatus::Pending)
      .filter(|name| {
        graph
          .upstream(name)
          .iter()
          .all(|up| progress.status(&scope.node(up)) == NodeStatus::Completed)
      })
      .map(str::to_string)
      .collect()
  }

  /// Validate this DAG and every nested template.
  pub fn validate(&self) -> Result<(), DefinitionError> {
    self.validate_at(ROOT_LABEL)
  }

  fn validate_at(&self, label: &str) -> Result<(), DefinitionError> {
    if let Some(err) = self.deferred.first() {
      return Err(relabel(err, label));
    }

    if self.nodes.is_empty() {
      return Err(DefinitionError::EmptyDag {
        dag: label.to_string(),
      });
    }

    for node in &self.nodes {
      if node.name().is_empty() || node.name().contains(RESERVED) {
        return Err(DefinitionError::InvalidNodeName {
          dag: label.to_string(),
          node: node.name().to_string(),
        });
      }
    }

    for edge in &self.edges {
      for endpoint in [&edge.from, &edge.to] {
        if !self.index.contains_key(endpoint) {
          return Err(DefinitionError::UnknownNode {
            dag: label.to_string(),
            node: endpoint.clone(),
          });
        }
      }
    }

    let graph = self.graph();
    graph
      .topological_order()
      .map_err(|nodes| DefinitionError::CyclicGraph {
        dag: label.to_string(),
        nodes,
      })?;

    if let Some(orphan) = graph.entry_points().get(1) {
      return Err(DefinitionError::DisconnectedNode {
        dag: label.to_string(),
        node: orphan.clone(),
      });
    }

    if graph.terminal_points().len() > 1 {
      return Err(DefinitionError::MultipleTerminals {
        dag: label.to_string(),
        nodes: graph.terminal_points().to_vec(),
      });
    }

    for node in &self.nodes {
      if graph.is_join_point(node.name()) && node.is_controller() {
        return Err(DefinitionError::JoinedController {
          dag: label.to_string(),
          node: node.name().to_string(),
        });
      }

      if graph.is_join_point(node.name()) && !node.has_aggregator() {
        return Err(DefinitionError::MissingAggregator {
          dag: label.to_string(),
          node: node.name().to_string(),
        });
      }

      if let Some(branch) = node.branch() {
        let templates = branch.templates();
        if templates.is_empty() {
          return Err(DefinitionError::NoConditions {
            dag: label.to_string(),
            node: node.name().to_string(),
          });
        }
        for (template_label, template) in templates {
          template.validate_at(&format!("{label}/{}[{template_label}]", node.name()))?;
        }
      }
    }

    Ok(())
  }

  fn push(&mut self, node: Node) -> usize {
    let position = self.nodes.len();
    self.index.insert(node.name().to_string(), position);
    self.nodes.push(node);
    position
  }

  /// Get-or-create for controller nodes; a name already in use is recorded
  /// as a duplicate.
  fn controller(&mut self, name: &str) -> &mut Node {
    if self.index.contains_key(name) {
      self.deferred.push(DefinitionError::DuplicateNode {
        dag: ROOT_LABEL.to_string(),
        node: name.to_string(),
      });
    }
    self.node(name)
  }
}

fn relabel(err: &DefinitionError, label: &str) -> DefinitionError {
  match err {
    DefinitionError::DuplicateNode { node, .. } => DefinitionError::DuplicateNode {
      dag: label.to_string(),
      node: node.clone(),
    },
    DefinitionError::DuplicateEdge { from, to, .. } => DefinitionError::DuplicateEdge {
      dag: label.to_string(),
      from: from.clone(),
      to: to.clone(),
    },
    other => DefinitionError::Custom(other.to_string()),
  }
}

impl fmt::Debug for Dag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dag")
      .field("nodes", &self.nodes)
      .field("edges", &self.edges)
      .finish()
  }
}
