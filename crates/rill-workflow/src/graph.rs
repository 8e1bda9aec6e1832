use std::collections::{HashMap, HashSet, VecDeque};

use crate::edge::Edge;

/// Graph structure for traversal and analysis.
///
/// Built from a DAG's node names (in insertion order) and edges. All lists
/// preserve insertion order so traversal is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node names in insertion order.
  order: Vec<String>,
  /// Adjacency list: node -> list of downstream nodes.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node -> list of upstream nodes.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no incoming edges.
  entry_points: Vec<String>,
  /// Nodes with no outgoing edges.
  terminal_points: Vec<String>,
  /// Nodes with multiple incoming edges (join points).
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from node names and edges.
  pub fn new<'a>(nodes: impl IntoIterator<Item = &'a str>, edges: &[Edge]) -> Self {
    let order: Vec<String> = nodes.into_iter().map(str::to_string).collect();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    // Initialize all nodes
    for name in &order {
      adjacency.entry(name.clone()).or_default();
      reverse_adjacency.entry(name.clone()).or_default();
    }

    // Build adjacency lists
    for edge in edges {
      adjacency
        .entry(edge.from.clone())
        .or_default()
        .push(edge.to.clone());
      reverse_adjacency
        .entry(edge.to.clone())
        .or_default()
        .push(edge.from.clone());
    }

    let entry_points: Vec<String> = order
      .iter()
      .filter(|name| reverse_adjacency.get(*name).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let terminal_points: Vec<String> = order
      .iter()
      .filter(|name| adjacency.get(*name).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let join_points: HashSet<String> = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.len() > 1)
      .map(|(name, _)| name.clone())
      .collect();

    Self {
      order,
      adjacency,
      reverse_adjacency,
      entry_points,
      terminal_points,
      join_points,
    }
  }

  /// Nodes with no incoming edges.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Nodes with no outgoing edges.
  pub fn terminal_points(&self) -> &[String] {
    &self.terminal_points
  }

  /// Downstream nodes of `name`.
  pub fn downstream(&self, name: &str) -> &[String] {
    self
      .adjacency
      .get(name)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Upstream nodes of `name`.
  pub fn upstream(&self, name: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(name)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a node is a join point (has multiple incoming edges).
  pub fn is_join_point(&self, name: &str) -> bool {
    self.join_points.contains(name)
  }

  pub fn is_terminal(&self, name: &str) -> bool {
    self.downstream(name).is_empty()
  }

  /// Kahn's algorithm. On a cycle, returns the nodes that could not be
  /// ordered (every node on or behind a cycle).
  pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = self
      .order
      .iter()
      .map(|name| (name.as_str(), self.upstream(name).len()))
      .collect();

    let mut queue: VecDeque<&str> = self
      .order
      .iter()
      .filter(|name| in_degree.get(name.as_str()) == Some(&0))
      .map(String::as_str)
      .collect();

    let mut sorted = Vec::with_capacity(self.order.len());
    while let Some(name) = queue.pop_front() {
      sorted.push(name.to_string());
      for next in self.downstream(name) {
        if let Some(degree) = in_degree.get_mut(next.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(next.as_str());
          }
        }
      }
    }

    if sorted.len() == self.order.len() {
      Ok(sorted)
    } else {
      Err(
        self
          .order
          .iter()
          .filter(|name| !sorted.contains(name))
          .cloned()
          .collect(),
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use rill_config::ExecutionMode;

  use super::*;

  fn edges(pairs: &[(&str, &str)]) -> Vec<Edge> {
    pairs
      .iter()
      .map(|(from, to)| Edge::new(*from, *to, ExecutionMode::Data))
      .collect()
  }

  #[test]
  fn test_entry_terminal_and_join_points() {
    let graph = Graph::new(
      ["start", "a", "b", "end"],
      &edges(&[("start", "a"), ("start", "b"), ("a", "end"), ("b", "end")]),
    );

    assert_eq!(graph.entry_points(), ["start"]);
    assert_eq!(graph.terminal_points(), ["end"]);
    assert!(graph.is_join_point("end"));
    assert!(!graph.is_join_point("a"));
    assert_eq!(graph.downstream("start"), ["a", "b"]);
    assert_eq!(graph.upstream("end"), ["a", "b"]);
  }

  #[test]
  fn test_topological_order_detects_cycle() {
    let acyclic = Graph::new(["a", "b", "c"], &edges(&[("a", "b"), ("b", "c")]));
    assert_eq!(acyclic.topological_order().unwrap(), ["a", "b", "c"]);

    let cyclic = Graph::new(
      ["a", "b", "c"],
      &edges(&[("a", "b"), ("b", "c"), ("c", "b")]),
    );
    assert_eq!(cyclic.topological_order().unwrap_err(), ["b", "c"]);
  }
}
