//! Graph index over a workflow document: ID lookup, successor resolution,
//! cycle detection, and reachability.
//!
//! Control flow between nodes is strictly sequential: a node's successor is
//! its single unlabeled outgoing edge. Routes jump to targets named in their
//! `paths` map, sequences and iterators reference their members by ID, so
//! the full reference graph (edges plus every config-level target) is what
//! cycle detection and reachability run over. `petgraph`'s toposort does the
//! cycle check.

use std::collections::{HashMap, HashSet, VecDeque};

use pagewright_types::workflow::{NodeConfig, WorkflowGraph, WorkflowNode};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Node references
// ---------------------------------------------------------------------------

/// Every node ID a node's configuration points at: route targets, sequence
/// children, iterator bodies, handler branches.
pub fn config_references(node: &WorkflowNode) -> Vec<&str> {
    match &node.config {
        NodeConfig::Sequence { children } => children.iter().map(String::as_str).collect(),
        NodeConfig::Iterate { iterator_config } => {
            iterator_config.body.iter().map(String::as_str).collect()
        }
        NodeConfig::Route {
            paths, default, ..
        } => {
            let mut refs: Vec<&str> = paths.values().map(String::as_str).collect();
            refs.push(default.as_str());
            refs
        }
        NodeConfig::Handle {
            try_node,
            catch_node,
            finally_node,
            ..
        } => {
            let mut refs = vec![try_node.as_str()];
            if let Some(c) = catch_node {
                refs.push(c.as_str());
            }
            if let Some(f) = finally_node {
                refs.push(f.as_str());
            }
            refs
        }
        _ => vec![],
    }
}

// ---------------------------------------------------------------------------
// WorkflowIndex
// ---------------------------------------------------------------------------

/// Prebuilt lookup structures for one workflow graph. The executor resolves
/// successors through this; the validator reads its structural findings.
pub struct WorkflowIndex<'a> {
    graph: &'a WorkflowGraph,
    by_id: HashMap<&'a str, &'a WorkflowNode>,
    /// Plain (unlabeled) successor per node, when exactly one exists.
    successors: HashMap<&'a str, &'a str>,
    /// Nodes with more than one plain outgoing edge.
    ambiguous: Vec<&'a str>,
    /// (source node, referenced target) pairs where the target does not exist.
    unknown_refs: Vec<(&'a str, &'a str)>,
}

impl<'a> WorkflowIndex<'a> {
    pub fn build(graph: &'a WorkflowGraph) -> Self {
        let by_id: HashMap<&str, &WorkflowNode> =
            graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut successors: HashMap<&str, &str> = HashMap::new();
        let mut ambiguous = Vec::new();
        let mut unknown_refs = Vec::new();

        for edge in &graph.edges {
            if edge.label.is_some() {
                continue;
            }
            let from = edge.from.as_str();
            let to = edge.to.as_str();
            if !by_id.contains_key(from) {
                unknown_refs.push((to, from));
                continue;
            }
            if !by_id.contains_key(to) {
                unknown_refs.push((from, to));
                continue;
            }
            if successors.insert(from, to).is_some() && !ambiguous.contains(&from) {
                ambiguous.push(from);
            }
        }

        for node in &graph.nodes {
            for target in config_references(node) {
                if !by_id.contains_key(target) {
                    unknown_refs.push((node.id.as_str(), target));
                }
            }
        }

        Self {
            graph,
            by_id,
            successors,
            ambiguous,
            unknown_refs,
        }
    }

    pub fn entry(&self) -> &str {
        &self.graph.entry
    }

    pub fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// The node control passes to when `id` completes normally. `None` ends
    /// the run (or the enclosing scope).
    pub fn successor(&self, id: &str) -> Option<&'a str> {
        self.successors.get(id).copied()
    }

    pub fn ambiguous_successors(&self) -> &[&'a str] {
        &self.ambiguous
    }

    pub fn unknown_references(&self) -> &[(&'a str, &'a str)] {
        &self.unknown_refs
    }

    /// Detect a cycle over plain edges plus config references. Returns the
    /// ID of a node on the cycle.
    pub fn find_cycle(&self) -> Option<&'a str> {
        let mut petgraph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), petgraph.add_node(n.id.as_str())))
            .collect();

        for (from, to) in self.reference_edges() {
            if let (Some(&f), Some(&t)) = (indices.get(from), indices.get(to)) {
                petgraph.add_edge(f, t, ());
            }
        }

        match toposort(&petgraph, None) {
            Ok(_) => None,
            Err(cycle) => Some(petgraph[cycle.node_id()]),
        }
    }

    /// Nodes not reachable from the entry by plain edges or config
    /// references, in document order.
    pub fn unreachable(&self) -> Vec<&'a str> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in self.reference_edges() {
            adjacency.entry(from).or_default().push(to);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::new();
        if self.by_id.contains_key(self.graph.entry.as_str()) {
            seen.insert(self.graph.entry.as_str());
            queue.push_back(self.graph.entry.as_str());
        }
        while let Some(current) = queue.pop_front() {
            for &next in adjacency.get(current).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        self.graph
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !seen.contains(id))
            .collect()
    }

    fn reference_edges(&self) -> Vec<(&'a str, &'a str)> {
        let mut edges: Vec<(&str, &str)> = self
            .graph
            .edges
            .iter()
            .filter(|e| e.label.is_none())
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        for node in &self.graph.nodes {
            for target in config_references(node) {
                edges.push((node.id.as_str(), target));
            }
        }
        edges
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
