//! Dependency graph over asset ids.
//!
//! Edges point from a dependant to its dependency (`index.html → style.css`).
//! Both directions are stored so dependants can be found without a scan.
//!
//! # Invariants
//! - Forward and reverse adjacency are always consistent
//! - Node iteration order is insertion order, which makes
//!   [`DependencyGraph::overall_order`] deterministic
//! - Self-edges are allowed and show up as cycles

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, TapeError};
use crate::identity::AssetId;

/// Per-node metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeData {
    /// Referenced, but no asset could be loaded for it yet.
    pub missing: bool,
}

#[derive(Debug, Clone, Default)]
struct Node {
    data: NodeData,
    /// Dependencies, in the order they were added
    outgoing: Vec<AssetId>,
    /// Dependants, in the order they were added
    incoming: Vec<AssetId>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<AssetId>,
    nodes: FxHashMap<AssetId, Node>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. No-op if it already exists.
    pub fn add_node(&mut self, id: &AssetId) {
        if !self.nodes.contains_key(id) {
            self.order.push(id.clone());
            self.nodes.insert(id.clone(), Node::default());
        }
    }

    /// Add an edge `from → to`, creating either node if needed.
    pub fn add_dependency(&mut self, from: &AssetId, to: &AssetId) {
        self.add_node(from);
        self.add_node(to);

        if let Some(node) = self.nodes.get_mut(from)
            && !node.outgoing.contains(to)
        {
            node.outgoing.push(to.clone());
        }
        if let Some(node) = self.nodes.get_mut(to)
            && !node.incoming.contains(from)
        {
            node.incoming.push(from.clone());
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &AssetId) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        self.order.retain(|n| n != id);

        for dep in &node.outgoing {
            if let Some(dep) = self.nodes.get_mut(dep) {
                dep.incoming.retain(|n| n != id);
            }
        }
        for dependant in &node.incoming {
            if let Some(dependant) = self.nodes.get_mut(dependant) {
                dependant.outgoing.retain(|n| n != id);
            }
        }
    }

    pub fn has_node(&self, id: &AssetId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All node ids in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &AssetId> {
        self.order.iter()
    }

    /// Set metadata on an existing node. Returns false if the node is unknown.
    pub fn set_node_data(&mut self, id: &AssetId, data: NodeData) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.data = data;
                true
            }
            None => false,
        }
    }

    pub fn node_data(&self, id: &AssetId) -> Option<NodeData> {
        self.nodes.get(id).map(|node| node.data)
    }

    pub fn is_missing(&self, id: &AssetId) -> bool {
        self.node_data(id).is_some_and(|data| data.missing)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// One hop along outgoing edges.
    pub fn direct_dependencies_of(&self, id: &AssetId) -> Vec<AssetId> {
        self.nodes
            .get(id)
            .map(|node| node.outgoing.clone())
            .unwrap_or_default()
    }

    /// One hop along incoming edges.
    pub fn direct_dependants_of(&self, id: &AssetId) -> Vec<AssetId> {
        self.nodes
            .get(id)
            .map(|node| node.incoming.clone())
            .unwrap_or_default()
    }

    /// Every node reachable through outgoing edges, excluding `id` itself
    /// unless it sits on a cycle.
    pub fn dependencies_of(&self, id: &AssetId) -> Vec<AssetId> {
        self.reachable(id, |node| &node.outgoing)
    }

    /// Every node that reaches `id` through incoming edges.
    pub fn dependants_of(&self, id: &AssetId) -> Vec<AssetId> {
        self.reachable(id, |node| &node.incoming)
    }

    fn reachable<'a>(&'a self, id: &AssetId, edges: impl Fn(&'a Node) -> &'a Vec<AssetId>) -> Vec<AssetId> {
        let mut seen: FxHashSet<&AssetId> = FxHashSet::default();
        let mut found = Vec::new();
        let mut stack: Vec<&AssetId> = match self.nodes.get(id) {
            Some(node) => edges(node).iter().rev().collect(),
            None => return found,
        };

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            found.push(current.clone());
            if let Some(node) = self.nodes.get(current) {
                stack.extend(edges(node).iter().rev());
            }
        }

        found
    }

    /// Topological order: every node appears after all of its dependencies.
    ///
    /// Ties are broken by insertion order. Fails with [`TapeError::Cycle`]
    /// carrying the ids along the first cycle found.
    pub fn overall_order(&self) -> Result<Vec<AssetId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: FxHashMap<&AssetId, Mark> = FxHashMap::default();
        let mut order = Vec::with_capacity(self.order.len());

        for root in &self.order {
            if marks.contains_key(root) {
                continue;
            }

            // (node, index of the next child to visit)
            let mut stack: Vec<(&AssetId, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::Visiting);

            while let Some(top) = stack.last_mut() {
                let id = top.0;
                let children = self.nodes.get(id).map_or(&[][..], |n| &n.outgoing[..]);

                if let Some(child) = children.get(top.1) {
                    top.1 += 1;
                    match marks.get(child) {
                        Some(Mark::Done) => {}
                        Some(Mark::Visiting) => {
                            let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                            cycle.push(child.to_string());
                            return Err(TapeError::Cycle(cycle));
                        }
                        None => {
                            marks.insert(child, Mark::Visiting);
                            stack.push((child, 0));
                        }
                    }
                } else {
                    marks.insert(id, Mark::Done);
                    order.push(id.clone());
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}
