// ABOUTME: ExecutionPlan - topologically ordered actions plus the dependency graph behind the order
// ABOUTME: Built once per request by the validator and read-only afterwards

use conduit_core::ActionIntent;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Actions in execution order
    actions: Vec<ActionIntent>,
    /// Edge `a -> b` means `b` runs after `a`
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    /// Action id to position in `actions`
    order: HashMap<String, usize>,
}

impl ExecutionPlan {
    /// `edges` are (prerequisite, dependent) id pairs and must reference ids in `actions`.
    pub(crate) fn from_parts(actions: Vec<ActionIntent>, edges: &[(String, String)]) -> Self {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();
        let mut order = HashMap::new();

        for (position, action) in actions.iter().enumerate() {
            let node = graph.add_node(action.id.clone());
            node_map.insert(action.id.clone(), node);
            order.insert(action.id.clone(), position);
        }
        for (from, to) in edges {
            if let (Some(&a), Some(&b)) = (node_map.get(from), node_map.get(to)) {
                graph.update_edge(a, b, ());
            }
        }

        Self {
            actions,
            graph,
            node_map,
            order,
        }
    }

    pub fn actions(&self) -> &[ActionIntent] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionIntent> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ActionIntent> {
        self.order.get(id).map(|&i| &self.actions[i])
    }

    /// Position of `id` in execution order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.get(id).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.id.as_str())
    }

    /// Direct prerequisites, explicit and implicit, in execution order
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Actions that directly wait on `id`, in execution order
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every action reachable from `id`, excluding `id`, in execution order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.node_map.get(id) else {
            return Vec::new();
        };

        let mut reached = Vec::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                reached.push(self.graph[node].as_str());
            }
        }
        self.sorted(reached)
    }

    pub fn requires_confirmation(&self) -> bool {
        self.actions.iter().any(|a| a.requires_confirmation)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.node_map.get(id) else {
            return Vec::new();
        };
        let ids = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].as_str())
            .collect();
        self.sorted(ids)
    }

    fn sorted<'a>(&self, mut ids: Vec<&'a str>) -> Vec<&'a str> {
        ids.sort_by_key(|id| self.order.get(*id).copied().unwrap_or(usize::MAX));
        ids.dedup();
        ids
    }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
    type Item = &'a ActionIntent;
    type IntoIter = std::slice::Iter<'a, ActionIntent>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
