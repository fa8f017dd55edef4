//! Serializable result of a scheduling pass.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hapolicy_core::{Role, Task};
use hapolicy_placement::WorkingSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::action::OrderKind;
use crate::error::EngineResult;
use crate::graph::ActionGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: usize,
    pub uuid: String,
    pub resource: String,
    pub node: Option<String>,
    pub task: Task,
    pub runnable: bool,
    pub optional: bool,
    pub pseudo: bool,
    pub timeout_ms: Option<u64>,
}

/// `before` must complete before `after` starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub before: usize,
    pub after: usize,
    pub kind: OrderKind,
}

/// The action DAG handed to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionGraph {
    pub actions: Vec<ActionRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl TransitionGraph {
    pub fn from_graph(graph: &ActionGraph) -> Self {
        let actions = graph
            .actions()
            .iter()
            .map(|a| ActionRecord {
                id: a.id.0,
                uuid: a.uuid.clone(),
                resource: a.resource.clone(),
                node: a.node.clone(),
                task: a.task,
                runnable: a.runnable,
                optional: a.optional,
                pseudo: a.pseudo,
                timeout_ms: a.timeout_ms,
            })
            .collect();
        let edges = graph
            .edges()
            .into_iter()
            .map(|(before, after, kind)| EdgeRecord {
                before: before.0,
                after: after.0,
                kind,
            })
            .collect();
        Self { actions, edges }
    }

    pub fn find(&self, resource: &str, task: Task, node: Option<&str>) -> Option<&ActionRecord> {
        self.actions
            .iter()
            .find(|a| a.resource == resource && a.task == task && a.node.as_deref() == node)
    }

    /// Real (non-pseudo) actions that will run.
    pub fn runnable_actions(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(|a| a.runnable && !a.pseudo)
    }

    pub fn has_edge(&self, before: usize, after: usize) -> bool {
        self.edges.iter().any(|e| e.before == before && e.after == after)
    }

    /// Whether `to` is reachable from `from`.
    pub fn has_path(&self, from: usize, to: usize) -> bool {
        self.has_path_avoiding(from, to, None)
    }

    /// Whether every path from `from` to `to` passes through `via`
    /// (and at least one path exists).
    pub fn path_requires(&self, from: usize, to: usize, via: usize) -> bool {
        self.has_path(from, to) && !self.has_path_avoiding(from, to, Some(via))
    }

    fn has_path_avoiding(&self, from: usize, to: usize, avoid: Option<usize>) -> bool {
        let mut next: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for edge in &self.edges {
            next.entry(edge.before).or_default().push(edge.after);
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if Some(id) == avoid || !seen.insert(id) {
                continue;
            }
            queue.extend(next.get(&id).into_iter().flatten().copied());
        }
        false
    }
}

/// Final placement of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: String,
    pub kind: String,
    pub role: Role,
    pub next_role: Role,
    pub node: Option<String>,
    /// Promoted instances, for multi-state resources.
    pub masters_allocated: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassOutcome {
    pub graph: TransitionGraph,
    pub resources: Vec<ResourceOutcome>,
    /// Resources that could not be placed anywhere this pass.
    pub unallocated: Vec<String>,
    /// SHA-256 of everything above; equal inputs give equal digests.
    pub digest: String,
}

impl PassOutcome {
    pub fn new(ws: &WorkingSet, graph: &ActionGraph) -> EngineResult<Self> {
        let graph = TransitionGraph::from_graph(graph);
        let resources: Vec<ResourceOutcome> = ws
            .resources
            .iter()
            .map(|r| ResourceOutcome {
                id: r.id.clone(),
                kind: r.variant.name().to_string(),
                role: r.role,
                next_role: r.next_role,
                node: r.allocated_node_id().map(str::to_string),
                masters_allocated: r.variant.master_data().map(|m| m.masters_allocated),
            })
            .collect();
        let unallocated: Vec<String> = ws
            .unallocated
            .iter()
            .map(|idx| ws.resource(*idx).id.clone())
            .collect();

        let canonical = serde_json::to_vec(&(&graph, &resources, &unallocated))?;
        let digest = hex::encode(Sha256::digest(&canonical));

        Ok(Self {
            graph,
            resources,
            unallocated,
            digest,
        })
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceOutcome> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: usize) -> ActionRecord {
        ActionRecord {
            id,
            uuid: format!("r_{id}"),
            resource: "r".to_string(),
            node: None,
            task: Task::Start,
            runnable: true,
            optional: false,
            pseudo: false,
            timeout_ms: None,
        }
    }

    fn edge(before: usize, after: usize) -> EdgeRecord {
        EdgeRecord {
            before,
            after,
            kind: OrderKind::Mandatory,
        }
    }

    #[test]
    fn path_requires_detects_bypass() {
        let mut graph = TransitionGraph {
            actions: (0..4).map(record).collect(),
            edges: vec![edge(0, 1), edge(1, 2)],
        };
        assert!(graph.has_path(0, 2));
        assert!(graph.path_requires(0, 2, 1));
        assert!(!graph.has_path(2, 0));

        graph.edges.push(edge(0, 3));
        graph.edges.push(edge(3, 2));
        assert!(!graph.path_requires(0, 2, 1));
    }

    #[test]
    fn path_requires_needs_a_path() {
        let graph = TransitionGraph {
            actions: (0..3).map(record).collect(),
            edges: vec![edge(0, 1)],
        };
        assert!(!graph.path_requires(0, 2, 1));
    }
}
