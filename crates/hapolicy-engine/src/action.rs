//! Actions: one task for one resource, optionally pinned to a node.

use std::fmt;

use hapolicy_core::Task;
use serde::{Deserialize, Serialize};

/// Position of an action in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub usize);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How strongly `first` must precede `then`.
///
/// Only mandatory edges carry runnability: if `first` cannot run,
/// neither can `then`. Optional edges order the two when both run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Optional,
    Mandatory,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    /// Operation key, `<resource>_<task>_0`.
    pub uuid: String,
    pub resource: String,
    /// `None` for resource-level pseudo actions.
    pub node: Option<String>,
    pub task: Task,
    /// Milestone only; nothing is executed.
    pub pseudo: bool,
    pub runnable: bool,
    /// Nothing to do; kept for ordering.
    pub optional: bool,
    pub timeout_ms: Option<u64>,
}

impl Action {
    pub fn new(id: ActionId, resource: &str, task: Task, node: Option<&str>) -> Self {
        Self {
            id,
            uuid: format!("{resource}_{}_0", task.as_str()),
            resource: resource.to_string(),
            node: node.map(str::to_string),
            task,
            pseudo: false,
            runnable: true,
            optional: false,
            timeout_ms: None,
        }
    }

    /// Label used in logs and diagnostics, e.g. `db:0_promote_0 node-a`.
    pub fn label(&self) -> String {
        match &self.node {
            Some(node) => format!("{} {node}", self.uuid),
            None => self.uuid.clone(),
        }
    }
}
