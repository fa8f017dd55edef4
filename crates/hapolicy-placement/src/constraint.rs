//! Colocation, location and ordering constraints, resolved against the
//! working set.

use hapolicy_core::{INFINITY, Role, Score, Task};

use crate::node::Node;
use crate::resource::ResourceIdx;

/// `rsc_lh` (the dependent side) wants to run where `rsc_rh` runs.
#[derive(Debug, Clone)]
pub struct Colocation {
    pub id: String,
    pub rsc_lh: ResourceIdx,
    pub rsc_rh: ResourceIdx,
    pub score: Score,
    /// `Role::Unknown` means no filter.
    pub role_lh: Role,
    pub role_rh: Role,
    /// Match nodes on this attribute instead of identity.
    pub node_attribute: Option<String>,
}

impl Colocation {
    pub fn is_mandatory(&self) -> bool {
        self.score >= INFINITY
    }

    pub fn is_exclusion(&self) -> bool {
        self.score <= -INFINITY
    }

    /// Whether a candidate node counts as "the same place" as `other`.
    pub fn nodes_match(&self, candidate: &Node, other: &Node) -> bool {
        match &self.node_attribute {
            None => candidate.same_node(other),
            Some(attr) => match (candidate.details.attr(attr), other.details.attr(attr)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

/// Per-node scores for one resource, optionally limited to a role.
#[derive(Debug)]
pub struct Location {
    pub id: String,
    pub rsc: ResourceIdx,
    pub role_filter: Role,
    pub nodes: Vec<Node>,
}

impl Location {
    /// Whether this constraint only steers promotion.
    pub fn is_role_specific(&self) -> bool {
        self.role_filter.is_multistate()
    }
}

/// `then_task` of `then` waits for `first_task` of `first`.
#[derive(Debug, Clone)]
pub struct OrderConstraint {
    pub id: String,
    pub first: ResourceIdx,
    pub first_task: Task,
    pub then: ResourceIdx,
    pub then_task: Task,
    pub score: Score,
}

impl OrderConstraint {
    /// Mandatory orderings also make `then` unrunnable when `first` is.
    pub fn is_mandatory(&self) -> bool {
        self.score > 0
    }

    /// The same ordering for the undoing actions, running the other way.
    pub fn inverted(&self) -> OrderConstraint {
        OrderConstraint {
            id: format!("{}-inverse", self.id),
            first: self.then,
            first_task: self.then_task.invert(),
            then: self.first,
            then_task: self.first_task.invert(),
            score: self.score,
        }
    }
}
