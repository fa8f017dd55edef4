//! Colours: placement groups whose members resolve to one node.
//!
//! Resources hold a [`Color`] handle. The shared [`ColorDetails`] live in
//! the [`ColorTable`], which is the only place they are mutated.

use hapolicy_core::Score;
use tracing::{debug, warn};

use crate::node::Node;
use crate::resource::ResourceIdx;
use crate::weights::{dup, sort_by_weight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub id: usize,
    /// Priority of the resource the colour was created for.
    pub local_weight: Score,
}

#[derive(Debug)]
pub struct ColorDetails {
    pub id: usize,
    pub highest_priority: Score,
    pub candidate_nodes: Vec<Node>,
    pub allocated_resources: Vec<ResourceIdx>,
    pub chosen_node: Option<Node>,
    pub pending: bool,
}

/// Per-pass colour arena. Colour ids count up from zero.
#[derive(Debug, Default)]
pub struct ColorTable {
    colors: Vec<ColorDetails>,
}

impl ColorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// New colour for `rsc`; candidates are `nodes` minus negative weights.
    pub fn create(&mut self, rsc: ResourceIdx, priority: Score, nodes: &[Node]) -> Color {
        let id = self.colors.len();
        self.colors.push(ColorDetails {
            id,
            highest_priority: priority,
            candidate_nodes: dup(nodes, true),
            allocated_resources: vec![rsc],
            chosen_node: None,
            pending: true,
        });
        debug!(color = id, resource = %rsc, "created colour");
        Color {
            id,
            local_weight: priority,
        }
    }

    pub fn details(&self, color: Color) -> Option<&ColorDetails> {
        self.colors.get(color.id)
    }

    pub fn chosen_node(&self, color: Color) -> Option<&Node> {
        self.details(color).and_then(|d| d.chosen_node.as_ref())
    }

    /// Add another member to an existing colour.
    pub fn join(&mut self, color: Color, rsc: ResourceIdx, priority: Score) {
        if let Some(details) = self.colors.get_mut(color.id) {
            details.allocated_resources.push(rsc);
            details.highest_priority = details.highest_priority.max(priority);
        }
    }

    /// Pick the colour's node: the highest-weight non-negative candidate.
    ///
    /// Once chosen, the node is final for the pass; later calls return it
    /// unchanged.
    pub fn resolve(&mut self, color: Color) -> Option<&Node> {
        let details = self.colors.get_mut(color.id)?;
        if !details.pending {
            if details.chosen_node.is_some() {
                debug!(color = details.id, "colour already resolved");
            }
            return details.chosen_node.as_ref();
        }

        details.pending = false;
        sort_by_weight(&mut details.candidate_nodes);
        details.chosen_node = details
            .candidate_nodes
            .iter()
            .find(|n| n.weight >= 0)
            .map(Node::copy);

        match &details.chosen_node {
            Some(node) => debug!(color = details.id, node = %node.uname(), weight = node.weight, "resolved colour"),
            None => warn!(color = details.id, "no eligible node for colour"),
        }
        details.chosen_node.as_ref()
    }
}
