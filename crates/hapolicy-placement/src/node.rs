//! Cluster members as scored placement targets.
//!
//! A [`Node`] is a lightweight, per-list copy: it owns its `weight`,
//! `fixed` flag and promotion `count`, and shares an immutable
//! [`NodeDetails`] record with every other copy of the same member.

use std::collections::BTreeMap;
use std::sync::Arc;

use hapolicy_core::{NodeRecord, Score};

/// Identity and health of a cluster member. Read-only during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDetails {
    pub id: String,
    pub uname: String,
    pub online: bool,
    pub unclean: bool,
    pub standby: bool,
    pub shutdown: bool,
    pub attrs: BTreeMap<String, String>,
    /// Ids of resources currently active on this node.
    pub running_rsc: Vec<String>,
}

impl NodeDetails {
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            id: record.id.clone(),
            uname: record.name().to_string(),
            online: record.online,
            unclean: record.unclean,
            standby: record.standby,
            shutdown: record.shutdown,
            attrs: record.attributes.clone(),
            running_rsc: Vec::new(),
        }
    }

    pub fn can_run_resources(&self) -> bool {
        self.online && !self.unclean && !self.standby && !self.shutdown
    }

    /// Look up a node attribute. `#id` and `#uname` resolve to the
    /// node's identity.
    pub fn attr(&self, key: &str) -> Option<&str> {
        match key {
            "#id" => Some(&self.id),
            "#uname" => Some(&self.uname),
            _ => self.attrs.get(key).map(String::as_str),
        }
    }
}

/// One entry of a candidate-node list.
#[derive(Debug)]
pub struct Node {
    pub details: Arc<NodeDetails>,
    pub weight: Score,
    /// Weight must not be merged any further.
    pub fixed: bool,
    /// Masters already assigned here during promotion ranking.
    pub count: u32,
}

impl Node {
    pub fn new(details: Arc<NodeDetails>, weight: Score) -> Self {
        Self {
            details,
            weight,
            fixed: false,
            count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.details.id
    }

    pub fn uname(&self) -> &str {
        &self.details.uname
    }

    /// Independent copy for another list. Shares details; resets `count`.
    pub fn copy(&self) -> Node {
        Node {
            details: Arc::clone(&self.details),
            weight: self.weight,
            fixed: self.fixed,
            count: 0,
        }
    }

    pub fn same_node(&self, other: &Node) -> bool {
        self.details.id == other.details.id
    }

    pub fn can_run_resources(&self) -> bool {
        self.details.can_run_resources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(id: &str) -> Arc<NodeDetails> {
        Arc::new(NodeDetails::from_record(&NodeRecord {
            id: id.to_string(),
            uname: None,
            online: true,
            unclean: false,
            standby: false,
            shutdown: false,
            attributes: BTreeMap::from([("rack".to_string(), "r1".to_string())]),
        }))
    }

    #[test]
    fn copy_shares_details_and_resets_count() {
        let mut node = Node::new(details("a"), 7);
        node.count = 3;
        node.fixed = true;

        let copy = node.copy();
        assert!(Arc::ptr_eq(&node.details, &copy.details));
        assert_eq!(copy.weight, 7);
        assert!(copy.fixed);
        assert_eq!(copy.count, 0);
    }

    #[test]
    fn copies_have_independent_weights() {
        let node = Node::new(details("a"), 1);
        let mut copy = node.copy();
        copy.weight = 99;
        assert_eq!(node.weight, 1);
        assert!(node.same_node(&copy));
    }

    #[test]
    fn unhealthy_nodes_cannot_run_resources() {
        let mut d = (*details("a")).clone();
        assert!(d.can_run_resources());
        d.standby = true;
        assert!(!d.can_run_resources());
        d.standby = false;
        d.unclean = true;
        assert!(!d.can_run_resources());
        d.unclean = false;
        d.online = false;
        assert!(!d.can_run_resources());
    }

    #[test]
    fn special_attributes_resolve_identity() {
        let d = details("a");
        assert_eq!(d.attr("#id"), Some("a"));
        assert_eq!(d.attr("#uname"), Some("a"));
        assert_eq!(d.attr("rack"), Some("r1"));
        assert_eq!(d.attr("zone"), None);
    }
}
