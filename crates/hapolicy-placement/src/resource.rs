//! Schedulable units.
//!
//! Resources live in the working set's arena and refer to each other by
//! [`ResourceIdx`]. Containers are a closed set of variants; a master
//! embeds the clone settings it extends.

use std::fmt;

use hapolicy_core::{OperationTimeouts, Role, Score};

use crate::color::Color;
use crate::node::Node;
use crate::weights::find_node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdx(pub usize);

impl fmt::Display for ResourceIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    pub ordered: bool,
    pub colocated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneData {
    pub clone_max: u32,
    pub clone_node_max: u32,
    pub ordered: bool,
    /// Instances that ended up with a node.
    pub active_instances: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterData {
    pub clone: CloneData,
    pub master_max: u32,
    pub master_node_max: u32,
    /// Result of promotion ranking.
    pub masters_allocated: u32,
    /// Set once promotion preferences have steered instance placement.
    pub applied_master_prefs: bool,
    /// Set once the promotion merge pass has run.
    pub merged_master_weights: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Primitive,
    Group(GroupData),
    Clone(CloneData),
    Master(MasterData),
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::Primitive => "primitive",
            Variant::Group(_) => "group",
            Variant::Clone(_) => "clone",
            Variant::Master(_) => "master",
        }
    }

    pub fn clone_data(&self) -> Option<&CloneData> {
        match self {
            Variant::Clone(data) => Some(data),
            Variant::Master(data) => Some(&data.clone),
            _ => None,
        }
    }

    pub fn clone_data_mut(&mut self) -> Option<&mut CloneData> {
        match self {
            Variant::Clone(data) => Some(data),
            Variant::Master(data) => Some(&mut data.clone),
            _ => None,
        }
    }

    pub fn master_data(&self) -> Option<&MasterData> {
        match self {
            Variant::Master(data) => Some(data),
            _ => None,
        }
    }

    pub fn master_data_mut(&mut self) -> Option<&mut MasterData> {
        match self {
            Variant::Master(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Resource {
    pub id: String,
    /// Fully qualified name, e.g. `ms-db:db:0`.
    pub long_name: String,
    pub variant: Variant,
    pub parent: Option<ResourceIdx>,
    pub children: Vec<ResourceIdx>,
    /// Clone instance number, for members of a clone.
    pub instance: Option<u32>,

    pub priority: Score,
    /// Sort key used by promotion ranking.
    pub sort_index: Score,
    pub managed: bool,
    pub failed: bool,
    pub target_role: Option<Role>,
    pub timeouts: OperationTimeouts,

    pub role: Role,
    pub next_role: Role,

    pub allowed_nodes: Vec<Node>,
    pub running_on: Vec<Node>,
    /// Colocations where this resource is the dependent side.
    pub rsc_cons: Vec<usize>,
    /// Colocations where this resource is the depended-upon side.
    pub rsc_cons_rhs: Vec<usize>,
    pub rsc_location: Vec<usize>,

    pub color: Option<Color>,
    pub provisional: bool,
    pub allocating: bool,
    pub allocated_to: Option<Node>,
}

impl Resource {
    pub fn new(id: String, long_name: String, variant: Variant) -> Self {
        Self {
            id,
            long_name,
            variant,
            parent: None,
            children: Vec::new(),
            instance: None,
            priority: 0,
            sort_index: 0,
            managed: true,
            failed: false,
            target_role: None,
            timeouts: OperationTimeouts::default(),
            role: Role::Stopped,
            next_role: Role::Unknown,
            allowed_nodes: Vec::new(),
            running_on: Vec::new(),
            rsc_cons: Vec::new(),
            rsc_cons_rhs: Vec::new(),
            rsc_location: Vec::new(),
            color: None,
            provisional: true,
            allocating: false,
            allocated_to: None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.variant, Variant::Primitive)
    }

    pub fn is_master(&self) -> bool {
        matches!(self.variant, Variant::Master(_))
    }

    pub fn allocated_node_id(&self) -> Option<&str> {
        self.allocated_to.as_ref().map(Node::id)
    }

    pub fn allowed_node(&self, id: &str) -> Option<&Node> {
        find_node(&self.allowed_nodes, id)
    }

    pub fn is_running_on(&self, id: &str) -> bool {
        find_node(&self.running_on, id).is_some()
    }
}
