//! Shared types used across hapolicy crates.
//!
//! The snapshot types mirror what the membership service and the
//! configuration store hand to a scheduling pass. They are plain serde
//! structs; every pass reads one `Snapshot` and never mutates it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::score::{Score, deserialize_score};

// ── Roles and tasks ─────────────────────────────────────────────

/// Role of a resource instance. Ordered so that `Master` sorts highest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Unknown,
    Stopped,
    Started,
    Slave,
    Master,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "Unknown",
            Role::Stopped => "Stopped",
            Role::Started => "Started",
            Role::Slave => "Slave",
            Role::Master => "Master",
        }
    }

    /// Whether the role only makes sense for multi-state resources.
    pub fn is_multistate(&self) -> bool {
        matches!(self, Role::Slave | Role::Master)
    }

    /// Whether the resource is running at all in this role.
    pub fn is_active(&self) -> bool {
        matches!(self, Role::Started | Role::Slave | Role::Master)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Role::Unknown),
            "stopped" => Ok(Role::Stopped),
            "started" => Ok(Role::Started),
            "slave" => Ok(Role::Slave),
            "master" => Ok(Role::Master),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Task tag of an action in the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Start,
    Started,
    Stop,
    Stopped,
    Promote,
    Promoted,
    Demote,
    Demoted,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Start => "start",
            Task::Started => "running",
            Task::Stop => "stop",
            Task::Stopped => "stopped",
            Task::Promote => "promote",
            Task::Promoted => "promoted",
            Task::Demote => "demote",
            Task::Demoted => "demoted",
        }
    }

    /// The pseudo "complete" milestone that follows this task, if any.
    pub fn completion(&self) -> Option<Task> {
        match self {
            Task::Start => Some(Task::Started),
            Task::Stop => Some(Task::Stopped),
            Task::Promote => Some(Task::Promoted),
            Task::Demote => Some(Task::Demoted),
            _ => None,
        }
    }

    /// The task that undoes this one: start and stop, promote and demote,
    /// and their milestones.
    pub fn invert(&self) -> Task {
        match self {
            Task::Start => Task::Stop,
            Task::Started => Task::Stopped,
            Task::Stop => Task::Start,
            Task::Stopped => Task::Started,
            Task::Promote => Task::Demote,
            Task::Promoted => Task::Demoted,
            Task::Demote => Task::Promote,
            Task::Demoted => Task::Promoted,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cluster snapshot ────────────────────────────────────────────

/// Everything a scheduling pass consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub cluster: ClusterSnapshot,
    pub config: ConfigSnapshot,
}

impl Snapshot {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(content)?;
        Ok(snapshot)
    }
}

/// Membership and status as reported by the membership service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    #[serde(default = "default_true")]
    pub have_quorum: bool,
    pub nodes: Vec<NodeRecord>,
    /// Where resources currently run, and in which role.
    #[serde(default)]
    pub status: Vec<ResourceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    /// Human-readable name; falls back to `id`.
    #[serde(default)]
    pub uname: Option<String>,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default)]
    pub unclean: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn name(&self) -> &str {
        self.uname.as_deref().unwrap_or(&self.id)
    }
}

/// One observed instance of a resource on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub resource: String,
    pub node: String,
    #[serde(default = "default_started")]
    pub role: Role,
    #[serde(default)]
    pub failed: bool,
}

// ── Configuration snapshot ──────────────────────────────────────

/// Resource and constraint definitions from the configuration store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub resources: Vec<ResourceDef>,
    #[serde(default)]
    pub colocations: Vec<ColocationDef>,
    #[serde(default)]
    pub locations: Vec<LocationDef>,
    #[serde(default)]
    pub orders: Vec<OrderDef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Primitive,
    Group,
    Clone,
    Master,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Primitive => "primitive",
            ResourceKind::Group => "group",
            ResourceKind::Clone => "clone",
            ResourceKind::Master => "master",
        }
    }
}

/// A resource definition. Containers carry their members in `children`:
/// a group lists its primitives in start order, a clone or master holds
/// exactly one template that is replicated per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: ResourceKind,
    #[serde(default, deserialize_with = "deserialize_score")]
    pub priority: Score,
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default)]
    pub target_role: Option<Role>,
    #[serde(default)]
    pub timeouts: OperationTimeouts,
    #[serde(default)]
    pub children: Vec<ResourceDef>,
    /// Groups default to ordered; clones default to unordered.
    #[serde(default)]
    pub ordered: Option<bool>,
    #[serde(default)]
    pub colocated: Option<bool>,
    #[serde(default)]
    pub clone_max: Option<u32>,
    #[serde(default)]
    pub clone_node_max: Option<u32>,
    #[serde(default)]
    pub master_max: Option<u32>,
    #[serde(default)]
    pub master_node_max: Option<u32>,
}

impl ResourceDef {
    /// A bare primitive definition with every optional field defaulted.
    pub fn primitive(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ResourceKind::Primitive,
            priority: 0,
            managed: true,
            target_role: None,
            timeouts: OperationTimeouts::default(),
            children: Vec::new(),
            ordered: None,
            colocated: None,
            clone_max: None,
            clone_node_max: None,
            master_max: None,
            master_node_max: None,
        }
    }

    pub fn group(id: &str, children: Vec<ResourceDef>) -> Self {
        Self {
            kind: ResourceKind::Group,
            children,
            ..Self::primitive(id)
        }
    }

    pub fn clone_of(id: &str, template: ResourceDef) -> Self {
        Self {
            kind: ResourceKind::Clone,
            children: vec![template],
            ..Self::primitive(id)
        }
    }

    pub fn master_of(id: &str, template: ResourceDef) -> Self {
        Self {
            kind: ResourceKind::Master,
            children: vec![template],
            ..Self::primitive(id)
        }
    }
}

/// Per-operation timeouts in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTimeouts {
    #[serde(default)]
    pub default_ms: Option<u64>,
    #[serde(default)]
    pub start_ms: Option<u64>,
    #[serde(default)]
    pub stop_ms: Option<u64>,
    #[serde(default)]
    pub promote_ms: Option<u64>,
    #[serde(default)]
    pub demote_ms: Option<u64>,
}

impl OperationTimeouts {
    /// Timeout for a task, falling back to the resource-wide default.
    pub fn for_task(&self, task: Task) -> Option<u64> {
        let specific = match task {
            Task::Start => self.start_ms,
            Task::Stop => self.stop_ms,
            Task::Promote => self.promote_ms,
            Task::Demote => self.demote_ms,
            _ => None,
        };
        specific.or(self.default_ms)
    }
}

/// "`from` wants to run where `to` runs" (or must not, for negative scores).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColocationDef {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: Score,
    #[serde(default)]
    pub from_role: Option<Role>,
    #[serde(default)]
    pub to_role: Option<Role>,
    /// Match nodes by this attribute instead of by identity.
    #[serde(default)]
    pub node_attribute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDef {
    pub id: String,
    pub resource: String,
    #[serde(default)]
    pub role: Option<Role>,
    pub rules: Vec<LocationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRule {
    pub node: String,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: Score,
}

/// "`then_action` of `then` happens after `first_action` of `first`".
///
/// A positive score makes the ordering mandatory: if `first` cannot
/// perform its action, neither can `then`. Zero or negative scores only
/// sequence the two when both happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDef {
    pub id: String,
    pub first: String,
    pub then: String,
    #[serde(default = "default_start")]
    pub first_action: Task,
    /// Falls back to `first_action`.
    #[serde(default)]
    pub then_action: Option<Task>,
    #[serde(default, deserialize_with = "deserialize_score")]
    pub score: Score,
    /// Also order the inverse actions the other way round.
    #[serde(default = "default_true")]
    pub symmetrical: bool,
}

impl OrderDef {
    pub fn then_action(&self) -> Task {
        self.then_action.unwrap_or(self.first_action)
    }
}

fn default_start() -> Task {
    Task::Start
}

fn default_true() -> bool {
    true
}

fn default_started() -> Role {
    Role::Started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::INFINITY;

    #[test]
    fn roles_order_master_highest() {
        assert!(Role::Master > Role::Slave);
        assert!(Role::Slave > Role::Started);
        assert!(Role::Started > Role::Stopped);
        assert!(Role::Stopped > Role::Unknown);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("master".parse::<Role>(), Ok(Role::Master));
        assert_eq!("Slave".parse::<Role>(), Ok(Role::Slave));
        assert!("leader".parse::<Role>().is_err());
    }

    #[test]
    fn timeouts_fall_back_to_default() {
        let t = OperationTimeouts {
            default_ms: Some(30_000),
            start_ms: Some(60_000),
            ..Default::default()
        };
        assert_eq!(t.for_task(Task::Start), Some(60_000));
        assert_eq!(t.for_task(Task::Stop), Some(30_000));
        assert_eq!(OperationTimeouts::default().for_task(Task::Promote), None);
    }

    #[test]
    fn parses_nested_snapshot() {
        let json = r#"{
            "cluster": {
                "nodes": [
                    {"id": "a"},
                    {"id": "b", "standby": true, "attributes": {"master-db:0": "10"}}
                ],
                "status": [{"resource": "db:0", "node": "a", "role": "Master"}]
            },
            "config": {
                "resources": [
                    {"id": "ms-db", "type": "master", "master_max": 1,
                     "children": [{"id": "db", "timeouts": {"start_ms": 5000}}]}
                ],
                "colocations": [
                    {"id": "web-with-db", "from": "web", "to": "ms-db",
                     "score": "INFINITY", "to_role": "Master"}
                ],
                "locations": [
                    {"id": "prefer-a", "resource": "ms-db",
                     "rules": [{"node": "a", "score": 50}]}
                ]
            }
        }"#;

        let snap = Snapshot::from_json(json).unwrap();
        assert!(snap.cluster.have_quorum);
        assert_eq!(snap.cluster.nodes[0].name(), "a");
        assert!(snap.cluster.nodes[0].online);
        assert!(snap.cluster.nodes[1].standby);
        assert_eq!(snap.cluster.status[0].role, Role::Master);

        let ms = &snap.config.resources[0];
        assert_eq!(ms.kind, ResourceKind::Master);
        assert!(ms.managed);
        assert_eq!(ms.master_max, Some(1));
        assert_eq!(ms.children[0].kind, ResourceKind::Primitive);
        assert_eq!(ms.children[0].timeouts.start_ms, Some(5000));

        let col = &snap.config.colocations[0];
        assert_eq!(col.score, INFINITY);
        assert_eq!(col.to_role, Some(Role::Master));
        assert_eq!(col.from_role, None);
        assert_eq!(snap.config.locations[0].rules[0].score, 50);
    }

    #[test]
    fn tasks_invert_pairwise() {
        assert_eq!(Task::Start.invert(), Task::Stop);
        assert_eq!(Task::Demote.invert(), Task::Promote);
        assert_eq!(Task::Started.invert(), Task::Stopped);
        for task in [Task::Start, Task::Stopped, Task::Promote, Task::Demoted] {
            assert_eq!(task.invert().invert(), task);
        }
    }

    #[test]
    fn order_defaults() {
        let json = r#"{
            "resources": [{"id": "db"}, {"id": "web"}],
            "orders": [
                {"id": "db-then-web", "first": "db", "then": "web", "score": "INFINITY"},
                {"id": "promote-then-start", "first": "ms", "then": "web",
                 "first_action": "promote", "then_action": "start", "symmetrical": false}
            ]
        }"#;
        let config: ConfigSnapshot = serde_json::from_str(json).unwrap();

        let plain = &config.orders[0];
        assert_eq!(plain.first_action, Task::Start);
        assert_eq!(plain.then_action(), Task::Start);
        assert_eq!(plain.score, INFINITY);
        assert!(plain.symmetrical);

        let promote = &config.orders[1];
        assert_eq!(promote.first_action, Task::Promote);
        assert_eq!(promote.then_action(), Task::Start);
        assert_eq!(promote.score, 0);
        assert!(!promote.symmetrical);
    }

    #[test]
    fn snapshot_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(
            &path,
            r#"{"cluster": {"nodes": [{"id": "n1"}]}, "config": {}}"#,
        )
        .unwrap();

        let snap = Snapshot::from_file(&path).unwrap();
        assert_eq!(snap.cluster.nodes.len(), 1);
        assert!(snap.config.resources.is_empty());
    }
}
