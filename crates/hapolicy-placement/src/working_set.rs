//! Per-pass working set: the snapshot unpacked into arenas.
//!
//! Unpacking turns the read-only [`Snapshot`] into resources, nodes and
//! constraints that allocation can mutate, and applies everything that
//! only depends on static input:
//!
//! 1. base weights (symmetric vs opt-in cluster)
//! 2. location constraints that are not role-specific
//! 3. node health (offline, standby, unclean, shutdown)
//! 4. `target_role = Stopped`
//! 5. resource stickiness
//! 6. the no-quorum policy

use std::collections::HashMap;
use std::sync::Arc;

use hapolicy_core::{
    ColocationDef, INFINITY, LocationDef, NoQuorumPolicy, NodeRecord, OrderDef, PolicyConfig, ResourceDef,
    ResourceKind, ResourceStatus, Role, Snapshot, add_scores,
};
use tracing::{debug, info, warn};

use crate::color::ColorTable;
use crate::constraint::{Colocation, Location, OrderConstraint};
use crate::error::{PlacementError, PlacementResult};
use crate::node::{Node, NodeDetails};
use crate::resource::{CloneData, GroupData, MasterData, Resource, ResourceIdx, Variant};
use crate::weights::{find_node_mut, merge_weights};

#[derive(Debug)]
pub struct WorkingSet {
    pub config: PolicyConfig,
    pub have_quorum: bool,
    pub nodes: Vec<Arc<NodeDetails>>,
    pub resources: Vec<Resource>,
    /// Top-level resources in configuration order.
    pub top_level: Vec<ResourceIdx>,
    pub colocations: Vec<Colocation>,
    pub locations: Vec<Location>,
    pub orderings: Vec<OrderConstraint>,
    pub colors: ColorTable,
    /// Resources that could not be placed this pass.
    pub unallocated: Vec<ResourceIdx>,
    index: HashMap<String, ResourceIdx>,
}

impl WorkingSet {
    pub fn unpack(snapshot: &Snapshot, config: &PolicyConfig) -> PlacementResult<Self> {
        let mut ws = WorkingSet {
            config: config.clone(),
            have_quorum: snapshot.cluster.have_quorum,
            nodes: Vec::new(),
            resources: Vec::new(),
            top_level: Vec::new(),
            colocations: Vec::new(),
            locations: Vec::new(),
            orderings: Vec::new(),
            colors: ColorTable::new(),
            unallocated: Vec::new(),
            index: HashMap::new(),
        };

        ws.unpack_nodes(&snapshot.cluster.nodes, &snapshot.cluster.status)?;
        for def in &snapshot.config.resources {
            let idx = ws.unpack_resource(def, None, None)?;
            ws.top_level.push(idx);
        }
        ws.unpack_status(&snapshot.cluster.status);
        ws.unpack_colocations(&snapshot.config.colocations);
        ws.add_group_colocations();
        ws.unpack_locations(&snapshot.config.locations);
        ws.unpack_orderings(&snapshot.config.orders);

        ws.apply_locations();
        ws.apply_node_health();
        ws.apply_target_roles();
        ws.apply_stickiness();
        ws.apply_quorum_policy();

        info!(
            nodes = ws.nodes.len(),
            resources = ws.resources.len(),
            colocations = ws.colocations.len(),
            locations = ws.locations.len(),
            orderings = ws.orderings.len(),
            quorum = ws.have_quorum,
            "unpacked working set"
        );
        Ok(ws)
    }

    // ── Lookups ─────────────────────────────────────────────────

    pub fn resource(&self, idx: ResourceIdx) -> &Resource {
        &self.resources[idx.0]
    }

    pub fn resource_mut(&mut self, idx: ResourceIdx) -> &mut Resource {
        &mut self.resources[idx.0]
    }

    pub fn find_resource(&self, id: &str) -> Option<ResourceIdx> {
        self.index.get(id).copied()
    }

    pub fn node_details(&self, id: &str) -> Option<Arc<NodeDetails>> {
        self.nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn top_parent(&self, idx: ResourceIdx) -> ResourceIdx {
        let mut current = idx;
        while let Some(parent) = self.resource(current).parent {
            current = parent;
        }
        current
    }

    /// `idx` followed by all of its descendants, depth first.
    pub fn subtree(&self, idx: ResourceIdx) -> Vec<ResourceIdx> {
        let mut out = vec![idx];
        for child in &self.resource(idx).children {
            out.extend(self.subtree(*child));
        }
        out
    }

    /// Nearest master resource among `idx` and its ancestors.
    pub fn master_scope(&self, idx: ResourceIdx) -> Option<ResourceIdx> {
        let mut current = Some(idx);
        while let Some(c) = current {
            if self.resource(c).is_master() {
                return Some(c);
            }
            current = self.resource(c).parent;
        }
        None
    }

    /// Nodes a resource ended up on.
    ///
    /// For clones this is every allocated instance; `role` narrows that
    /// to instances heading for that role (`Unknown`/`Started` mean any).
    pub fn placement_of(&self, idx: ResourceIdx, role: Role) -> Vec<Node> {
        let rsc = self.resource(idx);
        match &rsc.variant {
            Variant::Primitive | Variant::Group(_) => {
                rsc.allocated_to.iter().map(Node::copy).collect()
            }
            Variant::Clone(_) | Variant::Master(_) => rsc
                .children
                .iter()
                .map(|c| self.resource(*c))
                .filter(|c| matches!(role, Role::Unknown | Role::Started) || c.next_role == role)
                .filter_map(|c| c.allocated_to.as_ref())
                .map(Node::copy)
                .collect(),
        }
    }

    pub(crate) fn mark_unallocated(&mut self, idx: ResourceIdx) {
        if !self.unallocated.contains(&idx) {
            self.unallocated.push(idx);
        }
    }

    // ── Unpacking ───────────────────────────────────────────────

    fn unpack_nodes(&mut self, records: &[NodeRecord], status: &[ResourceStatus]) -> PlacementResult<()> {
        for record in records {
            if self.nodes.iter().any(|n| n.id == record.id) {
                return Err(PlacementError::DuplicateNode(record.id.clone()));
            }
            let mut details = NodeDetails::from_record(record);
            details.running_rsc = status
                .iter()
                .filter(|s| s.node == record.id && s.role.is_active())
                .filter(|_| record.online || record.unclean)
                .map(|s| s.resource.clone())
                .collect();
            debug!(
                node = %details.uname,
                online = details.online,
                standby = details.standby,
                unclean = details.unclean,
                "unpacked node"
            );
            self.nodes.push(Arc::new(details));
        }
        Ok(())
    }

    fn unpack_resource(
        &mut self,
        def: &ResourceDef,
        parent: Option<ResourceIdx>,
        instance: Option<u32>,
    ) -> PlacementResult<ResourceIdx> {
        let id = match instance {
            Some(n) => format!("{}:{n}", def.id),
            None => def.id.clone(),
        };
        if self.index.contains_key(&id) {
            return Err(PlacementError::DuplicateResource(id));
        }

        let invalid = |reason: &str| PlacementError::InvalidContainer {
            id: def.id.clone(),
            reason: reason.to_string(),
        };

        let variant = match def.kind {
            ResourceKind::Primitive => {
                if !def.children.is_empty() {
                    warn!(resource = %def.id, "primitive resources have no children, ignoring them");
                }
                Variant::Primitive
            }
            ResourceKind::Group => {
                if def.children.is_empty() {
                    return Err(invalid("group has no members"));
                }
                if def.children.iter().any(|c| c.kind != ResourceKind::Primitive) {
                    return Err(invalid("group members must be primitives"));
                }
                Variant::Group(GroupData {
                    ordered: def.ordered.unwrap_or(true),
                    colocated: def.colocated.unwrap_or(true),
                })
            }
            ResourceKind::Clone | ResourceKind::Master => {
                if def.children.len() != 1 {
                    return Err(invalid("expected exactly one template resource"));
                }
                if matches!(def.children[0].kind, ResourceKind::Clone | ResourceKind::Master) {
                    return Err(invalid("clones cannot be nested"));
                }
                if parent.is_some() {
                    return Err(invalid("clones must be top-level resources"));
                }
                if def.clone_max == Some(0) {
                    return Err(invalid("clone_max must be positive"));
                }
                let clone = CloneData {
                    clone_max: def.clone_max.unwrap_or(self.nodes.len().max(1) as u32),
                    clone_node_max: def.clone_node_max.unwrap_or(1),
                    ordered: def.ordered.unwrap_or(false),
                    active_instances: 0,
                };
                if def.kind == ResourceKind::Clone {
                    Variant::Clone(clone)
                } else {
                    Variant::Master(MasterData {
                        clone,
                        master_max: def.master_max.unwrap_or(1),
                        master_node_max: def.master_node_max.unwrap_or(1),
                        masters_allocated: 0,
                        applied_master_prefs: false,
                        merged_master_weights: false,
                    })
                }
            }
        };

        let long_name = match parent {
            Some(p) => format!("{}:{id}", self.resource(p).long_name),
            None => id.clone(),
        };
        let mut rsc = Resource::new(id.clone(), long_name, variant);
        rsc.parent = parent;
        rsc.instance = instance;
        rsc.timeouts = def.timeouts.clone();
        rsc.priority = def.priority;
        rsc.managed = def.managed;
        rsc.target_role = def.target_role;
        if let Some(p) = parent.map(|p| self.resource(p)) {
            if def.priority == 0 {
                rsc.priority = p.priority;
            }
            rsc.managed = def.managed && p.managed;
            rsc.target_role = def.target_role.or(p.target_role);
        }
        if self.config.symmetric_cluster {
            rsc.allowed_nodes = self.nodes.iter().map(|d| Node::new(Arc::clone(d), 0)).collect();
        }

        let idx = ResourceIdx(self.resources.len());
        self.resources.push(rsc);
        self.index.insert(id, idx);

        match def.kind {
            ResourceKind::Group => {
                for child_def in &def.children {
                    let child = self.unpack_resource(child_def, Some(idx), instance)?;
                    self.resource_mut(idx).children.push(child);
                }
            }
            ResourceKind::Clone | ResourceKind::Master => {
                let count = self.resource(idx).variant.clone_data().map_or(0, |c| c.clone_max);
                for n in 0..count {
                    let child = self.unpack_resource(&def.children[0], Some(idx), Some(n))?;
                    self.resource_mut(idx).children.push(child);
                }
            }
            ResourceKind::Primitive => {}
        }

        Ok(idx)
    }

    fn unpack_status(&mut self, status: &[ResourceStatus]) {
        for entry in status {
            let Some(idx) = self.find_resource(&entry.resource) else {
                warn!(resource = %entry.resource, "status for unknown resource, ignoring");
                continue;
            };
            let Some(details) = self.node_details(&entry.node) else {
                warn!(resource = %entry.resource, node = %entry.node, "status on unknown node, ignoring");
                continue;
            };
            if !self.resource(idx).is_primitive() {
                warn!(resource = %entry.resource, "status must name a primitive, ignoring");
                continue;
            }
            if !entry.role.is_active() {
                continue;
            }
            if !details.online && !details.unclean {
                debug!(resource = %entry.resource, node = %details.uname, "node left cleanly, resource is stopped");
                continue;
            }

            let mut role = entry.role;
            if role.is_multistate() && self.master_scope(idx).is_none() {
                warn!(resource = %entry.resource, role = %role, "role requires a multi-state resource, treating as Started");
                role = Role::Started;
            }

            let rsc = self.resource_mut(idx);
            rsc.running_on.push(Node::new(details, 0));
            rsc.role = rsc.role.max(role);
            rsc.failed |= entry.failed;
        }

        // Containers summarise their members; children always follow
        // their parent in the arena, so a reverse walk sees them first.
        for i in (0..self.resources.len()).rev() {
            if self.resources[i].children.is_empty() {
                continue;
            }
            let mut role = Role::Stopped;
            let mut running: Vec<Node> = Vec::new();
            for child in &self.resources[i].children {
                let child = &self.resources[child.0];
                role = role.max(child.role);
                for node in &child.running_on {
                    if !running.iter().any(|n| n.same_node(node)) {
                        running.push(node.copy());
                    }
                }
            }
            self.resources[i].role = role;
            self.resources[i].running_on = running;
        }
    }

    fn unpack_colocations(&mut self, defs: &[ColocationDef]) {
        for def in defs {
            let (Some(mut lh), Some(rh)) = (self.find_resource(&def.from), self.find_resource(&def.to)) else {
                warn!(constraint = %def.id, "colocation references an unknown resource, ignoring");
                continue;
            };
            if lh == rh {
                warn!(constraint = %def.id, "resource colocated with itself, ignoring");
                continue;
            }
            // A group follows its first member.
            if let Variant::Group(_) = self.resource(lh).variant {
                if let Some(first) = self.resource(lh).children.first() {
                    lh = *first;
                }
            }
            self.push_colocation(Colocation {
                id: def.id.clone(),
                rsc_lh: lh,
                rsc_rh: rh,
                score: def.score,
                role_lh: def.from_role.unwrap_or_default(),
                role_rh: def.to_role.unwrap_or_default(),
                node_attribute: def.node_attribute.clone(),
            });
        }
    }

    fn add_group_colocations(&mut self) {
        for i in 0..self.resources.len() {
            let Variant::Group(data) = &self.resources[i].variant else {
                continue;
            };
            if !data.colocated {
                continue;
            }
            let group_id = self.resources[i].id.clone();
            let members = self.resources[i].children.clone();
            for pair in members.windows(2) {
                let id = format!(
                    "{group_id}:{}-with-{}",
                    self.resource(pair[1]).id,
                    self.resource(pair[0]).id
                );
                self.push_colocation(Colocation {
                    id,
                    rsc_lh: pair[1],
                    rsc_rh: pair[0],
                    score: INFINITY,
                    role_lh: Role::Unknown,
                    role_rh: Role::Unknown,
                    node_attribute: None,
                });
            }
        }
    }

    fn push_colocation(&mut self, colocation: Colocation) {
        let idx = self.colocations.len();
        self.resource_mut(colocation.rsc_lh).rsc_cons.push(idx);
        self.resource_mut(colocation.rsc_rh).rsc_cons_rhs.push(idx);
        debug!(
            constraint = %colocation.id,
            score = colocation.score,
            "unpacked colocation"
        );
        self.colocations.push(colocation);
    }

    fn unpack_orderings(&mut self, defs: &[OrderDef]) {
        for def in defs {
            let (Some(first), Some(then)) = (self.find_resource(&def.first), self.find_resource(&def.then)) else {
                warn!(constraint = %def.id, "ordering references an unknown resource, ignoring");
                continue;
            };
            if first == then {
                warn!(constraint = %def.id, "resource ordered after itself, ignoring");
                continue;
            }
            let ordering = OrderConstraint {
                id: def.id.clone(),
                first,
                first_task: def.first_action,
                then,
                then_task: def.then_action(),
                score: def.score,
            };
            debug!(
                constraint = %ordering.id,
                first = %ordering.first_task,
                then = %ordering.then_task,
                mandatory = ordering.is_mandatory(),
                "unpacked ordering"
            );
            if def.symmetrical {
                let inverse = ordering.inverted();
                self.orderings.push(ordering);
                self.orderings.push(inverse);
            } else {
                self.orderings.push(ordering);
            }
        }
    }

    fn unpack_locations(&mut self, defs: &[LocationDef]) {
        for def in defs {
            let Some(rsc) = self.find_resource(&def.resource) else {
                warn!(constraint = %def.id, resource = %def.resource, "location references an unknown resource, ignoring");
                continue;
            };
            let mut nodes = Vec::new();
            for rule in &def.rules {
                match self.node_details(&rule.node) {
                    Some(details) => nodes.push(Node::new(details, rule.score)),
                    None => warn!(constraint = %def.id, node = %rule.node, "location references an unknown node, ignoring rule"),
                }
            }
            let idx = self.locations.len();
            self.resource_mut(rsc).rsc_location.push(idx);
            self.locations.push(Location {
                id: def.id.clone(),
                rsc,
                role_filter: def.role.unwrap_or_default(),
                nodes,
            });
        }
    }

    // ── Static scoring ──────────────────────────────────────────

    /// Apply location constraints to the target and its descendants.
    ///
    /// Preferences go first; `-INFINITY` exclusions are applied last so a
    /// banned node cannot be re-added by a later preference.
    fn apply_locations(&mut self) {
        let mut exclusions: Vec<(ResourceIdx, Arc<NodeDetails>)> = Vec::new();

        for loc_idx in 0..self.locations.len() {
            let loc = &self.locations[loc_idx];
            match loc.role_filter {
                Role::Unknown | Role::Started => {}
                Role::Stopped => {
                    warn!(constraint = %loc.id, "location filtered on Stopped has no effect, ignoring");
                    continue;
                }
                Role::Slave | Role::Master => {
                    if self.master_scope(loc.rsc).is_none() {
                        warn!(constraint = %loc.id, role = %loc.role_filter, "role filter on a resource that is not multi-state, ignoring");
                    }
                    continue;
                }
            }

            let rules: Vec<(Arc<NodeDetails>, i32)> =
                loc.nodes.iter().map(|n| (Arc::clone(&n.details), n.weight)).collect();
            for target in self.subtree(loc.rsc) {
                for (details, score) in &rules {
                    if *score <= -INFINITY {
                        exclusions.push((target, Arc::clone(details)));
                        continue;
                    }
                    let allowed = &mut self.resources[target.0].allowed_nodes;
                    match find_node_mut(allowed, &details.id) {
                        Some(node) if *score >= 0 => node.weight = merge_weights(node.weight, *score),
                        Some(node) => node.weight = add_scores(node.weight, *score),
                        None => allowed.push(Node::new(Arc::clone(details), *score)),
                    }
                }
            }
        }

        for (target, details) in exclusions {
            let rsc = self.resource_mut(target);
            rsc.allowed_nodes.retain(|n| n.id() != details.id);
            debug!(resource = %rsc.id, node = %details.uname, "node banned by location");
        }
    }

    fn apply_node_health(&mut self) {
        for rsc in &mut self.resources {
            for node in rsc.allowed_nodes.iter_mut().filter(|n| !n.can_run_resources()) {
                node.weight = -INFINITY;
            }
        }
    }

    fn apply_target_roles(&mut self) {
        let stopped: Vec<ResourceIdx> = (0..self.resources.len())
            .map(ResourceIdx)
            .filter(|idx| self.resource(*idx).target_role == Some(Role::Stopped))
            .collect();
        for idx in stopped {
            info!(resource = %self.resource(idx).id, "target role is Stopped");
            ban_everywhere(self.resource_mut(idx));
        }
    }

    fn apply_stickiness(&mut self) {
        let stickiness = self.config.resource_stickiness;
        if stickiness == 0 {
            return;
        }
        for rsc in self.resources.iter_mut().filter(|r| r.is_primitive()) {
            let running: Vec<String> = rsc.running_on.iter().map(|n| n.id().to_string()).collect();
            for id in running {
                if let Some(node) = find_node_mut(&mut rsc.allowed_nodes, &id) {
                    node.weight = add_scores(node.weight, stickiness);
                }
            }
        }
    }

    fn apply_quorum_policy(&mut self) {
        if self.have_quorum {
            return;
        }
        match self.config.no_quorum_policy {
            NoQuorumPolicy::Ignore => {
                warn!("no quorum, ignoring as configured");
            }
            NoQuorumPolicy::Stop => {
                warn!("no quorum, stopping all resources");
                for rsc in &mut self.resources {
                    ban_everywhere(rsc);
                }
            }
            NoQuorumPolicy::Freeze => {
                warn!("no quorum, freezing resources in place");
                for rsc in &mut self.resources {
                    let running: Vec<String> = rsc.running_on.iter().map(|n| n.id().to_string()).collect();
                    for node in rsc.allowed_nodes.iter_mut() {
                        if !running.iter().any(|id| id == node.id()) {
                            node.weight = -INFINITY;
                        }
                    }
                }
            }
        }
    }
}

fn ban_everywhere(rsc: &mut Resource) {
    for node in rsc.allowed_nodes.iter_mut() {
        node.weight = -INFINITY;
    }
}
