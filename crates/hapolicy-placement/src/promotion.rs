//! Promotion ranking for multi-state resources.
//!
//! Runs after a master's instances have been coloured. Each allocated
//! instance gets a promotion score from node attributes
//! (`master-<instance id>`) and `Master`-filtered constraints; the
//! instances are then ranked and the top ones promoted under the
//! `master_max` and `master_node_max` ceilings.

use hapolicy_core::{INFINITY, Role, Score, add_scores, parse_score};
use tracing::{debug, info, warn};

use crate::constraint::Colocation;
use crate::node::{Node, NodeDetails};
use crate::resource::ResourceIdx;
use crate::weights::{dup, find_node, find_node_mut};
use crate::working_set::WorkingSet;

/// Promotion score of `idx` on `node`.
///
/// Containers sum the scores of their members; a member without the
/// attribute contributes `not_set`.
pub fn master_score(ws: &WorkingSet, idx: ResourceIdx, node: &NodeDetails, not_set: Score) -> Score {
    let rsc = ws.resource(idx);
    if !rsc.children.is_empty() {
        return rsc
            .children
            .iter()
            .fold(0, |acc, child| add_scores(acc, master_score(ws, *child, node, not_set)));
    }

    for name in [&rsc.id, &rsc.long_name] {
        let Some(value) = node.attr(&format!("master-{name}")) else {
            continue;
        };
        return match parse_score(value) {
            Ok(score) => score,
            Err(err) => {
                warn!(resource = %rsc.id, node = %node.uname, %err, "ignoring promotion score");
                not_set
            }
        };
    }
    not_set
}

/// Whether anything expresses a promotion preference for `ms`.
fn has_promotion_preferences(ws: &WorkingSet, ms: ResourceIdx) -> bool {
    let members = ws.subtree(ms);
    let by_attribute = members
        .iter()
        .map(|idx| ws.resource(*idx))
        .filter(|rsc| rsc.children.is_empty())
        .any(|rsc| {
            ws.nodes.iter().any(|node| {
                node.attrs.contains_key(&format!("master-{}", rsc.id))
                    || node.attrs.contains_key(&format!("master-{}", rsc.long_name))
            })
        });
    let by_location = ws
        .locations
        .iter()
        .any(|loc| loc.role_filter == Role::Master && members.contains(&loc.rsc));
    by_attribute || by_location
}

/// Steer instance placement towards nodes where they would be promoted.
///
/// Runs once, before the instances are coloured.
pub fn apply_master_preferences(ws: &mut WorkingSet, ms: ResourceIdx) {
    let Some(data) = ws.resource_mut(ms).variant.master_data_mut() else {
        return;
    };
    if data.applied_master_prefs {
        return;
    }
    data.applied_master_prefs = true;

    for child in ws.resource(ms).children.clone() {
        let updates: Vec<(usize, Score)> = ws
            .resource(child)
            .allowed_nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.can_run_resources())
            .map(|(i, node)| (i, master_score(ws, child, &node.details, 0)))
            .filter(|(_, score)| *score > 0)
            .collect();

        let rsc = ws.resource_mut(child);
        for (i, score) in updates {
            let node = &mut rsc.allowed_nodes[i];
            node.weight = add_scores(node.weight, score);
            debug!(resource = %rsc.id, node = %node.uname(), weight = node.weight, "applied promotion preference");
        }
    }
}

/// Rank the instances of `ms` and decide which become Master.
pub fn promote_instances(ws: &mut WorkingSet, ms: ResourceIdx) {
    let Some((master_max, master_node_max)) = ws
        .resource(ms)
        .variant
        .master_data()
        .map(|m| (m.master_max, m.master_node_max))
    else {
        return;
    };

    for node in ws.resource_mut(ms).allowed_nodes.iter_mut() {
        node.count = 0;
    }
    for idx in ws.subtree(ms) {
        let rsc = ws.resource_mut(idx);
        if rsc.role == Role::Started {
            rsc.role = Role::Slave;
        }
    }

    let not_set = if has_promotion_preferences(ws, ms) { -1 } else { 0 };
    let children = ws.resource(ms).children.clone();
    for child in &children {
        assign_priority(ws, ms, *child, not_set);
    }

    promotion_order(ws, ms);

    let mut ranked = children;
    ranked.sort_by(|a, b| {
        let (a, b) = (ws.resource(*a), ws.resource(*b));
        b.sort_index
            .cmp(&a.sort_index)
            .then(b.role.cmp(&a.role))
            .then(a.instance.cmp(&b.instance))
    });

    let ms_managed = ws.resource(ms).managed;
    let mut promoted = 0u32;
    for child in &ranked {
        let rsc = ws.resource(*child);
        debug!(resource = %rsc.id, node = ?rsc.allocated_node_id(), score = rsc.sort_index, "promotion score");

        let eligible = rsc.sort_index >= 0
            && (promoted < master_max || !ms_managed)
            && can_be_master(ws, *child, ms, master_node_max);
        if !eligible {
            set_role_slave(ws, *child);
            continue;
        }

        if let Some(id) = ws.resource(*child).allocated_node_id().map(str::to_string) {
            if let Some(node) = find_node_mut(&mut ws.resource_mut(ms).allowed_nodes, &id) {
                node.count += 1;
            }
        }
        set_role_master(ws, *child);
        promoted += 1;
        info!(resource = %ws.resource(*child).id, "promoting to master");
    }

    let rsc = ws.resource_mut(ms);
    if let Some(data) = rsc.variant.master_data_mut() {
        data.masters_allocated = promoted;
    }
    info!(
        resource = %rsc.id,
        promoted,
        possible = master_max,
        "promoted {promoted} instances of a possible {master_max} to master"
    );
}

fn assign_priority(ws: &mut WorkingSet, ms: ResourceIdx, child: ResourceIdx, not_set: Score) {
    let rsc = ws.resource(child);
    let Some(chosen) = rsc.allocated_to.as_ref().map(|n| n.details.clone()) else {
        return;
    };

    let priority = match rsc.next_role {
        Role::Unknown | Role::Started => {
            if matches!(rsc.target_role, Some(Role::Slave | Role::Stopped)) {
                -INFINITY
            } else {
                master_score(ws, child, &chosen, not_set)
            }
        }
        Role::Slave | Role::Stopped => -INFINITY,
        Role::Master => rsc.priority,
    };

    // Master-only location preferences for the chosen node.
    let priority = ws
        .locations
        .iter()
        .filter(|loc| loc.role_filter == Role::Master && (loc.rsc == child || loc.rsc == ms))
        .filter_map(|loc| find_node(&loc.nodes, &chosen.id))
        .fold(priority, |acc, node| add_scores(acc, node.weight));

    let rsc = ws.resource_mut(child);
    rsc.priority = priority;
    rsc.sort_index = if rsc.next_role == Role::Master { INFINITY } else { priority };
    debug!(resource = %rsc.id, node = %chosen.uname, priority, "assigned promotion priority");
}

/// Fold instance priorities and `Master`-filtered colocations into the
/// master's node weights, then read each instance's score back.
///
/// Only the first call per pass has an effect.
fn promotion_order(ws: &mut WorkingSet, ms: ResourceIdx) {
    match ws.resource_mut(ms).variant.master_data_mut() {
        Some(data) if !data.merged_master_weights => data.merged_master_weights = true,
        _ => return,
    }

    let children = ws.resource(ms).children.clone();
    for child in &children {
        let rsc = ws.resource(*child);
        let Some(id) = rsc.allocated_node_id().map(str::to_string) else {
            continue;
        };
        let sort_index = rsc.sort_index;
        if sort_index < 0 {
            continue;
        }
        if let Some(node) = find_node_mut(&mut ws.resource_mut(ms).allowed_nodes, &id) {
            node.weight = add_scores(node.weight, sort_index);
        }
    }

    let outgoing: Vec<Colocation> = ws
        .resource(ms)
        .rsc_cons
        .iter()
        .map(|c| ws.colocations[*c].clone())
        .filter(|c| c.role_lh == Role::Master)
        .collect();
    for colocation in &outgoing {
        merge_partner(ws, ms, colocation, colocation.rsc_rh, colocation.role_rh);
    }

    let incoming: Vec<Colocation> = ws
        .resource(ms)
        .rsc_cons_rhs
        .iter()
        .map(|c| ws.colocations[*c].clone())
        .filter(|c| c.role_rh == Role::Master)
        .collect();
    for colocation in &incoming {
        merge_partner(ws, ms, colocation, colocation.rsc_lh, colocation.role_lh);
    }

    for child in &children {
        let rsc = ws.resource(*child);
        let sort_index = if !rsc.managed && rsc.next_role == Role::Master {
            INFINITY
        } else if rsc.sort_index < 0 {
            continue;
        } else {
            match rsc
                .allocated_node_id()
                .and_then(|id| ws.resource(ms).allowed_node(id))
            {
                Some(node) => node.weight,
                None => continue,
            }
        };
        ws.resource_mut(*child).sort_index = sort_index;
    }
}

/// Where the other side of a colocation is, or could be.
fn partner_nodes(ws: &WorkingSet, partner: ResourceIdx, role: Role) -> Vec<Node> {
    if ws.resource(partner).provisional {
        return dup(&ws.resource(partner).allowed_nodes, true);
    }
    let mut nodes = ws.placement_of(partner, role);
    for node in nodes.iter_mut() {
        node.weight = 0;
    }
    nodes
}

fn merge_partner(ws: &mut WorkingSet, ms: ResourceIdx, colocation: &Colocation, partner: ResourceIdx, role: Role) {
    if colocation.score == 0 {
        return;
    }
    // An unplaced partner could still land anywhere it is allowed.
    if colocation.is_exclusion() && ws.resource(partner).provisional {
        debug!(constraint = %colocation.id, "partner not placed yet, skipping exclusion");
        return;
    }
    let partner = partner_nodes(ws, partner, role);
    let rsc = ws.resource_mut(ms);
    for node in rsc.allowed_nodes.iter_mut() {
        let matched = {
            let current: &Node = node;
            partner
                .iter()
                .filter(|p| colocation.nodes_match(current, p))
                .map(|p| p.weight)
                .max()
        };
        node.weight = match matched {
            Some(weight) if colocation.is_mandatory() => add_scores(node.weight, weight.max(0)),
            None if colocation.is_mandatory() => -INFINITY,
            Some(_) if colocation.is_exclusion() => -INFINITY,
            Some(_) => add_scores(node.weight, colocation.score),
            None => node.weight,
        };
    }
    debug!(resource = %rsc.id, constraint = %colocation.id, "merged master colocation");
}

/// Whether `idx` may be promoted on its allocated node.
fn can_be_master(ws: &WorkingSet, idx: ResourceIdx, ms: ResourceIdx, master_node_max: u32) -> bool {
    let rsc = ws.resource(idx);
    if !rsc.children.iter().all(|child| can_be_master(ws, *child, ms, master_node_max)) {
        debug!(resource = %rsc.id, "member cannot be promoted");
        return false;
    }

    let Some(node) = rsc.allocated_to.as_ref() else {
        debug!(resource = %rsc.id, "not allocated");
        return false;
    };

    if !rsc.managed {
        if rsc.role == Role::Master {
            info!(resource = %rsc.id, node = %node.uname(), "forcing unmanaged master to remain promoted");
            return true;
        }
        debug!(resource = %rsc.id, "unmanaged");
        return false;
    }

    if rsc.priority < 0 {
        debug!(resource = %rsc.id, priority = rsc.priority, "negative priority");
        return false;
    }
    if !node.can_run_resources() {
        debug!(resource = %rsc.id, node = %node.uname(), "node cannot run resources");
        return false;
    }

    let parent = ws.resource(ms);
    let Some(local) = parent.allowed_node(node.id()) else {
        debug!(resource = %rsc.id, node = %node.uname(), "node not allowed for master");
        return false;
    };
    if local.count >= master_node_max && parent.managed {
        debug!(resource = %rsc.id, node = %node.uname(), count = local.count, "node already hosts enough masters");
        return false;
    }
    true
}

fn set_role_master(ws: &mut WorkingSet, idx: ResourceIdx) {
    for member in ws.subtree(idx) {
        ws.resource_mut(member).next_role = Role::Master;
    }
}

fn set_role_slave(ws: &mut WorkingSet, idx: ResourceIdx) {
    for member in ws.subtree(idx) {
        let rsc = ws.resource_mut(member);
        rsc.next_role = if rsc.allocated_to.is_some() { Role::Slave } else { Role::Stopped };
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use hapolicy_core::{
        ClusterSnapshot, ColocationDef, ConfigSnapshot, LocationDef, LocationRule, NodeRecord,
        PolicyConfig, ResourceDef, ResourceStatus, Snapshot,
    };

    use super::*;
    use crate::allocator::allocate;

    fn make_node(id: &str, attrs: &[(&str, &str)]) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            uname: None,
            online: true,
            unclean: false,
            standby: false,
            shutdown: false,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn master(id: &str, template: &str, clone_max: u32) -> ResourceDef {
        let mut ms = ResourceDef::master_of(id, ResourceDef::primitive(template));
        ms.clone_max = Some(clone_max);
        ms
    }

    fn snapshot(nodes: Vec<NodeRecord>, resources: Vec<ResourceDef>) -> Snapshot {
        Snapshot {
            cluster: ClusterSnapshot {
                have_quorum: true,
                nodes,
                status: Vec::new(),
            },
            config: ConfigSnapshot {
                resources,
                ..Default::default()
            },
        }
    }

    fn allocated(snap: &Snapshot) -> WorkingSet {
        let mut ws = WorkingSet::unpack(snap, &PolicyConfig::default()).unwrap();
        allocate(&mut ws);
        ws
    }

    fn masters(ws: &WorkingSet, ms: &str) -> Vec<String> {
        let ms = ws.find_resource(ms).unwrap();
        ws.resource(ms)
            .children
            .iter()
            .map(|c| ws.resource(*c))
            .filter(|c| c.next_role == Role::Master)
            .map(|c| c.id.clone())
            .collect()
    }

    fn masters_allocated(ws: &WorkingSet, ms: &str) -> u32 {
        let ms = ws.find_resource(ms).unwrap();
        ws.resource(ms).variant.master_data().unwrap().masters_allocated
    }

    #[test]
    fn master_score_prefers_instance_id_then_long_name() {
        let snap = snapshot(
            vec![make_node("a", &[("master-db:0", "10")]), make_node("b", &[("master-ms:db:1", "7")])],
            vec![master("ms", "db", 2)],
        );
        let ws = WorkingSet::unpack(&snap, &PolicyConfig::default()).unwrap();
        let db0 = ws.find_resource("db:0").unwrap();
        let db1 = ws.find_resource("db:1").unwrap();
        let a = ws.node_details("a").unwrap();
        let b = ws.node_details("b").unwrap();

        assert_eq!(master_score(&ws, db0, &a, -1), 10);
        assert_eq!(master_score(&ws, db0, &b, -1), -1);
        assert_eq!(master_score(&ws, db1, &b, -1), 7);
        assert_eq!(master_score(&ws, db1, &a, 0), 0);
    }

    #[test]
    fn master_score_sums_container_members() {
        let snap = snapshot(
            vec![make_node("a", &[("master-db:0", "10"), ("master-db:1", "INFINITY")])],
            vec![master("ms", "db", 2)],
        );
        let ws = WorkingSet::unpack(&snap, &PolicyConfig::default()).unwrap();
        let ms = ws.find_resource("ms").unwrap();
        let a = ws.node_details("a").unwrap();
        assert_eq!(master_score(&ws, ms, &a, 0), INFINITY);
    }

    #[test]
    fn unparseable_scores_fall_back_to_not_set() {
        let snap = snapshot(vec![make_node("a", &[("master-db:0", "lots")])], vec![master("ms", "db", 1)]);
        let ws = WorkingSet::unpack(&snap, &PolicyConfig::default()).unwrap();
        let db0 = ws.find_resource("db:0").unwrap();
        assert_eq!(master_score(&ws, db0, &ws.node_details("a").unwrap(), -1), -1);
    }

    #[test]
    fn promotes_one_without_preferences() {
        let mut standby = make_node("c", &[]);
        standby.standby = true;
        let snap = snapshot(
            vec![make_node("a", &[]), make_node("b", &[]), standby],
            vec![ResourceDef::master_of("ms", ResourceDef::primitive("db"))],
        );
        let ws = allocated(&snap);

        assert_eq!(masters(&ws, "ms"), vec!["db:0".to_string()]);
        assert_eq!(masters_allocated(&ws, "ms"), 1);
        let db1 = ws.resource(ws.find_resource("db:1").unwrap());
        assert_eq!(db1.next_role, Role::Slave);
        let db2 = ws.resource(ws.find_resource("db:2").unwrap());
        assert_eq!(db2.next_role, Role::Stopped);
    }

    #[test]
    fn highest_attribute_wins() {
        let snap = snapshot(
            vec![make_node("a", &[("master-db:0", "5")]), make_node("b", &[("master-db:1", "50")])],
            vec![master("ms", "db", 2)],
        );
        let ws = allocated(&snap);
        assert_eq!(masters(&ws, "ms"), vec!["db:1".to_string()]);
    }

    #[test]
    fn attributes_elsewhere_mean_no_promotion_by_default() {
        // db:0 lands on a, which has no score for it.
        let snap = snapshot(
            vec![make_node("a", &[]), make_node("b", &[("master-db:0", "5")])],
            vec![master("ms", "db", 1)],
        );
        let mut ws = WorkingSet::unpack(&snap, &PolicyConfig::default()).unwrap();
        // Pin the instance to a so the preference cannot move it.
        let db0 = ws.find_resource("db:0").unwrap();
        ws.resource_mut(db0).allowed_nodes.retain(|n| n.id() == "a");
        allocate(&mut ws);

        assert!(masters(&ws, "ms").is_empty());
        assert_eq!(masters_allocated(&ws, "ms"), 0);
        assert_eq!(ws.resource(db0).next_role, Role::Slave);
    }

    #[test]
    fn master_preferences_steer_instance_placement() {
        let snap = snapshot(
            vec![make_node("a", &[]), make_node("b", &[("master-db:0", "5")])],
            vec![master("ms", "db", 1)],
        );
        let ws = allocated(&snap);
        let db0 = ws.resource(ws.find_resource("db:0").unwrap());
        assert_eq!(db0.allocated_node_id(), Some("b"));
        assert_eq!(db0.next_role, Role::Master);
    }

    #[test]
    fn master_location_selects_node() {
        let mut snap = snapshot(vec![make_node("a", &[]), make_node("b", &[])], vec![master("ms", "db", 2)]);
        snap.config.locations.push(LocationDef {
            id: "master-on-b".to_string(),
            resource: "ms".to_string(),
            role: Some(Role::Master),
            rules: vec![LocationRule { node: "b".to_string(), score: 100 }],
        });
        let ws = allocated(&snap);
        let promoted = masters(&ws, "ms");
        assert_eq!(promoted.len(), 1);
        let winner = ws.resource(ws.find_resource(&promoted[0]).unwrap());
        assert_eq!(winner.allocated_node_id(), Some("b"));
    }

    #[test]
    fn master_max_and_node_max_are_ceilings() {
        let mut ms = master("ms", "db", 4);
        ms.clone_node_max = Some(2);
        ms.master_max = Some(3);
        ms.master_node_max = Some(1);
        let snap = snapshot(vec![make_node("a", &[]), make_node("b", &[])], vec![ms]);
        let ws = allocated(&snap);

        let promoted = masters(&ws, "ms");
        assert_eq!(promoted.len(), 2);
        let mut nodes: Vec<&str> = promoted
            .iter()
            .filter_map(|id| ws.resource(ws.find_resource(id).unwrap()).allocated_node_id())
            .collect();
        nodes.sort();
        assert_eq!(nodes, vec!["a", "b"]);
    }

    #[test]
    fn current_master_is_kept_on_ties() {
        let mut snap = snapshot(vec![make_node("a", &[]), make_node("b", &[])], vec![master("ms", "db", 2)]);
        snap.cluster.status.push(ResourceStatus {
            resource: "db:0".to_string(),
            node: "a".to_string(),
            role: Role::Slave,
            failed: false,
        });
        snap.cluster.status.push(ResourceStatus {
            resource: "db:1".to_string(),
            node: "b".to_string(),
            role: Role::Master,
            failed: false,
        });
        let ws = allocated(&snap);
        assert_eq!(masters(&ws, "ms"), vec!["db:1".to_string()]);
    }

    #[test]
    fn slave_target_role_blocks_promotion() {
        let mut ms = master("ms", "db", 2);
        ms.target_role = Some(Role::Slave);
        let snap = snapshot(vec![make_node("a", &[]), make_node("b", &[])], vec![ms]);
        let ws = allocated(&snap);
        assert!(masters(&ws, "ms").is_empty());
    }

    #[test]
    fn colocation_with_master_follows_promotion() {
        let mut snap = snapshot(
            vec![make_node("a", &[]), make_node("b", &[("master-db:1", "10")])],
            vec![master("ms", "db", 2), ResourceDef::primitive("vip")],
        );
        snap.config.colocations.push(ColocationDef {
            id: "vip-with-master".to_string(),
            from: "vip".to_string(),
            to: "ms".to_string(),
            score: INFINITY,
            from_role: None,
            to_role: Some(Role::Master),
            node_attribute: None,
        });
        let ws = allocated(&snap);
        let promoted = masters(&ws, "ms");
        assert_eq!(promoted.len(), 1);
        let master_node = ws.resource(ws.find_resource(&promoted[0]).unwrap()).allocated_node_id();
        let vip = ws.resource(ws.find_resource("vip").unwrap());
        assert_eq!(vip.allocated_node_id(), master_node);
    }

    #[test]
    fn master_colocated_away_from_partner() {
        let mut snap = snapshot(
            vec![make_node("a", &[]), make_node("b", &[])],
            vec![ResourceDef::primitive("backup"), master("ms", "db", 2)],
        );
        snap.config.locations.push(LocationDef {
            id: "backup-on-a".to_string(),
            resource: "backup".to_string(),
            role: None,
            rules: vec![LocationRule { node: "a".to_string(), score: 10 }],
        });
        snap.config.colocations.push(ColocationDef {
            id: "master-not-with-backup".to_string(),
            from: "ms".to_string(),
            to: "backup".to_string(),
            score: -INFINITY,
            from_role: Some(Role::Master),
            to_role: None,
            node_attribute: None,
        });
        let ws = allocated(&snap);
        let promoted = masters(&ws, "ms");
        assert_eq!(promoted.len(), 1);
        let node = ws.resource(ws.find_resource(&promoted[0]).unwrap()).allocated_node_id();
        assert_eq!(node, Some("b"));
    }
}
