//! Colour allocator: turns weighted candidate lists into node choices.
//!
//! Top-level resources are coloured in priority order (configuration
//! order breaks ties). Colouring a resource first colours everything it
//! depends on through colocation, so a dependency may be placed before
//! a higher-priority resource that happens to come later.

use std::collections::HashMap;

use hapolicy_core::{INFINITY, Role, add_scores};
use tracing::{debug, error, info, warn};

use crate::color::Color;
use crate::constraint::Colocation;
use crate::node::Node;
use crate::promotion::{apply_master_preferences, promote_instances};
use crate::resource::{ResourceIdx, Variant};
use crate::weights::{dup, find_node, intersect, update_from};
use crate::working_set::WorkingSet;

/// What the colocation pass decided about a dependent resource.
#[derive(Debug, Default)]
struct Verdict {
    /// Colour to share with a mandatory partner.
    join: Option<Color>,
    /// A mandatory partner is not running anywhere.
    blocked: bool,
}

/// Allocate every resource in the working set.
pub fn allocate(ws: &mut WorkingSet) {
    let mut order = ws.top_level.clone();
    order.sort_by(|a, b| ws.resource(*b).priority.cmp(&ws.resource(*a).priority));

    for idx in order {
        color_resource(ws, idx);
    }
    verify_colocations(ws);

    info!(
        colors = ws.colors.len(),
        unallocated = ws.unallocated.len(),
        "allocation complete"
    );
}

/// Colour one resource (and whatever it depends on).
///
/// Returns the chosen node id for primitives and groups.
pub fn color_resource(ws: &mut WorkingSet, idx: ResourceIdx) -> Option<String> {
    let rsc = ws.resource(idx);
    if !rsc.provisional {
        return rsc.allocated_node_id().map(str::to_string);
    }
    if rsc.allocating {
        debug!(resource = %rsc.id, "dependency loop detected");
        return None;
    }

    match rsc.variant {
        Variant::Primitive => color_primitive(ws, idx),
        Variant::Group(_) => color_group(ws, idx),
        Variant::Clone(_) => {
            color_clone(ws, idx);
            None
        }
        Variant::Master(_) => {
            apply_master_preferences(ws, idx);
            color_clone(ws, idx);
            promote_instances(ws, idx);
            None
        }
    }
}

fn color_primitive(ws: &mut WorkingSet, idx: ResourceIdx) -> Option<String> {
    if !ws.resource(idx).managed {
        return pin_unmanaged(ws, idx);
    }

    ws.resource_mut(idx).allocating = true;
    let mut candidates = dup(&ws.resource(idx).allowed_nodes, false);
    let verdict = apply_colocations(ws, idx, &mut candidates);
    let chosen = choose_node(ws, idx, candidates, verdict);

    let rsc = ws.resource_mut(idx);
    rsc.allocating = false;
    rsc.provisional = false;
    chosen
}

/// Unmanaged resources stay exactly where they are.
fn pin_unmanaged(ws: &mut WorkingSet, idx: ResourceIdx) -> Option<String> {
    let rsc = ws.resource_mut(idx);
    rsc.provisional = false;
    rsc.allocated_to = rsc.running_on.first().map(Node::copy);
    rsc.next_role = if rsc.allocated_to.is_some() { rsc.role } else { Role::Stopped };
    debug!(resource = %rsc.id, node = ?rsc.allocated_node_id(), "unmanaged, leaving in place");
    rsc.allocated_node_id().map(str::to_string)
}

fn color_group(ws: &mut WorkingSet, idx: ResourceIdx) -> Option<String> {
    ws.resource_mut(idx).allocating = true;
    let base = dup(&ws.resource(idx).allowed_nodes, false);
    let members = ws.resource(idx).children.clone();

    for member in &members {
        restrict_to(ws, *member, &base);
        color_resource(ws, *member);
    }

    let first = members
        .first()
        .and_then(|m| ws.resource(*m).allocated_to.as_ref())
        .map(Node::copy);
    let rsc = ws.resource_mut(idx);
    rsc.allocating = false;
    rsc.provisional = false;
    rsc.next_role = if first.is_some() { Role::Started } else { Role::Stopped };
    rsc.allocated_to = first;
    rsc.allocated_node_id().map(str::to_string)
}

fn color_clone(ws: &mut WorkingSet, idx: ResourceIdx) {
    ws.resource_mut(idx).allocating = true;
    let mut base = dup(&ws.resource(idx).allowed_nodes, false);
    let verdict = apply_colocations(ws, idx, &mut base);
    if verdict.blocked {
        for node in base.iter_mut() {
            node.weight = -INFINITY;
        }
    }

    let (clone_max, clone_node_max) = ws
        .resource(idx)
        .variant
        .clone_data()
        .map_or((0, 0), |c| (c.clone_max, c.clone_node_max));

    // Instances already running go first so they can stay put.
    let mut instances = ws.resource(idx).children.clone();
    instances.sort_by_key(|c| ws.resource(*c).running_on.is_empty());

    let mut per_node: HashMap<String, u32> = HashMap::new();
    let mut active = 0u32;
    for instance in instances {
        restrict_to(ws, instance, &base);
        {
            let rsc = ws.resource_mut(instance);
            for node in rsc.allowed_nodes.iter_mut() {
                let used = per_node.get(node.id()).copied().unwrap_or(0);
                if used >= clone_node_max || active >= clone_max {
                    node.weight = -INFINITY;
                }
            }
            // Emptier nodes first among equal weights.
            rsc.allowed_nodes
                .sort_by_key(|n| per_node.get(n.id()).copied().unwrap_or(0));
        }
        if let Some(node) = color_resource(ws, instance) {
            *per_node.entry(node).or_default() += 1;
            active += 1;
        }
    }

    let rsc = ws.resource_mut(idx);
    rsc.allocating = false;
    rsc.provisional = false;
    rsc.next_role = if active > 0 { Role::Started } else { Role::Stopped };
    if let Some(data) = rsc.variant.clone_data_mut() {
        data.active_instances = active;
    }
    info!(resource = %rsc.id, active, clone_max, "allocated clone instances");
}

/// Limit a member's candidates to what its container allows.
fn restrict_to(ws: &mut WorkingSet, idx: ResourceIdx, base: &[Node]) {
    let rsc = ws.resource_mut(idx);
    rsc.allowed_nodes = intersect(&rsc.allowed_nodes, base, false);
}

// ── Colocation ──────────────────────────────────────────────────

fn apply_colocations(ws: &mut WorkingSet, idx: ResourceIdx, candidates: &mut Vec<Node>) -> Verdict {
    let mut cons = ws.resource(idx).rsc_cons.clone();
    // Mandatory constraints first; configuration order otherwise.
    cons.sort_by_key(|c| {
        let c = &ws.colocations[*c];
        !(c.is_mandatory() || c.is_exclusion())
    });

    let mut verdict = Verdict::default();
    for c in cons {
        let colocation = ws.colocations[c].clone();
        if colocation.score == 0 || !lh_role_applies(ws, idx, &colocation) {
            continue;
        }
        let rh = colocation.rsc_rh;
        if colocation.role_rh.is_multistate() && !ws.resource(rh).is_master() {
            warn!(constraint = %colocation.id, role = %colocation.role_rh, "role filter on a resource that is not multi-state, ignoring");
            continue;
        }

        if colocation.is_mandatory() && ws.resource(rh).provisional && shares_candidates(ws, rh) {
            let rh_rsc = ws.resource_mut(rh);
            update_from(&mut rh_rsc.allowed_nodes, candidates, 1);
            debug!(constraint = %colocation.id, "combined scores into {}", rh_rsc.id);
        }

        if ws.resource(rh).provisional {
            let top = ws.top_parent(rh);
            color_resource(ws, top);
        }
        // Still unplaced: the partner is further up this dependency loop
        // and follows whatever this resource picks.
        if ws.resource(rh).provisional {
            debug!(constraint = %colocation.id, with = %ws.resource(rh).id, "partner not placed yet, deferring to it");
            continue;
        }
        apply_to_rh(ws, idx, &colocation, candidates, &mut verdict);
    }
    verdict
}

/// Partners whose own list should absorb a dependent's preferences.
fn shares_candidates(ws: &WorkingSet, idx: ResourceIdx) -> bool {
    matches!(ws.resource(idx).variant, Variant::Primitive | Variant::Group(_))
}

fn lh_role_applies(ws: &WorkingSet, idx: ResourceIdx, cons: &Colocation) -> bool {
    match cons.role_lh {
        Role::Unknown | Role::Started => true,
        Role::Stopped => {
            debug!(constraint = %cons.id, "colocation of a stopped resource has no effect");
            false
        }
        role => {
            if ws.master_scope(idx).is_none() {
                warn!(constraint = %cons.id, role = %role, "role filter on a resource that is not multi-state, ignoring");
                return false;
            }
            ws.resource(idx).next_role == role
        }
    }
}

fn apply_to_rh(
    ws: &WorkingSet,
    lh: ResourceIdx,
    cons: &Colocation,
    candidates: &mut Vec<Node>,
    verdict: &mut Verdict,
) {
    let targets = ws.placement_of(cons.rsc_rh, cons.role_rh);
    if targets.is_empty() {
        if cons.is_mandatory() {
            warn!(
                resource = %ws.resource(lh).id,
                with = %ws.resource(cons.rsc_rh).id,
                constraint = %cons.id,
                "mandatory colocation with an inactive resource"
            );
            verdict.blocked = true;
        }
        return;
    }

    let matches = |n: &Node| targets.iter().any(|t| cons.nodes_match(n, t));
    if cons.is_mandatory() {
        candidates.retain(|n| matches(n));
        let rh = ws.resource(cons.rsc_rh);
        if cons.node_attribute.is_none() && rh.is_primitive() && verdict.join.is_none() {
            verdict.join = rh.color;
        }
    } else if cons.is_exclusion() {
        candidates.retain(|n| !matches(n));
    } else {
        for node in candidates.iter_mut().filter(|n| matches(n)) {
            node.weight = add_scores(node.weight, cons.score);
        }
    }
    debug!(
        constraint = %cons.id,
        score = cons.score,
        remaining = candidates.len(),
        "applied colocation"
    );
}

// ── Node choice ─────────────────────────────────────────────────

fn choose_node(ws: &mut WorkingSet, idx: ResourceIdx, candidates: Vec<Node>, verdict: Verdict) -> Option<String> {
    let priority = ws.resource(idx).priority;

    let chosen = if verdict.blocked {
        None
    } else if let Some(color) = verdict.join {
        let node = ws
            .colors
            .chosen_node(color)
            .and_then(|n| find_node(&candidates, n.id()))
            .filter(|n| n.weight >= 0)
            .map(Node::copy);
        if node.is_some() {
            ws.colors.join(color, idx, priority);
            ws.resource_mut(idx).color = Some(color);
        }
        node
    } else {
        let color = ws.colors.create(idx, priority, &candidates);
        ws.resource_mut(idx).color = Some(color);
        ws.colors.resolve(color).map(Node::copy)
    };

    let Some(node) = chosen else {
        let rsc = ws.resource_mut(idx);
        rsc.next_role = Role::Stopped;
        rsc.allocated_to = None;
        warn!(resource = %rsc.id, "resource cannot run anywhere");
        ws.mark_unallocated(idx);
        return None;
    };

    let rsc = ws.resource_mut(idx);
    for other in rsc.allowed_nodes.iter_mut().filter(|n| !n.same_node(&node)) {
        other.weight = -INFINITY;
    }
    if rsc.next_role == Role::Unknown {
        rsc.next_role = Role::Started;
    }
    debug!(resource = %rsc.id, node = %node.uname(), weight = node.weight, "allocated resource");
    let id = node.id().to_string();
    rsc.allocated_to = Some(node);
    Some(id)
}

/// Report mandatory colocations the final placement violates.
fn verify_colocations(ws: &WorkingSet) {
    for cons in &ws.colocations {
        if !(cons.is_mandatory() || cons.is_exclusion()) || cons.role_lh != Role::Unknown || cons.role_rh != Role::Unknown {
            continue;
        }
        let (lh, rh) = (ws.resource(cons.rsc_lh), ws.resource(cons.rsc_rh));
        let (Some(lh_node), Some(rh_node)) = (&lh.allocated_to, &rh.allocated_to) else {
            continue;
        };
        let together = cons.nodes_match(lh_node, rh_node);
        if cons.is_mandatory() != together {
            error!(
                constraint = %cons.id,
                lh = %lh.id,
                rh = %rh.id,
                "final placement violates mandatory colocation"
            );
        }
    }
}
