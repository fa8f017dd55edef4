//! Action graph builder.
//!
//! Walks every resource after allocation and emits the actions that move
//! it from its current role and node to its next role and node, then the
//! orderings between them:
//!
//! - primitives follow the role transition matrix
//! - containers add pseudo milestones (`start`/`running`, `stop`/`stopped`,
//!   and for masters `promote`/`promoted`, `demote`/`demoted`) that fan out
//!   to and fan in from their members, or chain them when ordered
//! - ordering constraints link one resource's action to another's once
//!   every resource has its actions

use hapolicy_core::{Role, Task};
use hapolicy_placement::{Node, ResourceIdx, Variant, WorkingSet};
use tracing::{debug, info, warn};

use crate::action::{ActionId, OrderKind};
use crate::error::{EngineError, EngineResult};
use crate::graph::ActionGraph;

/// Longest possible walk through the role matrix.
const MAX_ROLE_STEPS: usize = 4;

/// Build the action graph for an allocated working set.
pub fn build_graph(ws: &WorkingSet) -> EngineResult<ActionGraph> {
    let mut builder = GraphBuilder {
        ws,
        graph: ActionGraph::new(),
    };
    for idx in &ws.top_level {
        builder.create_actions(*idx)?;
    }
    builder.resource_orderings();
    builder.graph.propagate_runnable();

    let runnable = builder.graph.actions().iter().filter(|a| a.runnable && !a.pseudo).count();
    info!(actions = builder.graph.len(), runnable, "built action graph");
    Ok(builder.graph)
}

/// Next role on the way from `current` to `target`. `None` marks a
/// transition that cannot happen.
fn next_step(current: Role, target: Role) -> Option<Role> {
    use Role::*;
    match (current, target) {
        (Unknown, _) => Some(Stopped),
        (_, Unknown) => Some(Stopped),
        (Stopped, Stopped) => Some(Stopped),
        (Stopped, Started) => Some(Started),
        (Stopped, Slave | Master) => Some(Slave),
        (Started, Stopped) => Some(Stopped),
        (Started, Started) => Some(Started),
        (Started, Slave) => Some(Slave),
        (Started, Master) => Some(Master),
        (Slave, Stopped) => Some(Stopped),
        (Slave, Started) => None,
        (Slave, Slave) => Some(Slave),
        (Slave, Master) => Some(Master),
        (Master, Stopped | Slave) => Some(Slave),
        (Master, Started) => None,
        (Master, Master) => Some(Master),
    }
}

struct GraphBuilder<'a> {
    ws: &'a WorkingSet,
    graph: ActionGraph,
}

impl GraphBuilder<'_> {
    fn create_actions(&mut self, idx: ResourceIdx) -> EngineResult<()> {
        let ws = self.ws;
        match &ws.resource(idx).variant {
            Variant::Primitive => self.primitive_actions(idx),
            Variant::Group(data) => {
                let ordered = data.ordered;
                self.group_actions(idx, ordered)
            }
            Variant::Clone(data) => {
                let ordered = data.ordered;
                self.clone_actions(idx, ordered)
            }
            Variant::Master(data) => {
                let (ordered, masters) = (data.clone.ordered, data.masters_allocated);
                self.clone_actions(idx, ordered)?;
                self.master_actions(idx, ordered, masters)
            }
        }
    }

    // ── Primitives ──────────────────────────────────────────────

    fn primitive_actions(&mut self, idx: ResourceIdx) -> EngineResult<()> {
        let ws = self.ws;
        let rsc = ws.resource(idx);
        if !rsc.managed {
            debug!(resource = %rsc.id, "unmanaged, no actions");
            return Ok(());
        }

        let chosen = rsc.allocated_to.as_ref();
        let target = match rsc.next_role {
            Role::Unknown if chosen.is_some() => Role::Started,
            Role::Unknown => Role::Stopped,
            role => role,
        };
        let mut current = match rsc.role {
            Role::Unknown => Role::Stopped,
            role => role,
        };

        if rsc.running_on.len() > 1 {
            warn!(resource = %rsc.id, nodes = rsc.running_on.len(), "active on more than one node, stopping everywhere");
            for node in &rsc.running_on {
                if current == Role::Master {
                    self.node_action(idx, Task::Demote, node);
                }
                self.node_action(idx, Task::Stop, node);
            }
            current = Role::Stopped;
        } else if let Some(running) = rsc.running_on.first() {
            let moving = chosen.is_some_and(|c| !c.same_node(running));
            if (rsc.failed || moving) && current != Role::Stopped {
                if rsc.failed {
                    info!(resource = %rsc.id, node = %running.uname(), "recovering failed resource");
                } else {
                    info!(resource = %rsc.id, from = %running.uname(), to = ?chosen.map(Node::uname), "moving resource");
                }
                if current == Role::Master {
                    self.node_action(idx, Task::Demote, running);
                }
                self.node_action(idx, Task::Stop, running);
                current = Role::Stopped;
            }
        }

        let mut steps = 0;
        while current != target {
            let step = next_step(current, target).ok_or_else(|| {
                EngineError::Invariant(format!("{}: no transition from {current} to {target}", rsc.id))
            })?;
            steps += 1;
            if steps > MAX_ROLE_STEPS {
                return Err(EngineError::Invariant(format!(
                    "{}: role walk from {} to {target} does not terminate",
                    rsc.id, rsc.role
                )));
            }

            let task = match (current, step) {
                (Role::Stopped, Role::Started | Role::Slave) => Some(Task::Start),
                (Role::Started | Role::Slave, Role::Stopped) => Some(Task::Stop),
                (Role::Started | Role::Slave, Role::Master) => Some(Task::Promote),
                (Role::Master, Role::Slave) => Some(Task::Demote),
                _ => None,
            };
            let node = match task {
                Some(Task::Start | Task::Promote) => chosen,
                _ => rsc.running_on.first(),
            };
            match (task, node) {
                (Some(task), Some(node)) => {
                    self.node_action(idx, task, node);
                }
                (Some(task), None) => {
                    warn!(resource = %rsc.id, task = %task, "no node for action, skipping");
                }
                (None, _) => {}
            }
            current = step;
        }

        self.primitive_orderings(idx);
        Ok(())
    }

    /// Create a real action on `node` and set its runnability and timeout.
    fn node_action(&mut self, idx: ResourceIdx, task: Task, node: &Node) -> ActionId {
        let ws = self.ws;
        let rsc = ws.resource(idx);
        let id = self.graph.custom_action(&rsc.id, task, Some(node.id()));

        let mut runnable = match task {
            Task::Start | Task::Promote => node.can_run_resources(),
            _ => node.details.online && !node.details.unclean,
        };
        if task == Task::Promote {
            let start = self.graph.find(&rsc.id, Task::Start, Some(node.id()));
            if start.is_some_and(|s| !self.graph.action(s).runnable) {
                runnable = false;
            }
        }

        let timeout = rsc
            .timeouts
            .for_task(task)
            .unwrap_or(ws.config.default_action_timeout_ms);
        let action = self.graph.action_mut(id);
        action.runnable = runnable;
        action.timeout_ms = Some(timeout);
        id
    }

    fn primitive_orderings(&mut self, idx: ResourceIdx) {
        let ws = self.ws;
        let id = ws.resource(idx).id.as_str();
        let tasks = |graph: &ActionGraph, task| graph.find_any_node(id, task);
        let (stops, starts) = (tasks(&self.graph, Task::Stop), tasks(&self.graph, Task::Start));
        let (demotes, promotes) = (tasks(&self.graph, Task::Demote), tasks(&self.graph, Task::Promote));

        self.order_all(&stops, &starts, OrderKind::Optional);
        self.order_all(&demotes, &stops, OrderKind::Optional);
        self.order_all(&starts, &promotes, OrderKind::Mandatory);
        self.order_all(&demotes, &promotes, OrderKind::Optional);
    }

    fn order_all(&mut self, firsts: &[ActionId], thens: &[ActionId], kind: OrderKind) {
        for first in firsts {
            for then in thens {
                self.graph.order(*first, *then, kind);
            }
        }
    }

    // ── Containers ──────────────────────────────────────────────

    fn group_actions(&mut self, idx: ResourceIdx, ordered: bool) -> EngineResult<()> {
        let members = self.members(idx)?;
        for member in &members {
            self.create_actions(*member)?;
        }

        let (start, started) = self.milestones(idx, Task::Start, &members);
        let (stop, stopped) = self.milestones(idx, Task::Stop, &members);
        self.graph.order(stopped, start, OrderKind::Mandatory);

        if ordered {
            self.chain(start, started, Task::Start, &members);
            let reversed: Vec<ResourceIdx> = members.iter().rev().copied().collect();
            self.chain(stop, stopped, Task::Stop, &reversed);
        } else {
            self.fan(start, started, Task::Start, &members);
            self.fan(stop, stopped, Task::Stop, &members);
        }
        Ok(())
    }

    fn clone_actions(&mut self, idx: ResourceIdx, ordered: bool) -> EngineResult<()> {
        let instances = self.members(idx)?;
        for instance in &instances {
            self.create_actions(*instance)?;
        }

        let (start, started) = self.milestones(idx, Task::Start, &instances);
        let (stop, stopped) = self.milestones(idx, Task::Stop, &instances);
        self.graph.order(stopped, start, OrderKind::Mandatory);

        if ordered {
            self.chain(start, started, Task::Start, &instances);
            let reversed: Vec<ResourceIdx> = instances.iter().rev().copied().collect();
            self.chain(stop, stopped, Task::Stop, &reversed);
        } else {
            self.fan(start, started, Task::Start, &instances);
            self.fan(stop, stopped, Task::Stop, &instances);
        }
        Ok(())
    }

    /// Promotion milestones on top of the clone ones.
    fn master_actions(&mut self, idx: ResourceIdx, ordered: bool, masters_allocated: u32) -> EngineResult<()> {
        let instances = self.members(idx)?;
        let id = self.ws.resource(idx).id.clone();

        let (promote, promoted) = self.milestones(idx, Task::Promote, &instances);
        let (demote, demoted) = self.milestones(idx, Task::Demote, &instances);
        let milestone = |graph: &ActionGraph, task| {
            graph
                .find(&id, task, None)
                .ok_or_else(|| EngineError::Invariant(format!("{id}: missing {task} milestone")))
        };
        let start = milestone(&self.graph, Task::Start)?;
        let started = milestone(&self.graph, Task::Started)?;
        let stop = milestone(&self.graph, Task::Stop)?;

        if masters_allocated == 0 {
            debug!(resource = %id, "no masters allocated, promotion is not runnable");
            self.graph.action_mut(promote).runnable = false;
            self.graph.action_mut(promoted).runnable = false;
        }

        self.graph.order(demoted, start, OrderKind::Mandatory);
        self.graph.order(started, promote, OrderKind::Mandatory);
        self.graph.order(demoted, stop, OrderKind::Mandatory);
        self.graph.order(demote, demoted, OrderKind::Mandatory);
        self.graph.order(demoted, promote, OrderKind::Mandatory);

        if ordered {
            self.chain(promote, promoted, Task::Promote, &instances);
            let reversed: Vec<ResourceIdx> = instances.iter().rev().copied().collect();
            self.chain(demote, demoted, Task::Demote, &reversed);
        } else {
            self.fan(promote, promoted, Task::Promote, &instances);
            self.fan(demote, demoted, Task::Demote, &instances);
        }
        Ok(())
    }

    // ── Ordering constraints ────────────────────────────────────

    fn resource_orderings(&mut self) {
        let ws = self.ws;
        for ordering in &ws.orderings {
            let firsts = self.exits(ordering.first, ordering.first_task);
            let thens = self.entries(ordering.then, ordering.then_task);
            if firsts.is_empty() || thens.is_empty() {
                debug!(constraint = %ordering.id, "nothing to order this pass");
                continue;
            }
            let kind = if ordering.is_mandatory() {
                OrderKind::Mandatory
            } else {
                OrderKind::Optional
            };
            debug!(
                constraint = %ordering.id,
                first = %ws.resource(ordering.first).id,
                then = %ws.resource(ordering.then).id,
                ?kind,
                "ordering resources"
            );
            self.order_all(&firsts, &thens, kind);
        }
    }

    fn members(&self, idx: ResourceIdx) -> EngineResult<Vec<ResourceIdx>> {
        let rsc = self.ws.resource(idx);
        if rsc.children.is_empty() {
            return Err(EngineError::Invariant(format!(
                "{} {} has no children",
                rsc.variant.name(),
                rsc.id
            )));
        }
        Ok(rsc.children.clone())
    }

    /// Create the pseudo pair for `task` and its completion. Both are
    /// optional when no member has real work for `task`.
    fn milestones(&mut self, idx: ResourceIdx, task: Task, members: &[ResourceIdx]) -> (ActionId, ActionId) {
        let done = task.completion().unwrap_or(task);
        let optional = !members.iter().any(|m| self.has_work(*m, task));
        let ws = self.ws;
        let id = ws.resource(idx).id.as_str();

        let pair = (
            self.graph.custom_action(id, task, None),
            self.graph.custom_action(id, done, None),
        );
        for action in [pair.0, pair.1] {
            let action = self.graph.action_mut(action);
            action.pseudo = true;
            action.optional = optional;
        }
        pair
    }

    fn has_work(&self, idx: ResourceIdx, task: Task) -> bool {
        self.entries(idx, task)
            .iter()
            .any(|a| !self.graph.action(*a).optional)
    }

    /// Actions that begin `task` for a member: a container's pseudo
    /// action if it has one, a primitive's real ones otherwise.
    fn entries(&self, idx: ResourceIdx, task: Task) -> Vec<ActionId> {
        let rsc = self.ws.resource(idx);
        if rsc.is_primitive() {
            return self.graph.find_any_node(&rsc.id, task);
        }
        match self.graph.find(&rsc.id, task, None) {
            Some(id) => vec![id],
            None => rsc.children.iter().flat_map(|c| self.entries(*c, task)).collect(),
        }
    }

    /// Actions that finish `task` for a member.
    fn exits(&self, idx: ResourceIdx, task: Task) -> Vec<ActionId> {
        let rsc = self.ws.resource(idx);
        if rsc.is_primitive() {
            return self.graph.find_any_node(&rsc.id, task);
        }
        let done = task.completion().unwrap_or(task);
        match self.graph.find(&rsc.id, done, None) {
            Some(id) => vec![id],
            None => rsc.children.iter().flat_map(|c| self.exits(*c, task)).collect(),
        }
    }

    /// `begin` → every member → `end`, in parallel.
    fn fan(&mut self, begin: ActionId, end: ActionId, task: Task, members: &[ResourceIdx]) {
        for member in members {
            let entries = self.entries(*member, task);
            let exits = self.exits(*member, task);
            self.order_all(&[begin], &entries, OrderKind::Mandatory);
            self.order_all(&exits, &[end], OrderKind::Mandatory);
        }
    }

    /// `begin` → first member → second member → … → `end`.
    ///
    /// Members with nothing to do for `task` are left out of the chain.
    fn chain(&mut self, begin: ActionId, end: ActionId, task: Task, members: &[ResourceIdx]) {
        let mut previous = vec![begin];
        for member in members {
            let entries = self.entries(*member, task);
            if entries.is_empty() {
                continue;
            }
            self.order_all(&previous, &entries, OrderKind::Mandatory);
            let exits = self.exits(*member, task);
            self.order_all(&exits, &[end], OrderKind::Mandatory);
            previous = exits;
        }
        self.order_all(&previous, &[end], OrderKind::Mandatory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_walks_reach_their_target() {
        let roles = [Role::Stopped, Role::Started, Role::Slave, Role::Master];
        for from in roles {
            for to in roles {
                let mut current = from;
                let mut steps = 0;
                while current != to {
                    match next_step(current, to) {
                        Some(step) => current = step,
                        None => break,
                    }
                    steps += 1;
                    assert!(steps <= MAX_ROLE_STEPS, "{from} -> {to} loops");
                }
                let impossible = matches!((from, to), (Role::Slave | Role::Master, Role::Started));
                assert_eq!(current == to, !impossible, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn master_stops_through_slave() {
        assert_eq!(next_step(Role::Master, Role::Stopped), Some(Role::Slave));
        assert_eq!(next_step(Role::Slave, Role::Stopped), Some(Role::Stopped));
        assert_eq!(next_step(Role::Stopped, Role::Master), Some(Role::Slave));
        assert_eq!(next_step(Role::Slave, Role::Master), Some(Role::Master));
    }
}
