//! Arena-backed action DAG.
//!
//! Actions live in a `Vec` and edges are kept in two adjacency maps keyed
//! by [`ActionId`], so the graph never holds references into itself.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hapolicy_core::Task;
use tracing::{debug, error};

use crate::action::{Action, ActionId, OrderKind};

type Adjacency = BTreeMap<ActionId, BTreeMap<ActionId, OrderKind>>;

#[derive(Debug, Default)]
pub struct ActionGraph {
    actions: Vec<Action>,
    /// `then` → `first` for every ordering.
    before: Adjacency,
    /// `first` → `then` for every ordering.
    after: Adjacency,
}

impl ActionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.0]
    }

    pub fn action_mut(&mut self, id: ActionId) -> &mut Action {
        &mut self.actions[id.0]
    }

    /// Every action for `(resource, task, node)`, in creation order.
    pub fn find_all(&self, resource: &str, task: Task, node: Option<&str>) -> Vec<ActionId> {
        self.actions
            .iter()
            .filter(|a| a.resource == resource && a.task == task && a.node.as_deref() == node)
            .map(|a| a.id)
            .collect()
    }

    /// Every action for `(resource, task)` on any node.
    pub fn find_any_node(&self, resource: &str, task: Task) -> Vec<ActionId> {
        self.actions
            .iter()
            .filter(|a| a.resource == resource && a.task == task)
            .map(|a| a.id)
            .collect()
    }

    pub fn find(&self, resource: &str, task: Task, node: Option<&str>) -> Option<ActionId> {
        let found = self.find_all(resource, task, node);
        if found.len() > 1 {
            error!(
                resource,
                task = %task,
                node = ?node,
                count = found.len(),
                "duplicate actions, using the first"
            );
        }
        found.first().copied()
    }

    /// Find-or-create the action for `(resource, task, node)`.
    pub fn custom_action(&mut self, resource: &str, task: Task, node: Option<&str>) -> ActionId {
        if let Some(id) = self.find(resource, task, node) {
            return id;
        }
        let id = ActionId(self.actions.len());
        let action = Action::new(id, resource, task, node);
        debug!(action = %action.label(), id = %id, "created action");
        self.actions.push(action);
        id
    }

    /// Add the ordering `first` → `then`.
    ///
    /// Repeating an edge keeps the stronger kind; self-edges are ignored.
    pub fn order(&mut self, first: ActionId, then: ActionId, kind: OrderKind) {
        if first == then {
            return;
        }
        for (map, from, to) in [(&mut self.after, first, then), (&mut self.before, then, first)] {
            let entry = map.entry(from).or_default().entry(to).or_insert(kind);
            *entry = (*entry).max(kind);
        }
    }

    pub fn successors(&self, id: ActionId) -> impl Iterator<Item = (ActionId, OrderKind)> + '_ {
        self.after.get(&id).into_iter().flatten().map(|(k, v)| (*k, *v))
    }

    pub fn predecessors(&self, id: ActionId) -> impl Iterator<Item = (ActionId, OrderKind)> + '_ {
        self.before.get(&id).into_iter().flatten().map(|(k, v)| (*k, *v))
    }

    /// Every edge as `(first, then, kind)`, sorted by `first` then `then`.
    pub fn edges(&self) -> Vec<(ActionId, ActionId, OrderKind)> {
        self.after
            .iter()
            .flat_map(|(first, thens)| thens.iter().map(move |(then, kind)| (*first, *then, *kind)))
            .collect()
    }

    /// Whether `to` is reachable from `from` along any edges.
    pub fn has_path(&self, from: ActionId, to: ActionId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                queue.extend(self.successors(id).map(|(next, _)| next));
            }
        }
        false
    }

    /// Mark everything behind a non-runnable action (over mandatory edges)
    /// as non-runnable too.
    pub fn propagate_runnable(&mut self) {
        let mut queue: VecDeque<ActionId> = self
            .actions
            .iter()
            .filter(|a| !a.runnable)
            .map(|a| a.id)
            .collect();

        while let Some(id) = queue.pop_front() {
            let blocked: Vec<ActionId> = self
                .successors(id)
                .filter(|(next, kind)| *kind == OrderKind::Mandatory && self.action(*next).runnable)
                .map(|(next, _)| next)
                .collect();
            for next in blocked {
                debug!(
                    action = %self.action(next).label(),
                    blocked_by = %self.action(id).label(),
                    "action is not runnable"
                );
                self.action_mut(next).runnable = false;
                queue.push_back(next);
            }
        }
    }
}
