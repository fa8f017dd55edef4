//! Human-readable dumps of a pass outcome.

use std::fmt::Write;

use crate::action::OrderKind;
use crate::outcome::{ActionRecord, PassOutcome};

/// One line per resource, e.g. `db:0 (primitive): Slave -> Master on node-a`.
pub fn render_summary(outcome: &PassOutcome) -> String {
    let mut out = String::new();
    for rsc in &outcome.resources {
        let _ = write!(out, "{} ({}): {} -> {}", rsc.id, rsc.kind, rsc.role, rsc.next_role);
        if let Some(node) = &rsc.node {
            let _ = write!(out, " on {node}");
        }
        if let Some(masters) = rsc.masters_allocated {
            let _ = write!(out, " [{masters} promoted]");
        }
        out.push('\n');
    }
    if !outcome.unallocated.is_empty() {
        let _ = writeln!(out, "unallocated: {}", outcome.unallocated.join(", "));
    }
    out
}

/// One line per action, with its flags and the actions it waits for.
pub fn render_actions(outcome: &PassOutcome) -> String {
    let mut out = String::new();
    for action in &outcome.graph.actions {
        let mut flags = Vec::new();
        if action.pseudo {
            flags.push("pseudo");
        }
        if action.optional {
            flags.push("optional");
        }
        if !action.runnable {
            flags.push("blocked");
        }
        let _ = write!(out, "{:>4} {}", action.id, label(action));
        if !flags.is_empty() {
            let _ = write!(out, " ({})", flags.join(", "));
        }
        let after: Vec<String> = outcome
            .graph
            .edges
            .iter()
            .filter(|e| e.after == action.id)
            .map(|e| e.before.to_string())
            .collect();
        if !after.is_empty() {
            let _ = write!(out, " after [{}]", after.join(", "));
        }
        out.push('\n');
    }
    out
}

/// Graphviz rendering of the transition graph.
pub fn render_dot(outcome: &PassOutcome) -> String {
    let mut out = String::from("digraph \"transition\" {\n");
    for action in &outcome.graph.actions {
        let mut attrs = vec![format!("label=\"{}\"", label(action))];
        if action.pseudo {
            attrs.push("fontcolor=\"orange\"".to_string());
        }
        if action.optional {
            attrs.push("style=\"dashed\"".to_string());
            attrs.push("color=\"blue\"".to_string());
        } else if !action.runnable {
            attrs.push("style=\"filled\"".to_string());
            attrs.push("fillcolor=\"red\"".to_string());
        } else {
            attrs.push("style=\"bold\"".to_string());
            attrs.push("color=\"green\"".to_string());
        }
        let _ = writeln!(out, "  a{} [{}]", action.id, attrs.join(" "));
    }
    for edge in &outcome.graph.edges {
        let style = match edge.kind {
            OrderKind::Mandatory => "bold",
            OrderKind::Optional => "dashed",
        };
        let _ = writeln!(out, "  a{} -> a{} [style=\"{style}\"]", edge.before, edge.after);
    }
    out.push_str("}\n");
    out
}

fn label(action: &ActionRecord) -> String {
    match &action.node {
        Some(node) => format!("{} {node}", action.uuid),
        None => action.uuid.clone(),
    }
}
