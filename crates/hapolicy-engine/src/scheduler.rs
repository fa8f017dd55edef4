//! Scheduler — one synchronous pass from snapshot to transition graph.
//!
//! A pass:
//! - Unpacks the snapshot into a fresh working set
//! - Allocates every resource (colours, then promotion)
//! - Builds and prunes the action graph
//! - Packages the result with a digest callers can compare across passes

use hapolicy_core::{PolicyConfig, Snapshot};
use hapolicy_placement::{WorkingSet, allocate};
use tracing::{info, warn};

use crate::builder::build_graph;
use crate::error::EngineResult;
use crate::outcome::PassOutcome;

/// Runs scheduling passes under one policy.
///
/// Holds no per-pass state, so a single scheduler can serve concurrent
/// passes.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: PolicyConfig,
}

impl Scheduler {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Compute placement and actions for `snapshot`.
    pub fn run(&self, snapshot: &Snapshot) -> EngineResult<PassOutcome> {
        let mut ws = WorkingSet::unpack(snapshot, &self.config)?;
        allocate(&mut ws);

        let graph = build_graph(&ws)?;
        let outcome = PassOutcome::new(&ws, &graph)?;

        if !outcome.unallocated.is_empty() {
            warn!(resources = ?outcome.unallocated, "some resources could not be placed");
        }
        info!(
            actions = outcome.graph.actions.len(),
            runnable = outcome.graph.runnable_actions().count(),
            digest = %outcome.digest,
            "scheduling pass complete"
        );
        Ok(outcome)
    }
}
