//! hapolicy-engine — the scheduling pass.
//!
//! Runs placement over a snapshot, then turns the resulting role and node
//! changes into an ordered graph of start/stop/promote/demote actions:
//!
//! - [`Scheduler`] drives one pass end to end
//! - [`build_graph`] emits actions and orderings for an allocated working set
//! - [`PassOutcome`] is the serializable result handed to the dispatcher
//! - [`render`] produces text and Graphviz dumps for operators
//!
//! # Architecture
//!
//! ```text
//! Scheduler::run(snapshot)
//!   ├── WorkingSet::unpack        (hapolicy-placement)
//!   ├── allocate                  (colours, then promotion)
//!   ├── build_graph
//!   │   ├── primitive role walks  (start/stop/promote/demote)
//!   │   ├── container milestones  (pseudo actions, fan or chain)
//!   │   └── propagate_runnable    (mandatory edges only)
//!   └── PassOutcome               (graph + placements + digest)
//! ```

pub mod action;
pub mod builder;
pub mod error;
pub mod graph;
pub mod outcome;
pub mod render;
pub mod scheduler;

pub use action::{Action, ActionId, OrderKind};
pub use builder::build_graph;
pub use error::{EngineError, EngineResult};
pub use graph::ActionGraph;
pub use outcome::{ActionRecord, EdgeRecord, PassOutcome, ResourceOutcome, TransitionGraph};
pub use render::{render_actions, render_dot, render_summary};
pub use scheduler::Scheduler;
