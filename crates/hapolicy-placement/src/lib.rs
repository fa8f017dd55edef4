//! hapolicy-placement — node scoring, colour allocation and promotion.
//!
//! Turns a [`Snapshot`](hapolicy_core::Snapshot) into a placement:
//!
//! - Unpacks nodes, resources and constraints into a per-pass [`WorkingSet`]
//! - Merges location and colocation scores into candidate-node weights
//! - Groups colocated resources into colours and resolves one node per colour
//! - Ranks multi-state instances and promotes the best under the
//!   `master_max` / `master_node_max` ceilings
//!
//! # Architecture
//!
//! ```text
//! WorkingSet::unpack
//!   ├── nodes (Arc<NodeDetails>, shared by every Node copy)
//!   ├── resource arena (Primitive | Group | Clone | Master)
//!   └── static scores (locations, health, stickiness, quorum)
//! allocate
//!   ├── colour resources in priority order
//!   │   └── colocations pull in their partners first
//!   └── promote_instances (masters only)
//! ```

pub mod allocator;
pub mod color;
pub mod constraint;
pub mod error;
pub mod node;
pub mod promotion;
pub mod resource;
pub mod weights;
pub mod working_set;

pub use allocator::allocate;
pub use color::{Color, ColorTable};
pub use constraint::{Colocation, Location, OrderConstraint};
pub use error::{PlacementError, PlacementResult};
pub use node::{Node, NodeDetails};
pub use promotion::master_score;
pub use resource::{Resource, ResourceIdx, Variant};
pub use working_set::WorkingSet;
