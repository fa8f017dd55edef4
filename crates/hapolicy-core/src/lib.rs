pub mod config;
pub mod score;
pub mod types;

pub use config::{NoQuorumPolicy, PolicyConfig};
pub use score::{INFINITY, Score, ScoreError, add_scores, parse_score, score_to_string};
pub use types::*;
