pub mod config;
pub mod simulate;

use std::path::Path;

use hapolicy_core::PolicyConfig;

/// Load the policy file if one was given, defaults otherwise.
pub fn load_policy(path: Option<&str>) -> anyhow::Result<PolicyConfig> {
    match path {
        Some(path) => PolicyConfig::from_file(Path::new(path)),
        None => Ok(PolicyConfig::default()),
    }
}
