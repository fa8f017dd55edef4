//! Cluster-wide policy options (`policy.toml`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::score::Score;

/// What to do with resources when the partition has lost quorum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoQuorumPolicy {
    /// Keep running resources where they are; start nothing new.
    Freeze,
    /// Stop everything.
    #[default]
    Stop,
    /// Schedule as if quorum were present.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub no_quorum_policy: NoQuorumPolicy,
    /// When false, resources may only run where a location constraint
    /// explicitly allows them.
    pub symmetric_cluster: bool,
    /// Score added to the node a resource is currently running on.
    pub resource_stickiness: Score,
    pub default_action_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            no_quorum_policy: NoQuorumPolicy::Stop,
            symmetric_cluster: true,
            resource_stickiness: 0,
            default_action_timeout_ms: 20_000,
        }
    }
}

impl PolicyConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PolicyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PolicyConfig::default();
        assert_eq!(config.no_quorum_policy, NoQuorumPolicy::Stop);
        assert!(config.symmetric_cluster);
        assert_eq!(config.resource_stickiness, 0);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
no_quorum_policy = "freeze"
resource_stickiness = 100
"#;
        let config: PolicyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.no_quorum_policy, NoQuorumPolicy::Freeze);
        assert_eq!(config.resource_stickiness, 100);
        assert!(config.symmetric_cluster);
        assert_eq!(config.default_action_timeout_ms, 20_000);
    }

    #[test]
    fn test_roundtrip_through_file() {
        let config = PolicyConfig {
            no_quorum_policy: NoQuorumPolicy::Ignore,
            symmetric_cluster: false,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = PolicyConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let result: Result<PolicyConfig, _> = toml::from_str(r#"no_quorum_policy = "panic""#);
        assert!(result.is_err());
    }
}
