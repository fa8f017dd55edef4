//! `hapolicy config` — show the policy a pass would run with.

use super::load_policy;

pub fn show(path: Option<&str>) -> anyhow::Result<()> {
    print!("{}", render(path)?);
    Ok(())
}

fn render(path: Option<&str>) -> anyhow::Result<String> {
    load_policy(path)?.to_toml_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_without_a_file() {
        let text = render(None).unwrap();
        assert!(text.contains("no_quorum_policy = \"stop\""));
        assert!(text.contains("symmetric_cluster = true"));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "resource_stickiness = 100\nno_quorum_policy = \"freeze\"\n").unwrap();

        let text = render(path.to_str()).unwrap();
        assert!(text.contains("resource_stickiness = 100"));
        assert!(text.contains("no_quorum_policy = \"freeze\""));
        assert!(text.contains("default_action_timeout_ms = 20000"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(render(path.to_str()).is_err());
    }
}
