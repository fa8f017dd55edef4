//! `hapolicy simulate` — run a scheduling pass and print the result.

use std::path::Path;

use anyhow::{Context, Result, bail};
use hapolicy_core::Snapshot;
use hapolicy_engine::{PassOutcome, Scheduler, render_actions, render_dot, render_summary};
use tracing::info;

use super::load_policy;

pub fn simulate(input: &str, config: Option<&str>, format: &str, dot: Option<&str>) -> Result<()> {
    let outcome = run_pass(input, config)?;

    if let Some(dot) = dot {
        std::fs::write(dot, render_dot(&outcome)).with_context(|| format!("writing {dot}"))?;
        info!(path = dot, "wrote transition graph");
    }

    print!("{}", render(&outcome, format)?);
    Ok(())
}

fn run_pass(input: &str, config: Option<&str>) -> Result<PassOutcome> {
    let policy = load_policy(config)?;
    let snapshot = Snapshot::from_file(Path::new(input)).with_context(|| format!("reading snapshot {input}"))?;
    let outcome = Scheduler::new(policy).run(&snapshot)?;
    Ok(outcome)
}

fn render(outcome: &PassOutcome, format: &str) -> Result<String> {
    match format {
        "json" => Ok(format!("{}\n", outcome.to_json()?)),
        "text" => Ok(format!(
            "Placement:\n{}\nActions:\n{}\nDigest: {}\n",
            render_summary(outcome),
            render_actions(outcome),
            outcome.digest
        )),
        other => bail!("unknown output format: {other} (expected text or json)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SNAPSHOT: &str = r#"{
        "cluster": {
            "nodes": [{"id": "a"}, {"id": "b"}],
            "status": [{"resource": "web", "node": "a"}]
        },
        "config": {
            "resources": [{"id": "web"}, {"id": "db"}],
            "locations": [{"id": "db-on-b", "resource": "db", "rules": [{"node": "b", "score": 10}]}]
        }
    }"#;

    fn write_snapshot(dir: &Path) -> String {
        let path = dir.join("snapshot.json");
        fs::write(&path, SNAPSHOT).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn text_output_lists_placements_and_actions() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_pass(&write_snapshot(dir.path()), None).unwrap();
        let text = render(&outcome, "text").unwrap();

        assert!(text.contains("web (primitive): Started -> Started on a"));
        assert!(text.contains("db (primitive): Stopped -> Started on b"));
        assert!(text.contains("db_start_0 b"));
        assert!(text.contains(&outcome.digest));
    }

    #[test]
    fn json_output_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_pass(&write_snapshot(dir.path()), None).unwrap();
        let json = render(&outcome, "json").unwrap();
        let parsed: PassOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_pass(&write_snapshot(dir.path()), None).unwrap();
        assert!(render(&outcome, "yaml").is_err());
    }

    #[test]
    fn policy_file_changes_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("policy.toml");
        fs::write(&policy, "symmetric_cluster = false\n").unwrap();

        let outcome = run_pass(&write_snapshot(dir.path()), policy.to_str()).unwrap();
        assert_eq!(outcome.unallocated, vec!["web".to_string()]);
        assert_eq!(outcome.resource("db").unwrap().node.as_deref(), Some("b"));
    }

    #[test]
    fn writes_dot_file() {
        let dir = tempfile::tempdir().unwrap();
        let dot = dir.path().join("graph.dot");
        simulate(&write_snapshot(dir.path()), None, "json", dot.to_str()).unwrap();

        let content = fs::read_to_string(&dot).unwrap();
        assert!(content.starts_with("digraph"));
        assert!(content.contains("db_start_0 b"));
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(run_pass(missing.to_str().unwrap(), None).is_err());
    }
}
