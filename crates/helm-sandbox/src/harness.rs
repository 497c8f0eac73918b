//! Harness resolution and script composition

use crate::config::{HarnessCommands, SandboxConfig};
use std::path::Path;

/// Resolve the harness a config asks for
///
/// Precedence: `harnessCommands` with a run phase, then `commands`, then
/// `command`, then the default for the repository. `None` when nothing
/// applies.
#[must_use]
pub fn resolve_harness(config: &SandboxConfig) -> Option<HarnessCommands> {
    if let Some(harness) = &config.harness_commands {
        if !harness.run.is_empty() {
            return Some(harness.clone());
        }
    }
    if !config.commands.is_empty() {
        return Some(HarnessCommands::run_only(config.commands.clone()));
    }
    if let Some(command) = config.command.as_deref().filter(|c| !c.trim().is_empty()) {
        return Some(HarnessCommands::run_only(vec![command.to_string()]));
    }
    let mut harness = config.harness_commands.clone().unwrap_or_default();
    let command = default_command(config.repo_path.as_deref(), config.language_hint.as_deref())?;
    harness.run = vec![command.to_string()];
    Some(harness)
}

/// Default test command for a language hint or repository markers
#[must_use]
pub fn default_command(repo: Option<&Path>, language_hint: Option<&str>) -> Option<&'static str> {
    if let Some(hint) = language_hint {
        let by_hint = match hint.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" | "javascript" | "js" | "typescript" | "ts" => Some("npm test"),
            "rust" => Some("cargo test"),
            "python" | "py" => Some("pytest"),
            "go" | "golang" => Some("go test ./..."),
            "java" | "maven" => Some("mvn test"),
            _ => None,
        };
        if by_hint.is_some() {
            return by_hint;
        }
    }

    let repo = repo?;
    let has = |marker: &str| repo.join(marker).is_file();
    if has("package.json") {
        Some("npm test")
    } else if has("Cargo.toml") {
        Some("cargo test")
    } else if has("pyproject.toml") || has("requirements.txt") {
        Some("pytest")
    } else if has("go.mod") {
        Some("go test ./...")
    } else if has("pom.xml") {
        Some("mvn test")
    } else {
        None
    }
}

/// Container image for a language hint
#[must_use]
pub fn default_image(language_hint: Option<&str>) -> &'static str {
    match language_hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
        Some("node" | "nodejs" | "javascript" | "js" | "typescript" | "ts") => "node:20-slim",
        Some("rust") => "rust:1-slim",
        Some("python" | "py") => "python:3.12-slim",
        Some("go" | "golang") => "golang:1.22",
        Some("java" | "maven") => "maven:3-eclipse-temurin-21",
        _ => "ubuntu:24.04",
    }
}

/// Compose one POSIX shell script from a harness
///
/// Setup and run steps execute in order while the status is zero, each in
/// its own subshell. Teardown always executes and cannot change the status.
/// The script exits with the first failing setup/run status.
#[must_use]
pub fn compose_script(harness: &HarnessCommands) -> String {
    let mut script = String::from("status=0\n");
    for step in harness.setup.iter().chain(&harness.run) {
        script.push_str("if [ \"$status\" -eq 0 ]; then\n(\n");
        script.push_str(step);
        script.push_str("\n)\nstatus=$?\nfi\n");
    }
    for step in &harness.teardown {
        script.push_str("(\n");
        script.push_str(step);
        script.push_str("\n) || true\n");
    }
    script.push_str("exit \"$status\"\n");
    script
}

/// Every command of a harness, for validation
pub(crate) fn all_commands(harness: &HarnessCommands) -> impl Iterator<Item = &str> {
    harness
        .setup
        .iter()
        .chain(&harness.run)
        .chain(&harness.teardown)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn precedence_of_command_sources() {
        let mut config = SandboxConfig::default().with_command("make check");
        assert_eq!(resolve_harness(&config).unwrap().run, vec!["make check"]);

        config.commands = vec!["a".into(), "b".into()];
        assert_eq!(resolve_harness(&config).unwrap().run, vec!["a", "b"]);

        config.harness_commands = Some(HarnessCommands::run_only(vec!["c".into()]));
        assert_eq!(resolve_harness(&config).unwrap().run, vec!["c"]);
    }

    #[test]
    fn default_from_markers_keeps_harness_setup() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("go.mod"), "module x").unwrap();

        let config = SandboxConfig::for_repo(repo.path()).with_harness(HarnessCommands {
            setup: vec!["go mod download".into()],
            ..HarnessCommands::default()
        });
        let harness = resolve_harness(&config).unwrap();
        assert_eq!(harness.setup, vec!["go mod download"]);
        assert_eq!(harness.run, vec!["go test ./..."]);
    }

    #[test]
    fn hint_wins_over_markers() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("package.json"), "{}").unwrap();
        assert_eq!(default_command(Some(repo.path()), Some("python")), Some("pytest"));
        assert_eq!(default_command(Some(repo.path()), None), Some("npm test"));
        assert_eq!(default_command(None, None), None);
    }

    #[test]
    fn script_shape() {
        let script = compose_script(&HarnessCommands {
            setup: vec!["prep".into()],
            run: vec!["check".into()],
            teardown: vec!["clean".into()],
            ..HarnessCommands::default()
        });
        assert!(script.starts_with("status=0\n"));
        assert!(script.contains("(\nprep\n)\nstatus=$?"));
        assert!(script.contains("(\nclean\n) || true"));
        assert!(script.ends_with("exit \"$status\"\n"));
    }
}
