//! RunAs service wired to the real Unix adapters

use procrun_core::application::runas::FAILED_RETURN_CODE;
use procrun_core::application::{Elevation, RunAsConfig, RunAsService};
use procrun_core::port::identity::mocks::FixedIdentity;
use procrun_core::AppError;
use procrun_infra_system::{SupervisedExecutor, TempScriptStager, UnixIdentity, UnixPlatform};
use std::sync::Arc;

fn service_in(dir: &std::path::Path, config: RunAsConfig) -> RunAsService {
    RunAsService::new(
        Arc::new(SupervisedExecutor::new(Arc::new(UnixPlatform::new()))),
        Arc::new(UnixIdentity),
        Arc::new(TempScriptStager::in_dir(dir)),
        config,
    )
}

#[tokio::test]
async fn test_execute_command_collects_output() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path(), RunAsConfig::default());

    let outcome = service
        .execute_command("printf '%s-%s' 'a b' c", 0, Elevation::None)
        .await
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.return_code, 0);
    assert_eq!(outcome.stdout, "a b-c");
    assert!(outcome.stderr.is_empty());
}

#[tokio::test]
async fn test_execute_command_with_input_feeds_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path(), RunAsConfig::default());

    let outcome = service
        .execute_command_with_input("wc -c", b"12345".to_vec(), 0, Elevation::None)
        .await
        .unwrap();
    assert_eq!(outcome.stdout.trim(), "5");
}

#[tokio::test]
async fn test_shell_command_uses_shell_features() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path(), RunAsConfig::default());

    let outcome = service
        .execute_shell_command("echo $((6 * 7)) | tr 4 X; exit 3", 0, Elevation::None)
        .await
        .unwrap();

    assert!(!outcome.succeeded);
    assert_eq!(outcome.return_code, 3);
    assert_eq!(outcome.stdout, "X2\n");
}

#[tokio::test]
async fn test_script_runs_with_arguments_and_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path(), RunAsConfig::default());

    let outcome = service
        .execute_script(
            "#!/bin/sh\r\necho \"$#:$1:$2\"\r\n",
            "first 'second arg'",
            0,
            Elevation::None,
        )
        .await
        .unwrap();

    assert!(outcome.succeeded, "stderr: {}", outcome.stderr);
    assert_eq!(outcome.stdout, "2:first:second arg\n");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_timeout_folds_into_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_in(dir.path(), RunAsConfig::default());

    let outcome = service
        .execute_command("sleep 10", 1, Elevation::None)
        .await
        .unwrap();

    assert!(!outcome.succeeded);
    assert_eq!(outcome.return_code, FAILED_RETURN_CODE);
    assert!(outcome.stdout.is_empty());
    assert!(outcome.stderr.contains("timeout"), "stderr: {}", outcome.stderr);
}

#[tokio::test]
async fn test_configured_cwd_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let service = service_in(
        dir.path(),
        RunAsConfig {
            cwd: Some(work.path().to_path_buf()),
            ..RunAsConfig::default()
        },
    );

    let outcome = service
        .execute_shell_command("pwd -P", 0, Elevation::None)
        .await
        .unwrap();
    assert_eq!(
        outcome.stdout.trim_end(),
        work.path().canonicalize().unwrap().to_str().unwrap()
    );
}

#[tokio::test]
async fn test_root_denied_by_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let service = RunAsService::new(
        Arc::new(SupervisedExecutor::new(Arc::new(UnixPlatform::new()))),
        Arc::new(FixedIdentity(true)),
        Arc::new(TempScriptStager::in_dir(dir.path())),
        RunAsConfig {
            allow_root: false,
            ..RunAsConfig::default()
        },
    );

    let result = service.execute_script("true", "", 0, Elevation::None).await;
    match result {
        Err(AppError::AccessDenied(msg)) => {
            assert_eq!(msg, "Configuration prohibits execution with user: root")
        }
        other => panic!("expected access denied, got {:?}", other),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
