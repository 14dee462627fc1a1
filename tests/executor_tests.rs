//! Build executor tests against fake build entry points.

mod test_harness;

use std::time::{Duration, Instant};

use appforge::config::BuildConfig;
use appforge::error::ErrorCode;
use appforge::worker::BuildExecutor;
use tokio_util::sync::CancellationToken;

use test_harness::{
    project, wait_for_exit, wait_for_file, DESCRIPTOR, GRADLEW_FORKING, GRADLEW_HANG, GRADLEW_OK,
};

fn executor_with_timeout(timeout: Duration) -> BuildExecutor {
    BuildExecutor::new(BuildConfig {
        timeout,
        ..BuildConfig::default()
    })
}

fn test_executor() -> BuildExecutor {
    executor_with_timeout(Duration::from_secs(30))
}

#[tokio::test]
async fn test_build_success_reports_package() {
    let dir = project(Some(GRADLEW_OK), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.size_bytes, Some(7));
    let artifact = outcome.artifact_path.unwrap();
    assert!(artifact.ends_with("app/build/outputs/apk/debug/app-debug.apk"));
    assert!(artifact.is_file());
}

#[tokio::test]
async fn test_build_receives_fixed_arguments() {
    let script = r#"#!/bin/sh
echo "$@" > args.txt
mkdir -p app/build/outputs/apk/debug
printf 'PK' > app/build/outputs/apk/debug/app-debug.apk
"#;
    let dir = project(Some(script), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);
    let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert_eq!(args.trim(), "assembleDebug --no-daemon --parallel");
}

#[tokio::test]
async fn test_build_marks_entry_point_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = project(Some(GRADLEW_OK), Some(DESCRIPTOR));
    let entry = dir.path().join("gradlew");
    std::fs::set_permissions(&entry, std::fs::Permissions::from_mode(0o644)).unwrap();

    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);
    let mode = std::fs::metadata(&entry).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn test_missing_descriptor_is_configuration_error_without_spawning() {
    let script = "#!/bin/sh\ntouch spawned\n";
    let dir = project(Some(script), None);
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error_code(), Some(ErrorCode::ConfigurationError));
    assert!(!dir.path().join("spawned").exists());
}

#[tokio::test]
async fn test_empty_descriptor_is_configuration_error() {
    let dir = project(Some(GRADLEW_OK), Some("  \n\n"));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::ConfigurationError));
    assert!(outcome.error.unwrap().message.contains("empty"));
}

#[tokio::test]
async fn test_missing_entry_point_is_configuration_error() {
    let dir = project(None, Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::ConfigurationError));
}

#[tokio::test]
async fn test_missing_project_dir_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = test_executor()
        .build(&dir.path().join("nope"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::ConfigurationError));
}

#[tokio::test]
async fn test_unstartable_toolchain_is_toolchain_missing() {
    let dir = project(
        Some("#!/nonexistent/interpreter\necho never\n"),
        Some(DESCRIPTOR),
    );
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::ToolchainMissing));
}

#[tokio::test]
async fn test_nonzero_exit_is_classified() {
    let script = r#"#!/bin/sh
echo "> Task :app:compileDebugJavaWithJavac FAILED"
echo "MainActivity.java:12: error: cannot find symbol" >&2
echo "Compilation failed; see the compiler error output for details." >&2
exit 1
"#;
    let dir = project(Some(script), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(1));
    let error = outcome.error.unwrap();
    assert_eq!(error.code, ErrorCode::BuildClassifiedFailure);
    assert_eq!(error.classification.as_deref(), Some("COMPILATION_ERROR"));
    let tail = error.diagnostic_tail.unwrap();
    assert!(tail.contains("cannot find symbol"));
    assert!(tail.contains("compileDebugJavaWithJavac"));
}

#[tokio::test]
async fn test_unmatched_failure_quotes_last_line() {
    let script = r#"#!/bin/sh
echo "the flux capacitor is misaligned" >&2
exit 2
"#;
    let dir = project(Some(script), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    let error = outcome.error.unwrap();
    assert_eq!(error.code, ErrorCode::BuildClassifiedFailure);
    assert_eq!(error.classification.as_deref(), Some("UNCLASSIFIED"));
    assert_eq!(error.message, "Build failed: the flux capacitor is misaligned");
}

#[tokio::test]
async fn test_diagnostic_tail_is_bounded() {
    let script = r#"#!/bin/sh
i=0
while [ $i -lt 500 ]; do echo "noise line $i" >&2; i=$((i+1)); done
exit 1
"#;
    let dir = project(Some(script), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    let tail = outcome.error.unwrap().diagnostic_tail.unwrap();
    // "[stderr]\n" label plus at most 1000 characters of output.
    assert!(tail.chars().count() <= 1000 + "[stderr]\n".len());
    assert!(tail.ends_with("noise line 499"));
}

#[tokio::test]
async fn test_exit_zero_without_package_is_artifact_missing() {
    let dir = project(Some("#!/bin/sh\necho BUILD SUCCESSFUL\n"), Some(DESCRIPTOR));
    let outcome = test_executor()
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.error_code(),
        Some(ErrorCode::ArtifactMissingAfterBuild)
    );
    assert!(outcome.artifact_path.is_none());
}

#[tokio::test]
async fn test_timeout_kills_build() {
    let dir = project(Some(GRADLEW_HANG), Some(DESCRIPTOR));
    let start = Instant::now();
    let outcome = executor_with_timeout(Duration::from_millis(300))
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    let error = outcome.error.unwrap();
    assert_eq!(error.code, ErrorCode::BuildTimeout);
    assert!(error.diagnostic_tail.unwrap().contains("Starting a Gradle Daemon"));

    let pid = wait_for_file(&dir.path().join("build.pid"), Duration::from_secs(1)).await;
    assert!(wait_for_exit(&pid, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_cancellation_kills_build_promptly() {
    let dir = project(Some(GRADLEW_HANG), Some(DESCRIPTOR));
    let token = CancellationToken::new();
    let trigger = token.clone();
    let pid_file = dir.path().join("build.pid");

    let executor = executor_with_timeout(Duration::from_secs(120));
    let root = dir.path().to_path_buf();
    let build = tokio::spawn(async move { executor.build(&root, &token).await });

    let pid = wait_for_file(&pid_file, Duration::from_secs(5)).await;
    let start = Instant::now();
    trigger.cancel();

    let result = build.await.unwrap();
    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(wait_for_exit(&pid, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_timeout_kills_forked_build_helpers() {
    let dir = project(Some(GRADLEW_FORKING), Some(DESCRIPTOR));
    let start = Instant::now();
    let outcome = executor_with_timeout(Duration::from_millis(300))
        .build(dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.error_code(), Some(ErrorCode::BuildTimeout));

    let pid = wait_for_file(&dir.path().join("build.pid"), Duration::from_secs(1)).await;
    assert!(wait_for_exit(&pid, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_cancellation_kills_forked_build_helpers() {
    let dir = project(Some(GRADLEW_FORKING), Some(DESCRIPTOR));
    let token = CancellationToken::new();
    let trigger = token.clone();
    let pid_file = dir.path().join("build.pid");

    let executor = executor_with_timeout(Duration::from_secs(120));
    let root = dir.path().to_path_buf();
    let build = tokio::spawn(async move { executor.build(&root, &token).await });

    let pid = wait_for_file(&pid_file, Duration::from_secs(5)).await;
    let start = Instant::now();
    trigger.cancel();

    assert!(build.await.unwrap().is_err());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(wait_for_exit(&pid, Duration::from_secs(5)).await);
}
