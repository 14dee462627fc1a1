//! Deployment executor tests against a fake device bridge.

mod test_harness;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use appforge::config::DeviceConfig;
use appforge::error::ErrorCode;
use appforge::worker::DeployExecutor;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use test_harness::write_script;

const ONE_DEVICE: &str = r"List of devices attached\nemulator-5554\tdevice\n";
const INSTALL_OK: &str = r#"echo "Performing Streamed Install"; echo "Success""#;
const MODEL_OK: &str = r#"echo "Pixel 7""#;

/// Write a bridge script answering each subcommand with the given shell snippet.
fn fake_bridge(dir: &Path, version: &str, devices: &str, model: &str, install: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
case "$1" in
    version) {version} ;;
    devices) printf '{devices}' ;;
    -s)
        shift 2
        case "$1" in
            shell) {model} ;;
            install) {install} ;;
        esac
        ;;
esac
"#
    );
    let path = dir.join("adb");
    write_script(&path, &script);
    path
}

fn executor(bridge: PathBuf) -> DeployExecutor {
    DeployExecutor::new(DeviceConfig {
        bridge,
        probe_timeout: Duration::from_secs(5),
        query_timeout: Duration::from_secs(5),
        install_timeout: Duration::from_secs(5),
        ..DeviceConfig::default()
    })
}

fn package(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("app-debug.apk");
    std::fs::write(&path, vec![0u8; 2048]).unwrap();
    path
}

#[tokio::test]
async fn test_install_success_names_device_model() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(dir.path(), "echo 1.0.41", ONE_DEVICE, MODEL_OK, INSTALL_OK);

    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.message.contains("Pixel 7"));
    let device = outcome.device.unwrap();
    assert_eq!(device.id, "emulator-5554");
    assert_eq!(device.model, "Pixel 7");
    assert_eq!(device.connectivity, "device");
}

#[tokio::test]
async fn test_model_query_failure_only_degrades_label() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(dir.path(), "echo 1.0.41", ONE_DEVICE, "exit 1", INSTALL_OK);

    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.device.unwrap().model, "Unknown Device");
}

#[tokio::test]
async fn test_missing_package_is_reported_before_touching_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = executor(dir.path().join("no-such-adb"))
        .install(&dir.path().join("missing.apk"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error_code(), Some(ErrorCode::ArtifactNotFound));
}

#[tokio::test]
async fn test_absent_bridge_is_distinct_from_broken_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let apk = package(&dir);

    let absent = executor(dir.path().join("no-such-adb"))
        .install(&apk, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(absent.error_code(), Some(ErrorCode::DeviceBridgeMissing));

    let broken = fake_bridge(
        dir.path(),
        "echo 'error: cannot connect to daemon' >&2; exit 1",
        ONE_DEVICE,
        MODEL_OK,
        INSTALL_OK,
    );
    let outcome = executor(broken)
        .install(&apk, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::DeviceBridgeError));
    assert!(outcome.message.contains("cannot connect to daemon"));
}

#[tokio::test]
async fn test_zero_devices_is_no_device_connected() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(
        dir.path(),
        "echo 1.0.41",
        r"List of devices attached\n\n",
        MODEL_OK,
        INSTALL_OK,
    );
    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::NoDeviceConnected));
    assert!(outcome.device.is_none());
}

#[tokio::test]
async fn test_unauthorized_device_names_its_state() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(
        dir.path(),
        "echo 1.0.41",
        r"List of devices attached\nR58M12\tunauthorized\n",
        MODEL_OK,
        INSTALL_OK,
    );
    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.error_code(), Some(ErrorCode::NoDeviceConnected));
    assert!(outcome.message.contains("unauthorized"));
}

#[tokio::test]
async fn test_install_failure_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(
        dir.path(),
        "echo 1.0.41",
        ONE_DEVICE,
        MODEL_OK,
        r#"echo "adb: failed to install: Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]" >&2; exit 1"#,
    );
    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert_eq!(error.code, ErrorCode::InstallClassifiedFailure);
    assert_eq!(error.classification.as_deref(), Some("INSUFFICIENT_STORAGE"));
    assert!(error.diagnostic_tail.unwrap().contains("INSUFFICIENT_STORAGE"));
    assert_eq!(outcome.device.unwrap().model, "Pixel 7");
}

#[tokio::test]
async fn test_install_diagnostic_tail_follows_config() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(
        dir.path(),
        "echo 1.0.41",
        ONE_DEVICE,
        MODEL_OK,
        r#"printf 'x%.0s' $(seq 1 500) >&2; echo "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]" >&2; exit 1"#,
    );
    let executor = DeployExecutor::new(DeviceConfig {
        bridge,
        diagnostic_tail_chars: 20,
        ..DeviceConfig::default()
    });

    let outcome = executor
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    let tail = outcome.error.unwrap().diagnostic_tail.unwrap();
    assert_eq!(tail, "[stderr]\nNSUFFICIENT_STORAGE]");
}

#[tokio::test]
async fn test_failure_reported_on_stdout_with_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(
        dir.path(),
        "echo 1.0.41",
        ONE_DEVICE,
        MODEL_OK,
        r#"echo "Failure [INSTALL_FAILED_VERSION_DOWNGRADE]""#,
    );
    let outcome = executor(bridge)
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.unwrap().classification.as_deref(),
        Some("VERSION_DOWNGRADE")
    );
}

#[tokio::test]
async fn test_hung_install_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = fake_bridge(dir.path(), "echo 1.0.41", ONE_DEVICE, MODEL_OK, "exec sleep 30");
    let executor = DeployExecutor::new(DeviceConfig {
        bridge,
        install_timeout: Duration::from_millis(300),
        ..DeviceConfig::default()
    });

    let start = Instant::now();
    let outcome = executor
        .install(&package(&dir), &CancellationToken::new())
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.error_code(), Some(ErrorCode::InstallTimeout));
}
