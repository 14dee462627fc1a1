//! Shared helpers for integration tests.
//!
//! External tools (the build entry point, the device bridge) are replaced by
//! small shell scripts written into temporary directories.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use appforge::config::{BuildConfig, EngineConfig};
use appforge::pipeline::{
    AndroidTemplates, GeneratedFile, HeuristicConcept, ProjectPlan, Section, TemplateLibrary,
};
use appforge::scheduler::JobView;
use appforge::Engine;

/// A build entry point that produces a package and exits 0.
pub const GRADLEW_OK: &str = r#"#!/bin/sh
mkdir -p app/build/outputs/apk/debug
printf 'PK-fake' > app/build/outputs/apk/debug/app-debug.apk
echo "BUILD SUCCESSFUL"
"#;

/// A build entry point that never finishes on its own.
pub const GRADLEW_HANG: &str = r#"#!/bin/sh
echo $$ > build.pid
echo "Starting a Gradle Daemon"
exec sleep 30
"#;

/// A build entry point whose worker runs in a forked helper instead of `exec`.
pub const GRADLEW_FORKING: &str = r#"#!/bin/sh
echo "Starting a Gradle Daemon"
sleep 30 &
echo $! > build.pid
wait
"#;

pub const DESCRIPTOR: &str = "plugins { id 'com.android.application' }\n";

#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A project directory with the given entry point and descriptor.
pub fn project(gradlew: Option<&str>, descriptor: Option<&str>) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    if let Some(body) = gradlew {
        write_script(&dir.path().join("gradlew"), body);
    }
    if let Some(contents) = descriptor {
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/build.gradle"), contents).unwrap();
    }
    dir
}

/// Android templates with the entry point and descriptor swapped out.
pub struct FakeToolchain {
    pub gradlew: String,
    pub descriptor: String,
}

impl FakeToolchain {
    pub fn new(gradlew: &str) -> Self {
        Self {
            gradlew: gradlew.to_string(),
            descriptor: DESCRIPTOR.to_string(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = descriptor.to_string();
        self
    }
}

impl TemplateLibrary for FakeToolchain {
    fn render(&self, plan: &ProjectPlan, section: Section) -> Vec<GeneratedFile> {
        AndroidTemplates
            .render(plan, section)
            .into_iter()
            .map(|mut file| {
                if file.path == Path::new("gradlew") {
                    file.contents = self.gradlew.clone();
                } else if file.path == Path::new("app/build.gradle") {
                    file.contents = self.descriptor.clone();
                }
                file
            })
            .collect()
    }
}

pub struct TestEngine {
    pub engine: Engine,
    pub root: TempDir,
    pub shutdown: CancellationToken,
}

pub fn engine_config(root: &Path, ceiling: usize, build_timeout: Duration) -> EngineConfig {
    EngineConfig::new(root).with_max_concurrent_jobs(ceiling).with_build(BuildConfig {
        timeout: build_timeout,
        ..BuildConfig::default()
    })
}

pub fn test_engine(
    templates: impl TemplateLibrary + 'static,
    ceiling: usize,
    build_timeout: Duration,
) -> TestEngine {
    test_engine_with(templates, ceiling, build_timeout, |config| config)
}

/// Like [`test_engine`], with a chance to adjust the config before start.
pub fn test_engine_with(
    templates: impl TemplateLibrary + 'static,
    ceiling: usize,
    build_timeout: Duration,
    adjust: impl FnOnce(EngineConfig) -> EngineConfig,
) -> TestEngine {
    let root = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let engine = Engine::with_collaborators(
        adjust(engine_config(root.path(), ceiling, build_timeout)),
        Arc::new(HeuristicConcept),
        Arc::new(templates),
        shutdown.clone(),
    );
    TestEngine {
        engine,
        root,
        shutdown,
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        // Kill whatever fake toolchains are still running.
        self.shutdown.cancel();
    }
}

/// Poll until the job is terminal.
pub async fn wait_for_terminal(engine: &Engine, id: &Uuid, timeout: Duration) -> JobView {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = engine.status(id).await.unwrap();
        if view.status.is_terminal() {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {}",
            id,
            view.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until `pred` holds for the job's view.
pub async fn wait_until<F>(engine: &Engine, id: &Uuid, timeout: Duration, pred: F) -> JobView
where
    F: Fn(&JobView) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let view = engine.status(id).await.unwrap();
        if pred(&view) {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached for job {} (status {})",
            id,
            view.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until a file exists and return its trimmed contents.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> String {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if !contents.trim().is_empty() {
                return contents.trim().to_string();
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never appeared",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the process is gone (killed and reaped, or left as a zombie).
pub async fn wait_for_exit(pid: &str, timeout: Duration) -> bool {
    let stat = PathBuf::from(format!("/proc/{}/stat", pid));
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let gone = match std::fs::read_to_string(&stat) {
            Err(_) => true,
            // An orphan killed under a non-reaping init stays in state Z.
            Ok(line) => line
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        };
        if gone {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn job_root(engine: &Engine, id: &Uuid) -> PathBuf {
    engine.config().storage_root.join(id.to_string())
}
