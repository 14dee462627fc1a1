use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::BuildConfig;
use crate::error::{ErrorCode, JobError};
use crate::worker::classifier::{first_match, last_meaningful_line, Classification, Rule};
use crate::worker::process::{diagnostic_tail, run_bounded, Cancelled, RunError};

/// Classified reasons a toolchain run exited non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildFailureKind {
    JdkMissing,
    SdkMissing,
    LicenseNotAccepted,
    CompilationError,
    DescriptorInvalid,
    ResourceInvalid,
    DependencyResolution,
    PermissionDenied,
    OutOfMemory,
    Timeout,
    Unclassified,
}

impl BuildFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JdkMissing => "JDK_MISSING",
            Self::SdkMissing => "SDK_MISSING",
            Self::LicenseNotAccepted => "LICENSE_NOT_ACCEPTED",
            Self::CompilationError => "COMPILATION_ERROR",
            Self::DescriptorInvalid => "DESCRIPTOR_INVALID",
            Self::ResourceInvalid => "RESOURCE_INVALID",
            Self::DependencyResolution => "DEPENDENCY_RESOLUTION",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Timeout => "TIMEOUT",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }
}

/// Build failure rules in priority order. Later terms ("error", "accept")
/// also occur inside earlier categories' output, so order is significant.
pub const BUILD_RULES: &[Rule<BuildFailureKind>] = &[
    Rule {
        kind: BuildFailureKind::JdkMissing,
        when: &[&["java_home"]],
        message: "Java JDK not found or JAVA_HOME not set. Install JDK 17+ and set JAVA_HOME.",
    },
    Rule {
        kind: BuildFailureKind::SdkMissing,
        when: &[&["android_home"], &["android sdk"], &["sdk location not found"]],
        message: "Android SDK not found. Install the Android SDK and set ANDROID_HOME.",
    },
    Rule {
        kind: BuildFailureKind::LicenseNotAccepted,
        when: &[&["license"], &["accept"]],
        message: "Android SDK licenses not accepted. Run \"sdkmanager --licenses\" to accept them.",
    },
    Rule {
        kind: BuildFailureKind::CompilationError,
        when: &[&["compile", "error"]],
        message: "Compilation error. Check the generated Java/Kotlin sources for syntax errors.",
    },
    Rule {
        kind: BuildFailureKind::DescriptorInvalid,
        when: &[&["manifest"]],
        message: "AndroidManifest.xml error. Check the manifest for invalid configuration.",
    },
    Rule {
        kind: BuildFailureKind::ResourceInvalid,
        when: &[&["resources", "error"]],
        message: "Resource error. Check drawable, layout and values files.",
    },
    Rule {
        kind: BuildFailureKind::DependencyResolution,
        when: &[&["dependency", "not found"], &["could not resolve"]],
        message: "Dependency resolution failed. Check network access and repository configuration.",
    },
    Rule {
        kind: BuildFailureKind::PermissionDenied,
        when: &[&["permission denied"], &["access denied"]],
        message: "Permission error. Ensure the project directory is writable.",
    },
    Rule {
        kind: BuildFailureKind::OutOfMemory,
        when: &[&["out of memory"], &["heap space"]],
        message: "Out of memory. Increase the JVM heap size for the build.",
    },
    Rule {
        kind: BuildFailureKind::Timeout,
        when: &[&["timeout"], &["timed out"]],
        message: "The build reported a timeout. Try again or build in smaller steps.",
    },
];

/// Map a failed build's output to a stable kind and user-facing message.
pub fn classify_build_failure(stderr: &str, stdout: &str) -> Classification<BuildFailureKind> {
    if let Some(rule) = first_match(BUILD_RULES, stderr, stdout) {
        return Classification {
            kind: Some(rule.kind),
            message: rule.message.to_string(),
        };
    }
    let message = last_meaningful_line(stderr, 10)
        .map(|line| format!("Build failed: {}", line))
        .unwrap_or_else(|| {
            "Build failed. Check the diagnostic output for more information.".to_string()
        });
    Classification {
        kind: None,
        message,
    }
}

/// Result of one build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub exit_code: Option<i32>,
    pub error: Option<JobError>,
}

impl BuildOutcome {
    fn failed(error: JobError) -> Self {
        Self {
            success: false,
            artifact_path: None,
            size_bytes: None,
            exit_code: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Runs the external build toolchain inside a generated project tree.
#[derive(Debug, Clone)]
pub struct BuildExecutor {
    config: BuildConfig,
}

impl BuildExecutor {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Check the entry point and descriptor before anything is spawned.
    pub async fn preflight(&self, project_root: &Path) -> Result<PathBuf, JobError> {
        let root = tokio::fs::canonicalize(project_root).await.map_err(|_| {
            JobError::new(
                ErrorCode::ConfigurationError,
                "Project directory not found. The project may not be initialized.",
            )
        })?;

        let entry = root.join(&self.config.entry_point);
        if !tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            return Err(JobError::new(
                ErrorCode::ConfigurationError,
                format!(
                    "Build entry point '{}' not found. The project may not be properly initialized.",
                    self.config.entry_point.display()
                ),
            ));
        }

        let descriptor = root.join(&self.config.descriptor);
        match tokio::fs::read_to_string(&descriptor).await {
            Ok(contents) if !contents.trim().is_empty() => {}
            Ok(_) => {
                return Err(JobError::new(
                    ErrorCode::ConfigurationError,
                    format!(
                        "Build descriptor '{}' is empty. The project structure is incomplete.",
                        self.config.descriptor.display()
                    ),
                ))
            }
            Err(_) => {
                return Err(JobError::new(
                    ErrorCode::ConfigurationError,
                    format!(
                        "Build descriptor '{}' not found. The project structure is incomplete.",
                        self.config.descriptor.display()
                    ),
                ))
            }
        }

        make_executable(&entry).await;
        Ok(root)
    }

    /// Build the project at `project_root`.
    ///
    /// Returns `Err(Cancelled)` only if `cancel` fired; every other problem is
    /// reported inside the outcome.
    pub async fn build(
        &self,
        project_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, Cancelled> {
        let root = match self.preflight(project_root).await {
            Ok(root) => root,
            Err(error) => {
                tracing::warn!(root = %project_root.display(), error = %error.message, "Build preflight failed");
                return Ok(BuildOutcome::failed(error));
            }
        };

        tracing::info!(
            root = %root.display(),
            entry = %self.config.entry_point.display(),
            args = ?self.config.args,
            "Starting build"
        );

        let mut cmd = Command::new(root.join(&self.config.entry_point));
        cmd.args(&self.config.args).current_dir(&root);

        let tail_chars = self.config.diagnostic_tail_chars;
        let output = match run_bounded(cmd, self.config.timeout, cancel).await {
            Ok(output) => output,
            Err(RunError::Cancelled) => {
                tracing::info!(root = %root.display(), "Build cancelled");
                return Err(Cancelled);
            }
            Err(RunError::Spawn(e)) => {
                tracing::error!(root = %root.display(), error = %e, "Build toolchain could not be started");
                return Ok(BuildOutcome::failed(JobError::new(
                    ErrorCode::ToolchainMissing,
                    "Required build tools not found. Ensure a Java JDK and the Android SDK are installed.",
                )));
            }
            Err(RunError::TimedOut { stdout, stderr }) => {
                tracing::warn!(root = %root.display(), timeout = ?self.config.timeout, "Build timed out");
                return Ok(BuildOutcome::failed(
                    JobError::new(
                        ErrorCode::BuildTimeout,
                        format!(
                            "Build timed out after {} seconds.",
                            self.config.timeout.as_secs()
                        ),
                    )
                    .with_diagnostic_tail(diagnostic_tail(&stdout, &stderr, tail_chars)),
                ));
            }
            Err(RunError::Wait(e)) => {
                tracing::error!(root = %root.display(), error = %e, "Lost track of build process");
                return Ok(BuildOutcome::failed(JobError::unexpected()));
            }
        };

        let exit_code = output.status.code();
        let tail = diagnostic_tail(&output.stdout, &output.stderr, tail_chars);

        if !output.success() {
            let classification = classify_build_failure(&output.stderr, &output.stdout);
            let label = classification
                .kind
                .unwrap_or(BuildFailureKind::Unclassified)
                .as_str();
            tracing::warn!(
                root = %root.display(),
                exit_code = ?exit_code,
                classification = label,
                "Build failed"
            );
            let mut outcome = BuildOutcome::failed(
                JobError::new(ErrorCode::BuildClassifiedFailure, classification.message)
                    .with_classification(label)
                    .with_diagnostic_tail(tail),
            );
            outcome.exit_code = exit_code;
            return Ok(outcome);
        }

        let artifact = root.join(&self.config.output_path);
        match tokio::fs::metadata(&artifact).await {
            Ok(meta) if meta.is_file() => {
                tracing::info!(artifact = %artifact.display(), size_bytes = meta.len(), "Build succeeded");
                Ok(BuildOutcome {
                    success: true,
                    artifact_path: Some(artifact),
                    size_bytes: Some(meta.len()),
                    exit_code,
                    error: None,
                })
            }
            _ => {
                tracing::warn!(artifact = %artifact.display(), "Build exited 0 but produced no package");
                let mut outcome = BuildOutcome::failed(
                    JobError::new(
                        ErrorCode::ArtifactMissingAfterBuild,
                        "Package not found after a successful build. Check the build configuration.",
                    )
                    .with_diagnostic_tail(tail),
                );
                outcome.exit_code = exit_code;
                Ok(outcome)
            }
        }
    }
}

#[cfg(unix)]
pub(crate) async fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
    {
        tracing::warn!(path = %path.display(), error = %e, "Could not mark entry point executable");
    }
}

#[cfg(not(unix))]
pub(crate) async fn make_executable(_path: &Path) {}
