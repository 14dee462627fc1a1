use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::Luma;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DeviceConfig;
use crate::error::{ErrorCode, ForgeError, JobError};
use crate::worker::classifier::{first_line_with, first_match, Classification, Rule};
use crate::worker::process::{run_bounded, Cancelled, ProcessOutput, RunError};

/// Classified reasons an install-with-replace invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallFailureKind {
    DeviceOffline,
    InsufficientStorage,
    VersionDowngrade,
    UpdateIncompatible,
    MissingSharedLibrary,
    AbiMismatch,
    InvalidPackage,
    OsTooOld,
    OsTooNew,
    BlockedByPolicy,
    Timeout,
    Unclassified,
}

impl InstallFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceOffline => "DEVICE_OFFLINE",
            Self::InsufficientStorage => "INSUFFICIENT_STORAGE",
            Self::VersionDowngrade => "VERSION_DOWNGRADE",
            Self::UpdateIncompatible => "UPDATE_INCOMPATIBLE",
            Self::MissingSharedLibrary => "MISSING_SHARED_LIBRARY",
            Self::AbiMismatch => "ABI_MISMATCH",
            Self::InvalidPackage => "INVALID_PACKAGE",
            Self::OsTooOld => "OS_TOO_OLD",
            Self::OsTooNew => "OS_TOO_NEW",
            Self::BlockedByPolicy => "BLOCKED_BY_POLICY",
            Self::Timeout => "TIMEOUT",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }
}

/// Install failure rules in priority order. Independent of the build table:
/// "timeout" or "security" mean different things on a device.
pub const INSTALL_RULES: &[Rule<InstallFailureKind>] = &[
    Rule {
        kind: InstallFailureKind::DeviceOffline,
        when: &[&["device offline"], &["device not found"]],
        message: "Device went offline. Reconnect the USB cable and make sure USB debugging is enabled.",
    },
    Rule {
        kind: InstallFailureKind::InsufficientStorage,
        when: &[&["insufficient storage"], &["insufficient_storage"], &["no space"]],
        message: "Insufficient storage on the device. Free up space and try again.",
    },
    Rule {
        kind: InstallFailureKind::VersionDowngrade,
        when: &[&["install_failed_version_downgrade"]],
        message: "Version downgrade not allowed. Uninstall the existing app first or raise the version code.",
    },
    Rule {
        kind: InstallFailureKind::UpdateIncompatible,
        when: &[&["install_failed_update_incompatible"]],
        message: "Update incompatible with the installed app. Uninstall the existing app and try again.",
    },
    Rule {
        kind: InstallFailureKind::MissingSharedLibrary,
        when: &[&["install_failed_missing_shared_library"]],
        message: "The app requires a shared library that is not available on the device.",
    },
    Rule {
        kind: InstallFailureKind::AbiMismatch,
        when: &[&["install_failed_cpu_abi_incompatible"], &["install_failed_no_matching_abis"]],
        message: "The package is not compatible with the device CPU architecture.",
    },
    Rule {
        kind: InstallFailureKind::InvalidPackage,
        when: &[&["install_failed_invalid_apk"]],
        message: "Invalid package file. It may be corrupted; try rebuilding.",
    },
    Rule {
        kind: InstallFailureKind::OsTooOld,
        when: &[&["install_failed_older_sdk"]],
        message: "The device runs an Android version older than the app's minimum.",
    },
    Rule {
        kind: InstallFailureKind::OsTooNew,
        when: &[&["install_failed_newer_sdk"]],
        message: "The app targets an Android version the device does not support.",
    },
    Rule {
        kind: InstallFailureKind::BlockedByPolicy,
        when: &[&["security"], &["blocked"]],
        message: "Installation blocked by a security policy. Allow installs from this source on the device.",
    },
    Rule {
        kind: InstallFailureKind::Timeout,
        when: &[&["timeout"], &["timed out"]],
        message: "Installation timed out. The device may be slow or unresponsive.",
    },
];

pub fn classify_install_failure(stderr: &str, stdout: &str) -> Classification<InstallFailureKind> {
    if let Some(rule) = first_match(INSTALL_RULES, stderr, stdout) {
        return Classification {
            kind: Some(rule.kind),
            message: rule.message.to_string(),
        };
    }
    let message = first_line_with(stderr, &["failure", "error"])
        .or_else(|| first_line_with(stdout, &["failure", "error"]))
        .map(|line| format!("Installation failed: {}", line))
        .unwrap_or_else(|| {
            "Installation failed. Check device storage and the USB connection, then try again."
                .to_string()
        });
    Classification {
        kind: None,
        message,
    }
}

/// A device reported by the bridge. Lives for a single install call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub id: String,
    pub model: String,
    /// Connection state as reported by the bridge ("device", "offline", ...)
    pub connectivity: String,
}

/// Parse the bridge's device listing, skipping the header and blank lines.
pub fn parse_devices(listing: &str) -> Vec<DeviceTarget> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let state = parts.next().unwrap_or("unknown");
            Some(DeviceTarget {
                id: id.to_string(),
                model: "Unknown Device".to_string(),
                connectivity: state.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub success: bool,
    pub message: String,
    pub device: Option<DeviceTarget>,
    pub error: Option<JobError>,
}

impl InstallOutcome {
    fn failed(error: JobError, device: Option<DeviceTarget>) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            device,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Installs built packages onto a connected device through the bridge utility.
#[derive(Debug, Clone)]
pub struct DeployExecutor {
    config: DeviceConfig,
}

impl DeployExecutor {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn bridge(&self) -> Command {
        Command::new(&self.config.bridge)
    }

    pub async fn install(
        &self,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome, Cancelled> {
        match tokio::fs::metadata(artifact).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Ok(InstallOutcome::failed(
                    JobError::new(
                        ErrorCode::ArtifactNotFound,
                        "Package file not found. Build the project first.",
                    ),
                    None,
                ))
            }
        }

        if let Err(error) = self.probe(cancel).await? {
            return Ok(InstallOutcome::failed(error, None));
        }

        let mut device = match self.first_ready_device(cancel).await? {
            Ok(device) => device,
            Err(error) => return Ok(InstallOutcome::failed(error, None)),
        };

        device.model = self.query_model(&device.id, cancel).await?;
        tracing::info!(device = %device.id, model = %device.model, artifact = %artifact.display(), "Installing package");

        let mut cmd = self.bridge();
        cmd.arg("-s").arg(&device.id).arg("install").arg("-r").arg(artifact);
        let output = match run_bounded(cmd, self.config.install_timeout, cancel).await {
            Ok(output) => output,
            Err(RunError::Cancelled) => return Err(Cancelled),
            Err(RunError::TimedOut { .. }) => {
                tracing::warn!(device = %device.id, "Install timed out");
                return Ok(InstallOutcome::failed(
                    JobError::new(
                        ErrorCode::InstallTimeout,
                        "Install command timed out. The device may be unresponsive.",
                    ),
                    Some(device),
                ));
            }
            Err(RunError::Spawn(e)) => {
                tracing::error!(error = %e, "Bridge disappeared before install");
                return Ok(InstallOutcome::failed(bridge_missing(), Some(device)));
            }
            Err(RunError::Wait(e)) => {
                tracing::error!(error = %e, "Lost track of install process");
                return Ok(InstallOutcome::failed(JobError::unexpected(), Some(device)));
            }
        };

        // Older bridges exit 0 and print "Failure [...]" instead.
        if output.success() && !output.stdout.contains("Failure") {
            let size_mb = tokio::fs::metadata(artifact)
                .await
                .map(|m| m.len() as f64 / (1024.0 * 1024.0))
                .unwrap_or(0.0);
            tracing::info!(device = %device.id, "Package installed");
            return Ok(InstallOutcome {
                success: true,
                message: format!(
                    "Installed successfully on {} ({:.2} MB)",
                    device.model, size_mb
                ),
                device: Some(device),
                error: None,
            });
        }

        let classification = classify_install_failure(&output.stderr, &output.stdout);
        let label = classification
            .kind
            .unwrap_or(InstallFailureKind::Unclassified)
            .as_str();
        tracing::warn!(device = %device.id, classification = label, "Install failed");
        let error = JobError::new(ErrorCode::InstallClassifiedFailure, classification.message)
            .with_classification(label)
            .with_diagnostic_tail(crate::worker::process::diagnostic_tail(
                &output.stdout,
                &output.stderr,
                self.config.diagnostic_tail_chars,
            ));
        Ok(InstallOutcome::failed(error, Some(device)))
    }

    /// Version probe: tells "not installed" apart from "installed but broken".
    async fn probe(&self, cancel: &CancellationToken) -> Result<Result<(), JobError>, Cancelled> {
        let mut cmd = self.bridge();
        cmd.arg("version");
        match run_bounded(cmd, self.config.probe_timeout, cancel).await {
            Ok(output) if output.success() => Ok(Ok(())),
            Ok(output) => Ok(Err(bridge_error("version probe", Some(&output)))),
            Err(RunError::Spawn(e)) => {
                tracing::warn!(bridge = %self.config.bridge.display(), error = %e, "Device bridge not found");
                Ok(Err(bridge_missing()))
            }
            Err(RunError::TimedOut { .. }) => Ok(Err(bridge_error("version probe", None))),
            Err(RunError::Wait(_)) => Ok(Err(bridge_error("version probe", None))),
            Err(RunError::Cancelled) => Err(Cancelled),
        }
    }

    async fn first_ready_device(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Result<DeviceTarget, JobError>, Cancelled> {
        let mut cmd = self.bridge();
        cmd.arg("devices");
        let output = match run_bounded(cmd, self.config.probe_timeout, cancel).await {
            Ok(output) if output.success() => output,
            Ok(output) => return Ok(Err(bridge_error("device enumeration", Some(&output)))),
            Err(RunError::Cancelled) => return Err(Cancelled),
            Err(RunError::Spawn(_)) => return Ok(Err(bridge_missing())),
            Err(_) => return Ok(Err(bridge_error("device enumeration", None))),
        };

        let devices = parse_devices(&output.stdout);
        if let Some(ready) = devices.iter().find(|d| d.connectivity == "device") {
            return Ok(Ok(ready.clone()));
        }

        let message = match devices.first() {
            None => "No Android device connected. Enable USB debugging on the phone and connect it via USB.".to_string(),
            Some(d) => format!(
                "Device {} is {}. Unlock the phone and accept the USB debugging prompt.",
                d.id, d.connectivity
            ),
        };
        Ok(Err(JobError::new(ErrorCode::NoDeviceConnected, message)))
    }

    /// Best effort: any failure only degrades the label.
    async fn query_model(&self, device_id: &str, cancel: &CancellationToken) -> Result<String, Cancelled> {
        let mut cmd = self.bridge();
        cmd.args(["-s", device_id, "shell", "getprop", "ro.product.model"]);
        match run_bounded(cmd, self.config.query_timeout, cancel).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                Ok(output.stdout.trim().to_string())
            }
            Err(RunError::Cancelled) => Err(Cancelled),
            _ => Ok("Unknown Device".to_string()),
        }
    }
}

fn bridge_missing() -> JobError {
    JobError::new(
        ErrorCode::DeviceBridgeMissing,
        "Device bridge (adb) not found. Install the Android SDK Platform Tools.",
    )
}

fn bridge_error(step: &str, output: Option<&ProcessOutput>) -> JobError {
    let detail = output
        .and_then(|o| first_line_with(&o.stderr, &["error", "failed", "cannot"]))
        .map(|line| format!(": {}", line))
        .unwrap_or_default();
    JobError::new(
        ErrorCode::DeviceBridgeError,
        format!("Device bridge is installed but its {} failed{}", step, detail),
    )
}

/// Everything needed to hand a built package to someone else's phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharePackage {
    pub download_url: String,
    /// PNG QR code as a `data:` URI
    pub qr_code: String,
    pub page_html: String,
}

pub fn share_package(
    job_id: Uuid,
    app_name: &str,
    artifact: Option<&Path>,
    base_url: &str,
) -> Result<SharePackage, ForgeError> {
    if !artifact.is_some_and(Path::is_file) {
        return Err(ForgeError::ArtifactNotFound(job_id));
    }

    let download_url = format!(
        "{}/api/jobs/{}/artifact",
        base_url.trim_end_matches('/'),
        job_id
    );
    let qr_code = qr_data_uri(&download_url)?;
    let page_html = download_page(&download_url, &qr_code, app_name);
    Ok(SharePackage {
        download_url,
        qr_code,
        page_html,
    })
}

fn qr_data_uri(data: &str) -> Result<String, ForgeError> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| ForgeError::Internal(format!("QR encoding failed: {}", e)))?;
    let image = code.render::<Luma<u8>>().quiet_zone(true).build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ForgeError::Internal(format!("QR rendering failed: {}", e)))?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn download_page(download_url: &str, qr_code: &str, app_name: &str) -> String {
    let name = escape_html(app_name);
    let url = escape_html(download_url);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{name} - Download</title>
<style>
body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #f4f4f8; display: flex; justify-content: center; padding: 20px; }}
.card {{ background: #fff; border-radius: 16px; padding: 32px; max-width: 480px; width: 100%; text-align: center; }}
.download {{ display: block; padding: 16px; background: #5a67d8; color: #fff; border-radius: 10px; text-decoration: none; font-weight: 600; }}
.qr img {{ max-width: 240px; width: 100%; margin: 24px 0; }}
ol {{ text-align: left; }}
</style>
</head>
<body>
<div class="card">
<h1>{name}</h1>
<p>Your app is ready.</p>
<a class="download" href="{url}" download>Download package</a>
<div class="qr"><img src="{qr_code}" alt="QR code for {name}"></div>
<ol>
<li>Download the package.</li>
<li>Allow installs from unknown sources when prompted.</li>
<li>Open the downloaded file and tap Install.</li>
</ol>
</div>
</body>
</html>
"#
    )
}
