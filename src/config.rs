use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the external build toolchain.
///
/// The toolchain is invoked from the artifact root as
/// `./<entry_point> <args...>` and must leave its package at `output_path`.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Build entry point, relative to the artifact root
    pub entry_point: PathBuf,
    /// Build descriptor, relative to the artifact root
    pub descriptor: PathBuf,
    /// Arguments passed to the entry point
    pub args: Vec<String>,
    /// Expected package location, relative to the artifact root
    pub output_path: PathBuf,
    /// Wall-clock limit for one toolchain run
    pub timeout: Duration,
    /// How many trailing characters of stdout/stderr are kept for diagnostics
    pub diagnostic_tail_chars: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            entry_point: PathBuf::from("gradlew"),
            descriptor: PathBuf::from("app/build.gradle"),
            args: vec![
                "assembleDebug".to_string(),
                "--no-daemon".to_string(),
                "--parallel".to_string(),
            ],
            output_path: PathBuf::from("app/build/outputs/apk/debug/app-debug.apk"),
            timeout: Duration::from_secs(600),
            diagnostic_tail_chars: 1000,
        }
    }
}

/// Configuration for the device bridge utility used by the deployment executor.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Bridge executable, resolved through `PATH` unless it contains a separator
    pub bridge: PathBuf,
    /// Limit for the version probe and device enumeration
    pub probe_timeout: Duration,
    /// Limit for the per-device model query
    pub query_timeout: Duration,
    /// Limit for the install-with-replace invocation
    pub install_timeout: Duration,
    /// How many trailing characters of bridge output are kept for diagnostics
    pub diagnostic_tail_chars: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bridge: PathBuf::from("adb"),
            probe_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(5),
            install_timeout: Duration::from_secs(120),
            diagnostic_tail_chars: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one artifact tree per job
    pub storage_root: PathBuf,
    /// Ceiling on simultaneously non-terminal jobs
    pub max_concurrent_jobs: usize,
    /// How long a terminal job (and its artifact) is kept
    pub retention: Duration,
    /// Period of the reaper sweep
    pub reap_interval: Duration,
    /// Base URL used when building share links
    pub public_base_url: String,
    pub build: BuildConfig,
    pub device: DeviceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("generated_apps"),
            max_concurrent_jobs: 5,
            retention: Duration::from_secs(24 * 60 * 60),
            reap_interval: Duration::from_secs(60 * 60),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            build: BuildConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_config_default() {
        let cfg = BuildConfig::default();
        assert_eq!(cfg.entry_point, PathBuf::from("gradlew"));
        assert_eq!(cfg.descriptor, PathBuf::from("app/build.gradle"));
        assert_eq!(cfg.args, vec!["assembleDebug", "--no-daemon", "--parallel"]);
        assert_eq!(
            cfg.output_path,
            PathBuf::from("app/build/outputs/apk/debug/app-debug.apk")
        );
        assert_eq!(cfg.timeout, Duration::from_secs(600));
        assert_eq!(cfg.diagnostic_tail_chars, 1000);
    }

    #[test]
    fn device_config_default() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.bridge, PathBuf::from("adb"));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(10));
        assert_eq!(cfg.query_timeout, Duration::from_secs(5));
        assert_eq!(cfg.install_timeout, Duration::from_secs(120));
        assert_eq!(cfg.diagnostic_tail_chars, 1000);
    }

    #[test]
    fn engine_config_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_concurrent_jobs, 5);
        assert_eq!(cfg.retention, Duration::from_secs(86_400));
        assert_eq!(cfg.reap_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn engine_config_builders() {
        let cfg = EngineConfig::new("/tmp/apps")
            .with_max_concurrent_jobs(2)
            .with_retention(Duration::from_secs(60))
            .with_public_base_url("https://forge.example.com/");
        assert_eq!(cfg.storage_root, PathBuf::from("/tmp/apps"));
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.retention, Duration::from_secs(60));
        assert_eq!(cfg.public_base_url, "https://forge.example.com");
    }
}
