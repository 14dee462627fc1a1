use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForgeError, JobError};

/// Number of working stages between `Queued` and `Completed`.
pub const TOTAL_STEPS: u8 = 9;

/// Lifecycle of a generation job.
///
/// Non-terminal statuses form a single chain; any of them may also end in
/// `Failed` or `Cancelled`. Terminal statuses have no outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Analyzing,
    Planning,
    Scaffolding,
    #[serde(rename = "generating_ui")]
    GeneratingUI,
    GeneratingLogic,
    IntegratingFeatures,
    Building,
    BuildingArtifact,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Position along the forward chain. Terminal failure states rank above
    /// every working stage so observed sequences stay non-decreasing.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Analyzing => 1,
            JobStatus::Planning => 2,
            JobStatus::Scaffolding => 3,
            JobStatus::GeneratingUI => 4,
            JobStatus::GeneratingLogic => 5,
            JobStatus::IntegratingFeatures => 6,
            JobStatus::Building => 7,
            JobStatus::BuildingArtifact => 8,
            JobStatus::Finalizing => 9,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 10,
        }
    }

    /// Progress checkpoint reached once this stage has finished.
    pub fn checkpoint(&self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Analyzing => Some(15),
            JobStatus::Planning => Some(25),
            JobStatus::Scaffolding => Some(40),
            JobStatus::GeneratingUI => Some(55),
            JobStatus::GeneratingLogic => Some(70),
            JobStatus::IntegratingFeatures => Some(85),
            JobStatus::Building => Some(95),
            JobStatus::BuildingArtifact => Some(96),
            JobStatus::Finalizing => Some(98),
            JobStatus::Completed => Some(100),
            JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    /// The next stage on the forward chain.
    pub fn successor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Queued => Some(JobStatus::Analyzing),
            JobStatus::Analyzing => Some(JobStatus::Planning),
            JobStatus::Planning => Some(JobStatus::Scaffolding),
            JobStatus::Scaffolding => Some(JobStatus::GeneratingUI),
            JobStatus::GeneratingUI => Some(JobStatus::GeneratingLogic),
            JobStatus::GeneratingLogic => Some(JobStatus::IntegratingFeatures),
            JobStatus::IntegratingFeatures => Some(JobStatus::Building),
            JobStatus::Building => Some(JobStatus::BuildingArtifact),
            JobStatus::BuildingArtifact => Some(JobStatus::Finalizing),
            JobStatus::Finalizing => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed | JobStatus::Cancelled => true,
            other => self.successor() == Some(other),
        }
    }

    /// Human readable description of the work happening in this stage.
    pub fn step_label(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued...",
            JobStatus::Analyzing => "Analyzing the idea...",
            JobStatus::Planning => "Planning the project structure...",
            JobStatus::Scaffolding => "Creating the base structure...",
            JobStatus::GeneratingUI => "Preparing UI components...",
            JobStatus::GeneratingLogic => "Writing business logic...",
            JobStatus::IntegratingFeatures => "Integrating features...",
            JobStatus::Building => "Compiling the project (this may take a few minutes)...",
            JobStatus::BuildingArtifact => "Collecting the application package...",
            JobStatus::Finalizing => "Running final checks...",
            JobStatus::Completed => "Done",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Planning => "planning",
            JobStatus::Scaffolding => "scaffolding",
            JobStatus::GeneratingUI => "generating_ui",
            JobStatus::GeneratingLogic => "generating_logic",
            JobStatus::IntegratingFeatures => "integrating_features",
            JobStatus::Building => "building",
            JobStatus::BuildingArtifact => "building_artifact",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

const LANGUAGES: &[&str] = &["java", "kotlin"];
const THEMES: &[&str] = &["light", "dark", "auto"];
const UI_FRAMEWORKS: &[&str] = &["xml", "compose"];

fn default_language() -> String {
    "java".to_string()
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_category() -> String {
    "auto".to_string()
}

fn default_architecture() -> String {
    "single_activity".to_string()
}

fn default_ui_framework() -> String {
    "xml".to_string()
}

/// A natural-language application request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    pub idea: String,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub advanced_features: Vec<String>,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default = "default_ui_framework")]
    pub ui_framework: String,
    #[serde(default)]
    pub owner: Option<String>,
}

impl AppSpec {
    pub fn new(idea: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            app_name: None,
            language: default_language(),
            theme: default_theme(),
            category: default_category(),
            advanced_features: Vec::new(),
            architecture: default_architecture(),
            ui_framework: default_ui_framework(),
            owner: None,
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Normalize casing and whitespace, then check the request is acceptable.
    pub fn validate(mut self) -> Result<Self, ForgeError> {
        self.idea = self.idea.trim().to_string();
        self.language = self.language.trim().to_lowercase();
        self.theme = self.theme.trim().to_lowercase();
        self.ui_framework = self.ui_framework.trim().to_lowercase();
        self.app_name = self
            .app_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let mut errors = Vec::new();
        let idea_len = self.idea.chars().count();
        if idea_len == 0 {
            errors.push("an application idea is required".to_string());
        } else if idea_len < 10 {
            errors.push("the application idea must be at least 10 characters".to_string());
        } else if idea_len > 1000 {
            errors.push("the application idea must be at most 1000 characters".to_string());
        }
        if !LANGUAGES.contains(&self.language.as_str()) {
            errors.push(format!("unsupported language '{}'", self.language));
        }
        if !THEMES.contains(&self.theme.as_str()) {
            errors.push(format!("unsupported theme '{}'", self.theme));
        }
        if !UI_FRAMEWORKS.contains(&self.ui_framework.as_str()) {
            errors.push(format!("unsupported ui framework '{}'", self.ui_framework));
        }

        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ForgeError::Validation(errors.join(", ")))
        }
    }
}

/// Outcome data recorded when a job reaches `Completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub app_name: String,
    pub description: String,
    pub package_name: String,
    pub category: String,
    pub language: String,
    pub theme: String,
    pub features: Vec<String>,
    pub screens: Vec<String>,
    pub permissions: Vec<String>,
    pub dependencies: Vec<String>,
    pub project_path: PathBuf,
    pub project_size_bytes: u64,
    pub file_count: u64,
    pub generation_secs: f64,
    pub build_succeeded: bool,
    pub artifact_path: Option<PathBuf>,
    pub artifact_size_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub steps_completed: u8,
    pub owner: Option<String>,
    pub spec: AppSpec,
    pub artifact_root: PathBuf,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(spec: AppSpec, storage_root: &std::path::Path) -> Self {
        Self::with_id(Uuid::new_v4(), spec, storage_root, Utc::now())
    }

    pub fn with_id(
        id: Uuid,
        spec: AppSpec,
        storage_root: &std::path::Path,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            current_step: JobStatus::Queued.step_label().to_string(),
            steps_completed: 0,
            owner: spec.owner.clone(),
            spec,
            artifact_root: storage_root.join(id.to_string()),
            result: None,
            error: None,
            created_at,
            estimated_completion: created_at + Duration::minutes(2),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Point-in-time snapshot handed to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub steps_completed: u8,
    pub total_steps: u8,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            steps_completed: job.steps_completed,
            total_steps: TOTAL_STEPS,
            owner: job.owner.clone(),
            created_at: job.created_at,
            estimated_completion: job.estimated_completion,
            finished_at: job.finished_at,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}
