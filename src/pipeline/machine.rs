use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorCode, JobError};
use crate::pipeline::concept::{Concept, ConceptService, HeuristicConcept};
use crate::pipeline::templates::{GeneratedFile, ProjectPlan, Section, TemplateLibrary};
use crate::scheduler::job::{AppSpec, JobResult, JobStatus};
use crate::scheduler::store::{Admitted, JobStore, TransitionError};
use crate::worker::build::{make_executable, BuildExecutor, BuildOutcome};

/// Why a job stopped before reaching `Completed`.
#[derive(Debug)]
enum Halt {
    /// The job's token fired.
    Cancelled,
    /// The record was ended or removed by someone else.
    Superseded(TransitionError),
    Failed(JobError),
}

impl From<TransitionError> for Halt {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Terminal(JobStatus::Cancelled) => Halt::Cancelled,
            TransitionError::Invalid { from, to } => {
                tracing::error!(%from, %to, "Pipeline attempted an illegal transition");
                Halt::Failed(JobError::unexpected())
            }
            other => Halt::Superseded(other),
        }
    }
}

fn unexpected(context: &str, err: impl std::fmt::Display) -> Halt {
    tracing::error!(error = %err, "{}", context);
    Halt::Failed(JobError::unexpected())
}

/// Drives one admitted job through every stage and finally into a terminal
/// state. The worker task is the only writer of its job's record.
#[derive(Clone)]
pub struct GenerationPipeline {
    store: Arc<RwLock<JobStore>>,
    concept: Arc<dyn ConceptService>,
    templates: Arc<dyn TemplateLibrary>,
    builder: BuildExecutor,
}

impl GenerationPipeline {
    pub fn new(
        store: Arc<RwLock<JobStore>>,
        concept: Arc<dyn ConceptService>,
        templates: Arc<dyn TemplateLibrary>,
        builder: BuildExecutor,
    ) -> Self {
        Self {
            store,
            concept,
            templates,
            builder,
        }
    }

    pub async fn run(&self, job: Admitted) {
        let id = job.job_id;
        let started = Instant::now();
        tracing::info!(job_id = %id, root = %job.artifact_root.display(), "Generation started");

        match self.drive(&job, started).await {
            Ok(()) => tracing::info!(job_id = %id, elapsed = ?started.elapsed(), "Generation finished"),
            Err(Halt::Cancelled) => {
                // A shutdown cancels the token without touching the record.
                if let Err(e) = self.store.write().await.cancel(&id) {
                    tracing::debug!(job_id = %id, error = %e, "Cancelled job already gone");
                }
                tracing::info!(job_id = %id, "Generation stopped by cancellation");
            }
            Err(Halt::Superseded(reason)) => {
                tracing::info!(job_id = %id, reason = %reason, "Generation abandoned");
            }
            Err(Halt::Failed(error)) => {
                tracing::warn!(job_id = %id, code = %error.code, message = %error.message, "Generation failed");
                if let Err(e) = self.store.write().await.fail(&id, error) {
                    tracing::debug!(job_id = %id, error = %e, "Could not record failure");
                }
            }
        }
    }

    async fn drive(&self, job: &Admitted, started: Instant) -> Result<(), Halt> {
        let id = job.job_id;
        let cancel = &job.cancel;

        self.enter(id, JobStatus::Analyzing, cancel).await?;
        let concept = self.analyze(&job.spec).await?;
        self.finish(id).await?;

        self.enter(id, JobStatus::Planning, cancel).await?;
        let plan = ProjectPlan::new(&job.spec, concept);
        tokio::fs::create_dir_all(&job.artifact_root)
            .await
            .map_err(|e| unexpected("Could not create artifact root", e))?;
        tracing::debug!(job_id = %id, app = %plan.app_name, package = %plan.package_name, "Project planned");
        self.finish(id).await?;

        for (stage, section) in [
            (JobStatus::Scaffolding, Section::Scaffold),
            (JobStatus::GeneratingUI, Section::Ui),
            (JobStatus::GeneratingLogic, Section::Logic),
            (JobStatus::IntegratingFeatures, Section::Features),
        ] {
            self.enter(id, stage, cancel).await?;
            let files = self.templates.render(&plan, section);
            self.write_section(id, &job.artifact_root, stage, files, cancel)
                .await?;
            self.finish(id).await?;
        }

        self.enter(id, JobStatus::Building, cancel).await?;
        let outcome = self
            .builder
            .build(&job.artifact_root, cancel)
            .await
            .map_err(|_| Halt::Cancelled)?;
        self.finish(id).await?;

        self.enter(id, JobStatus::BuildingArtifact, cancel).await?;
        if let Some(error) = &outcome.error {
            tracing::info!(job_id = %id, code = %error.code, "Build did not produce a package; delivering sources only");
        }
        self.finish(id).await?;

        self.enter(id, JobStatus::Finalizing, cancel).await?;
        let (project_size_bytes, file_count) = tree_stats(job.artifact_root.clone()).await?;
        let result = assemble_result(
            plan,
            &job.artifact_root,
            project_size_bytes,
            file_count,
            started,
            &outcome,
        );

        self.store
            .write()
            .await
            .complete(&id, result, outcome.error)?;
        Ok(())
    }

    async fn enter(
        &self,
        id: Uuid,
        stage: JobStatus,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        self.store.write().await.advance(&id, stage)?;
        tracing::info!(job_id = %id, stage = %stage, "Stage started");
        Ok(())
    }

    async fn finish(&self, id: Uuid) -> Result<(), Halt> {
        self.store.write().await.finish_stage(&id)?;
        Ok(())
    }

    async fn analyze(&self, spec: &AppSpec) -> Result<Concept, Halt> {
        let service = Arc::clone(&self.concept);
        let owned = spec.clone();
        let answer = tokio::task::spawn_blocking(move || service.analyze(&owned))
            .await
            .map_err(|e| unexpected("Concept analysis task failed", e))?;
        match answer {
            Ok(concept) => Ok(concept),
            Err(e) => {
                tracing::warn!(error = %e, "Concept service failed, using heuristic analysis");
                Ok(HeuristicConcept.concept_for(spec))
            }
        }
    }

    /// Write a section's files, moving progress from the previous stage's
    /// checkpoint toward this stage's as each file lands.
    async fn write_section(
        &self,
        id: Uuid,
        root: &Path,
        stage: JobStatus,
        files: Vec<GeneratedFile>,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        let ceiling = stage.checkpoint().unwrap_or(100);
        let floor = self
            .store
            .read()
            .await
            .get(&id)
            .map(|v| v.progress)
            .unwrap_or(0);
        let total = files.len();

        for (written, file) in files.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            if !file.is_contained() {
                tracing::error!(job_id = %id, path = %file.path.display(), "Template path escapes the project");
                return Err(Halt::Failed(JobError::new(
                    ErrorCode::ConfigurationError,
                    "A project template produced a file outside the project directory.",
                )));
            }

            let target = root.join(&file.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unexpected("Could not create project directory", e))?;
            }
            tokio::fs::write(&target, file.contents.as_bytes())
                .await
                .map_err(|e| unexpected("Could not write project file", e))?;
            if file.executable {
                make_executable(&target).await;
            }

            let span = usize::from(ceiling.saturating_sub(floor));
            let step = floor as usize + span * (written + 1) / total.max(1);
            let progress = u8::try_from(step).unwrap_or(ceiling);
            self.store.write().await.report_progress(&id, progress)?;
        }
        tracing::debug!(job_id = %id, stage = %stage, files = total, "Section written");
        Ok(())
    }
}

fn assemble_result(
    plan: ProjectPlan,
    root: &Path,
    project_size_bytes: u64,
    file_count: u64,
    started: Instant,
    outcome: &BuildOutcome,
) -> JobResult {
    JobResult {
        app_name: plan.app_name,
        description: plan.description,
        package_name: plan.package_name,
        category: plan.category,
        language: plan.language,
        theme: plan.theme,
        features: plan.features,
        screens: plan.screens,
        permissions: plan.permissions,
        dependencies: plan.dependencies,
        project_path: root.to_path_buf(),
        project_size_bytes,
        file_count,
        generation_secs: started.elapsed().as_secs_f64(),
        build_succeeded: outcome.success,
        artifact_path: outcome.artifact_path.clone(),
        artifact_size_bytes: outcome.size_bytes,
    }
}

async fn tree_stats(root: PathBuf) -> Result<(u64, u64), Halt> {
    tokio::task::spawn_blocking(move || walk(&root))
        .await
        .map_err(|e| unexpected("Tree statistics task failed", e))?
        .map_err(|e| unexpected("Could not measure project tree", e))
}

fn walk(dir: &Path) -> std::io::Result<(u64, u64)> {
    let mut bytes = 0;
    let mut files = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let kind = entry.file_type()?;
        if kind.is_dir() {
            let (b, f) = walk(&entry.path())?;
            bytes += b;
            files += f;
        } else if kind.is_file() {
            bytes += entry.metadata()?.len();
            files += 1;
        }
    }
    Ok((bytes, files))
}
