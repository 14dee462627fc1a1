use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ForgeError, JobError, Result};
use crate::pipeline::{
    AndroidTemplates, ConceptService, GenerationPipeline, HeuristicConcept, TemplateLibrary,
};
use crate::reaper::Reaper;
use crate::scheduler::{Admitted, AppSpec, CancelOutcome, JobStats, JobStore, JobView};
use crate::worker::deploy::share_package;
use crate::worker::{BuildExecutor, DeployExecutor, InstallOutcome, SharePackage};

/// Orchestration engine: admission, one worker task per admitted job,
/// status polling, cancellation, deployment and retention.
///
/// Cheap to clone; clones share the same job store.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<RwLock<JobStore>>,
    pipeline: GenerationPipeline,
    deployer: DeployExecutor,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig, shutdown: CancellationToken) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(HeuristicConcept),
            Arc::new(AndroidTemplates),
            shutdown,
        )
    }

    pub fn with_collaborators(
        config: EngineConfig,
        concept: Arc<dyn ConceptService>,
        templates: Arc<dyn TemplateLibrary>,
        shutdown: CancellationToken,
    ) -> Self {
        let store = Arc::new(RwLock::new(JobStore::new(
            config.storage_root.clone(),
            config.max_concurrent_jobs,
        )));
        let pipeline = GenerationPipeline::new(
            store.clone(),
            concept,
            templates,
            BuildExecutor::new(config.build.clone()),
        );
        Self {
            deployer: DeployExecutor::new(config.device.clone()),
            config: Arc::new(config),
            store,
            pipeline,
            shutdown,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<RwLock<JobStore>> {
        self.store.clone()
    }

    /// Validate and admit a request, then hand it to a fresh worker task.
    ///
    /// Rejections (validation or capacity) leave no record behind.
    pub async fn submit(&self, spec: AppSpec) -> Result<JobView> {
        let spec = spec.validate()?;
        let admitted = self.store.write().await.submit(spec, &self.shutdown)?;
        let view = admitted.view.clone();
        self.spawn_worker(admitted);
        Ok(view)
    }

    fn spawn_worker(&self, admitted: Admitted) {
        let id = admitted.job_id;
        let pipeline = self.pipeline.clone();
        let worker = tokio::spawn(async move { pipeline.run(admitted).await });

        // A panicking worker must still leave a terminal record and free its slot.
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                if e.is_panic() {
                    tracing::error!(job_id = %id, "Worker panicked");
                } else {
                    tracing::error!(job_id = %id, error = %e, "Worker aborted");
                }
                if let Err(e) = store.write().await.fail(&id, JobError::unexpected()) {
                    tracing::debug!(job_id = %id, error = %e, "Job already terminal");
                }
            }
        });
    }

    pub async fn status(&self, id: &Uuid) -> Result<JobView> {
        self.store
            .read()
            .await
            .get(id)
            .ok_or(ForgeError::JobNotFound(*id))
    }

    pub async fn cancel(&self, id: &Uuid) -> Result<CancelOutcome> {
        self.store.write().await.cancel(id)
    }

    pub async fn list(&self) -> Vec<JobView> {
        self.store.read().await.all_jobs()
    }

    pub async fn stats(&self) -> JobStats {
        self.store.read().await.stats()
    }

    /// Path of the built package, if the job produced one and it still exists.
    pub async fn artifact(&self, id: &Uuid) -> Result<PathBuf> {
        let path = self.store.read().await.artifact_path(id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ForgeError::ArtifactNotFound(*id)),
        }
    }

    /// Install the job's package on a connected device. Deployment is never
    /// automatic; it only happens through this call, and only once the job
    /// has finished with a package on disk.
    pub async fn install(&self, id: &Uuid) -> Result<InstallOutcome> {
        let package = self.artifact(id).await?;

        tracing::info!(job_id = %id, package = %package.display(), "Install requested");
        self.deployer
            .install(&package, &self.shutdown.child_token())
            .await
            .map_err(|_| ForgeError::Internal("install interrupted by shutdown".to_string()))
    }

    pub async fn share(&self, id: &Uuid) -> Result<SharePackage> {
        let (app_name, artifact) = {
            let store = self.store.read().await;
            let job = store.get_job(id).ok_or(ForgeError::JobNotFound(*id))?;
            let result = job.result.as_ref();
            (
                result
                    .map(|r| r.app_name.clone())
                    .unwrap_or_else(|| "Application".to_string()),
                result.and_then(|r| r.artifact_path.clone()),
            )
        };
        share_package(
            *id,
            &app_name,
            artifact.as_deref(),
            &self.config.public_base_url,
        )
    }

    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let reaper = Reaper::new(
            self.store.clone(),
            self.config.retention,
            self.config.reap_interval,
        );
        tokio::spawn(reaper.run(self.shutdown.clone()))
    }
}
