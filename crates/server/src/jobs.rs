//! In-memory job table and the simulated generate-then-mint pipeline.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use shared::{
    domain::{JobId, JobStage, PartialResult, WalletAddress},
    protocol::StatusReport,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Settings, DEFAULT_JOB_RETENTION};

#[derive(Debug, Clone)]
struct JobRecord {
    prompt: String,
    owner: WalletAddress,
    report: StatusReport,
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn expired(&self, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|finished| finished.elapsed() >= retention)
    }
}

#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    updates: broadcast::Sender<StatusReport>,
    retention: Duration,
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }

    /// Finished jobs older than `retention` are evicted as new jobs arrive. In-flight jobs stay.
    pub fn with_retention(retention: Duration) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            updates,
            retention,
        }
    }

    /// Registers a job in the `generating` stage and returns its id.
    pub async fn create(&self, prompt: String, owner: WalletAddress) -> JobId {
        let job_id = JobId::new(format!("job_{}", Uuid::new_v4().simple()));
        let report = StatusReport {
            job_id: job_id.clone(),
            stage: JobStage::Generating,
            partial: PartialResult::default(),
            error: None,
            updated_at: Utc::now(),
        };
        info!(job_id = %job_id, owner = %owner, "jobs: created");
        {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, record| !record.expired(self.retention));
            if jobs.len() < before {
                debug!(evicted = before - jobs.len(), "jobs: evicted finished jobs");
            }
            jobs.insert(
                job_id.clone(),
                JobRecord {
                    prompt,
                    owner,
                    report: report.clone(),
                    finished_at: None,
                },
            );
        }
        let _ = self.updates.send(report);
        job_id
    }

    pub async fn get(&self, job_id: &JobId) -> Option<StatusReport> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|record| record.report.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusReport> {
        self.updates.subscribe()
    }

    /// Moves a job forward and broadcasts the new report. Terminal jobs are left untouched.
    pub async fn advance(
        &self,
        job_id: &JobId,
        stage: JobStage,
        partial: PartialResult,
        error: Option<String>,
    ) -> Option<StatusReport> {
        let report = {
            let mut jobs = self.jobs.write().await;
            let record = jobs.get_mut(job_id)?;
            if record.report.stage.is_terminal() {
                return None;
            }
            record.report.stage = stage;
            record.report.partial.merge(&partial);
            record.report.error = error;
            record.report.updated_at = Utc::now();
            if stage.is_terminal() {
                record.finished_at = Some(Instant::now());
            }
            record.report.clone()
        };
        debug!(job_id = %job_id, stage = %report.stage, "jobs: advanced");
        let _ = self.updates.send(report.clone());
        Some(report)
    }

    async fn describe(&self, job_id: &JobId) -> Option<(String, WalletAddress)> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|record| (record.prompt.clone(), record.owner.clone()))
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks one job through generation, pinning and minting, `stage_delay` apart.
pub async fn run_pipeline(store: JobStore, job_id: JobId, settings: Arc<Settings>) {
    let Some((prompt, owner)) = store.describe(&job_id).await else {
        return;
    };

    tokio::time::sleep(settings.stage_delay).await;
    if settings.should_fail(&prompt) {
        warn!(job_id = %job_id, "jobs: generation failed");
        store
            .advance(
                &job_id,
                JobStage::Failed,
                PartialResult::default(),
                Some("image generation failed".to_string()),
            )
            .await;
        return;
    }
    let cid = fake_cid();
    let assets = PartialResult {
        image_url: Some(format!("{}/{cid}/{job_id}.png", settings.ipfs_gateway)),
        metadata_url: Some(format!("{}/{cid}/metadata.json", settings.ipfs_gateway)),
        transaction_hash: None,
    };
    info!(job_id = %job_id, "jobs: image pinned; minting");
    if store
        .advance(&job_id, JobStage::Minting, assets, None)
        .await
        .is_none()
    {
        return;
    }

    tokio::time::sleep(settings.stage_delay).await;
    let minted = PartialResult {
        transaction_hash: Some(fake_transaction_hash()),
        ..PartialResult::default()
    };
    if let Some(report) = store
        .advance(&job_id, JobStage::Completed, minted, None)
        .await
    {
        info!(
            job_id = %job_id,
            owner = %owner,
            transaction_hash = ?report.partial.transaction_hash,
            "jobs: minted"
        );
    }
}

fn fake_cid() -> String {
    format!("bafy{}", Uuid::new_v4().simple())
}

fn fake_transaction_hash() -> String {
    format!("0x{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
#[path = "tests/jobs_tests.rs"]
mod tests;
