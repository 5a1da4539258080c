//! Print service facade used by the HTTP layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{JobError, Result, StorageError};
use crate::jobs::{JobRegistry, JobStatus, PrintJob, PrintOptions, PrintScheduler, QueueStats};
use crate::storage::{FileStore, media_type_for};

/// Snapshot of the queue for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub timestamp: DateTime<Utc>,
    pub queue_size: usize,
    pub stats: QueueStats,
    pub is_processing: bool,
}

/// Submission and status queries over the registry and scheduler.
#[derive(Clone)]
pub struct PrintService {
    registry: Arc<JobRegistry>,
    scheduler: Arc<PrintScheduler>,
    files: Arc<dyn FileStore>,
}

impl PrintService {
    pub fn new(
        registry: Arc<JobRegistry>,
        scheduler: Arc<PrintScheduler>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            files,
        }
    }

    /// Enqueue an already-stored job.
    pub async fn submit(&self, job: PrintJob) -> std::result::Result<Uuid, JobError> {
        self.registry.submit(job).await
    }

    /// Store an uploaded document and enqueue a job for it.
    ///
    /// The stored file is removed again if the job is rejected.
    pub async fn submit_upload(
        &self,
        filename: &str,
        bytes: &[u8],
        device: &str,
        options: PrintOptions,
    ) -> Result<Uuid> {
        if filename.trim().is_empty() || bytes.is_empty() {
            return Err(StorageError::Empty.into());
        }
        let media_type = media_type_for(filename).ok_or_else(|| StorageError::UnsupportedFormat {
            filename: filename.to_string(),
        })?;

        let path = self.files.store(filename, bytes).await?;
        let job = PrintJob::new(path.clone(), media_type, device, options);

        match self.registry.submit(job).await {
            Ok(id) => {
                info!(
                    job_id = %id,
                    filename,
                    printer = device,
                    copies = options.copies,
                    "Print task submitted"
                );
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self.files.delete(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove rejected upload");
                }
                Err(e.into())
            }
        }
    }

    /// Current status of a job, queued or retired.
    pub async fn job_status(&self, id: Uuid) -> std::result::Result<JobStatus, JobError> {
        self.registry
            .lookup(id)
            .await
            .map(|job| job.status())
            .ok_or(JobError::NotFound { id })
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let status = self.scheduler.status().await;
        QueueStatus {
            timestamp: Utc::now(),
            queue_size: status.queue.queued,
            stats: status.queue,
            is_processing: status.is_processing,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.scheduler.is_processing()
    }
}
