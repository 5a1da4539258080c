//! Job registry: FIFO print queue plus a lookup index, with broadcast of job events.
//!
//! The ordered queue and the index live behind one lock so a job is never
//! visible in one and missing from the other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{JobEvent, JobState, PrintJob, QueueStats};
use crate::error::JobError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Default)]
struct RegistryInner {
    /// Submission order. Jobs leave from the front only.
    order: VecDeque<Uuid>,
    index: HashMap<Uuid, PrintJob>,
    /// Jobs that left the queue, oldest first, with their retirement time.
    retired: VecDeque<(Uuid, DateTime<Utc>)>,
    /// Same ids as `retired`, for O(1) idempotency checks.
    retired_ids: HashSet<Uuid>,
}

/// Thread-safe print job registry.
pub struct JobRegistry {
    inner: RwLock<RegistryInner>,
    /// How long retired jobs stay in the index. Zero keeps them forever.
    retention: Duration,
    tx: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    /// Create a registry that never prunes retired jobs.
    pub fn new() -> Arc<Self> {
        Self::with_retention(Duration::ZERO)
    }

    /// Create a registry whose retired jobs are dropped from the index after `retention`.
    pub fn with_retention(retention: Duration) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            inner: RwLock::new(RegistryInner::default()),
            retention,
            tx,
        })
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Validate a job, assign an ID if it has none, and append it to the queue.
    pub async fn submit(&self, mut job: PrintJob) -> Result<Uuid, JobError> {
        job.validate()
            .map_err(|reason| JobError::Invalid { reason })?;

        if job.id.is_nil() {
            job.id = Uuid::new_v4();
        }
        let id = job.id;

        let queue_size = {
            let mut inner = self.inner.write().await;
            if inner.index.contains_key(&id) {
                return Err(JobError::Duplicate { id });
            }
            inner.order.push_back(id);
            inner.index.insert(id, job);
            inner.order.len()
        };

        info!(job_id = %id, queue_size, "Print task enqueued");

        // Ok if nobody is listening
        let _ = self.tx.send(JobEvent::Submitted { id });

        Ok(id)
    }

    /// Read the head of the queue without removing it.
    ///
    /// Order entries with no indexed job are skipped.
    pub async fn peek_head(&self) -> Option<PrintJob> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .find_map(|id| inner.index.get(id))
            .cloned()
    }

    /// Remove and return the head of the queue.
    ///
    /// The job stays in the index so its status can still be queried.
    /// Order entries with no indexed job are dropped on the way.
    pub async fn take_head(&self) -> Option<PrintJob> {
        let mut inner = self.inner.write().await;
        while let Some(id) = inner.order.pop_front() {
            match inner.index.get(&id) {
                Some(job) => {
                    let job = job.clone();
                    debug!(job_id = %id, queue_size = inner.order.len(), "Print task dequeued");
                    return Some(job);
                }
                None => warn!(job_id = %id, "Dropped queue entry with no indexed task"),
            }
        }
        None
    }

    /// Look up a job by ID, whether or not it is still queued.
    pub async fn lookup(&self, id: Uuid) -> Option<PrintJob> {
        self.inner.read().await.index.get(&id).cloned()
    }

    /// Move a job to a new state.
    ///
    /// Unknown IDs and backward transitions leave the registry unchanged.
    pub async fn set_state(
        &self,
        id: Uuid,
        state: JobState,
        detail: Option<String>,
    ) -> Result<(), JobError> {
        let from = {
            let mut inner = self.inner.write().await;
            let Some(job) = inner.index.get_mut(&id) else {
                warn!(job_id = %id, target = %state, "Task not found for status update");
                return Err(JobError::NotFound { id });
            };

            let from = job.state;
            if job.transition_to(state, detail).is_err() {
                warn!(job_id = %id, from = %from, target = %state, "Rejected task state transition");
                return Err(JobError::InvalidTransition {
                    id,
                    state: from,
                    target: state,
                });
            }
            from
        };

        info!(job_id = %id, from = %from, to = %state, "Task status updated");

        let _ = self.tx.send(JobEvent::StateChanged { id, from, to: state });

        Ok(())
    }

    /// Record that a job has left the queue. Returns `false` if it was already
    /// recorded, is unknown, or is still queued.
    pub async fn mark_retired(&self, id: Uuid) -> bool {
        {
            let mut inner = self.inner.write().await;
            if !inner.index.contains_key(&id) || inner.order.contains(&id) {
                return false;
            }
            if !inner.retired_ids.insert(id) {
                return false;
            }
            inner.retired.push_back((id, Utc::now()));
        }

        let _ = self.tx.send(JobEvent::Retired { id });
        true
    }

    /// Drop retired jobs whose retention window has passed at `now`.
    /// Returns the number of jobs removed from the index.
    pub async fn prune_retired(&self, now: DateTime<Utc>) -> usize {
        if self.retention.is_zero() {
            return 0;
        }
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };

        let mut inner = self.inner.write().await;
        let mut pruned = 0;

        while let Some(&(id, retired_at)) = inner.retired.front() {
            if retired_at + retention > now {
                break;
            }
            inner.retired.pop_front();
            inner.retired_ids.remove(&id);
            inner.index.remove(&id);
            pruned += 1;
        }

        if pruned > 0 {
            debug!(count = pruned, "Pruned retired print tasks");
        }

        pruned
    }

    /// Number of jobs still in the queue.
    pub async fn size(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Check if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }

    /// Job counts per state across every job the index knows about.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.read().await;
        let mut stats = QueueStats {
            queued: inner.order.len(),
            ..Default::default()
        };
        for job in inner.index.values() {
            stats.record(job.state);
        }
        stats
    }

}
