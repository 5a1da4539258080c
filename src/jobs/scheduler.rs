//! Print scheduler: single-flight loop that drives queued jobs to a terminal state.
//!
//! Each tick:
//! 1. Skips entirely if another tick still holds the busy flag
//! 2. Retires finished jobs sitting at the head of the queue
//! 3. Takes the first pending job and runs it to completion
//!
//! At most one job executes per tick and at most one tick runs at a time.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{JobState, MediaType, PrintJob, QueueStats};
use super::registry::JobRegistry;
use crate::printing::PrintExecutor;
use crate::storage::FileStore;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,
    /// Nothing left to run. `retired` finished jobs were cleared on the way.
    Idle { retired: usize },
    /// One job was executed and ended in `state`.
    Executed {
        id: Uuid,
        state: JobState,
        retired: usize,
    },
    /// The head job is mid-flight; nothing was started.
    Blocked { id: Uuid, retired: usize },
}

/// Activity flag plus a queue snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_processing: bool,
    pub queue: QueueStats,
}

/// Holds the busy flag for the lifetime of a tick, including unwinding.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Pulls jobs off the registry one at a time and prints them.
pub struct PrintScheduler {
    registry: Arc<JobRegistry>,
    files: Arc<dyn FileStore>,
    printer: Arc<dyn PrintExecutor>,
    busy: AtomicBool,
}

impl PrintScheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        files: Arc<dyn FileStore>,
        printer: Arc<dyn PrintExecutor>,
    ) -> Self {
        Self {
            registry,
            files,
            printer,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a tick is running right now.
    pub fn is_processing(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_processing: self.is_processing(),
            queue: self.registry.stats().await,
        }
    }

    /// Run one scheduling pass.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Print task processing already in progress, skipping this cycle");
            return TickOutcome::Skipped;
        };

        let mut retired = 0;
        let outcome = loop {
            let Some(head) = self.registry.peek_head().await else {
                debug!("No tasks in queue");
                break TickOutcome::Idle { retired };
            };

            match head.state {
                JobState::Completed | JobState::Failed => {
                    if let Some(job) = self.registry.take_head().await {
                        self.retire(&job).await;
                        retired += 1;
                    }
                }
                JobState::Pending => {
                    let Some(job) = self.registry.take_head().await else {
                        break TickOutcome::Idle { retired };
                    };
                    info!(job_id = %job.id, "Found pending task for processing");
                    let id = job.id;
                    let state = self.execute(job).await;
                    break TickOutcome::Executed { id, state, retired };
                }
                JobState::InPreparation | JobState::Printing => {
                    debug!(job_id = %head.id, state = %head.state, "Head task is mid-flight");
                    break TickOutcome::Blocked {
                        id: head.id,
                        retired,
                    };
                }
            }
        };

        self.registry.prune_retired(Utc::now()).await;

        outcome
    }

    /// Drive a job from `Pending` to a terminal state. Never fails; the
    /// outcome is recorded on the job.
    async fn execute(&self, job: PrintJob) -> JobState {
        let id = job.id;
        info!(
            job_id = %id,
            file = %job.payload_ref.display(),
            media_type = %job.media_type,
            printer = %job.target_device,
            "Processing print task"
        );

        if let Err(e) = self
            .registry
            .set_state(id, JobState::InPreparation, None)
            .await
        {
            error!(job_id = %id, error = %e, "Could not start print task");
            return self.current_state(id, job.state).await;
        }

        let result = AssertUnwindSafe(self.run(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err("print execution panicked".to_string()));

        let final_state = match result {
            Ok(()) => {
                match self.registry.set_state(id, JobState::Completed, None).await {
                    Ok(()) => info!(job_id = %id, "Print task completed successfully"),
                    Err(e) => error!(job_id = %id, error = %e, "Could not mark task completed"),
                }
                JobState::Completed
            }
            Err(reason) => {
                let detail = format!("Print failed: {reason}");
                error!(job_id = %id, error = %detail, "Print task failed");
                if let Err(e) = self
                    .registry
                    .set_state(id, JobState::Failed, Some(detail))
                    .await
                {
                    error!(job_id = %id, error = %e, "Could not mark task failed");
                }
                JobState::Failed
            }
        };

        // Already off the queue, so its file can go now.
        self.retire(&job).await;

        self.current_state(id, final_state).await
    }

    /// Check the payload, then dispatch on media type.
    async fn run(&self, job: &PrintJob) -> Result<(), String> {
        if !self.files.exists(&job.payload_ref).await {
            return Err(format!("File not found: {}", job.payload_ref.display()));
        }

        self.registry
            .set_state(job.id, JobState::Printing, None)
            .await
            .map_err(|e| e.to_string())?;

        match job.media_type {
            MediaType::Pdf => {
                info!(job_id = %job.id, "Processing PDF print task");
                self.printer
                    .execute(&job.payload_ref, &job.target_device, &job.options)
                    .await
                    .map_err(|e| {
                        warn!(job_id = %job.id, category = ?e.category, "Printer rejected task");
                        e.message
                    })
            }
            // TODO: convert Word documents to PDF before submitting them
            MediaType::Word => Err("Word document printing not yet implemented".to_string()),
        }
    }

    /// Delete a finished job's file and record its retirement.
    async fn retire(&self, job: &PrintJob) {
        if !self.registry.mark_retired(job.id).await {
            debug!(job_id = %job.id, "Task already retired");
            return;
        }

        if let Err(e) = self.files.delete(&job.payload_ref).await {
            warn!(job_id = %job.id, error = %e, "Failed to clean up print file");
        }

        info!(job_id = %job.id, "Cleaned up completed/failed task");
    }

    async fn current_state(&self, id: Uuid, fallback: JobState) -> JobState {
        self.registry
            .lookup(id)
            .await
            .map(|job| job.state)
            .unwrap_or(fallback)
    }
}

/// Spawn the scheduler loop: wait `initial_delay`, then tick with `interval`
/// between the end of one tick and the start of the next.
pub fn spawn_scheduler(
    scheduler: Arc<PrintScheduler>,
    initial_delay: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            initial_delay_ms = initial_delay.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "Print scheduler started"
        );

        tokio::time::sleep(initial_delay).await;

        loop {
            if AssertUnwindSafe(scheduler.tick())
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Error in print task scheduler");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{PrintError, StorageError};
    use crate::jobs::model::{JobEvent, PrintOptions};

    /// In-memory file store.
    #[derive(Default)]
    struct MemoryFiles {
        present: Mutex<HashSet<PathBuf>>,
        deleted: Mutex<Vec<PathBuf>>,
        fail_delete: bool,
    }

    impl MemoryFiles {
        fn with(paths: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                present: Mutex::new(paths.iter().map(PathBuf::from).collect()),
                ..Default::default()
            })
        }

        fn deleted(&self) -> Vec<PathBuf> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileStore for MemoryFiles {
        async fn store(&self, filename: &str, _bytes: &[u8]) -> Result<PathBuf, StorageError> {
            let path = PathBuf::from(filename);
            self.present.lock().unwrap().insert(path.clone());
            Ok(path)
        }

        async fn exists(&self, path: &Path) -> bool {
            self.present.lock().unwrap().contains(path)
        }

        async fn delete(&self, path: &Path) -> Result<(), StorageError> {
            if self.fail_delete {
                return Err(StorageError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("read-only"),
                });
            }
            self.present.lock().unwrap().remove(path);
            self.deleted.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    /// Printer stub that can fail or panic per file, and tracks concurrency.
    #[derive(Default)]
    struct StubPrinter {
        failures: HashMap<PathBuf, String>,
        panics: HashSet<PathBuf>,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        printed: Mutex<Vec<PathBuf>>,
    }

    impl StubPrinter {
        fn ok() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing(path: &str, message: &str) -> Arc<Self> {
            Arc::new(Self {
                failures: HashMap::from([(PathBuf::from(path), message.to_string())]),
                ..Default::default()
            })
        }

        fn printed(&self) -> Vec<PathBuf> {
            self.printed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PrintExecutor for StubPrinter {
        async fn execute(
            &self,
            path: &Path,
            _device: &str,
            _options: &PrintOptions,
        ) -> Result<(), PrintError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(path) {
                panic!("driver crashed");
            }
            self.printed.lock().unwrap().push(path.to_path_buf());
            match self.failures.get(path) {
                Some(message) => Err(PrintError::classified(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn pdf(path: &str) -> PrintJob {
        PrintJob::new(path, MediaType::Pdf, "HP-1", PrintOptions::default())
    }

    fn scheduler(
        files: Arc<MemoryFiles>,
        printer: Arc<StubPrinter>,
    ) -> (Arc<JobRegistry>, PrintScheduler) {
        let registry = JobRegistry::new();
        let scheduler = PrintScheduler::new(Arc::clone(&registry), files, printer);
        (registry, scheduler)
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let (_registry, scheduler) = scheduler(MemoryFiles::with(&[]), StubPrinter::ok());
        assert_eq!(scheduler.tick().await, TickOutcome::Idle { retired: 0 });
        assert!(!scheduler.is_processing());
    }

    #[tokio::test]
    async fn pending_job_completes() {
        let files = MemoryFiles::with(&["/a.pdf"]);
        let printer = StubPrinter::ok();
        let (registry, scheduler) = scheduler(Arc::clone(&files), Arc::clone(&printer));

        let id = registry.submit(pdf("/a.pdf")).await.unwrap();
        let outcome = scheduler.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::Executed {
                id,
                state: JobState::Completed,
                retired: 0,
            }
        );
        let job = registry.lookup(id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.failure_detail.is_none());
        assert_eq!(printer.printed(), vec![PathBuf::from("/a.pdf")]);
        assert_eq!(files.deleted(), vec![PathBuf::from("/a.pdf")]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn one_job_per_tick_in_fifo_order() {
        let files = MemoryFiles::with(&["/a.pdf", "/b.pdf", "/c.pdf"]);
        let printer = StubPrinter::failing("/a.pdf", "Printer is offline");
        let (registry, scheduler) = scheduler(files, Arc::clone(&printer));

        let a = registry.submit(pdf("/a.pdf")).await.unwrap();
        let b = registry.submit(pdf("/b.pdf")).await.unwrap();
        let c = registry.submit(pdf("/c.pdf")).await.unwrap();

        let first = scheduler.tick().await;
        assert_eq!(
            first,
            TickOutcome::Executed {
                id: a,
                state: JobState::Failed,
                retired: 0,
            }
        );
        let failed = registry.lookup(a).await.unwrap();
        assert_eq!(
            failed.failure_detail.as_deref(),
            Some("Print failed: Printer is offline")
        );
        assert_eq!(registry.lookup(b).await.unwrap().state, JobState::Pending);

        let second = scheduler.tick().await;
        assert_eq!(
            second,
            TickOutcome::Executed {
                id: b,
                state: JobState::Completed,
                retired: 0,
            }
        );

        scheduler.tick().await;
        assert_eq!(registry.lookup(c).await.unwrap().state, JobState::Completed);
        assert_eq!(scheduler.tick().await, TickOutcome::Idle { retired: 0 });

        assert_eq!(
            printer.printed(),
            vec![
                PathBuf::from("/a.pdf"),
                PathBuf::from("/b.pdf"),
                PathBuf::from("/c.pdf"),
            ]
        );
    }

    #[tokio::test]
    async fn word_document_fails_as_unimplemented() {
        let files = MemoryFiles::with(&["/letter.docx"]);
        let printer = StubPrinter::ok();
        let (registry, scheduler) = scheduler(files, Arc::clone(&printer));

        let id = registry
            .submit(PrintJob::new(
                "/letter.docx",
                MediaType::Word,
                "HP-1",
                PrintOptions::default(),
            ))
            .await
            .unwrap();

        scheduler.tick().await;

        let job = registry.lookup(id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.failure_detail.unwrap().contains("not yet implemented"));
        assert!(printer.printed().is_empty());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn missing_file_fails_before_printing() {
        let files = MemoryFiles::with(&[]);
        let printer = StubPrinter::ok();
        let (registry, scheduler) = scheduler(files, Arc::clone(&printer));
        let mut rx = registry.subscribe();

        let id = registry.submit(pdf("/gone.pdf")).await.unwrap();
        scheduler.tick().await;

        let job = registry.lookup(id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure_detail.as_deref(),
            Some("Print failed: File not found: /gone.pdf")
        );
        assert!(printer.printed().is_empty());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let JobEvent::StateChanged { to, .. } = event {
                states.push(to);
            }
        }
        assert_eq!(states, vec![JobState::InPreparation, JobState::Failed]);
    }

    #[tokio::test]
    async fn panicking_printer_is_isolated() {
        let files = MemoryFiles::with(&["/boom.pdf", "/next.pdf"]);
        let printer = Arc::new(StubPrinter {
            panics: HashSet::from([PathBuf::from("/boom.pdf")]),
            ..Default::default()
        });
        let (registry, scheduler) = scheduler(files, printer);

        let boom = registry.submit(pdf("/boom.pdf")).await.unwrap();
        let next = registry.submit(pdf("/next.pdf")).await.unwrap();

        scheduler.tick().await;
        let failed = registry.lookup(boom).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(!failed.failure_detail.unwrap().is_empty());
        assert!(!scheduler.is_processing());

        scheduler.tick().await;
        assert_eq!(
            registry.lookup(next).await.unwrap().state,
            JobState::Completed
        );
    }

    #[tokio::test]
    async fn terminal_heads_are_retired_before_next_run() {
        let files = MemoryFiles::with(&["/done.pdf", "/bad.pdf", "/todo.pdf"]);
        let (registry, scheduler) = scheduler(Arc::clone(&files), StubPrinter::ok());

        let done = registry.submit(pdf("/done.pdf")).await.unwrap();
        let bad = registry.submit(pdf("/bad.pdf")).await.unwrap();
        let todo = registry.submit(pdf("/todo.pdf")).await.unwrap();

        // Finished out of band while still queued.
        for (id, last) in [(done, JobState::Completed), (bad, JobState::Failed)] {
            registry.set_state(id, JobState::InPreparation, None).await.unwrap();
            if last == JobState::Completed {
                registry.set_state(id, JobState::Printing, None).await.unwrap();
            }
            registry
                .set_state(id, last, Some("Print failed: manual".into()))
                .await
                .unwrap();
        }

        let outcome = scheduler.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Executed {
                id: todo,
                state: JobState::Completed,
                retired: 2,
            }
        );
        assert_eq!(
            files.deleted(),
            vec![
                PathBuf::from("/done.pdf"),
                PathBuf::from("/bad.pdf"),
                PathBuf::from("/todo.pdf"),
            ]
        );
        // Still queryable after retirement.
        assert_eq!(registry.lookup(done).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn retire_only_tick_is_idle() {
        let files = MemoryFiles::with(&["/done.pdf"]);
        let (registry, scheduler) = scheduler(files, StubPrinter::ok());

        let id = registry.submit(pdf("/done.pdf")).await.unwrap();
        registry.set_state(id, JobState::InPreparation, None).await.unwrap();
        registry
            .set_state(id, JobState::Failed, Some("Print failed: x".into()))
            .await
            .unwrap();

        assert_eq!(scheduler.tick().await, TickOutcome::Idle { retired: 1 });
        assert_eq!(scheduler.tick().await, TickOutcome::Idle { retired: 0 });
        assert!(!registry.mark_retired(id).await);
    }

    #[tokio::test]
    async fn mid_flight_head_blocks() {
        let files = MemoryFiles::with(&["/a.pdf", "/b.pdf"]);
        let (registry, scheduler) = scheduler(files, StubPrinter::ok());

        let a = registry.submit(pdf("/a.pdf")).await.unwrap();
        let b = registry.submit(pdf("/b.pdf")).await.unwrap();
        registry.set_state(a, JobState::InPreparation, None).await.unwrap();

        assert_eq!(
            scheduler.tick().await,
            TickOutcome::Blocked { id: a, retired: 0 }
        );
        assert_eq!(registry.lookup(b).await.unwrap().state, JobState::Pending);
        assert_eq!(registry.size().await, 2);
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_block_retirement() {
        let files = Arc::new(MemoryFiles {
            present: Mutex::new(HashSet::from([PathBuf::from("/a.pdf")])),
            fail_delete: true,
            ..Default::default()
        });
        let (registry, scheduler) = scheduler(files, StubPrinter::ok());

        let id = registry.submit(pdf("/a.pdf")).await.unwrap();
        scheduler.tick().await;

        assert_eq!(registry.lookup(id).await.unwrap().state, JobState::Completed);
        assert!(registry.is_empty().await);
        assert!(!registry.mark_retired(id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_ticks_run_one_job() {
        let paths: Vec<String> = (0..5).map(|i| format!("/job{i}.pdf")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let files = MemoryFiles::with(&refs);
        let printer = Arc::new(StubPrinter {
            delay: Duration::from_millis(100),
            ..Default::default()
        });

        let registry = JobRegistry::new();
        let scheduler = Arc::new(PrintScheduler::new(
            Arc::clone(&registry),
            files,
            Arc::clone(&printer) as Arc<dyn PrintExecutor>,
        ));
        for path in &paths {
            registry.submit(pdf(path)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move { scheduler.tick().await }));
        }

        let mut executed = 0;
        let mut skipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                TickOutcome::Executed { .. } => executed += 1,
                TickOutcome::Skipped => skipped += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(executed + skipped, 8);
        assert!(executed >= 1);
        assert_eq!(printer.max_active.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_processing());
    }

    #[tokio::test]
    async fn states_only_move_forward() {
        let files = MemoryFiles::with(&["/a.pdf", "/b.pdf"]);
        let printer = StubPrinter::failing("/b.pdf", "Paper jam");
        let (registry, scheduler) = scheduler(files, printer);
        let mut rx = registry.subscribe();

        let a = registry.submit(pdf("/a.pdf")).await.unwrap();
        let b = registry.submit(pdf("/b.pdf")).await.unwrap();
        scheduler.tick().await;
        scheduler.tick().await;

        let mut seen: HashMap<Uuid, Vec<JobState>> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                JobEvent::Submitted { id } => seen.entry(id).or_default().push(JobState::Pending),
                JobEvent::StateChanged { id, to, .. } => seen.entry(id).or_default().push(to),
                JobEvent::Retired { .. } => {}
            }
        }

        assert_eq!(
            seen[&a],
            vec![
                JobState::Pending,
                JobState::InPreparation,
                JobState::Printing,
                JobState::Completed,
            ]
        );
        assert_eq!(
            seen[&b],
            vec![
                JobState::Pending,
                JobState::InPreparation,
                JobState::Printing,
                JobState::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn spawned_loop_waits_initial_delay() {
        let files = MemoryFiles::with(&["/a.pdf"]);
        let (registry, scheduler) = scheduler(files, StubPrinter::ok());
        let id = registry.submit(pdf("/a.pdf")).await.unwrap();

        let handle = spawn_scheduler(
            Arc::new(scheduler),
            Duration::from_millis(300),
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.lookup(id).await.unwrap().state, JobState::Pending);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.lookup(id).await.unwrap().state != JobState::Completed {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job never completed");

        handle.abort();
    }

    #[tokio::test]
    async fn status_reports_queue() {
        let files = MemoryFiles::with(&["/a.pdf"]);
        let (registry, scheduler) = scheduler(files, StubPrinter::ok());
        registry.submit(pdf("/a.pdf")).await.unwrap();

        let status = scheduler.status().await;
        assert!(!status.is_processing);
        assert_eq!(status.queue.pending, 1);
        assert_eq!(status.queue.queued, 1);
    }
}
