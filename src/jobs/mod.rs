//! Print jobs: data model, the shared registry, and the scheduler that runs them.

pub mod model;
pub mod registry;
pub mod scheduler;

pub use model::{
    ColorMode, JobEvent, JobState, JobStatus, MediaType, PaperSize, PrintJob, PrintOptions,
    QueueStats, Sides,
};
pub use registry::JobRegistry;
pub use scheduler::{PrintScheduler, SchedulerStatus, TickOutcome, spawn_scheduler};
