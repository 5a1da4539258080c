//! Print job data model: the job record, its print options and state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum copies accepted for a single job.
pub const MAX_COPIES: u32 = 999;

/// State of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, waiting in the queue.
    Pending,
    /// Taken by the scheduler, input file being checked.
    InPreparation,
    /// Handed to the printer.
    Printing,
    /// Printer accepted the job.
    Completed,
    /// Job failed and will not be retried.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    ///
    /// Transitions only move forward; there is no way back to `Pending`.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Pending, InPreparation)
                | (InPreparation, Printing)
                | (InPreparation, Failed)
                | (Printing, Completed)
                | (Printing, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the job is being executed right now.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InPreparation | Self::Printing)
    }

    /// Progress percentage reported to clients. `-1` marks a failure.
    pub fn progress(&self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::InPreparation => 25,
            Self::Printing => 75,
            Self::Completed => 100,
            Self::Failed => -1,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InPreparation => "in_preparation",
            Self::Printing => "printing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Kind of document, which selects the execution path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Pdf,
    Word,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "PDF"),
            Self::Word => write!(f, "WORD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
    A3,
    Legal,
}

impl std::str::FromStr for PaperSize {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A4" => Ok(Self::A4),
            "LETTER" => Ok(Self::Letter),
            "A3" => Ok(Self::A3),
            "LEGAL" => Ok(Self::Legal),
            _ => Err(format!("Unknown paper size: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sides {
    #[default]
    OneSided,
    TwoSided,
}

impl std::str::FromStr for Sides {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simplex" | "one-sided" | "one_sided" => Ok(Self::OneSided),
            "duplex" | "two-sided" | "two_sided" => Ok(Self::TwoSided),
            _ => Err(format!("Unknown duplex mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Color,
    #[default]
    Monochrome,
}

impl std::str::FromStr for ColorMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "color" | "colour" => Ok(Self::Color),
            "grayscale" | "greyscale" | "monochrome" => Ok(Self::Monochrome),
            _ => Err(format!("Unknown color mode: {s}")),
        }
    }
}

/// Attributes passed to the printer with each job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptions {
    pub copies: u32,
    pub paper_size: PaperSize,
    pub sides: Sides,
    pub color_mode: ColorMode,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            paper_size: PaperSize::default(),
            sides: Sides::default(),
            color_mode: ColorMode::default(),
        }
    }
}

/// One print job as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    /// Unique job ID. `Uuid::nil()` until the registry assigns one.
    pub id: Uuid,
    /// Location of the stored input file.
    pub payload_ref: PathBuf,
    pub media_type: MediaType,
    /// Destination printer identifier.
    pub target_device: String,
    pub options: PrintOptions,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    /// Why the job failed. Only set in the `Failed` state.
    pub failure_detail: Option<String>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl PrintJob {
    /// Create a pending job without an ID.
    pub fn new(
        payload_ref: impl Into<PathBuf>,
        media_type: MediaType,
        target_device: impl Into<String>,
        options: PrintOptions,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            payload_ref: payload_ref.into(),
            media_type,
            target_device: target_device.into(),
            options,
            state: JobState::Pending,
            submitted_at: Utc::now(),
            failure_detail: None,
            finished_at: None,
        }
    }

    /// Use a caller-chosen ID instead of a generated one.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Check the fields a caller supplies. Returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_device.trim().is_empty() {
            return Err("Printer ID cannot be null or empty".to_string());
        }
        if self.options.copies < 1 || self.options.copies > MAX_COPIES {
            return Err(format!(
                "Number of copies must be between 1 and {MAX_COPIES}"
            ));
        }
        if self.payload_ref.as_os_str().is_empty() {
            return Err("File path cannot be empty".to_string());
        }
        if self.state != JobState::Pending {
            return Err(format!("New tasks must be pending, got {}", self.state));
        }
        Ok(())
    }

    /// Apply a state transition.
    ///
    /// `detail` is kept only when moving to `Failed`; a missing or blank
    /// detail is replaced so a failed job always explains itself.
    pub fn transition_to(
        &mut self,
        new_state: JobState,
        detail: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }

        self.state = new_state;

        if new_state == JobState::Failed {
            let detail = detail
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "Print failed: unknown error".to_string());
            self.failure_detail = Some(detail);
        }

        if new_state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }

        Ok(())
    }

    /// Snapshot for status queries.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            state: self.state,
            message: self.failure_detail.clone(),
            media_type: self.media_type,
            target_device: self.target_device.clone(),
            options: self.options,
            submitted_at: self.submitted_at,
            progress: self.state.progress(),
        }
    }
}

/// Client-facing view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(rename = "taskId")]
    pub id: Uuid,
    #[serde(rename = "status")]
    pub state: JobState,
    pub message: Option<String>,
    #[serde(rename = "fileType")]
    pub media_type: MediaType,
    #[serde(rename = "printerId")]
    pub target_device: String,
    pub options: PrintOptions,
    #[serde(rename = "submitTime")]
    pub submitted_at: DateTime<Utc>,
    pub progress: i32,
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs known to the lookup index.
    pub total: usize,
    /// Jobs still in the ordered queue.
    pub queued: usize,
    pub pending: usize,
    pub in_preparation: usize,
    pub printing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub(crate) fn record(&mut self, state: JobState) {
        self.total += 1;
        match state {
            JobState::Pending => self.pending += 1,
            JobState::InPreparation => self.in_preparation += 1,
            JobState::Printing => self.printing += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

/// Registry change broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted { id: Uuid },
    StateChanged { id: Uuid, from: JobState, to: JobState },
    Retired { id: Uuid },
}
