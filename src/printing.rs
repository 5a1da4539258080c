//! Print submission through the OS spooler.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PrintError;
use crate::jobs::model::{ColorMode, PaperSize, PrintOptions, Sides};

/// Default spooler submission timeout.
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Sends one document to one printer.
#[async_trait]
pub trait PrintExecutor: Send + Sync {
    async fn execute(
        &self,
        path: &Path,
        device: &str,
        options: &PrintOptions,
    ) -> Result<(), PrintError>;
}

fn media_option(size: PaperSize) -> &'static str {
    match size {
        PaperSize::A4 => "media=A4",
        PaperSize::Letter => "media=Letter",
        PaperSize::A3 => "media=A3",
        PaperSize::Legal => "media=Legal",
    }
}

fn sides_option(sides: Sides) -> &'static str {
    match sides {
        Sides::OneSided => "sides=one-sided",
        Sides::TwoSided => "sides=two-sided-long-edge",
    }
}

fn color_option(mode: ColorMode) -> &'static str {
    match mode {
        ColorMode::Color => "print-color-mode=color",
        ColorMode::Monochrome => "print-color-mode=monochrome",
    }
}

/// Arguments for `lp` that print `path` on `device` with `options`.
pub fn lp_args(path: &Path, device: &str, options: &PrintOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-d".into(),
        device.into(),
        "-n".into(),
        options.copies.to_string().into(),
    ];
    for option in [
        media_option(options.paper_size),
        sides_option(options.sides),
        color_option(options.color_mode),
    ] {
        args.push("-o".into());
        args.push(option.into());
    }
    args.push("--".into());
    args.push(path.as_os_str().to_os_string());
    args
}

/// Submits jobs with the CUPS `lp` command.
#[derive(Debug, Clone)]
pub struct LpExecutor {
    program: String,
    timeout: Duration,
}

impl LpExecutor {
    pub fn new() -> Self {
        Self {
            program: "lp".to_string(),
            timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    /// Set the submission timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different `lp` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for LpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrintExecutor for LpExecutor {
    async fn execute(
        &self,
        path: &Path,
        device: &str,
        options: &PrintOptions,
    ) -> Result<(), PrintError> {
        info!(
            printer = device,
            copies = options.copies,
            paper = ?options.paper_size,
            sides = ?options.sides,
            color = ?options.color_mode,
            "Submitting print job"
        );

        let output = Command::new(&self.program)
            .args(lp_args(path, device, options))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| PrintError::timeout(device, self.timeout))?
            .map_err(|e| PrintError::generic(format!("Failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with status {}",
                    self.program,
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(PrintError::classified(message));
        }

        debug!(
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "Spooler accepted job"
        );
        Ok(())
    }
}
