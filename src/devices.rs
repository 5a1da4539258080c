//! Printer discovery through the CUPS command-line tools.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DeviceError;

/// Default timeout for `lpstat`.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// `printer <name> is idle.` / `printer <name> now printing <job>.` /
/// `printer <name> disabled since ...`
static PRINTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^printer\s+(\S+)\s+(is idle|now printing|disabled)").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Ready,
    Busy,
    Offline,
}

/// A printer the host can submit to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub status: DeviceStatus,
}

/// Source of the printers available on this host.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, DeviceError>;
}

/// Parse `lpstat -p` output into devices. Unrecognized lines are skipped.
pub fn parse_lpstat(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| {
            let caps = PRINTER_LINE.captures(line.trim())?;
            let name = caps[1].to_string();
            let status = match &caps[2] {
                "is idle" => DeviceStatus::Ready,
                "now printing" => DeviceStatus::Busy,
                _ => DeviceStatus::Offline,
            };
            Some(Device {
                id: name.clone(),
                name,
                status,
            })
        })
        .collect()
}

/// Discovers printers by running `lpstat -p`.
#[derive(Debug, Clone)]
pub struct CupsDiscovery {
    program: String,
    timeout: Duration,
}

impl CupsDiscovery {
    pub fn new() -> Self {
        Self {
            program: "lpstat".to_string(),
            timeout: DISCOVERY_TIMEOUT,
        }
    }

    /// Use a different `lpstat` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for CupsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDiscovery for CupsDiscovery {
    async fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        info!("Retrieving available printers from system");

        let output = Command::new(&self.program)
            .arg("-p")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| DeviceError::Discovery {
                reason: format!("{} timed out after {:?}", self.program, self.timeout),
            })?
            .map_err(|e| DeviceError::Discovery {
                reason: format!("Failed to run {}: {e}", self.program),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            // lpstat exits non-zero when no printers are configured
            if stderr.contains("No destinations added") {
                warn!("No printers found on the system");
                return Ok(Vec::new());
            }
            return Err(DeviceError::Discovery {
                reason: stderr.trim().to_string(),
            });
        }

        let devices = parse_lpstat(&stdout);
        for device in &devices {
            debug!(printer = %device.name, status = ?device.status, "Found printer");
        }
        info!(count = devices.len(), "Retrieved printers");

        Ok(devices)
    }
}
