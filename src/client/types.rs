//! Wire types exchanged with the printer, camera, and inference service.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::SettingsOverride;
use crate::engine::{Levels, Sample};

/// Job name reported when the firmware does not provide one.
pub const PLACEHOLDER_JOB_NAME: &str = "temp-job-name.stl";

/// Status codes reported by RepRap firmware in `rr_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Configuring,
    Idle,
    Busy,
    Printing,
    Decelerating,
    Stopped,
    Resuming,
    Halted,
    Flashing,
    ToolChange,
    Unknown(char),
}

impl DeviceStatus {
    pub fn from_code(code: char) -> Self {
        match code {
            'C' => DeviceStatus::Configuring,
            'I' => DeviceStatus::Idle,
            'B' => DeviceStatus::Busy,
            'P' => DeviceStatus::Printing,
            'D' => DeviceStatus::Decelerating,
            'S' => DeviceStatus::Stopped,
            'R' => DeviceStatus::Resuming,
            'H' => DeviceStatus::Halted,
            'F' => DeviceStatus::Flashing,
            'T' => DeviceStatus::ToolChange,
            other => DeviceStatus::Unknown(other),
        }
    }

    pub fn is_printing(&self) -> bool {
        matches!(self, DeviceStatus::Printing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceStatus::Configuring => "Configuration",
            DeviceStatus::Idle => "Idle",
            DeviceStatus::Busy => "Busy",
            DeviceStatus::Printing => "Printing",
            DeviceStatus::Decelerating => "Decelerating",
            DeviceStatus::Stopped => "Stopped",
            DeviceStatus::Resuming => "Resuming",
            DeviceStatus::Halted => "Halt",
            DeviceStatus::Flashing => "Flashing",
            DeviceStatus::ToolChange => "Toolchange",
            DeviceStatus::Unknown(_) => "Unknown",
        }
    }
}

/// One reading of printer state. A `None` reading from
/// [`QueryDeviceState`](super::QueryDeviceState) means the device was unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterState {
    pub status: DeviceStatus,
    /// Seconds since the job started.
    pub elapsed: Option<f64>,
    /// Estimated seconds remaining.
    pub remaining: Option<f64>,
    pub job_name: Option<String>,
}

/// Job context sent along with inference and notification requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintStats {
    pub state: u8,
    #[serde(rename = "printTime")]
    pub print_time: f64,
    #[serde(rename = "printTimeLeft")]
    pub print_time_left: f64,
    /// Fraction of the job completed.
    pub progress: f64,
    pub job_name: String,
}

impl PrintStats {
    pub fn from_printer(state: &PrinterState) -> Self {
        let elapsed = state.elapsed.unwrap_or(0.0);
        let remaining = state.remaining.unwrap_or(0.0);
        Self {
            state: 0,
            print_time: elapsed,
            print_time_left: remaining,
            progress: progress(elapsed, remaining),
            job_name: state
                .job_name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_JOB_NAME.to_string()),
        }
    }

    /// Stats used in test mode, when no job is running.
    pub fn test_placeholder() -> Self {
        Self {
            state: 0,
            print_time: 550.0,
            print_time_left: 1.0,
            progress: 0.999,
            job_name: PLACEHOLDER_JOB_NAME.to_string(),
        }
    }
}

/// `elapsed / (elapsed + remaining)`, or 0 when both are zero.
pub fn progress(elapsed: f64, remaining: f64) -> f64 {
    let total = elapsed + remaining;
    if total > 0.0 {
        elapsed / total
    } else {
        0.0
    }
}

/// Severity attached to an operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Warning,
    Action,
}

/// Command the inference service may ask the agent to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionToken {
    Pause,
    Cancel,
    Resume,
    #[serde(other)]
    None,
}

/// Response body of `api/v2/infer`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceResponse {
    /// Application status, independent of the HTTP status.
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
    #[serde(default)]
    pub score: f64,
    /// Smoothed samples; the first entry is the one buffered.
    #[serde(default)]
    pub smas: Vec<Sample>,
    #[serde(default)]
    pub levels: [bool; 2],
    /// Detections as `[x1, y1, x2, y2, confidence]` in 640px model space.
    #[serde(default)]
    pub boxes: Vec<Vec<f64>>,
    #[serde(default)]
    pub action: Option<ActionToken>,
    #[serde(default, deserialize_with = "settings_or_false")]
    pub settings: Option<SettingsOverride>,
}

impl InferenceResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn smoothed_sample(&self) -> Sample {
        self.smas.first().copied().unwrap_or_default()
    }

    pub fn levels(&self) -> Levels {
        Levels::from(self.levels)
    }
}

/// The service sends `false` instead of omitting the field.
fn settings_or_false<'de, D>(deserializer: D) -> Result<Option<SettingsOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_object() {
        serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom)
    } else {
        Ok(None)
    }
}

/// Response body of `api/v2/notify`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyResponse {
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
}

impl NotifyResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}
