//! HTTP binding for RepRap/Duet firmware (`rr_status`, `rr_model`, `rr_gcode`).

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{DeviceStatus, PrinterState};
use super::{QueryDeviceState, SendCommand};
use crate::error::{AgentError, Result};

/// State queries are polled every tick, so they fail fast.
pub const STATE_TIMEOUT: Duration = Duration::from_secs(1);
/// G-code can take a while to be acknowledged while the planner drains.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Board identity lookup at startup.
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DuetClient {
    client: reqwest::Client,
    addr: RwLock<String>,
}

impl DuetClient {
    pub fn new(addr: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            addr: RwLock::new(addr.to_string()),
        })
    }

    pub fn addr(&self) -> String {
        self.addr
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn base_url(&self) -> Result<String> {
        let addr = self.addr();
        let addr = addr.trim().trim_end_matches('/');
        if addr.is_empty() {
            return Err(AgentError::Device("No device address configured".to_string()));
        }
        if addr.starts_with("http://") || addr.starts_with("https://") {
            Ok(addr.to_string())
        } else {
            Ok(format!("http://{}", addr))
        }
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value> {
        let url = format!("{}{}", self.base_url()?, path);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AgentError::Device(format!("Request to '{}' failed: {}", url, e)))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| AgentError::Device(format!("Invalid JSON from '{}': {}", url, e)))
    }

    /// Fetch the board's unique id, falling back to a random 32-digit hex id
    /// when the board cannot be reached.
    pub async fn fetch_unique_id(&self) -> String {
        match self.get_json("/rr_model?key=boards", IDENTITY_TIMEOUT).await {
            Ok(body) => {
                if let Some(id) = parse_unique_id(&body) {
                    info!("Using board unique id {}", id);
                    return id;
                }
                warn!("Board response had no uniqueId, generating a printer id");
            }
            Err(e) => warn!("Could not read board id ({}), generating a printer id", e),
        }
        random_printer_id()
    }
}

impl QueryDeviceState for DuetClient {
    async fn query_state(&self) -> Option<PrinterState> {
        let status = match self.get_json("/rr_status", STATE_TIMEOUT).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Device unavailable: {}", e);
                return None;
            }
        };

        let mut state = parse_status_response(&status)?;

        if state.status.is_printing() {
            match self.get_json("/rr_model?key=job", STATE_TIMEOUT).await {
                Ok(job) => state.job_name = parse_job_name(&job),
                Err(e) => debug!("Job metadata unavailable: {}", e),
            }
        }

        Some(state)
    }

    fn set_device_addr(&self, addr: &str) {
        let mut current = self.addr.write().unwrap_or_else(PoisonError::into_inner);
        if *current != addr {
            info!("Device address changed to '{}'", addr);
            *current = addr.to_string();
        }
    }
}

impl SendCommand for DuetClient {
    async fn send_command(&self, gcode: &str) -> Result<String> {
        let url = format!(
            "{}/rr_gcode?gcode={}",
            self.base_url()?,
            urlencoding::encode(gcode)
        );
        info!("Sending G-code '{}'", gcode);

        let response = self
            .client
            .get(&url)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Device(format!(
                        "G-code '{}' timed out after {}s",
                        gcode,
                        COMMAND_TIMEOUT.as_secs()
                    ))
                } else {
                    AgentError::Device(format!("Failed to send G-code '{}': {}", gcode, e))
                }
            })?;

        response
            .text()
            .await
            .map_err(|e| AgentError::Device(format!("Failed to read G-code reply: {}", e)))
    }
}

/// Parse an `rr_status` body. `None` if it carries no status code.
pub fn parse_status_response(body: &Value) -> Option<PrinterState> {
    let code = body.get("status")?.as_str()?.chars().next()?;
    Some(PrinterState {
        status: DeviceStatus::from_code(code),
        elapsed: body.get("time").and_then(Value::as_f64),
        remaining: body
            .get("timesLeft")
            .and_then(|t| t.get("file"))
            .and_then(Value::as_f64),
        job_name: None,
    })
}

/// `result.file.fileName` from `rr_model?key=job`.
pub fn parse_job_name(body: &Value) -> Option<String> {
    body.pointer("/result/file/fileName")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// `result[0].uniqueId` from `rr_model?key=boards`.
pub fn parse_unique_id(body: &Value) -> Option<String> {
    body.pointer("/result/0/uniqueId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn random_printer_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
