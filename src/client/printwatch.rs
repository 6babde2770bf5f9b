//! Client for the PrintWatch inference and notification service.
//!
//! Each request carries the printer's identity and the settings the service
//! needs to score a frame consistently with the agent's own thresholds. A
//! ticket id groups the frames of one monitoring session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info};

use super::types::{InferenceResponse, NotificationLevel, NotifyResponse, PrintStats};
use super::{Infer, Notify};
use crate::config::{Settings, SettingsStore};
use crate::error::{AgentError, Result};

/// Inference can be slow under load.
pub const INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Protocol version reported to the service.
pub const PROTOCOL_VERSION: &str = "1.2.11";

const INFER_ENDPOINT: &str = "api/v2/infer";
const NOTIFY_ENDPOINT: &str = "api/v2/notify";

#[derive(Debug, Serialize)]
struct InferPayload<'a> {
    api_key: &'a str,
    printer_id: &'a str,
    ticket_id: String,
    version: &'static str,
    conf: u32,
    buffer_length: usize,
    buffer_percent: u8,
    thresholds: [f64; 2],
    scores: &'a [f64],
    sma_spaghetti: u8,
    email_addr: &'a str,
    enable_feedback_images: bool,
    #[serde(flatten)]
    stats: &'a PrintStats,
    image_array: &'a str,
}

#[derive(Debug, Serialize)]
struct NotifyPayload<'a> {
    api_key: &'a str,
    printer_id: &'a str,
    email_addr: &'a str,
    #[serde(rename = "printTime")]
    print_time: f64,
    #[serde(rename = "printTimeLeft")]
    print_time_left: f64,
    progress: f64,
    job_name: &'a str,
    notification: NotificationLevel,
    time: String,
}

pub struct PrintWatchClient {
    client: reqwest::Client,
    settings: Arc<SettingsStore>,
    ticket_id: Mutex<Option<String>>,
}

impl PrintWatchClient {
    pub fn new(settings: Arc<SettingsStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .timeout(INFERENCE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            settings,
            ticket_id: Mutex::new(None),
        })
    }

    /// Current ticket id, creating one on first use.
    pub fn ticket_id(&self) -> String {
        let mut ticket = self.ticket_id.lock().unwrap_or_else(PoisonError::into_inner);
        ticket
            .get_or_insert_with(|| format!("{:032x}", rand::random::<u128>()))
            .clone()
    }

    fn infer_payload<'a>(
        &self,
        settings: &'a Settings,
        image_base64: &'a str,
        scores: &'a [f64],
        stats: &'a PrintStats,
    ) -> InferPayload<'a> {
        InferPayload {
            api_key: &settings.api_key,
            printer_id: &settings.printer_id,
            ticket_id: self.ticket_id(),
            version: PROTOCOL_VERSION,
            conf: (settings.thresholds.display * 100.0).round() as u32,
            buffer_length: settings.buffer_length,
            buffer_percent: settings.buffer_percent,
            thresholds: [settings.thresholds.notification, settings.thresholds.action],
            scores,
            sma_spaghetti: 0,
            email_addr: &settings.email_addr,
            enable_feedback_images: true,
            stats,
            image_array: image_base64,
        }
    }

    fn notify_payload<'a>(
        settings: &'a Settings,
        level: NotificationLevel,
        stats: &'a PrintStats,
    ) -> NotifyPayload<'a> {
        NotifyPayload {
            api_key: &settings.api_key,
            printer_id: &settings.printer_id,
            email_addr: &settings.email_addr,
            print_time: stats.print_time,
            print_time_left: stats.print_time_left,
            progress: stats.progress,
            job_name: &stats.job_name,
            notification: level,
            time: chrono::Local::now().format("%m/%d/%Y %H:%M:%S").to_string(),
        }
    }

    async fn post<P, R>(&self, endpoint: &str, payload: &P) -> std::result::Result<R, String>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let base = self.settings.snapshot().backend_url;
        let url = format!("{}/{}", base.trim_end_matches('/'), endpoint);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                let msg = if e.is_timeout() {
                    format!(
                        "Request to '{}' timed out after {}s",
                        url,
                        INFERENCE_TIMEOUT.as_secs()
                    )
                } else {
                    format!("Request to '{}' failed: {}", url, e)
                };
                error!("{}", msg);
                msg
            })?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("'{}' returned HTTP {}", url, status.as_u16());
            error!("{}", msg);
            return Err(msg);
        }

        response
            .json::<R>()
            .await
            .map_err(|e| format!("Failed to parse response from '{}': {}", url, e))
    }
}

impl Infer for PrintWatchClient {
    async fn infer(
        &self,
        image_base64: &str,
        scores: &[f64],
        stats: &PrintStats,
    ) -> Result<InferenceResponse> {
        let settings = self.settings.snapshot();
        let payload = self.infer_payload(&settings, image_base64, scores, stats);

        let response: InferenceResponse = self
            .post(INFER_ENDPOINT, &payload)
            .await
            .map_err(AgentError::Inference)?;

        debug!(
            "Inference status={} score={:.3} levels={:?}",
            response.status_code, response.score, response.levels
        );
        Ok(response)
    }

    fn end_session(&self) {
        let mut ticket = self.ticket_id.lock().unwrap_or_else(PoisonError::into_inner);
        if ticket.take().is_some() {
            info!("Cleared inference ticket");
        }
    }
}

impl Notify for PrintWatchClient {
    async fn notify(&self, level: NotificationLevel, stats: &PrintStats) -> Result<NotifyResponse> {
        let settings = self.settings.snapshot();
        let payload = Self::notify_payload(&settings, level, stats);

        info!("Sending {:?} notification for '{}'", level, stats.job_name);
        self.post(NOTIFY_ENDPOINT, &payload)
            .await
            .map_err(AgentError::Notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> PrintWatchClient {
        let mut settings = Settings::default();
        settings.api_key = "key-123".to_string();
        settings.printer_id = "printer-abc".to_string();
        settings.email_addr = "ops@example.com".to_string();
        let store = Arc::new(SettingsStore::new(settings).unwrap());
        PrintWatchClient::new(store).unwrap()
    }

    #[test]
    fn test_ticket_id_is_stable_until_session_ends() {
        let client = test_client();
        let first = client.ticket_id();
        assert_eq!(first.len(), 32);
        assert_eq!(client.ticket_id(), first);

        client.end_session();
        assert_ne!(client.ticket_id(), first);
    }

    #[test]
    fn test_infer_payload_fields() {
        let client = test_client();
        let settings = client.settings.snapshot();
        let stats = PrintStats::test_placeholder();
        let scores = vec![0.0, 0.1, 0.2];

        let payload = client.infer_payload(&settings, "aGVsbG8=", &scores, &stats);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["api_key"], "key-123");
        assert_eq!(json["printer_id"], "printer-abc");
        assert_eq!(json["conf"], 60);
        assert_eq!(json["buffer_length"], 16);
        assert_eq!(json["thresholds"][0], 0.3);
        assert_eq!(json["scores"].as_array().unwrap().len(), 3);
        assert_eq!(json["image_array"], "aGVsbG8=");
        // Print stats are flattened into the top level
        assert_eq!(json["printTime"], 550.0);
        assert_eq!(json["job_name"], "temp-job-name.stl");
    }

    #[test]
    fn test_notify_payload_fields() {
        let client = test_client();
        let settings = client.settings.snapshot();
        let stats = PrintStats::test_placeholder();

        let payload = PrintWatchClient::notify_payload(&settings, NotificationLevel::Action, &stats);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["notification"], "action");
        assert_eq!(json["email_addr"], "ops@example.com");
        assert_eq!(json["printTimeLeft"], 1.0);
        // mm/dd/YYYY HH:MM:SS
        assert_eq!(json["time"].as_str().unwrap().len(), 19);
    }
}
