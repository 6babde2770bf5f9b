use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use super::CaptureFrame;
use crate::error::{AgentError, Result};

/// Snapshot requests give up after this long.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP snapshot camera (MJPEG streamer `?action=snapshot`, ESP32-CAM, etc).
pub struct MjpegCamera {
    client: reqwest::Client,
    url: RwLock<String>,
}

impl MjpegCamera {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(super::USER_AGENT)
            .timeout(CAPTURE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: RwLock::new(url.to_string()),
        })
    }

    pub fn url(&self) -> String {
        self.url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check whether the configured URL answers with a JPEG image.
    pub async fn probe(&self) -> Result<bool> {
        let url = self.url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Camera(format!("Failed to reach camera at '{}': {}", url, e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let is_jpeg = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("image/jpeg"))
            .unwrap_or(false);

        info!("Camera probe for '{}': image/jpeg = {}", url, is_jpeg);
        Ok(is_jpeg)
    }
}

impl CaptureFrame for MjpegCamera {
    async fn capture_frame(&self) -> Result<Vec<u8>> {
        let url = self.url();
        if url.is_empty() {
            return Err(AgentError::Camera("No camera URL configured".to_string()));
        }

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Camera(format!(
                    "Camera at '{}' timed out after {}s",
                    url,
                    CAPTURE_TIMEOUT.as_secs()
                ))
            } else {
                AgentError::Camera(format!("Failed to reach camera at '{}': {}", url, e))
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AgentError::Camera(format!(
                "Camera at '{}' returned HTTP {} {}",
                url,
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentError::Camera(format!("Failed to read camera frame: {}", e)))?;

        debug!("Captured {} byte frame from '{}'", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    fn set_camera_url(&self, url: &str) {
        let mut current = self.url.write().unwrap_or_else(PoisonError::into_inner);
        if *current != url {
            info!("Camera URL changed to '{}'", url);
            *current = url.to_string();
        }
    }
}
