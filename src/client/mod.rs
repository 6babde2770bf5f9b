//! External collaborators of the control loop.
//!
//! The engine only talks to the outside world through the five capability
//! traits below. Production implementations live in this module:
//!
//! - [`MjpegCamera`] - snapshot capture over HTTP
//! - [`DuetClient`] - RepRap/Duet firmware state queries and G-code
//! - [`PrintWatchClient`] - remote inference and notification service
//!
//! Tests substitute in-memory fakes.

use std::future::Future;

pub mod camera;
pub mod duet;
pub mod printwatch;
pub mod types;

pub use camera::MjpegCamera;
pub use duet::DuetClient;
pub use printwatch::PrintWatchClient;
pub use types::*;

use crate::error::Result;

/// User-Agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("PrintWatchAgent/", env!("CARGO_PKG_VERSION"));

/// Grab one still frame from the camera.
pub trait CaptureFrame: Send + Sync {
    /// Raw encoded image bytes, or an error when the camera did not answer
    /// with an image.
    fn capture_frame(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Point the camera at a new snapshot URL.
    fn set_camera_url(&self, _url: &str) {}
}

/// Read the printer's current state.
pub trait QueryDeviceState: Send + Sync {
    /// `None` when the device could not be reached.
    fn query_state(&self) -> impl Future<Output = Option<PrinterState>> + Send;

    /// Point the client at a new device address.
    fn set_device_addr(&self, _addr: &str) {}
}

/// Send a raw G-code command to the printer.
pub trait SendCommand: Send + Sync {
    /// Returns the firmware's plain-text acknowledgement.
    fn send_command(&self, gcode: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Submit a frame for defect scoring.
pub trait Infer: Send + Sync {
    fn infer(
        &self,
        image_base64: &str,
        scores: &[f64],
        stats: &PrintStats,
    ) -> impl Future<Output = Result<InferenceResponse>> + Send;

    /// Forget any per-session state (e.g. the ticket id) when monitoring stops.
    fn end_session(&self) {}
}

/// Deliver an operator notification.
pub trait Notify: Send + Sync {
    fn notify(
        &self,
        level: NotificationLevel,
        stats: &PrintStats,
    ) -> impl Future<Output = Result<NotifyResponse>> + Send;
}
