//! Typed agent settings and the versioned store shared by every engine stage.
//!
//! Thresholds are always held as fractions in `[0, 1]`. Any value written
//! through the store (updates, overrides pushed by the inference service,
//! files loaded from disk) passes through [`normalize_fraction`] first, so
//! comparisons never need to guess whether a number is a percentage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};

/// Largest buffer the agent accepts. The score history is four times this.
pub const MAX_BUFFER_LENGTH: usize = 256;

/// Shortest tick interval, in seconds.
pub const MIN_INTERVAL_SECS: f64 = 1.0;

/// Detection thresholds, stored as fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub notification: f64,
    pub action: f64,
    pub display: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            notification: 0.3,
            action: 0.6,
            display: 0.6,
        }
    }
}

/// Per-action enable flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionToggles {
    pub pause: bool,
    pub cancel: bool,
    pub notify: bool,
    pub extruder_off: bool,
    #[serde(rename = "macro")]
    pub macro_: bool,
}

/// G-code strings sent to the printer for each corrective command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcodeCommands {
    pub pause: String,
    pub cancel: String,
    pub resume: String,
}

impl Default for GcodeCommands {
    fn default() -> Self {
        Self {
            pause: "M25".to_string(),
            cancel: "M0".to_string(),
            resume: "M24".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub printer_id: String,
    /// Host (and optional port) of the Duet/RepRap board.
    pub device_addr: String,
    /// Snapshot URL of the MJPEG camera.
    pub camera_url: String,
    /// Base URL of the PrintWatch inference service.
    pub backend_url: String,
    pub email_addr: String,
    pub test_mode: bool,
    pub monitoring_on: bool,
    /// Seconds between the end of one tick and the start of the next.
    pub interval_secs: f64,
    pub buffer_length: usize,
    /// Percentage of the sample buffer that must fall below the notification
    /// threshold before another notification may fire.
    pub buffer_percent: u8,
    /// Clockwise rotation applied to camera frames, in degrees. Must be a
    /// multiple of 90.
    pub rotation: i32,
    /// Set when the inference service pushed settings the management surface
    /// has not yet re-propagated.
    pub require_sync: bool,
    pub thresholds: Thresholds,
    pub actions: ActionToggles,
    pub gcode: GcodeCommands,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            printer_id: String::new(),
            device_addr: String::new(),
            camera_url: String::new(),
            backend_url: "https://ai.printpal.io".to_string(),
            email_addr: String::new(),
            test_mode: false,
            monitoring_on: false,
            interval_secs: 10.0,
            buffer_length: 16,
            buffer_percent: 60,
            rotation: 0,
            require_sync: false,
            thresholds: Thresholds::default(),
            actions: ActionToggles::default(),
            gcode: GcodeCommands::default(),
        }
    }
}

impl Settings {
    /// Rewrite any percentage-valued threshold as a fraction.
    pub fn normalize(&mut self) {
        self.thresholds.notification = normalize_fraction(self.thresholds.notification);
        self.thresholds.action = normalize_fraction(self.thresholds.action);
        self.thresholds.display = normalize_fraction(self.thresholds.display);
        self.rotation = self.rotation.rem_euclid(360);
    }

    /// Check the invariants every stage relies on.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("notification", self.thresholds.notification),
            ("action", self.thresholds.action),
            ("display", self.thresholds.display),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AgentError::Config(format!(
                    "{} threshold must be a fraction in [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.buffer_length == 0 || self.buffer_length > MAX_BUFFER_LENGTH {
            return Err(AgentError::Config(format!(
                "buffer_length must be between 1 and {}, got {}",
                MAX_BUFFER_LENGTH, self.buffer_length
            )));
        }

        if self.buffer_percent > 100 {
            return Err(AgentError::Config(format!(
                "buffer_percent must be between 0 and 100, got {}",
                self.buffer_percent
            )));
        }

        if self.rotation % 90 != 0 {
            return Err(AgentError::Config(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                self.rotation
            )));
        }

        if self.interval_secs.is_nan() || self.interval_secs < MIN_INTERVAL_SECS {
            return Err(AgentError::Config(format!(
                "interval_secs must be at least {}, got {}",
                MIN_INTERVAL_SECS, self.interval_secs
            )));
        }

        for (name, value) in [("camera_url", &self.camera_url), ("backend_url", &self.backend_url)] {
            if !value.is_empty() {
                url::Url::parse(value).map_err(|e| {
                    AgentError::Config(format!("{} '{}' is not a valid URL: {}", name, value, e))
                })?;
            }
        }

        Ok(())
    }

    /// Number of sub-threshold samples needed to re-arm notifications.
    pub fn retrigger_quota(&self) -> usize {
        (self.buffer_length * self.buffer_percent as usize).div_ceil(100)
    }
}

/// Interpret values of 1 or more as percentages.
pub fn normalize_fraction(value: f64) -> f64 {
    if value >= 1.0 {
        value / 100.0
    } else {
        value
    }
}

/// Settings pushed down by the inference service inside an infer response.
///
/// Threshold fields arrive as percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverride {
    pub detection_threshold: Option<f64>,
    pub buffer_length: Option<usize>,
    pub notification_threshold: Option<f64>,
    pub action_threshold: Option<f64>,
    pub enable_notification: Option<bool>,
    pub email_address: Option<String>,
    pub pause_print: Option<bool>,
    pub cancel_print: Option<bool>,
    pub extruder_heat_off: Option<bool>,
}

/// Shared, versioned settings.
///
/// Readers take a [`snapshot`](SettingsStore::snapshot) so a tick always
/// works against one consistent copy. Every successful write bumps the
/// version, which the loop handler uses to notice resizes.
pub struct SettingsStore {
    inner: RwLock<Settings>,
    version: AtomicU64,
}

impl SettingsStore {
    pub fn new(mut settings: Settings) -> Result<Self> {
        settings.normalize();
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
            version: AtomicU64::new(0),
        })
    }

    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Apply `mutate` to a copy of the settings and commit it if it still
    /// validates. Returns the new version.
    pub fn update<F>(&self, mutate: F) -> Result<u64>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.normalize();
        candidate.validate()?;

        if candidate == *guard {
            return Ok(self.version());
        }

        *guard = candidate;
        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Overwrite local fields with a server push and flag the change for
    /// re-propagation.
    pub fn apply_override(&self, pushed: &SettingsOverride) -> Result<u64> {
        let version = self.update(|s| {
            if let Some(v) = pushed.detection_threshold {
                s.thresholds.display = v;
            }
            if let Some(v) = pushed.buffer_length {
                s.buffer_length = v;
            }
            if let Some(v) = pushed.notification_threshold {
                s.thresholds.notification = v;
            }
            if let Some(v) = pushed.action_threshold {
                s.thresholds.action = v;
            }
            if let Some(v) = pushed.enable_notification {
                s.actions.notify = v;
            }
            if let Some(ref v) = pushed.email_address {
                s.email_addr = v.clone();
            }
            if let Some(v) = pushed.pause_print {
                s.actions.pause = v;
            }
            if let Some(v) = pushed.cancel_print {
                s.actions.cancel = v;
            }
            if let Some(v) = pushed.extruder_heat_off {
                s.actions.extruder_off = v;
            }
            s.require_sync = true;
        });

        match version {
            Ok(v) => {
                info!("Applied settings pushed by inference service (version {})", v);
                Ok(v)
            }
            Err(e) => {
                warn!("Rejected settings pushed by inference service: {}", e);
                Err(e)
            }
        }
    }

    /// Read and clear the require-sync flag.
    pub fn take_require_sync(&self) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut guard.require_sync, false)
    }
}
