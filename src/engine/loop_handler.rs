//! One control-loop tick: device state, capture, inference, buffering and
//! dispatch.
//!
//! The handler owns the engine state behind a mutex. The lock is only held
//! for short synchronous sections, never across an await, so status reads
//! from the management surface always see a consistent snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::dispatcher::{commit, decide, ActionDispatcher, DispatchReport};
use super::state::{EngineState, MonitorStatus};
use crate::client::{
    CaptureFrame, Infer, Notify, PrintStats, QueryDeviceState, SendCommand,
};
use crate::config::SettingsStore;
use crate::error::Result;
use crate::imaging::{prepare_frame, render_preview};

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not printing and test mode off; state was reset.
    Idle,
    /// The device did not answer the state query. Evidence and trigger
    /// history are kept.
    DeviceUnavailable,
    /// The camera did not deliver a frame.
    CameraUnavailable,
    /// The inference service answered with a non-success status.
    Rejected { status_code: u16 },
    Processed(DispatchReport),
}

pub struct LoopHandler<C, D, S> {
    camera: Arc<C>,
    device: Arc<D>,
    service: Arc<S>,
    settings: Arc<SettingsStore>,
    dispatcher: ActionDispatcher<D, S>,
    state: Mutex<EngineState>,
}

impl<C, D, S> LoopHandler<C, D, S>
where
    C: CaptureFrame,
    D: QueryDeviceState + SendCommand,
    S: Infer + Notify,
{
    pub fn new(camera: Arc<C>, device: Arc<D>, service: Arc<S>, settings: Arc<SettingsStore>) -> Self {
        let state = EngineState::new(settings.snapshot().buffer_length, settings.version());
        Self {
            dispatcher: ActionDispatcher::new(device.clone(), service.clone()),
            camera,
            device,
            service,
            settings,
            state: Mutex::new(state),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one tick, downgrading any failure to error state.
    pub async fn run_once(&self) -> Option<TickOutcome> {
        match self.tick().await {
            Ok(outcome) => {
                debug!("Tick finished: {:?}", outcome);
                Some(outcome)
            }
            Err(e) => {
                warn!("Tick failed: {}", e);
                self.lock().error = Some(e.into());
                None
            }
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.sync_buffer_length();
        let settings = self.settings.snapshot();

        let printer = self.device.query_state().await;
        let printing = printer.as_ref().is_some_and(|p| p.status.is_printing());

        if !settings.test_mode {
            match printer {
                None => {
                    let message = "Device unavailable: no answer to status query".to_string();
                    warn!("{}", message);
                    self.lock().error = Some(message);
                    return Ok(TickOutcome::DeviceUnavailable);
                }
                Some(ref state) if !printing => {
                    self.go_idle(state.status.label());
                    return Ok(TickOutcome::Idle);
                }
                Some(_) => {}
            }
        }
        self.lock().active = true;

        let frame = match self.camera.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                let message = format!("Issue with camera: {}", e);
                warn!("{}", message);
                self.lock().error = Some(message);
                return Ok(TickOutcome::CameraUnavailable);
            }
        };

        let stats = match printer {
            Some(ref state) if printing => PrintStats::from_printer(state),
            _ => PrintStats::test_placeholder(),
        };

        let prepared = prepare_frame(&frame, settings.rotation)?;
        let scores = self.lock().buffer.scores();
        let response = self.service.infer(&prepared.base64, &scores, &stats).await?;

        if !response.is_success() {
            warn!("Inference returned status {}, skipping tick", response.status_code);
            return Ok(TickOutcome::Rejected {
                status_code: response.status_code,
            });
        }

        let preview = render_preview(&prepared.image, &response.boxes, settings.thresholds.notification)
            .map_err(|e| warn!("Failed to render preview: {}", e))
            .ok();

        {
            let sample = response.smoothed_sample();
            let mut state = self.lock();
            if preview.is_some() {
                state.preview = preview;
            }
            state.buffer.append(sample, response.score);
            state.levels = response.levels();
            state.current_sma = sample[0];
            state.error = None;
        }

        if self.dispatcher.apply_settings_pull(&self.settings, &response) {
            self.sync_buffer_length();
        }
        let settings = self.settings.snapshot();

        if let Some(token) = response.action {
            self.dispatcher.run_server_action(token, &settings).await;
        }

        let now = Instant::now();
        let decision = decide(&mut self.lock(), &settings, now);
        let report = self.dispatcher.dispatch(decision, &settings, &stats).await;
        commit(&mut self.lock(), decision, now);

        Ok(TickOutcome::Processed(report))
    }

    fn go_idle(&self, status: &str) {
        let mut state = self.lock();
        if state.active {
            info!("Printer is {}, clearing monitoring state", status);
        }
        state.active = false;
        state.error = None;
        state.clear_evidence();
        state.policy.reset();
    }

    /// Resize the buffer if the settings changed since it was last sized.
    fn sync_buffer_length(&self) {
        let version = self.settings.version();
        let mut state = self.lock();
        if state.settings_version == version {
            return;
        }

        let length = self.settings.snapshot().buffer_length;
        if state.buffer.capacity() != length {
            info!("Resizing sample buffer {} -> {}", state.buffer.capacity(), length);
            state.buffer.resize(length);
        }
        state.settings_version = version;
    }

    /// Propagate changed settings to the buffer and the collaborators.
    pub fn apply_settings(&self) {
        let settings = self.settings.snapshot();
        self.camera.set_camera_url(&settings.camera_url);
        self.device.set_device_addr(&settings.device_addr);
        self.sync_buffer_length();
    }

    /// Drop all runtime state, as when monitoring stops.
    pub fn reset(&self) {
        let fresh = EngineState::new(self.settings.snapshot().buffer_length, self.settings.version());
        *self.lock() = fresh;
    }

    pub fn status(&self) -> MonitorStatus {
        self.lock().status()
    }

    pub fn preview(&self) -> Option<String> {
        self.lock().preview.clone()
    }
}
