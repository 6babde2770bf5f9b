//! Starts, stops and reconfigures the monitoring loop, and answers the
//! management surface's status and heartbeat queries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::loop_handler::LoopHandler;
use super::scheduler::{RestartPolicy, Scheduler, SchedulerState};
use super::state::MonitorStatus;
use crate::client::{CaptureFrame, Infer, Notify, QueryDeviceState, SendCommand};
use crate::config::SettingsStore;
use crate::error::Result;

/// Remote view of the agent's settings, sent periodically by the service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub api_key: Option<String>,
    pub test_mode: Option<bool>,
    pub enable_monitor: Option<bool>,
    #[serde(alias = "printer_ip")]
    pub device_addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatReply {
    pub synced: bool,
    /// Fields that differed and were overwritten locally.
    pub unsynced: Vec<&'static str>,
    /// Settings were changed by an inference response since the last
    /// heartbeat and should be pulled again.
    pub require_sync: bool,
}

pub struct Monitor<C, D, S> {
    handler: Arc<LoopHandler<C, D, S>>,
    settings: Arc<SettingsStore>,
    policy: RestartPolicy,
    scheduler: Mutex<Option<Scheduler>>,
}

impl<C, D, S> Monitor<C, D, S>
where
    C: CaptureFrame + 'static,
    D: QueryDeviceState + SendCommand + 'static,
    S: Infer + Notify + 'static,
{
    pub fn new(handler: LoopHandler<C, D, S>, policy: RestartPolicy) -> Self {
        Self {
            settings: handler.settings().clone(),
            handler: Arc::new(handler),
            policy,
            scheduler: Mutex::new(None),
        }
    }

    pub fn handler(&self) -> &Arc<LoopHandler<C, D, S>> {
        &self.handler
    }

    fn slot(&self) -> MutexGuard<'_, Option<Scheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|s| !s.state().is_terminal())
    }

    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.slot().as_ref().map(Scheduler::state)
    }

    /// Start the loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|s| !s.state().is_terminal()) {
            return false;
        }

        if let Err(e) = self.settings.update(|s| s.monitoring_on = true) {
            warn!("Failed to record monitoring state: {}", e);
        }

        let interval = interval_from_secs(self.settings.snapshot().interval_secs);
        let handler = self.handler.clone();
        *slot = Some(Scheduler::start(interval, self.policy, move || {
            let handler = handler.clone();
            async move {
                handler.run_once().await;
                anyhow::Ok(())
            }
        }));

        info!("Monitoring started, checking every {:?}", interval);
        true
    }

    /// Stop the loop and discard runtime state. Returns false if it was not
    /// running.
    pub async fn stop(&self) -> bool {
        let scheduler = self.slot().take();
        let was_running = match scheduler {
            Some(scheduler) => {
                scheduler.cancel();
                scheduler.join().await;
                true
            }
            None => false,
        };

        self.handler.reset();
        self.handler.service().end_session();
        if let Err(e) = self.settings.update(|s| s.monitoring_on = false) {
            warn!("Failed to record monitoring state: {}", e);
        }

        if was_running {
            info!("Monitoring stopped");
        }
        was_running
    }

    /// Push changed settings to the running loop.
    pub fn on_settings_changed(&self) {
        self.handler.apply_settings();
        if let Some(ref scheduler) = *self.slot() {
            scheduler.set_interval(interval_from_secs(self.settings.snapshot().interval_secs));
        }
    }

    pub fn status(&self) -> MonitorStatus {
        self.handler.status()
    }

    pub fn preview(&self) -> Option<String> {
        self.handler.preview()
    }

    /// Bring local settings in line with the service's view, then start or
    /// stop monitoring to match `enable_monitor`.
    pub async fn reconcile(&self, request: &HeartbeatRequest) -> Result<HeartbeatReply> {
        let current = self.settings.snapshot();
        let mut unsynced = Vec::new();

        if request.api_key.as_ref().is_some_and(|v| *v != current.api_key) {
            unsynced.push("api_key");
        }
        if request.test_mode.is_some_and(|v| v != current.test_mode) {
            unsynced.push("test_mode");
        }
        if request.enable_monitor.is_some_and(|v| v != current.monitoring_on) {
            unsynced.push("enable_monitor");
        }
        if request
            .device_addr
            .as_ref()
            .is_some_and(|v| *v != current.device_addr)
        {
            unsynced.push("device_addr");
        }

        if !unsynced.is_empty() {
            info!("Heartbeat out of sync: {}", unsynced.join(", "));
            self.settings.update(|s| {
                if let Some(ref v) = request.api_key {
                    s.api_key = v.clone();
                }
                if let Some(v) = request.test_mode {
                    s.test_mode = v;
                }
                if let Some(ref v) = request.device_addr {
                    s.device_addr = v.clone();
                }
            })?;
            self.on_settings_changed();
        }

        match request.enable_monitor {
            Some(true) if !self.is_running() => {
                self.start();
            }
            Some(false) if self.is_running() => {
                self.stop().await;
            }
            _ => {}
        }

        Ok(HeartbeatReply {
            synced: unsynced.is_empty(),
            unsynced,
            require_sync: self.settings.take_require_sync(),
        })
    }
}

fn interval_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(10))
}
