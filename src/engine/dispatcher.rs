//! Turns trigger decisions into device commands and notifications, and
//! applies configuration pushed down by the inference service.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::state::EngineState;
use crate::client::{
    ActionToken, InferenceResponse, NotificationLevel, Notify, PrintStats, SendCommand,
};
use crate::config::{Settings, SettingsStore};

/// What the policy allows this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pause the printer and send an action-severity notification.
    Act,
    /// Send a warning notification.
    Warn,
    None,
}

/// Result of carrying out a [`Decision`]. `None` fields were not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub decision: Decision,
    pub command_ok: Option<bool>,
    pub notification_ok: Option<bool>,
}

/// Consult the trigger policy for the current levels.
///
/// Only the action path requires the pause toggle. The notify path is gated
/// by levels and policy alone.
pub fn decide(state: &mut EngineState, settings: &Settings, now: Instant) -> Decision {
    if state.levels.action && state.policy.allow_action(now) && settings.actions.pause {
        return Decision::Act;
    }

    if state.levels.notify
        && state.policy.allow_notify(
            now,
            &state.buffer,
            settings.thresholds.notification,
            settings.retrigger_quota(),
        )
    {
        return Decision::Warn;
    }

    Decision::None
}

/// Record the effects of a dispatched decision.
///
/// Acting always clears the evidence and counts the action, whether or not
/// the pause command and notification succeeded.
pub fn commit(state: &mut EngineState, decision: Decision, now: Instant) {
    match decision {
        Decision::Act => {
            state.clear_evidence();
            state.policy.record_action(now);
        }
        Decision::Warn => state.policy.record_notification(now),
        Decision::None => {}
    }
}

pub struct ActionDispatcher<D, N> {
    device: Arc<D>,
    notifier: Arc<N>,
}

impl<D, N> ActionDispatcher<D, N>
where
    D: SendCommand,
    N: Notify,
{
    pub fn new(device: Arc<D>, notifier: Arc<N>) -> Self {
        Self { device, notifier }
    }

    /// Apply a settings override carried by the response. Returns true if
    /// one was present and accepted.
    pub fn apply_settings_pull(&self, store: &SettingsStore, response: &InferenceResponse) -> bool {
        match response.settings {
            Some(ref pushed) => store.apply_override(pushed).is_ok(),
            None => false,
        }
    }

    /// Carry out an action token sent by the inference service.
    pub async fn run_server_action(&self, token: ActionToken, settings: &Settings) -> Option<bool> {
        let gcode = match token {
            ActionToken::Pause if settings.actions.pause => &settings.gcode.pause,
            ActionToken::Resume if settings.actions.pause => &settings.gcode.resume,
            ActionToken::Cancel if settings.actions.cancel => &settings.gcode.cancel,
            ActionToken::None => return None,
            other => {
                info!("Ignoring server action {:?}: not enabled in settings", other);
                return None;
            }
        };

        info!("Server requested {:?}", token);
        Some(self.send(gcode).await)
    }

    pub async fn dispatch(
        &self,
        decision: Decision,
        settings: &Settings,
        stats: &PrintStats,
    ) -> DispatchReport {
        match decision {
            Decision::Act => {
                warn!("Action threshold reached, pausing print '{}'", stats.job_name);
                let command_ok = self.send(&settings.gcode.pause).await;
                let notification_ok = self.notify(NotificationLevel::Action, stats).await;
                DispatchReport {
                    decision,
                    command_ok: Some(command_ok),
                    notification_ok: Some(notification_ok),
                }
            }
            Decision::Warn => {
                info!("Notification threshold reached, sending warning");
                let notification_ok = self.notify(NotificationLevel::Warning, stats).await;
                DispatchReport {
                    decision,
                    command_ok: None,
                    notification_ok: Some(notification_ok),
                }
            }
            Decision::None => DispatchReport {
                decision,
                command_ok: None,
                notification_ok: None,
            },
        }
    }

    async fn send(&self, gcode: &str) -> bool {
        match self.device.send_command(gcode).await {
            Ok(ack) => {
                info!("Printer acknowledged '{}': {}", gcode, ack.trim());
                true
            }
            Err(e) => {
                warn!("G-code '{}' failed: {}", gcode, e);
                false
            }
        }
    }

    async fn notify(&self, level: NotificationLevel, stats: &PrintStats) -> bool {
        match self.notifier.notify(level, stats).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                warn!(
                    "{:?} notification rejected with status {}",
                    level, response.status_code
                );
                false
            }
            Err(e) => {
                warn!("{:?} notification failed: {}", level, e);
                false
            }
        }
    }
}
