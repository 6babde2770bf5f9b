//! Hysteresis and rate limiting for notifications and corrective actions.
//!
//! A notification closes the retrigger latch. The latch only reopens once
//! enough of the sample buffer has fallen back below the notification
//! threshold, so a defect that stays visible produces one notification
//! rather than one per tick.

use std::time::{Duration, Instant};

use tracing::debug;

use super::buffer::SlidingBuffer;

/// Minimum spacing between two notifications (and, by default, two actions).
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10 * 60);
/// Window over which notifications are counted for the rolling cap.
pub const DEFAULT_ROLLING_WINDOW: Duration = Duration::from_secs(4 * 60 * 60);
/// Notifications allowed inside one rolling window.
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub notify_cooldown: Duration,
    pub action_cooldown: Duration,
    pub rolling_window: Duration,
    pub max_notifications: usize,
    /// Lifetime cap on corrective actions. `None` disables the cap.
    pub max_actions: Option<u32>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            notify_cooldown: DEFAULT_COOLDOWN,
            action_cooldown: DEFAULT_COOLDOWN,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
            max_actions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerState {
    pub last_notification: Option<Instant>,
    pub last_action: Option<Instant>,
    /// Oldest first.
    pub notifications_sent: Vec<Instant>,
    pub actions_sent: u32,
    pub retrigger_valid: bool,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            last_notification: None,
            last_action: None,
            notifications_sent: Vec::new(),
            actions_sent: 0,
            retrigger_valid: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerPolicy {
    config: TriggerConfig,
    state: TriggerState,
}

impl TriggerPolicy {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            state: TriggerState::default(),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    /// Notifications younger than the rolling window. Scans newest first and
    /// stops at the first entry outside the window.
    pub fn rolling_notification_count(&self, now: Instant) -> usize {
        self.state
            .notifications_sent
            .iter()
            .rev()
            .take_while(|sent| now.saturating_duration_since(**sent) < self.config.rolling_window)
            .count()
    }

    /// Reopen the latch if at least `quota` buffered samples sit below the
    /// notification threshold. Returns whether the latch is open.
    pub fn retrigger_check(&mut self, buffer: &SlidingBuffer, threshold: f64, quota: usize) -> bool {
        if !self.state.retrigger_valid {
            let below = buffer.count_below(threshold);
            if below >= quota {
                debug!("Retrigger latch reopened ({} of {} samples below threshold)", below, quota);
                self.state.retrigger_valid = true;
            }
        }
        self.state.retrigger_valid
    }

    pub fn allow_notify(
        &mut self,
        now: Instant,
        buffer: &SlidingBuffer,
        threshold: f64,
        quota: usize,
    ) -> bool {
        let latch_open = self.retrigger_check(buffer, threshold, quota);
        let under_cap = self.rolling_notification_count(now) < self.config.max_notifications;
        let cooled = elapsed_since(self.state.last_notification, now)
            .map_or(true, |e| e > self.config.notify_cooldown);

        under_cap && latch_open && cooled
    }

    pub fn allow_action(&self, now: Instant) -> bool {
        if let Some(max) = self.config.max_actions {
            if self.state.actions_sent >= max {
                return false;
            }
        }
        elapsed_since(self.state.last_action, now).map_or(true, |e| e > self.config.action_cooldown)
    }

    /// Stamp a sent notification and close the latch.
    pub fn record_notification(&mut self, now: Instant) {
        let window = self.config.rolling_window;
        self.state
            .notifications_sent
            .retain(|sent| now.saturating_duration_since(*sent) < window);
        self.state.notifications_sent.push(now);
        self.state.last_notification = Some(now);
        self.state.retrigger_valid = false;
    }

    pub fn record_action(&mut self, now: Instant) {
        self.state.actions_sent += 1;
        self.state.last_action = Some(now);
    }

    pub fn reset(&mut self) {
        self.state = TriggerState::default();
    }
}

fn elapsed_since(then: Option<Instant>, now: Instant) -> Option<Duration> {
    then.map(|t| now.saturating_duration_since(t))
}
