//! Runtime state owned by one monitored printer, and the snapshot exposed
//! to the management surface.

use serde::Serialize;

use super::buffer::{Sample, SlidingBuffer};
use super::trigger::TriggerPolicy;

/// Risk levels reported by the inference service for the latest frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Levels {
    pub notify: bool,
    pub action: bool,
}

impl From<[bool; 2]> for Levels {
    fn from(levels: [bool; 2]) -> Self {
        Self {
            notify: levels[0],
            action: levels[1],
        }
    }
}

/// Everything a tick mutates. Guarded by the loop handler's mutex.
#[derive(Debug)]
pub struct EngineState {
    pub buffer: SlidingBuffer,
    pub levels: Levels,
    pub policy: TriggerPolicy,
    pub active: bool,
    pub error: Option<String>,
    /// First component of the latest smoothed sample.
    pub current_sma: f64,
    pub preview: Option<String>,
    /// Settings version the buffer was last sized against.
    pub settings_version: u64,
}

impl EngineState {
    pub fn new(buffer_length: usize, settings_version: u64) -> Self {
        Self {
            buffer: SlidingBuffer::new(buffer_length),
            levels: Levels::default(),
            policy: TriggerPolicy::default(),
            active: false,
            error: None,
            current_sma: 0.0,
            preview: None,
            settings_version,
        }
    }

    /// Discard all accumulated risk evidence.
    pub fn clear_evidence(&mut self) {
        self.buffer.reset();
        self.levels = Levels::default();
        self.current_sma = 0.0;
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            active: self.active,
            error: self.error.is_some(),
            error_message: self.error.clone(),
            samples: self.buffer.samples(),
            scores: self.buffer.scores(),
            levels: self.levels,
            current_sma: self.current_sma,
            notifications_sent: self.policy.state().notifications_sent.len(),
            actions_sent: self.policy.state().actions_sent,
        }
    }
}

/// Point-in-time copy of the engine state, safe to hand to other threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub active: bool,
    pub error: bool,
    pub error_message: Option<String>,
    pub samples: Vec<Sample>,
    pub scores: Vec<f64>,
    pub levels: Levels,
    pub current_sma: f64,
    pub notifications_sent: usize,
    pub actions_sent: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_from_array() {
        let levels = Levels::from([false, true]);
        assert!(!levels.notify);
        assert!(levels.action);
    }

    #[test]
    fn test_clear_evidence() {
        let mut state = EngineState::new(4, 0);
        state.buffer.append([0.4, 0.5, 0.6], 0.7);
        state.levels = Levels::from([true, true]);
        state.current_sma = 0.4;

        state.clear_evidence();
        assert!(state.buffer.is_neutral());
        assert_eq!(state.levels, Levels::default());
        assert_eq!(state.current_sma, 0.0);
    }

    #[test]
    fn test_status_snapshot_serializes() {
        let mut state = EngineState::new(2, 0);
        state.error = Some("Issue with camera".to_string());

        let status = state.status();
        assert!(status.error);
        assert_eq!(status.samples.len(), 2);
        assert_eq!(status.scores.len(), 8);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["levels"]["notify"], false);
        assert_eq!(json["error_message"], "Issue with camera");
    }
}
