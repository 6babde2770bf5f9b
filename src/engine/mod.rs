//! The monitoring engine.
//!
//! - [`SlidingBuffer`] - fixed-capacity sample and score histories
//! - [`TriggerPolicy`] - retrigger latch, cooldowns and rolling caps
//! - [`ActionDispatcher`] - turns decisions into G-code and notifications
//! - [`LoopHandler`] - one tick of the control loop
//! - [`Scheduler`] - fixed-cadence runner with restart supervision
//! - [`Monitor`] - start/stop/reconfigure and status queries

pub mod buffer;
pub mod dispatcher;
pub mod loop_handler;
pub mod monitor;
pub mod scheduler;
pub mod state;
pub mod trigger;

pub use buffer::{Sample, SlidingBuffer, MULTIPLIER, NEUTRAL_SAMPLE, NEUTRAL_SCORE};
pub use dispatcher::{ActionDispatcher, Decision, DispatchReport};
pub use loop_handler::{LoopHandler, TickOutcome};
pub use monitor::{HeartbeatReply, HeartbeatRequest, Monitor};
pub use scheduler::{RestartPolicy, Scheduler, SchedulerState};
pub use state::{EngineState, Levels, MonitorStatus};
pub use trigger::{TriggerConfig, TriggerPolicy, TriggerState};
