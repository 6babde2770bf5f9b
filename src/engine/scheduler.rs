//! Fixed-cadence async task runner with restart supervision.
//!
//! The callback runs every `interval` after the previous run completes. A
//! callback that errors or panics moves the scheduler to `Restarting`, where
//! it backs off before re-arming. Failures never stop the cadence; only
//! cancellation is terminal.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    /// Backing off after a failed invocation.
    Restarting,
    Cancelled,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Cancelled)
    }
}

/// Delay before re-arming after a failure. Doubles with each consecutive
/// failure up to `max_backoff`; a successful run resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Exponential backoff for the `failures`-th consecutive failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    interval_ms: AtomicU64,
    invocations: AtomicU64,
    restarts: AtomicU64,
    cancel: CancellationToken,
}

impl Shared {
    /// Move to `next` unless already in a terminal state.
    fn transition(&self, next: SchedulerState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the loop on the current tokio runtime. The first invocation
    /// happens after one full interval.
    pub fn start<F, Fut>(interval: Duration, policy: RestartPolicy, callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::Running),
            interval_ms: AtomicU64::new(duration_ms(interval)),
            invocations: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        let handle = tokio::spawn(supervise(shared.clone(), policy, callback));
        info!("Scheduler started with {:?} interval", interval);

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Takes effect from the next sleep; a sleep already in progress keeps
    /// its original length.
    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_ms
            .store(duration_ms(interval), Ordering::Release);
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Stop the loop, aborting an in-flight callback. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        if self.shared.transition(SchedulerState::Cancelled) {
            info!("Scheduler cancelled");
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::Acquire)
    }

    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Acquire)
    }

    /// Wait for the loop task to finish after cancellation.
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn duration_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

async fn supervise<F, Fut>(shared: Arc<Shared>, policy: RestartPolicy, mut callback: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut failures = 0u32;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.interval()) => {}
        }

        shared.invocations.fetch_add(1, Ordering::AcqRel);
        let task = tokio::spawn(callback());
        let abort = task.abort_handle();

        let joined = tokio::select! {
            _ = shared.cancel.cancelled() => {
                abort.abort();
                break;
            }
            joined = task => joined,
        };

        let failure = match joined {
            Ok(Ok(())) => {
                failures = 0;
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => "callback panicked".to_string(),
            Err(_) => break,
        };

        failures = failures.saturating_add(1);
        shared.restarts.fetch_add(1, Ordering::AcqRel);

        let backoff = policy.backoff(failures);
        if backoff == policy.max_backoff {
            error!(
                "Scheduled task failed {} times in a row ({}), retrying every {:?}",
                failures, failure, backoff
            );
        } else {
            warn!(
                "Scheduled task failed ({}), restarting in {:?} (failure {})",
                failure, backoff, failures
            );
        }
        shared.transition(SchedulerState::Restarting);

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        shared.transition(SchedulerState::Running);
    }

    shared.transition(SchedulerState::Cancelled);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use tokio::time::sleep;

    fn counting(
        count: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<anyhow::Result<()>> + Send + 'static {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_invocation_after_initial_sleep() {
        let count = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            counting(count.clone()),
        );

        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_keeps_rearming() {
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            || async { Err::<(), _>(anyhow::anyhow!("device offline")) },
        );

        sleep(Duration::from_secs(100)).await;
        let seen = scheduler.invocations();
        assert!(seen >= 5, "only {} invocations", seen);
        assert_eq!(scheduler.restarts(), seen);
        assert!(!scheduler.state().is_terminal());

        scheduler.cancel();
        scheduler.join().await;
        sleep(Duration::from_secs(100)).await;
        assert_eq!(scheduler.invocations(), seen);
        assert_eq!(scheduler.state(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_never_stops_cadence() {
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            || async { Err::<(), _>(anyhow::anyhow!("inference unreachable")) },
        );

        // Half-second offset keeps the checks clear of run boundaries
        sleep(Duration::from_millis(3 * 3600 * 1000 + 500)).await;
        let at_three_hours = scheduler.invocations();
        assert!(at_three_hours > 20, "only {} invocations", at_three_hours);

        sleep(Duration::from_secs(3600)).await;
        let at_four_hours = scheduler.invocations();
        // Backoff is capped at 60 s, so at least one run per 70 s
        assert!(at_four_hours - at_three_hours >= 3600 / 70);
        assert_eq!(scheduler.restarts(), at_four_hours);
        assert!(!scheduler.state().is_terminal());

        scheduler.cancel();
        scheduler.join().await;
        assert_eq!(scheduler.state(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let count = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            counting(count.clone()),
        );

        scheduler.cancel();
        scheduler.cancel();
        scheduler.join().await;

        assert_eq!(scheduler.state(), SchedulerState::Cancelled);
        assert!(scheduler.is_cancelled());
        sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_applies_to_later_sleeps() {
        let count = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            counting(count.clone()),
        );

        sleep(Duration::from_secs(5)).await;
        scheduler.set_interval(Duration::from_secs(2));
        assert_eq!(scheduler.interval(), Duration::from_secs(2));

        sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        scheduler.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_triggers_restart() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        panic!("first run fails");
                    }
                    anyhow::Ok(())
                }
            },
        );

        sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.restarts(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_inflight_callback() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let scheduler = Scheduler::start(
            Duration::from_secs(10),
            RestartPolicy::default(),
            move || {
                let flag = flag.clone();
                async move {
                    sleep(Duration::from_secs(60)).await;
                    flag.store(true, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            },
        );

        sleep(Duration::from_secs(15)).await;
        assert_eq!(scheduler.invocations(), 1);
        scheduler.cancel();
        scheduler.join().await;

        sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.state(), SchedulerState::Cancelled);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }
}
