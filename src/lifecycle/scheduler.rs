//! Cancelable scheduled tasks.
//!
//! Timer-driven work (breaker half-open timers, queue sweeps) goes through
//! here instead of ad-hoc `tokio::spawn` + `sleep`, so every task has a handle
//! that can be cancelled and tests can drive it with tokio's paused clock.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Handle to a scheduled task.
///
/// Dropping the handle detaches the task; call [`TaskHandle::cancel`] to stop it.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run `task` once after `delay`.
pub fn schedule_after<F, Fut>(delay: Duration, task: F) -> TaskHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        time::sleep(delay).await;
        task().await;
    });
    TaskHandle { handle }
}

/// Run `task` every `period`, first run one period from now.
pub fn schedule_every<F, Fut>(period: Duration, mut task: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            task().await;
        }
    });
    TaskHandle { handle }
}
