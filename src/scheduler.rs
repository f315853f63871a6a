//! Dedicated background scheduler for the diagnostics pipeline.
//!
//! Timer-driven modules and background sink I/O run on a small tokio runtime
//! owned by the dispatcher, never on the query-serving threads that call
//! [`crate::Dispatcher::report`]. The runtime survives reloads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::StartupError;

/// Minimum allowed tick period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Owns the background runtime.
pub struct Scheduler {
    runtime: Mutex<Option<Runtime>>,
    handle: SchedulerHandle,
}

impl Scheduler {
    /// Start the runtime with a single named worker thread.
    pub fn new() -> Result<Self, StartupError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("diagnostics-scheduler")
            .enable_all()
            .build()?;
        let handle = SchedulerHandle { handle: runtime.handle().clone() };
        Ok(Self { runtime: Mutex::new(Some(runtime)), handle })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stop the runtime, giving running tasks a short grace period. Idempotent.
    ///
    /// From inside an async context the runtime cannot block on its tasks, so
    /// it is released in the background without the grace period.
    pub fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else { return };
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
        tracing::debug!("scheduler runtime stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable spawn handle given to modules and reporters.
#[derive(Clone)]
pub struct SchedulerHandle {
    handle: Handle,
}

impl SchedulerHandle {
    /// Run `tick` every `period`, first firing one period from now.
    ///
    /// Each tick runs on the blocking pool so a slow sink cannot stall the
    /// timer or other background tasks. Periods below [`MIN_PERIOD`] are clamped.
    pub fn every<F>(&self, name: &str, period: Duration, tick: F) -> PeriodicTask
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = if period < MIN_PERIOD {
            tracing::warn!(task = %name, min_period = ?MIN_PERIOD,
                "Period is less than minimum allowed. Using minimum period."
            );
            MIN_PERIOD
        } else {
            period
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tick = Arc::new(tick);
        let name = name.to_string();

        self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        let tick = tick.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || tick()).await {
                            tracing::warn!(task = %name, error = %e, "periodic tick failed");
                        }
                    }
                }
            }
            tracing::debug!(task = %name, "periodic task stopped");
        });

        PeriodicTask { token }
    }

    /// Spawn a background future on the scheduler runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}

/// Handle to a running periodic task. Cancels the task when dropped.
pub struct PeriodicTask {
    token: CancellationToken,
}

impl PeriodicTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_ticks_until_cancelled() {
        let scheduler = Scheduler::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = scheduler.handle().every("test", Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(150));
        task.cancel();
        assert!(task.is_cancelled());
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        std::thread::sleep(Duration::from_millis(80));
        assert!(count.load(Ordering::SeqCst) <= seen + 1);
    }

    #[test]
    fn test_first_tick_waits_one_period() {
        let scheduler = Scheduler::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _task = scheduler.handle().every("slow", Duration::from_secs(60), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_tick_keeps_task_alive() {
        let scheduler = Scheduler::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _task = scheduler.handle().every("panicky", Duration::from_millis(20), move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
        });
        std::thread::sleep(Duration::from_millis(150));
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = Scheduler::new().unwrap();
        scheduler.shutdown();
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let scheduler = Scheduler::new().unwrap();
        let _task = scheduler.handle().every("async", Duration::from_millis(10), || {});
        drop(scheduler);
    }
}
