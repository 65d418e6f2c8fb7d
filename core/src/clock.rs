//! Clock source
//!
//! The registry never measures time itself. It asks a [`ClockSource`] for
//! "now", to run a callback once at an absolute deadline, and to cancel
//! such a schedule.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until};

use crate::error::RegistryError;

/// Callback run by the clock when a deadline is reached.
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Monotonic tick source with one-shot scheduling.
///
/// Implementations must run each armed callback at most once and never
/// before its deadline. `cancel` is best-effort: a callback already running
/// when `cancel` is called may still complete, so callers guard against
/// late deliveries themselves.
pub trait ClockSource: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn arm(&self, deadline: Instant, callback: ExpiryCallback) -> ScheduleHandle;
    fn cancel(&self, handle: ScheduleHandle);
}

/// Handle to one armed schedule.
///
/// Not `Clone`: a schedule is cancelled through exactly one handle.
pub struct ScheduleHandle {
    id: u64,
    abort: Option<AbortHandle>,
}

impl ScheduleHandle {
    /// Handle for clocks that track their schedules by id.
    pub fn from_id(id: u64) -> Self {
        Self { id, abort: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleHandle").field("id", &self.id).finish()
    }
}

/// Clock backed by the tokio timer: one sleeping task per schedule.
#[derive(Debug, Clone)]
pub struct TokioClock {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl TokioClock {
    /// Bind to the current tokio runtime.
    pub fn new() -> Result<Self, RegistryError> {
        let runtime = Handle::try_current().map_err(|_| RegistryError::ClockUnavailable)?;
        Ok(Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }
}

impl ClockSource for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn arm(&self, deadline: Instant, callback: ExpiryCallback) -> ScheduleHandle {
        let task = self.runtime.spawn(async move {
            sleep_until(deadline).await;
            callback();
        });
        ScheduleHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            abort: Some(task.abort_handle()),
        }
    }

    fn cancel(&self, handle: ScheduleHandle) {
        if let Some(abort) = handle.abort {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn new_outside_runtime_is_unavailable() {
        assert_eq!(TokioClock::new().err(), Some(RegistryError::ClockUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let clock = TokioClock::new().expect("runtime");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let deadline = clock.now() + Duration::from_secs(3);
        let _handle = clock.arm(
            deadline,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_schedule_never_fires() {
        let clock = TokioClock::new().expect("runtime");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let handle = clock.arm(
            clock.now() + Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        clock.cancel(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
