//! Repeating background check with explicit arm/disarm.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Shortest period a watchdog ticks at; a zero period is raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A single recurring task. Arming an armed watchdog is a no-op; dropping
/// the watchdog disarms it.
#[derive(Debug, Default)]
pub struct Watchdog {
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run `tick` every `period`, first after one full period, until it
    /// returns `Break` or the watchdog is disarmed. A tick that outlasts the
    /// period delays the next one rather than stacking.
    ///
    /// Periods below [`MIN_PERIOD`] are raised to it. Returns `false` if
    /// already armed.
    pub fn arm<F, Fut>(&mut self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if self.is_armed() {
            return false;
        }

        let period = period.max(MIN_PERIOD);
        debug!("watchdog armed, every {} ms", period.as_millis());
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await.is_break() {
                    debug!("watchdog stopped");
                    break;
                }
            }
        }));
        true
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("watchdog disarmed");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicU32>, stop_after: u32) -> impl FnMut() -> std::future::Ready<ControlFlow<()>> {
        let counter = counter.clone();
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= stop_after {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_break() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut watchdog = Watchdog::new();
        assert!(watchdog.arm(Duration::from_secs(1), counting(&counter, 3)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!watchdog.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_is_idempotent() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut watchdog = Watchdog::new();
        assert!(watchdog.arm(Duration::from_secs(1), counting(&counter, u32::MAX)));
        assert!(!watchdog.arm(Duration::from_secs(1), counting(&counter, u32::MAX)));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_keeps_ticking() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut watchdog = Watchdog::new();
        assert!(watchdog.arm(Duration::ZERO, counting(&counter, u32::MAX)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watchdog.is_armed());
        assert!(counter.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_ticks() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut watchdog = Watchdog::new();
        watchdog.arm(Duration::from_secs(1), counting(&counter, u32::MAX));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        watchdog.disarm();
        watchdog.disarm();
        assert!(!watchdog.is_armed());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
