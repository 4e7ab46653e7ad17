//! First-class cancellable one-shot timer.
//!
//! Used by the device-owned timers the state machine itself doesn't cover:
//! direct-consumption's low-current auto-stop, and climate/dehumidifier's
//! fan-only idle-out. Re-arming always supersedes whatever was previously
//! scheduled; a stale closure that already slipped past its `abort()` point
//! is still rejected by the epoch guard inside the spawned task, so it never
//! runs twice and never runs after cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub struct OneShotTimer {
    epoch: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Cancel anything outstanding, then schedule `action` to run after `delay`.
    pub fn arm<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let epoch = Arc::clone(&self.epoch);
        let target = epoch.load(Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if epoch.load(Ordering::SeqCst) != target {
                return;
            }
            action.await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// Cancel whatever is outstanding. Idempotent.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Default for OneShotTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let timer = OneShotTimer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        timer.arm(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_stale_fire() {
        let timer = OneShotTimer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        timer.arm(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_action() {
        let timer = OneShotTimer::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let f1 = Arc::clone(&first);
        timer.arm(Duration::from_secs(5), async move {
            f1.store(true, Ordering::SeqCst);
        });
        let f2 = Arc::clone(&second);
        timer.arm(Duration::from_secs(5), async move {
            f2.store(true, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }
}
