//! Minimal service lifecycle scaffold.
//!
//! The manager is the only long-running task in this process, so this is
//! pared down to exactly what it needs: a tick loop driven by an interval,
//! and a cloneable handle that can request a clean shutdown. No pub/sub
//! layer, no command queue — those are for a process that hosts more than
//! one service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A component with a start/tick/stop lifecycle driven by a timer.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn on_start(&self) {}
    async fn on_tick(&self);
    async fn on_stop(&self) {}
}

/// A cloneable handle that can ask a running service to shut down.
#[derive(Clone)]
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
}

impl ServiceHandle {
    /// Request shutdown. The running loop finishes its current tick (if
    /// any), calls `on_stop`, and exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start `service`'s tick loop on the current runtime, returning a handle to
/// stop it and the loop's own join handle.
pub fn spawn<S: Service>(service: Arc<S>, tick_interval: Duration) -> (ServiceHandle, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(false);
    let handle = ServiceHandle { shutdown: tx };

    let join = tokio::spawn(async move {
        service.on_start().await;

        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    service.on_tick().await;
                }
                result = rx.changed() => {
                    if result.is_err() || *rx.borrow() {
                        break;
                    }
                }
            }
        }

        service.on_stop().await;
    });

    (handle, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Service for Counter {
        async fn on_tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let (handle, join) = spawn(Arc::clone(&counter), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(3)).await;
        // Give the scheduler a chance to run the woken tick tasks.
        tokio::task::yield_now().await;
        assert!(counter.0.load(Ordering::SeqCst) >= 2);

        handle.shutdown();
        join.await.unwrap();
    }
}
