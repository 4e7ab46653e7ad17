//! Per-device transition state machine.
//!
//! A four-state FSM — `Idle` → `{IncreasePending, DecreasePending}` →
//! `Debounce` → `Idle` — with at most one outstanding timer. A manual
//! transition (`transition_to_state`, `reset`, or starting a fresh
//! `transition_to` sequence) always cancels whatever automatic step was
//! queued; it is never overridden by a stale timer firing later.
//!
//! Scheduled steps run as a spawned task guarded by an epoch counter rather
//! than a literal timer-wheel: `abort()` stops the task at its next
//! suspension point, and the epoch check inside the loop catches the rare
//! case where a step is already past that point when cancellation happens.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Which direction a pending change is moving consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Increase,
    Decrease,
}

/// FSM state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionState {
    Idle,
    IncreasePending { expected_future_consumption_w: f64 },
    DecreasePending { expected_future_consumption_w: f64 },
    Debounce,
}

impl TransitionState {
    fn label(self) -> &'static str {
        match self {
            TransitionState::Idle => "Idle",
            TransitionState::IncreasePending { .. } => "IncreasePending",
            TransitionState::DecreasePending { .. } => "DecreasePending",
            TransitionState::Debounce => "Debounce",
        }
    }
}

fn edge_allowed(from: TransitionState, to: TransitionState) -> bool {
    use TransitionState::*;
    matches!(
        (from, to),
        (Idle, IncreasePending { .. })
            | (Idle, DecreasePending { .. })
            | (Idle, Idle)
            | (IncreasePending { .. }, Debounce)
            | (IncreasePending { .. }, Idle)
            | (DecreasePending { .. }, Debounce)
            | (DecreasePending { .. }, Idle)
            | (Debounce, Idle)
    )
}

struct Inner {
    state: TransitionState,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

/// The FSM itself. Cheap to clone — clones share the same underlying state.
#[derive(Clone)]
pub struct DeviceTransitionStateMachine {
    name: Arc<str>,
    inner: Arc<Mutex<Inner>>,
}

impl DeviceTransitionStateMachine {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner {
                state: TransitionState::Idle,
                epoch: 0,
                timer: None,
            })),
        }
    }

    /// Current state. Never suspends.
    pub fn state(&self) -> TransitionState {
        self.inner.lock().state
    }

    /// Explicit, immediate transition. Clears any outstanding timer/queue.
    pub fn transition_to_state(&self, to: TransitionState) -> Result<()> {
        let mut guard = self.inner.lock();
        let from = guard.state;
        if !edge_allowed(from, to) {
            return Err(Error::InvalidTransition {
                device: self.name.to_string(),
                from: from.label(),
                to: to.label(),
            });
        }
        self.clear_locked(&mut guard);
        guard.state = to;
        Ok(())
    }

    /// Force `Idle`, clearing timer and queue unconditionally.
    pub fn reset(&self) {
        let mut guard = self.inner.lock();
        self.clear_locked(&mut guard);
        guard.state = TransitionState::Idle;
    }

    /// Shorthand: enter the given pending state, auto-advance to `Debounce`
    /// after `pending`, then to `Idle` after a further `debounce`.
    pub fn transition_to_pending(
        &self,
        kind: PendingKind,
        expected_future_consumption_w: f64,
        pending: Duration,
        debounce: Duration,
    ) -> Result<()> {
        let entry = match kind {
            PendingKind::Increase => TransitionState::IncreasePending {
                expected_future_consumption_w,
            },
            PendingKind::Decrease => TransitionState::DecreasePending {
                expected_future_consumption_w,
            },
        };
        self.transition_to(vec![
            (entry, Duration::ZERO),
            (TransitionState::Debounce, pending),
            (TransitionState::Idle, debounce),
        ])
    }

    /// General scheduled sequence of `(successor, delay-from-predecessor)`
    /// steps. Begins by clearing the timer/queue and forcing `Idle`, so
    /// every step in `sequence` must be a legal edge starting from there.
    pub fn transition_to(&self, sequence: Vec<(TransitionState, Duration)>) -> Result<()> {
        let mut guard = self.inner.lock();
        self.clear_locked(&mut guard);
        guard.state = TransitionState::Idle;

        let mut steps = sequence.into_iter();
        let Some((first_state, first_delay)) = steps.next() else {
            return Ok(());
        };

        if first_delay.is_zero() {
            if !edge_allowed(guard.state, first_state) {
                return Err(Error::InvalidTransition {
                    device: self.name.to_string(),
                    from: guard.state.label(),
                    to: first_state.label(),
                });
            }
            guard.state = first_state;

            let remaining: Vec<_> = steps.collect();
            if !remaining.is_empty() {
                self.spawn_remaining(&mut guard, remaining);
            }
        } else {
            let remaining: Vec<_> = std::iter::once((first_state, first_delay)).chain(steps).collect();
            self.spawn_remaining(&mut guard, remaining);
        }
        Ok(())
    }

    fn spawn_remaining(&self, guard: &mut Inner, remaining: Vec<(TransitionState, Duration)>) {
        let inner = Arc::clone(&self.inner);
        let epoch = guard.epoch;
        let name = Arc::clone(&self.name);
        let handle = tokio::spawn(async move {
            for (state, delay) in remaining {
                tokio::time::sleep(delay).await;
                let mut guard = inner.lock();
                if guard.epoch != epoch {
                    return; // superseded by a manual transition
                }
                if !edge_allowed(guard.state, state) {
                    tracing::error!(
                        device = %name,
                        from = guard.state.label(),
                        to = state.label(),
                        "queued transition is no longer a legal edge"
                    );
                    return;
                }
                guard.state = state;
            }
        });
        guard.timer = Some(handle);
    }

    fn clear_locked(&self, guard: &mut Inner) {
        if let Some(handle) = guard.timer.take() {
            handle.abort();
        }
        guard.epoch = guard.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn boolean_style_cycle() {
        let fsm = DeviceTransitionStateMachine::new("test");
        fsm.transition_to_pending(
            PendingKind::Increase,
            50.0,
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
        .unwrap();

        assert!(matches!(
            fsm.state(),
            TransitionState::IncreasePending {
                expected_future_consumption_w
            } if expected_future_consumption_w == 50.0
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(fsm.state(), TransitionState::Debounce));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(fsm.state(), TransitionState::Idle));
    }

    #[test]
    fn rejects_illegal_edges() {
        let fsm = DeviceTransitionStateMachine::new("test");
        assert!(fsm.transition_to_state(TransitionState::Debounce).is_err());
        assert!(matches!(fsm.state(), TransitionState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_transition_cancels_queued_auto_transitions() {
        let fsm = DeviceTransitionStateMachine::new("test");
        fsm.transition_to_pending(
            PendingKind::Decrease,
            10.0,
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .unwrap();

        // Manually cut over to Idle before the timer would have fired.
        fsm.transition_to_state(TransitionState::Idle).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(fsm.state(), TransitionState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_queue() {
        let fsm = DeviceTransitionStateMachine::new("test");
        fsm.transition_to_pending(
            PendingKind::Increase,
            10.0,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .unwrap();
        fsm.reset();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(fsm.state(), TransitionState::Idle));
    }
}
