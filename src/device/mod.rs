//! Base device contract and its device-class implementations.

pub mod boolean;
pub mod climate;
pub mod dehumidifier;
pub mod direct_consumption;

use async_trait::async_trait;

use crate::error::Result;
use crate::increment::DeviceIncrement;
use crate::transition::{PendingKind, TransitionState};

/// Projection of the transition FSM's state onto the device contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeState {
    None,
    Pending {
        kind: PendingKind,
        expected_future_w: f64,
    },
    InDebounce,
}

impl ChangeState {
    pub fn from_transition(state: TransitionState) -> Self {
        match state {
            TransitionState::Idle => ChangeState::None,
            TransitionState::IncreasePending {
                expected_future_consumption_w,
            } => ChangeState::Pending {
                kind: PendingKind::Increase,
                expected_future_w: expected_future_consumption_w,
            },
            TransitionState::DecreasePending {
                expected_future_consumption_w,
            } => ChangeState::Pending {
                kind: PendingKind::Decrease,
                expected_future_w: expected_future_consumption_w,
            },
            TransitionState::Debounce => ChangeState::InDebounce,
        }
    }

    pub fn is_actionable(self) -> bool {
        matches!(self, ChangeState::None)
    }
}

/// Polymorphic interface every managed appliance implements.
///
/// `increase_increments`/`decrease_increments`/`current_consumption_w`/
/// `change_state` are pure queries over already-observed state: they never
/// suspend on an actual bridge round-trip in the real adapters either, since
/// the adapter traits are plain read accessors over a locally cached value.
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Higher value sheds first, lower value is filled first.
    fn priority(&self) -> i32;

    fn management_enabled(&self) -> bool;

    async fn increase_increments(&self) -> Vec<DeviceIncrement>;
    async fn decrease_increments(&self) -> Vec<DeviceIncrement>;

    /// Observed non-negative watts, falling back to `0` on `absent`.
    async fn current_consumption_w(&self) -> f64;

    fn change_state(&self) -> ChangeState;

    async fn increase_consumption_by(&self, increment: DeviceIncrement) -> Result<()>;
    async fn decrease_consumption_by(&self, increment: DeviceIncrement) -> Result<()>;

    /// Unconditional safe-off: command the entity off, clear all timers,
    /// reset the transition FSM.
    async fn stop(&self);
}
