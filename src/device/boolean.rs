//! BooleanDevice: a simple on/off appliance, one-shot increment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::entities::{BooleanEntity, Sensor};
use crate::error::Result;
use crate::increment::{validate_increment, BooleanAction, DeviceIncrement, ValidationOutcome};
use crate::transition::{DeviceTransitionStateMachine, PendingKind};

use super::{ChangeState, Device};

#[derive(Debug, Clone, Copy)]
pub struct BooleanOptions {
    pub expected_consumption_w: f64,
    pub change_transition_ms: u64,
    pub turn_off_debounce_ms: u64,
    pub turn_on_debounce_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BooleanControls {
    pub management_enabled: bool,
}

pub struct BooleanDevice {
    name: String,
    priority: i32,
    options: BooleanOptions,
    controls: RwLock<BooleanControls>,
    entity: Arc<dyn BooleanEntity>,
    consumption: Arc<dyn Sensor>,
    fsm: DeviceTransitionStateMachine,
}

impl BooleanDevice {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        options: BooleanOptions,
        controls: BooleanControls,
        entity: Arc<dyn BooleanEntity>,
        consumption: Arc<dyn Sensor>,
    ) -> Self {
        let name = name.into();
        let fsm = DeviceTransitionStateMachine::new(name.clone());
        Self {
            name,
            priority,
            options,
            controls: RwLock::new(controls),
            entity,
            consumption,
            fsm,
        }
    }

    pub fn set_management_enabled(&self, enabled: bool) {
        self.controls.write().management_enabled = enabled;
    }
}

#[async_trait]
impl Device for BooleanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn management_enabled(&self) -> bool {
        self.controls.read().management_enabled
    }

    async fn increase_increments(&self) -> Vec<DeviceIncrement> {
        if self.entity.state().await.is_on() {
            return Vec::new();
        }
        vec![DeviceIncrement::Boolean {
            delta_w: self.options.expected_consumption_w,
            action: BooleanAction::TurnOn,
        }]
    }

    async fn decrease_increments(&self) -> Vec<DeviceIncrement> {
        if !self.entity.state().await.is_on() {
            return Vec::new();
        }
        let observed = self.consumption.state().await;
        let delta = if observed.is_absent() {
            -self.options.expected_consumption_w
        } else {
            -observed.or_zero()
        };
        vec![DeviceIncrement::Boolean {
            delta_w: delta,
            action: BooleanAction::TurnOff,
        }]
    }

    async fn current_consumption_w(&self) -> f64 {
        self.consumption.state().await.or_zero()
    }

    fn change_state(&self) -> ChangeState {
        ChangeState::from_transition(self.fsm.state())
    }

    async fn increase_consumption_by(&self, increment: DeviceIncrement) -> Result<()> {
        let offered = self.increase_increments().await;
        match validate_increment(&self.name, self.fsm.state(), &offered, &increment)? {
            ValidationOutcome::SilentNoOp => return Ok(()),
            ValidationOutcome::Proceed => {}
        }
        let current = self.current_consumption_w().await;
        self.entity.turn_on().await;
        self.fsm.transition_to_pending(
            PendingKind::Increase,
            current + increment.delta_w(),
            Duration::from_millis(self.options.change_transition_ms),
            Duration::from_millis(self.options.turn_on_debounce_ms),
        )
    }

    async fn decrease_consumption_by(&self, increment: DeviceIncrement) -> Result<()> {
        let offered = self.decrease_increments().await;
        match validate_increment(&self.name, self.fsm.state(), &offered, &increment)? {
            ValidationOutcome::SilentNoOp => return Ok(()),
            ValidationOutcome::Proceed => {}
        }
        let current = self.current_consumption_w().await;
        self.entity.turn_off().await;
        self.fsm.transition_to_pending(
            PendingKind::Decrease,
            current + increment.delta_w(),
            Duration::from_millis(self.options.change_transition_ms),
            Duration::from_millis(self.options.turn_off_debounce_ms),
        )
    }

    async fn stop(&self) {
        self.entity.turn_off().await;
        self.fsm.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::mock::{MockBoolean, MockSensor};
    use crate::entities::SwitchState;
    use crate::numeric::NumericState;

    fn device() -> BooleanDevice {
        BooleanDevice::new(
            "pool-pump",
            5,
            BooleanOptions {
                expected_consumption_w: 50.0,
                change_transition_ms: 1_000,
                turn_off_debounce_ms: 5_000,
                turn_on_debounce_ms: 10_000,
            },
            BooleanControls {
                management_enabled: true,
            },
            Arc::new(MockBoolean::new(SwitchState::Off)),
            Arc::new(MockSensor::new(NumericState::Absent)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn boolean_cycle() {
        let device = device();
        let incs = device.increase_increments().await;
        assert_eq!(incs, vec![DeviceIncrement::Boolean { delta_w: 50.0, action: BooleanAction::TurnOn }]);

        device.increase_consumption_by(incs[0]).await.unwrap();
        assert!(matches!(
            device.change_state(),
            ChangeState::Pending { kind: PendingKind::Increase, expected_future_w } if expected_future_w == 50.0
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(device.change_state(), ChangeState::InDebounce);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(device.change_state(), ChangeState::None);
    }

    #[tokio::test]
    async fn stop_commands_off_and_resets() {
        let device = device();
        device.increase_increments().await; // no-op, just exercising the read path
        device.stop().await;
        assert_eq!(device.change_state(), ChangeState::None);
    }

    #[tokio::test]
    async fn rejects_unknown_increment() {
        let device = device();
        let bogus = DeviceIncrement::Boolean { delta_w: 999.0, action: BooleanAction::TurnOn };
        let err = device.increase_consumption_by(bogus).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::UnknownIncrement { .. }));
    }
}
