//! DehumidifierDevice: bang-bang humidity control with an observational
//! fan-only detector and a comfort bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::entities::{HumidifierEntity, Sensor};
use crate::error::Result;
use crate::increment::{dedup_by_delta, validate_increment, DeviceIncrement, ValidationOutcome};
use crate::numeric::NumericState;
use crate::stepping::{ascending_steps, descending_steps};
use crate::timer::OneShotTimer;
use crate::transition::{DeviceTransitionStateMachine, PendingKind};

use super::{ChangeState, Device};

#[derive(Debug, Clone, Copy)]
pub struct DehumidifierOptions {
    pub min_setpoint_pct: f64,
    pub max_setpoint_pct: f64,
    pub setpoint_step_pct: f64,
    pub expected_dehumidifying_w: f64,
    pub expected_fan_only_w: f64,
    pub fan_only_timeout_ms: u64,
    pub setpoint_change_transition_ms: u64,
    pub setpoint_debounce_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DehumidifierControls {
    pub desired_setpoint_pct: f64,
    pub enable_comfort_setpoint: bool,
    pub comfort_setpoint_pct: Option<f64>,
    pub management_enabled: bool,
}

impl DehumidifierOptions {
    fn is_fan_only_draw(&self, observed_w: f64) -> bool {
        (observed_w - self.expected_fan_only_w).abs() <= 0.2 * self.expected_fan_only_w
    }
}

pub struct DehumidifierDevice {
    name: String,
    priority: i32,
    options: Arc<DehumidifierOptions>,
    controls: Arc<RwLock<DehumidifierControls>>,
    entity: Arc<dyn HumidifierEntity>,
    humidity: Arc<dyn Sensor>,
    power: Arc<dyn Sensor>,
    fsm: DeviceTransitionStateMachine,
    fan_only_timer: Arc<OneShotTimer>,
}

impl DehumidifierDevice {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        options: DehumidifierOptions,
        controls: DehumidifierControls,
        entity: Arc<dyn HumidifierEntity>,
        humidity: Arc<dyn Sensor>,
        power: Arc<dyn Sensor>,
    ) -> Self {
        let name = name.into();
        let fsm = DeviceTransitionStateMachine::new(name.clone());
        let options = Arc::new(options);
        let controls = Arc::new(RwLock::new(controls));
        let fan_only_timer = Arc::new(OneShotTimer::new());

        // The fan-only idle-out timer is re-armed or cancelled purely from
        // consumption updates, not from the tick loop. The closure only
        // holds Arc clones of entity/fsm/timer — never a back-reference to
        // this device — so there is no ownership cycle.
        {
            let options = Arc::clone(&options);
            let controls = Arc::clone(&controls);
            let entity = Arc::clone(&entity);
            let fsm = fsm.clone();
            let timer = Arc::clone(&fan_only_timer);
            let name = name.clone();
            power.on_update(Box::new(move |reading: NumericState| {
                let observed_w = reading.or_zero();
                let comfort_disabled = !controls.read().enable_comfort_setpoint;
                if comfort_disabled && options.is_fan_only_draw(observed_w) {
                    let entity = Arc::clone(&entity);
                    let fsm = fsm.clone();
                    let name = name.clone();
                    timer.arm(Duration::from_millis(options.fan_only_timeout_ms), async move {
                        tracing::info!(device = %name, "dehumidifier fan-only idle-out: turning off");
                        entity.turn_off().await;
                        fsm.reset();
                    });
                } else {
                    timer.cancel();
                }
            }));
        }

        Self {
            name,
            priority,
            options,
            controls,
            entity,
            humidity,
            power,
            fsm,
            fan_only_timer,
        }
    }
}

#[async_trait]
impl Device for DehumidifierDevice {
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
        let Some(humidity) = self.humidity.state().await.value() else {
            return Vec::new();
        };
        let controls = *self.controls.read();
        let step = self.options.setpoint_step_pct;
        let desired = controls
            .desired_setpoint_pct
            .clamp(self.options.min_setpoint_pct, self.options.max_setpoint_pct);

        if !self.entity.state().await.is_on() {
            if humidity > desired {
                return vec![DeviceIncrement::Dehumidifier {
                    delta_w: self.options.expected_dehumidifying_w,
                    target_humidity_pct: desired,
                }];
            }
            return Vec::new();
        }

        let current_w = self.power.state().await.or_zero();
        let current_setpoint = self
            .entity
            .attributes()
            .humidity
            .unwrap_or(controls.desired_setpoint_pct);
        let currently_fan_only = self.options.is_fan_only_draw(current_w);

        let candidates = descending_steps(current_setpoint - step, desired, step);
        let out = candidates
            .into_iter()
            .filter_map(|sp| {
                if !(sp < humidity && currently_fan_only) {
                    return None;
                }
                Some(DeviceIncrement::Dehumidifier {
                    delta_w: self.options.expected_dehumidifying_w - current_w,
                    target_humidity_pct: sp,
                })
            })
            .collect();
        dedup_by_delta(out)
    }

    async fn decrease_increments(&self) -> Vec<DeviceIncrement> {
        if !self.entity.state().await.is_on() {
            return Vec::new();
        }
        // Not explicitly required by the increase-side "valid reading"
        // gate, but the comparisons below are meaningless without one.
        let Some(humidity) = self.humidity.state().await.value() else {
            return Vec::new();
        };
        let controls = *self.controls.read();
        let step = self.options.setpoint_step_pct;
        let current_w = self.power.state().await.or_zero();
        let current_setpoint = self
            .entity
            .attributes()
            .humidity
            .unwrap_or(controls.desired_setpoint_pct);
        let currently_dehumidifying = !self.options.is_fan_only_draw(current_w);

        let comfort_engaged = controls.enable_comfort_setpoint && controls.comfort_setpoint_pct.is_some();
        let bound = if comfort_engaged {
            controls.comfort_setpoint_pct.unwrap().min(self.options.max_setpoint_pct)
        } else {
            self.options.max_setpoint_pct
        };

        let candidates = ascending_steps(current_setpoint + step, bound, step);
        let out = candidates
            .into_iter()
            .filter_map(|sp| {
                if !(currently_dehumidifying && sp >= humidity) {
                    return None;
                }
                Some(DeviceIncrement::Dehumidifier {
                    delta_w: self.options.expected_fan_only_w - current_w,
                    target_humidity_pct: sp,
                })
            })
            .collect();
        dedup_by_delta(out)
    }

    async fn current_consumption_w(&self) -> f64 {
        self.power.state().await.or_zero()
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
        let DeviceIncrement::Dehumidifier { delta_w, target_humidity_pct } = increment else {
            unreachable!("validated against this device's own increase_increments()")
        };
        if !self.entity.state().await.is_on() {
            self.entity.turn_on().await;
        }
        self.entity.set_humidity(target_humidity_pct).await;
        let current = self.current_consumption_w().await;
        self.fsm.transition_to_pending(
            PendingKind::Increase,
            current + delta_w,
            Duration::from_millis(self.options.setpoint_change_transition_ms),
            Duration::from_millis(self.options.setpoint_debounce_ms),
        )
    }

    async fn decrease_consumption_by(&self, increment: DeviceIncrement) -> Result<()> {
        let offered = self.decrease_increments().await;
        match validate_increment(&self.name, self.fsm.state(), &offered, &increment)? {
            ValidationOutcome::SilentNoOp => return Ok(()),
            ValidationOutcome::Proceed => {}
        }
        let DeviceIncrement::Dehumidifier { delta_w, target_humidity_pct } = increment else {
            unreachable!("validated against this device's own decrease_increments()")
        };
        self.entity.set_humidity(target_humidity_pct).await;
        let current = self.current_consumption_w().await;
        self.fsm.transition_to_pending(
            PendingKind::Decrease,
            current + delta_w,
            Duration::from_millis(self.options.setpoint_change_transition_ms),
            Duration::from_millis(self.options.setpoint_debounce_ms),
        )
    }

    async fn stop(&self) {
        self.entity.turn_off().await;
        self.fan_only_timer.cancel();
        self.fsm.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::mock::{MockHumidifier, MockSensor};
    use crate::entities::{BinaryState, HumidifierAttributes};

    fn options() -> DehumidifierOptions {
        DehumidifierOptions {
            min_setpoint_pct: 40.0,
            max_setpoint_pct: 70.0,
            setpoint_step_pct: 5.0,
            expected_dehumidifying_w: 600.0,
            expected_fan_only_w: 80.0,
            fan_only_timeout_ms: 900_000,
            setpoint_change_transition_ms: 2_000,
            setpoint_debounce_ms: 20_000,
        }
    }

    fn device() -> DehumidifierDevice {
        let entity = Arc::new(MockHumidifier::new(
            BinaryState::Off,
            HumidifierAttributes { humidity: Some(55.0), min_humidity: 40.0, max_humidity: 70.0 },
        ));
        let humidity = Arc::new(MockSensor::new(NumericState::Number(65.0)));
        let power = Arc::new(MockSensor::new(NumericState::Absent));
        DehumidifierDevice::new(
            "basement-dehumidifier",
            4,
            options(),
            DehumidifierControls {
                desired_setpoint_pct: 55.0,
                enable_comfort_setpoint: false,
                comfort_setpoint_pct: None,
                management_enabled: true,
            },
            entity,
            humidity,
            power,
        )
    }

    fn device_with_power(power: Arc<MockSensor>) -> (DehumidifierDevice, Arc<MockHumidifier>) {
        let entity = Arc::new(MockHumidifier::new(
            BinaryState::Off,
            HumidifierAttributes { humidity: Some(55.0), min_humidity: 40.0, max_humidity: 70.0 },
        ));
        let humidity = Arc::new(MockSensor::new(NumericState::Number(65.0)));
        let device = DehumidifierDevice::new(
            "basement-dehumidifier",
            4,
            options(),
            DehumidifierControls {
                desired_setpoint_pct: 55.0,
                enable_comfort_setpoint: false,
                comfort_setpoint_pct: None,
                management_enabled: true,
            },
            entity.clone(),
            humidity,
            power,
        );
        (device, entity)
    }

    #[tokio::test]
    async fn startup_increment_when_humidity_above_desired() {
        let device = device();
        let incs = device.increase_increments().await;
        assert_eq!(
            incs,
            vec![DeviceIncrement::Dehumidifier { delta_w: 600.0, target_humidity_pct: 55.0 }]
        );
    }

    #[tokio::test]
    async fn no_startup_increment_when_already_below_desired() {
        let entity = Arc::new(MockHumidifier::new(
            BinaryState::Off,
            HumidifierAttributes { humidity: Some(55.0), min_humidity: 40.0, max_humidity: 70.0 },
        ));
        let humidity = Arc::new(MockSensor::new(NumericState::Number(50.0)));
        let power = Arc::new(MockSensor::new(NumericState::Absent));
        let device = DehumidifierDevice::new(
            "basement-dehumidifier",
            4,
            options(),
            DehumidifierControls {
                desired_setpoint_pct: 55.0,
                enable_comfort_setpoint: false,
                comfort_setpoint_pct: None,
                management_enabled: true,
            },
            entity,
            humidity,
            power,
        );
        assert!(device.increase_increments().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fan_only_reading_arms_idle_out_timer() {
        let power = Arc::new(MockSensor::new(NumericState::Absent));
        let (_device, entity) = device_with_power(power.clone());
        entity.turn_on().await;

        // Simulate an update landing at the fan-only draw level.
        power.set(NumericState::Number(80.0));

        tokio::time::advance(Duration::from_millis(900_000)).await;
        assert!(!entity.is_on());
    }
}
