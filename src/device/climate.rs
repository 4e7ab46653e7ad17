//! ClimateDevice: an HVAC unit with mode, setpoint, a comfort bound, and a
//! fan-only idle-out timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::entities::{ClimateEntity, ClimateMode, Sensor};
use crate::error::Result;
use crate::increment::{dedup_by_delta, validate_increment, ClimateModeChange, DeviceIncrement, ValidationOutcome};
use crate::stepping::{ascending_steps, descending_steps};
use crate::timer::OneShotTimer;
use crate::transition::{DeviceTransitionStateMachine, PendingKind};

use super::{ChangeState, Device};

/// Minimum delta worth acting on; smaller candidates are dropped.
const MIN_ACTIONABLE_DELTA_W: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct ClimateOptions {
    pub min_setpoint_c: f64,
    pub max_setpoint_c: f64,
    pub setpoint_step_c: f64,
    pub compressor_startup_min_w: f64,
    pub power_on_setpoint_offset_c: f64,
    pub consumption_per_degree_w: f64,
    pub max_compressor_w: f64,
    pub fan_only_min_w: f64,
    pub heat_cool_min_w: f64,
    pub setpoint_change_transition_ms: u64,
    pub setpoint_debounce_ms: u64,
    pub mode_change_transition_ms: u64,
    pub mode_debounce_ms: u64,
    pub startup_transition_ms: u64,
    pub startup_debounce_ms: u64,
    pub fan_only_timeout_ms: u64,
}

/// A validated `{Heat, Cool, Off}` — never a free-form string, so an
/// out-of-range mode cannot exist once the controls are constructed. See
/// `crate::config` for the point where a bad value from disk is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredMode {
    Heat,
    Cool,
    Off,
}

impl DesiredMode {
    fn as_observed(self) -> Option<ClimateMode> {
        match self {
            DesiredMode::Heat => Some(ClimateMode::Heat),
            DesiredMode::Cool => Some(ClimateMode::Cool),
            DesiredMode::Off => Some(ClimateMode::Off),
        }
    }

    /// `+1` for heating aggression, `-1` for cooling, `0` for off (a
    /// zero step collapses every ladder to empty, which is exactly what an
    /// off desired mode should produce).
    fn aggression_sign(self) -> f64 {
        match self {
            DesiredMode::Heat => 1.0,
            DesiredMode::Cool => -1.0,
            DesiredMode::Off => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClimateControls {
    pub desired_setpoint_c: f64,
    pub desired_mode: DesiredMode,
    pub enable_comfort_setpoint: bool,
    pub comfort_setpoint_c: Option<f64>,
    pub management_enabled: bool,
}

pub struct ClimateDevice {
    name: String,
    priority: i32,
    options: ClimateOptions,
    controls: RwLock<ClimateControls>,
    entity: Arc<dyn ClimateEntity>,
    power: Arc<dyn Sensor>,
    fsm: DeviceTransitionStateMachine,
    fan_only_timer: OneShotTimer,
}

fn climate_mode_change_to_observed(mc: ClimateModeChange) -> ClimateMode {
    match mc {
        ClimateModeChange::Heat => ClimateMode::Heat,
        ClimateModeChange::Cool => ClimateMode::Cool,
        ClimateModeChange::FanOnly => ClimateMode::FanOnly,
    }
}

impl ClimateDevice {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        options: ClimateOptions,
        controls: ClimateControls,
        entity: Arc<dyn ClimateEntity>,
        power: Arc<dyn Sensor>,
    ) -> Self {
        let name = name.into();
        let fsm = DeviceTransitionStateMachine::new(name.clone());
        Self {
            name,
            priority,
            options,
            controls: RwLock::new(controls),
            entity,
            power,
            fsm,
            fan_only_timer: OneShotTimer::new(),
        }
    }

    fn arm_fan_only_timer(&self) {
        let entity = Arc::clone(&self.entity);
        let fsm = self.fsm.clone();
        let name = self.name.clone();
        self.fan_only_timer
            .arm(Duration::from_millis(self.options.fan_only_timeout_ms), async move {
                tracing::info!(device = %name, "climate fan-only idle-out: turning off");
                entity.turn_off().await;
                fsm.reset();
            });
    }
}

#[async_trait]
impl Device for ClimateDevice {
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
        let controls = *self.controls.read();
        if controls.desired_mode == DesiredMode::Off {
            return Vec::new();
        }
        let Some(room) = self.entity.room_temperature().await.value() else {
            return Vec::new();
        };
        let observed = self.entity.state().await;
        let current_w = self.power.state().await.or_zero();
        let step = self.options.setpoint_step_c;
        let s = controls.desired_mode.aggression_sign();
        let desired = controls.desired_setpoint_c;

        let is_off = observed == ClimateMode::Off;
        let is_fan_only = observed == ClimateMode::FanOnly;
        let mode_change_required = observed != controls.desired_mode.as_observed().unwrap_or(ClimateMode::Off) || is_off;

        let floor_adjust = if mode_change_required || current_w < self.options.heat_cool_min_w {
            self.options.compressor_startup_min_w
        } else {
            0.0
        };

        let baseline = if is_off || is_fan_only {
            room
        } else {
            self.entity.target_temperature().await.value().unwrap_or(room)
        };

        if s > 0.0 && baseline >= desired {
            return Vec::new();
        }
        if s < 0.0 && baseline <= desired {
            return Vec::new();
        }

        let candidates: Vec<f64> = if is_off {
            let raw = baseline + s * self.options.power_on_setpoint_offset_c;
            let clamped = if s > 0.0 { raw.min(desired) } else { raw.max(desired) };
            vec![clamped]
        } else if s > 0.0 {
            ascending_steps(baseline + step, desired, step)
        } else {
            descending_steps(baseline - step, desired, step)
        };

        let mode_change = if mode_change_required {
            match controls.desired_mode {
                DesiredMode::Heat => Some(ClimateModeChange::Heat),
                DesiredMode::Cool => Some(ClimateModeChange::Cool),
                DesiredMode::Off => None,
            }
        } else {
            None
        };

        let out = candidates
            .into_iter()
            .filter_map(|sp| {
                let temp_power = (baseline - sp).abs() * self.options.consumption_per_degree_w;
                let target_w = (floor_adjust + temp_power + current_w).min(self.options.max_compressor_w);
                let delta = target_w - current_w;
                if delta.abs() < MIN_ACTIONABLE_DELTA_W {
                    return None;
                }
                Some(DeviceIncrement::Climate {
                    delta_w: delta,
                    target_setpoint_c: Some(sp),
                    mode_change,
                })
            })
            .collect();
        dedup_by_delta(out)
    }

    async fn decrease_increments(&self) -> Vec<DeviceIncrement> {
        let controls = *self.controls.read();
        let observed = self.entity.state().await;
        if observed == ClimateMode::Off || observed == ClimateMode::FanOnly {
            return Vec::new();
        }
        let current_w = self.power.state().await.or_zero();
        let step = self.options.setpoint_step_c;
        let comfort_engaged = controls.enable_comfort_setpoint && controls.comfort_setpoint_c.is_some();

        // Decrease relaxes whichever mode is actually running, independent
        // of what the user now desires.
        let s = match observed {
            ClimateMode::Heat => 1.0,
            ClimateMode::Cool => -1.0,
            _ => controls.desired_mode.aggression_sign(),
        };

        let Some(current_setpoint) = self.entity.target_temperature().await.value() else {
            return Vec::new();
        };

        if comfort_engaged {
            let comfort = controls.comfort_setpoint_c.unwrap();
            let reached = if s > 0.0 {
                current_setpoint <= comfort
            } else {
                current_setpoint >= comfort
            };
            if reached {
                return Vec::new();
            }
        }

        let bound = if comfort_engaged {
            controls.comfort_setpoint_c.unwrap()
        } else if s > 0.0 {
            self.options.min_setpoint_c
        } else {
            self.options.max_setpoint_c
        };

        let candidates: Vec<f64> = if s > 0.0 {
            descending_steps(current_setpoint - step, bound, step)
        } else {
            ascending_steps(current_setpoint + step, bound, step)
        };

        let headroom = current_w - self.options.heat_cool_min_w;
        let mut out: Vec<DeviceIncrement> = candidates
            .into_iter()
            .filter_map(|sp| {
                let reduction = ((sp - current_setpoint).abs() * self.options.consumption_per_degree_w).min(headroom.max(0.0));
                let delta = -reduction;
                if delta >= 0.0 {
                    return None;
                }
                Some(DeviceIncrement::Climate {
                    delta_w: delta,
                    target_setpoint_c: Some(sp),
                    mode_change: None,
                })
            })
            .collect();

        if matches!(observed, ClimateMode::Heat | ClimateMode::Cool)
            && !comfort_engaged
            && current_w > self.options.fan_only_min_w
        {
            out.push(DeviceIncrement::Climate {
                delta_w: -(current_w - self.options.fan_only_min_w),
                target_setpoint_c: None,
                mode_change: Some(ClimateModeChange::FanOnly),
            });
        }

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
        let DeviceIncrement::Climate { delta_w, target_setpoint_c, mode_change } = increment else {
            unreachable!("validated against this device's own increase_increments()")
        };

        let observed_off = self.entity.state().await == ClimateMode::Off;
        let hvac_mode = mode_change.map(climate_mode_change_to_observed);

        if let Some(sp) = target_setpoint_c {
            self.entity.set_temperature(sp, hvac_mode).await;
        } else if let Some(mode) = hvac_mode {
            self.entity.set_hvac_mode(mode).await;
        }

        if mode_change.is_some() {
            // Any mode change driven by an increase moves away from
            // fan-only (increases never request it), so cancel any armed
            // idle-out timer unconditionally; cancellation is a no-op if
            // nothing was armed.
            self.fan_only_timer.cancel();
        }

        let (transition_ms, debounce_ms) = if observed_off {
            (self.options.startup_transition_ms, self.options.startup_debounce_ms)
        } else if mode_change.is_some() {
            (self.options.mode_change_transition_ms, self.options.mode_debounce_ms)
        } else {
            (self.options.setpoint_change_transition_ms, self.options.setpoint_debounce_ms)
        };

        let current = self.current_consumption_w().await;
        let expected_future = if observed_off { delta_w } else { current + delta_w };

        self.fsm.transition_to_pending(
            PendingKind::Increase,
            expected_future,
            Duration::from_millis(transition_ms),
            Duration::from_millis(debounce_ms),
        )
    }

    async fn decrease_consumption_by(&self, increment: DeviceIncrement) -> Result<()> {
        let offered = self.decrease_increments().await;
        match validate_increment(&self.name, self.fsm.state(), &offered, &increment)? {
            ValidationOutcome::SilentNoOp => return Ok(()),
            ValidationOutcome::Proceed => {}
        }
        let DeviceIncrement::Climate { delta_w, target_setpoint_c, mode_change } = increment else {
            unreachable!("validated against this device's own decrease_increments()")
        };

        let entering_fan_only = mode_change == Some(ClimateModeChange::FanOnly);
        if let Some(sp) = target_setpoint_c {
            self.entity.set_temperature(sp, None).await;
        } else if entering_fan_only {
            self.entity.set_hvac_mode(ClimateMode::FanOnly).await;
        }

        let (transition_ms, debounce_ms) = if mode_change.is_some() {
            (self.options.mode_change_transition_ms, self.options.mode_debounce_ms)
        } else {
            (self.options.setpoint_change_transition_ms, self.options.setpoint_debounce_ms)
        };

        let current = self.current_consumption_w().await;
        self.fsm.transition_to_pending(
            PendingKind::Decrease,
            current + delta_w,
            Duration::from_millis(transition_ms),
            Duration::from_millis(debounce_ms),
        )?;

        if entering_fan_only {
            self.arm_fan_only_timer();
        }
        Ok(())
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
    use crate::entities::mock::MockClimate;
    use crate::entities::mock::MockSensor;
    use crate::entities::ClimateAttributes;
    use crate::numeric::NumericState;

    fn options() -> ClimateOptions {
        ClimateOptions {
            min_setpoint_c: 16.0,
            max_setpoint_c: 30.0,
            setpoint_step_c: 1.0,
            compressor_startup_min_w: 600.0,
            power_on_setpoint_offset_c: 2.0,
            consumption_per_degree_w: 350.0,
            max_compressor_w: 2500.0,
            fan_only_min_w: 80.0,
            heat_cool_min_w: 400.0,
            setpoint_change_transition_ms: 5_000,
            setpoint_debounce_ms: 30_000,
            mode_change_transition_ms: 10_000,
            mode_debounce_ms: 60_000,
            startup_transition_ms: 15_000,
            startup_debounce_ms: 90_000,
            fan_only_timeout_ms: 600_000,
        }
    }

    fn device_with(mode: ClimateMode, room: f64, target: f64, controls: ClimateControls, power_w: f64) -> (ClimateDevice, Arc<MockClimate>) {
        let entity = Arc::new(MockClimate::new(
            mode,
            NumericState::Number(room),
            NumericState::Number(target),
            ClimateAttributes {
                current_temperature: Some(room),
                temperature: Some(target),
                min_temp: 16.0,
                max_temp: 30.0,
            },
        ));
        let power = Arc::new(MockSensor::new(NumericState::Number(power_w)));
        let device = ClimateDevice::new("living-room-ac", 8, options(), controls, entity.clone(), power);
        (device, entity)
    }

    #[tokio::test]
    async fn startup_cool_single_increment() {
        let controls = ClimateControls {
            desired_setpoint_c: 20.0,
            desired_mode: DesiredMode::Cool,
            enable_comfort_setpoint: true,
            comfort_setpoint_c: Some(24.0),
            management_enabled: true,
        };
        let (device, _entity) = device_with(ClimateMode::Off, 26.0, 26.0, controls, 0.0);
        let incs = device.increase_increments().await;
        assert_eq!(incs.len(), 1);
        assert_eq!(
            incs[0],
            DeviceIncrement::Climate {
                delta_w: 1300.0,
                target_setpoint_c: Some(24.0),
                mode_change: Some(ClimateModeChange::Cool),
            }
        );
    }

    #[tokio::test]
    async fn running_cool_ladder_clamped_by_max_compressor_w() {
        let controls = ClimateControls {
            desired_setpoint_c: 20.0,
            desired_mode: DesiredMode::Cool,
            enable_comfort_setpoint: false,
            comfort_setpoint_c: None,
            management_enabled: true,
        };
        let (device, _entity) = device_with(ClimateMode::Cool, 26.0, 24.0, controls, 1200.0);
        let incs = device.increase_increments().await;
        let deltas: Vec<f64> = incs.iter().map(|i| i.delta_w()).collect();
        assert_eq!(deltas, vec![350.0, 700.0, 1050.0, 1300.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn entering_fan_only_arms_idle_out_timer() {
        let controls = ClimateControls {
            desired_setpoint_c: 20.0,
            desired_mode: DesiredMode::Cool,
            enable_comfort_setpoint: false,
            comfort_setpoint_c: None,
            management_enabled: true,
        };
        let (device, entity) = device_with(ClimateMode::Cool, 24.0, 22.0, controls, 500.0);
        let dec = DeviceIncrement::Climate {
            delta_w: -420.0,
            target_setpoint_c: None,
            mode_change: Some(ClimateModeChange::FanOnly),
        };
        device.decrease_consumption_by(dec).await.unwrap();

        tokio::time::advance(Duration::from_millis(60_000)).await; // mode debounce elapses
        tokio::time::advance(Duration::from_millis(600_000)).await; // fan-only idle-out elapses
        assert_eq!(entity.mode(), ClimateMode::Off);
    }
}
