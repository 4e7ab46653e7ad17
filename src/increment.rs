//! The cross-device increment model.
//!
//! The load manager keeps one flat list of devices whose increment payloads
//! differ per device class, so increments are modeled as a single tagged
//! enum rather than a trait object per class. Each device's
//! `increase_increments`/`decrease_increments` narrows to the variant that
//! matches its own class; a mutator only ever accepts that same variant.

use crate::error::{Error, Result};
use crate::transition::TransitionState;

/// What a boolean device's single increment does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanAction {
    TurnOn,
    TurnOff,
}

/// The mode a climate increment would switch to, when it changes mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateModeChange {
    Heat,
    Cool,
    FanOnly,
}

/// One candidate actuation a device could take this tick, together with its
/// estimated watt delta (positive = increase, negative = decrease).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceIncrement {
    Boolean {
        delta_w: f64,
        action: BooleanAction,
    },
    DirectConsumption {
        delta_w: f64,
        target_current_a: f64,
        enable: bool,
    },
    Climate {
        delta_w: f64,
        target_setpoint_c: Option<f64>,
        mode_change: Option<ClimateModeChange>,
    },
    Dehumidifier {
        delta_w: f64,
        target_humidity_pct: f64,
    },
}

impl DeviceIncrement {
    pub fn delta_w(&self) -> f64 {
        match self {
            DeviceIncrement::Boolean { delta_w, .. } => *delta_w,
            DeviceIncrement::DirectConsumption { delta_w, .. } => *delta_w,
            DeviceIncrement::Climate { delta_w, .. } => *delta_w,
            DeviceIncrement::Dehumidifier { delta_w, .. } => *delta_w,
        }
    }
}

/// What the shared validation helper decided should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Idle, and the increment is legitimate: the mutator should proceed.
    Proceed,
    /// Debouncing: the mutator should return without acting or erroring.
    SilentNoOp,
}

/// Shared validation helper used by every device's mutator.
///
/// Asserts, in order: no in-flight pending change (debounce is a silent
/// no-op, an active pending change is a domain error), then that `candidate`
/// is value-equal to one of the increments the device is currently offering.
pub fn validate_increment(
    device_name: &str,
    state: TransitionState,
    offered: &[DeviceIncrement],
    candidate: &DeviceIncrement,
) -> Result<ValidationOutcome> {
    match state {
        TransitionState::Debounce => return Ok(ValidationOutcome::SilentNoOp),
        TransitionState::IncreasePending { .. } | TransitionState::DecreasePending { .. } => {
            return Err(Error::PendingChangeInProgress {
                device: device_name.to_string(),
            });
        }
        TransitionState::Idle => {}
    }

    if offered.iter().any(|o| o == candidate) {
        Ok(ValidationOutcome::Proceed)
    } else {
        Err(Error::UnknownIncrement {
            device: device_name.to_string(),
            increment: *candidate,
        })
    }
}

/// Filter a freshly-generated increment list down to unique deltas, keeping
/// the first occurrence — the order generators emit candidates in is the
/// order callers see.
pub fn dedup_by_delta(increments: Vec<DeviceIncrement>) -> Vec<DeviceIncrement> {
    let mut seen: Vec<f64> = Vec::with_capacity(increments.len());
    let mut out = Vec::with_capacity(increments.len());
    for inc in increments {
        let delta = inc.delta_w();
        if delta == 0.0 || seen.contains(&delta) {
            continue;
        }
        seen.push(delta);
        out.push(inc);
    }
    out
}

/// Pick the increment with the largest `|delta_w|` that still fits within
/// `budget_w` (non-negative). Used by the load manager's shed/add policies:
/// each device contributes at most one action per tick.
pub fn pick_largest_within_budget(
    offered: &[DeviceIncrement],
    budget_w: f64,
) -> Option<&DeviceIncrement> {
    offered
        .iter()
        .filter(|inc| inc.delta_w().abs() <= budget_w)
        .max_by(|a, b| a.delta_w().abs().total_cmp(&b.delta_w().abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_drops_zero_and_repeated_deltas() {
        let incs = vec![
            DeviceIncrement::Dehumidifier { delta_w: 500.0, target_humidity_pct: 55.0 },
            DeviceIncrement::Dehumidifier { delta_w: 0.0, target_humidity_pct: 56.0 },
            DeviceIncrement::Dehumidifier { delta_w: 500.0, target_humidity_pct: 57.0 },
            DeviceIncrement::Dehumidifier { delta_w: 300.0, target_humidity_pct: 58.0 },
        ];
        let out = dedup_by_delta(incs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].delta_w(), 500.0);
        assert_eq!(out[1].delta_w(), 300.0);
    }

    #[test]
    fn picks_largest_fitting_increment() {
        let incs = vec![
            DeviceIncrement::Boolean { delta_w: -200.0, action: BooleanAction::TurnOff },
            DeviceIncrement::Boolean { delta_w: -900.0, action: BooleanAction::TurnOff },
            DeviceIncrement::Boolean { delta_w: -500.0, action: BooleanAction::TurnOff },
        ];
        let picked = pick_largest_within_budget(&incs, 750.0).unwrap();
        assert_eq!(picked.delta_w(), -500.0);
    }

    #[test]
    fn validation_rejects_unknown_increment() {
        let offered = vec![DeviceIncrement::Boolean { delta_w: 50.0, action: BooleanAction::TurnOn }];
        let candidate = DeviceIncrement::Boolean { delta_w: 60.0, action: BooleanAction::TurnOn };
        let outcome = validate_increment("heater", TransitionState::Idle, &offered, &candidate);
        assert!(matches!(outcome, Err(Error::UnknownIncrement { .. })));
    }

    #[test]
    fn validation_rejects_while_pending() {
        let offered = vec![DeviceIncrement::Boolean { delta_w: 50.0, action: BooleanAction::TurnOn }];
        let candidate = offered[0];
        let state = TransitionState::IncreasePending { expected_future_consumption_w: 50.0 };
        let outcome = validate_increment("heater", state, &offered, &candidate);
        assert!(matches!(outcome, Err(Error::PendingChangeInProgress { .. })));
    }

    #[test]
    fn validation_is_silent_no_op_while_debouncing() {
        let offered = vec![DeviceIncrement::Boolean { delta_w: 50.0, action: BooleanAction::TurnOn }];
        let candidate = offered[0];
        let outcome = validate_increment("heater", TransitionState::Debounce, &offered, &candidate).unwrap();
        assert_eq!(outcome, ValidationOutcome::SilentNoOp);
    }
}
