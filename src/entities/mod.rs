//! Typed, read-only/write-only views over external home-automation entities.
//!
//! These traits are the entire surface the core depends on from its host.
//! Implementations talking to a real bridge (HTTP/WebSocket to a home
//! automation hub) are an external collaborator and out of scope for this
//! crate; [`mock`] provides the in-memory doubles used by the test suite.

pub mod mock;

use async_trait::async_trait;

use crate::numeric::NumericState;

/// `on|off|absent` read from a binary sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    On,
    Off,
    Absent,
}

impl BinaryState {
    pub fn is_on(self) -> bool {
        matches!(self, BinaryState::On)
    }
}

/// `on|off` read from a switch/light/fan/input_boolean entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }
}

/// Observed HVAC mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimateMode {
    Off,
    Heat,
    Cool,
    FanOnly,
    Dry,
    HeatCool,
}

/// A callback registered via `on_update`; receives the entity's new reading.
pub type UpdateCallback = Box<dyn Fn(NumericState) + Send + Sync>;

/// A read-only binary (on/off/absent) sensor.
#[async_trait]
pub trait BinarySensor: Send + Sync {
    async fn state(&self) -> BinaryState;
    fn on_update(&self, cb: UpdateCallback);
}

/// A read-only numeric sensor (power meter, humidity, voltage, ...).
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn state(&self) -> NumericState;
    fn on_update(&self, cb: UpdateCallback);
}

/// A commandable on/off entity (switch, light, fan, input_boolean).
#[async_trait]
pub trait BooleanEntity: Send + Sync {
    async fn state(&self) -> SwitchState;
    async fn turn_on(&self);
    async fn turn_off(&self);
    fn on_update(&self, cb: UpdateCallback);
}

/// Attributes exposed by a `number` entity.
#[derive(Debug, Clone, Copy)]
pub struct NumberAttributes {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

/// A commandable numeric entity (e.g. an EV charger's current-setting input).
#[async_trait]
pub trait NumberEntity: Send + Sync {
    async fn state(&self) -> f64;
    fn attributes(&self) -> NumberAttributes;
    async fn set_value(&self, value: f64);
    fn on_update(&self, cb: UpdateCallback);
}

/// Attributes exposed by a `climate` entity.
#[derive(Debug, Clone, Copy)]
pub struct ClimateAttributes {
    pub current_temperature: Option<f64>,
    pub temperature: Option<f64>,
    pub min_temp: f64,
    pub max_temp: f64,
}

/// A thermostat/HVAC entity.
#[async_trait]
pub trait ClimateEntity: Send + Sync {
    async fn state(&self) -> ClimateMode;
    async fn room_temperature(&self) -> NumericState;
    async fn target_temperature(&self) -> NumericState;
    fn attributes(&self) -> ClimateAttributes;
    async fn set_temperature(&self, temperature: f64, hvac_mode: Option<ClimateMode>);
    async fn set_hvac_mode(&self, mode: ClimateMode);
    async fn turn_off(&self);
}

/// Attributes exposed by a `humidifier` entity (here, a dehumidifier).
#[derive(Debug, Clone, Copy)]
pub struct HumidifierAttributes {
    /// Current target humidity setpoint (`%`), as last commanded.
    pub humidity: Option<f64>,
    pub min_humidity: f64,
    pub max_humidity: f64,
}

/// A dehumidifier entity.
#[async_trait]
pub trait HumidifierEntity: Send + Sync {
    async fn state(&self) -> BinaryState;
    fn attributes(&self) -> HumidifierAttributes;
    async fn set_humidity(&self, humidity_pct: f64);
    async fn turn_on(&self);
    async fn turn_off(&self);
    fn on_update(&self, cb: UpdateCallback);
}
