//! In-memory entity doubles used by the test suite (and by examples).
//!
//! Each mock wraps its observed state behind a `parking_lot::RwLock` and
//! fires any callbacks registered via `on_update` synchronously whenever a
//! test calls `set(..)` to simulate an update arriving from the bridge.
//! Callbacks are plain closures capturing channel senders, never a
//! back-reference to the owning device, so there is no ownership cycle
//! between entity and device.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::numeric::NumericState;

use super::{
    BinarySensor, BinaryState, BooleanEntity, ClimateAttributes, ClimateEntity, ClimateMode,
    HumidifierAttributes, HumidifierEntity, NumberAttributes, NumberEntity, Sensor, SwitchState,
    UpdateCallback,
};

struct Observed<T: Copy> {
    value: T,
    callbacks: Vec<UpdateCallback>,
}

impl<T: Copy> Observed<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            callbacks: Vec::new(),
        }
    }
}

/// Mock binary sensor.
pub struct MockBinarySensor(RwLock<Observed<BinaryState>>);

impl MockBinarySensor {
    pub fn new(initial: BinaryState) -> Self {
        Self(RwLock::new(Observed::new(initial)))
    }

    pub fn set(&self, state: BinaryState) {
        self.0.write().value = state;
    }
}

#[async_trait]
impl BinarySensor for MockBinarySensor {
    async fn state(&self) -> BinaryState {
        self.0.read().value
    }

    fn on_update(&self, cb: UpdateCallback) {
        self.0.write().callbacks.push(cb);
    }
}

/// Mock numeric sensor (power meter, humidity probe, voltage, ...).
pub struct MockSensor(RwLock<Observed<NumericState>>);

impl MockSensor {
    pub fn new(initial: NumericState) -> Self {
        Self(RwLock::new(Observed::new(initial)))
    }

    /// Simulate a new reading arriving from the bridge, firing callbacks.
    pub fn set(&self, state: NumericState) {
        let callbacks = {
            let mut guard = self.0.write();
            guard.value = state;
            // Clone is not available for closures; borrow callbacks under
            // the lock and invoke, since mocks are single-threaded test
            // doubles and re-entrant writes from a callback are not
            // expected here.
            std::mem::take(&mut guard.callbacks)
        };
        for cb in &callbacks {
            cb(state);
        }
        self.0.write().callbacks = callbacks;
    }
}

#[async_trait]
impl Sensor for MockSensor {
    async fn state(&self) -> NumericState {
        self.0.read().value
    }

    fn on_update(&self, cb: UpdateCallback) {
        self.0.write().callbacks.push(cb);
    }
}

/// Mock commandable boolean entity.
pub struct MockBoolean(RwLock<Observed<SwitchState>>);

impl MockBoolean {
    pub fn new(initial: SwitchState) -> Self {
        Self(RwLock::new(Observed::new(initial)))
    }

    pub fn is_on(&self) -> bool {
        self.0.read().value.is_on()
    }
}

#[async_trait]
impl BooleanEntity for MockBoolean {
    async fn state(&self) -> SwitchState {
        self.0.read().value
    }

    async fn turn_on(&self) {
        self.0.write().value = SwitchState::On;
    }

    async fn turn_off(&self) {
        self.0.write().value = SwitchState::Off;
    }

    fn on_update(&self, cb: UpdateCallback) {
        self.0.write().callbacks.push(cb);
    }
}

struct NumberState {
    value: f64,
    attributes: NumberAttributes,
    callbacks: Vec<UpdateCallback>,
}

/// Mock commandable number entity.
pub struct MockNumber(RwLock<NumberState>);

impl MockNumber {
    pub fn new(initial: f64, attributes: NumberAttributes) -> Self {
        Self(RwLock::new(NumberState {
            value: initial,
            attributes,
            callbacks: Vec::new(),
        }))
    }

    pub fn value(&self) -> f64 {
        self.0.read().value
    }
}

#[async_trait]
impl NumberEntity for MockNumber {
    async fn state(&self) -> f64 {
        self.0.read().value
    }

    fn attributes(&self) -> NumberAttributes {
        self.0.read().attributes
    }

    async fn set_value(&self, value: f64) {
        let callbacks = {
            let mut guard = self.0.write();
            guard.value = value;
            std::mem::take(&mut guard.callbacks)
        };
        for cb in &callbacks {
            cb(NumericState::Number(value));
        }
        self.0.write().callbacks = callbacks;
    }

    fn on_update(&self, cb: UpdateCallback) {
        self.0.write().callbacks.push(cb);
    }
}

struct ClimateState {
    mode: ClimateMode,
    room_temperature: NumericState,
    target_temperature: NumericState,
    attributes: ClimateAttributes,
}

/// Mock climate/HVAC entity.
pub struct MockClimate(RwLock<ClimateState>);

impl MockClimate {
    pub fn new(
        mode: ClimateMode,
        room_temperature: NumericState,
        target_temperature: NumericState,
        attributes: ClimateAttributes,
    ) -> Self {
        Self(RwLock::new(ClimateState {
            mode,
            room_temperature,
            target_temperature,
            attributes,
        }))
    }

    pub fn set_room_temperature(&self, t: f64) {
        self.0.write().room_temperature = NumericState::Number(t);
    }

    pub fn mode(&self) -> ClimateMode {
        self.0.read().mode
    }

    pub fn target(&self) -> NumericState {
        self.0.read().target_temperature
    }
}

#[async_trait]
impl ClimateEntity for MockClimate {
    async fn state(&self) -> ClimateMode {
        self.0.read().mode
    }

    async fn room_temperature(&self) -> NumericState {
        self.0.read().room_temperature
    }

    async fn target_temperature(&self) -> NumericState {
        self.0.read().target_temperature
    }

    fn attributes(&self) -> ClimateAttributes {
        self.0.read().attributes
    }

    async fn set_temperature(&self, temperature: f64, hvac_mode: Option<ClimateMode>) {
        let mut guard = self.0.write();
        guard.target_temperature = NumericState::Number(temperature);
        if let Some(mode) = hvac_mode {
            guard.mode = mode;
        }
    }

    async fn set_hvac_mode(&self, mode: ClimateMode) {
        self.0.write().mode = mode;
    }

    async fn turn_off(&self) {
        self.0.write().mode = ClimateMode::Off;
    }
}

struct HumidifierState {
    state: BinaryState,
    humidity: Option<f64>,
    min_humidity: f64,
    max_humidity: f64,
    callbacks: Vec<UpdateCallback>,
}

/// Mock dehumidifier entity.
pub struct MockHumidifier(RwLock<HumidifierState>);

impl MockHumidifier {
    pub fn new(state: BinaryState, attributes: HumidifierAttributes) -> Self {
        Self(RwLock::new(HumidifierState {
            state,
            humidity: attributes.humidity,
            min_humidity: attributes.min_humidity,
            max_humidity: attributes.max_humidity,
            callbacks: Vec::new(),
        }))
    }

    pub fn is_on(&self) -> bool {
        matches!(self.0.read().state, BinaryState::On)
    }
}

#[async_trait]
impl HumidifierEntity for MockHumidifier {
    async fn state(&self) -> BinaryState {
        self.0.read().state
    }

    fn attributes(&self) -> HumidifierAttributes {
        let guard = self.0.read();
        HumidifierAttributes {
            humidity: guard.humidity,
            min_humidity: guard.min_humidity,
            max_humidity: guard.max_humidity,
        }
    }

    async fn set_humidity(&self, humidity_pct: f64) {
        self.0.write().humidity = Some(humidity_pct);
    }

    async fn turn_on(&self) {
        self.0.write().state = BinaryState::On;
    }

    async fn turn_off(&self) {
        self.0.write().state = BinaryState::Off;
    }

    fn on_update(&self, cb: UpdateCallback) {
        self.0.write().callbacks.push(cb);
    }
}
