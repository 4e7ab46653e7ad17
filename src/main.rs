//! Process entrypoint.
//!
//! No CLI, no wire protocol: the controller runs as an in-host service,
//! configured entirely from a project directory (`manager.toml` plus
//! `devices/*.toml`) read once at start-up. A real deployment wires the
//! device/grid entities to a home-automation bridge; that adapter is an
//! external collaborator outside this crate's scope, so this binary wires
//! them to the in-memory entity doubles instead, seeded from each device's
//! starting control values — enough to demonstrate the manager actually
//! running its tick loop end to end.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use load_manager::config::{self, DeviceConfig};
use load_manager::device::boolean::BooleanDevice;
use load_manager::device::climate::ClimateDevice;
use load_manager::device::dehumidifier::DehumidifierDevice;
use load_manager::device::direct_consumption::DirectConsumptionDevice;
use load_manager::device::Device;
use load_manager::entities::mock::{
    MockBinarySensor, MockBoolean, MockClimate, MockHumidifier, MockNumber, MockSensor,
};
use load_manager::entities::{
    BinaryState, ClimateAttributes, ClimateMode, HumidifierAttributes, NumberAttributes,
    SwitchState,
};
use load_manager::numeric::NumericState;
use load_manager::service;
use load_manager::{DeviceLoadManager, Error, Result};

fn project_dir() -> PathBuf {
    env::var_os("LOAD_MANAGER_PROJECT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./project"))
}

fn build_device(config: DeviceConfig) -> Result<Arc<dyn Device>> {
    let device: Arc<dyn Device> = match config {
        DeviceConfig::Boolean(cfg) => Arc::new(BooleanDevice::new(
            cfg.name.clone(),
            cfg.priority,
            cfg.options(),
            cfg.controls(),
            Arc::new(MockBoolean::new(SwitchState::Off)),
            Arc::new(MockSensor::new(NumericState::Number(0.0))),
        )),
        DeviceConfig::DirectConsumption(cfg) => Arc::new(DirectConsumptionDevice::new(
            cfg.name.clone(),
            cfg.priority,
            cfg.options(),
            cfg.controls(),
            Arc::new(MockNumber::new(
                0.0,
                NumberAttributes {
                    min: Some(0.0),
                    max: Some(cfg.max_current_a),
                    step: Some(cfg.current_step_a),
                },
            )),
            Arc::new(MockSensor::new(NumericState::Number(0.0))),
            Arc::new(MockSensor::new(NumericState::Absent)),
            Arc::new(MockBoolean::new(SwitchState::Off)),
            Arc::new(MockBinarySensor::new(BinaryState::On)),
        )),
        DeviceConfig::Climate(cfg) => {
            let controls = cfg.controls()?;
            Arc::new(ClimateDevice::new(
                cfg.name.clone(),
                cfg.priority,
                cfg.options(),
                controls,
                Arc::new(MockClimate::new(
                    ClimateMode::Off,
                    NumericState::Number(cfg.desired_setpoint_c),
                    NumericState::Absent,
                    ClimateAttributes {
                        current_temperature: Some(cfg.desired_setpoint_c),
                        temperature: None,
                        min_temp: cfg.min_setpoint_c,
                        max_temp: cfg.max_setpoint_c,
                    },
                )),
                Arc::new(MockSensor::new(NumericState::Number(0.0))),
            ))
        }
        DeviceConfig::Dehumidifier(cfg) => Arc::new(DehumidifierDevice::new(
            cfg.name.clone(),
            cfg.priority,
            cfg.options(),
            cfg.controls(),
            Arc::new(MockHumidifier::new(
                BinaryState::Off,
                HumidifierAttributes {
                    humidity: Some(cfg.desired_setpoint_pct),
                    min_humidity: cfg.min_setpoint_pct,
                    max_humidity: cfg.max_setpoint_pct,
                },
            )),
            Arc::new(MockSensor::new(NumericState::Number(cfg.desired_setpoint_pct))),
            Arc::new(MockSensor::new(NumericState::Number(0.0))),
        )),
    };
    Ok(device)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("load_manager=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let project = project_dir();
    tracing::info!(project = %project.display(), "loading configuration");

    let manifest = config::ManagerManifest::load(project.join("manager.toml")).await?;
    let device_configs = config::load_devices_dir(&project).await?;
    if device_configs.is_empty() {
        return Err(Error::Config(format!(
            "no device configs found under {}",
            project.join("devices").display()
        )));
    }

    let devices = device_configs
        .into_iter()
        .map(build_device)
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(count = devices.len(), "devices loaded");

    let grid_sensor = Arc::new(MockSensor::new(NumericState::Number(manifest.desired_grid_w)));

    let manager = Arc::new(DeviceLoadManager::new(
        devices,
        grid_sensor,
        manifest.desired_grid_w,
        manifest.max_before_shed_w,
        manifest.min_before_add_w,
    )?);

    let (handle, join) = service::spawn(manager, Duration::from_secs(manifest.tick_interval_secs));

    tokio::signal::ctrl_c().await.map_err(Error::Io)?;
    tracing::info!("shutdown signal received");
    handle.shutdown();
    let _ = join.await;

    Ok(())
}
