//! Typed configuration documents: one manifest for the manager's
//! thresholds, plus one document per managed device, loaded from TOML at
//! start-up.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::device::boolean::{BooleanControls, BooleanOptions};
use crate::device::climate::{ClimateControls, ClimateOptions, DesiredMode};
use crate::device::dehumidifier::{DehumidifierControls, DehumidifierOptions};
use crate::device::direct_consumption::{DirectConsumptionControls, DirectConsumptionOptions};
use crate::error::{Error, Result};

async fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&raw)?)
}

fn default_management_enabled() -> bool {
    true
}

/// The manager's own three thresholds, loaded from a single manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerManifest {
    pub desired_grid_w: f64,
    pub max_before_shed_w: f64,
    pub min_before_add_w: f64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    5
}

impl ManagerManifest {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let manifest: Self = read_toml(path.as_ref()).await?;
        if !(manifest.min_before_add_w < manifest.desired_grid_w
            && manifest.desired_grid_w < manifest.max_before_shed_w)
        {
            return Err(Error::Config(format!(
                "manager thresholds must satisfy min < desired < max (min={}, desired={}, max={})",
                manifest.min_before_add_w, manifest.desired_grid_w, manifest.max_before_shed_w
            )));
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BooleanDeviceConfig {
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_management_enabled")]
    pub management_enabled: bool,
    pub expected_consumption_w: f64,
    pub change_transition_ms: u64,
    pub turn_off_debounce_ms: u64,
    pub turn_on_debounce_ms: u64,
}

impl BooleanDeviceConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_toml(path.as_ref()).await
    }

    pub fn options(&self) -> BooleanOptions {
        BooleanOptions {
            expected_consumption_w: self.expected_consumption_w,
            change_transition_ms: self.change_transition_ms,
            turn_off_debounce_ms: self.turn_off_debounce_ms,
            turn_on_debounce_ms: self.turn_on_debounce_ms,
        }
    }

    pub fn controls(&self) -> BooleanControls {
        BooleanControls {
            management_enabled: self.management_enabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectConsumptionDeviceConfig {
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_management_enabled")]
    pub management_enabled: bool,
    pub starting_min_current_a: f64,
    pub max_current_a: f64,
    pub current_step_a: f64,
    pub change_transition_ms: u64,
    pub debounce_ms: u64,
    pub stopping_threshold_a: f64,
    pub stopping_timeout_ms: u64,
}

impl DirectConsumptionDeviceConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_toml(path.as_ref()).await
    }

    pub fn options(&self) -> DirectConsumptionOptions {
        DirectConsumptionOptions {
            starting_min_current_a: self.starting_min_current_a,
            max_current_a: self.max_current_a,
            current_step_a: self.current_step_a,
            change_transition_ms: self.change_transition_ms,
            debounce_ms: self.debounce_ms,
            stopping_threshold_a: self.stopping_threshold_a,
            stopping_timeout_ms: self.stopping_timeout_ms,
        }
    }

    pub fn controls(&self) -> DirectConsumptionControls {
        DirectConsumptionControls {
            management_enabled: self.management_enabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClimateDeviceConfig {
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_management_enabled")]
    pub management_enabled: bool,

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

    pub desired_setpoint_c: f64,
    /// Raw `desired_mode` string, validated against `{heat, cool, off}` at
    /// load time: a `ClimateDevice` can never observe an invalid mode,
    /// because `DesiredMode` has no variant to construct one into.
    pub desired_mode: String,
    #[serde(default)]
    pub enable_comfort_setpoint: bool,
    #[serde(default)]
    pub comfort_setpoint_c: Option<f64>,
}

impl ClimateDeviceConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_toml(path.as_ref()).await
    }

    pub fn options(&self) -> ClimateOptions {
        ClimateOptions {
            min_setpoint_c: self.min_setpoint_c,
            max_setpoint_c: self.max_setpoint_c,
            setpoint_step_c: self.setpoint_step_c,
            compressor_startup_min_w: self.compressor_startup_min_w,
            power_on_setpoint_offset_c: self.power_on_setpoint_offset_c,
            consumption_per_degree_w: self.consumption_per_degree_w,
            max_compressor_w: self.max_compressor_w,
            fan_only_min_w: self.fan_only_min_w,
            heat_cool_min_w: self.heat_cool_min_w,
            setpoint_change_transition_ms: self.setpoint_change_transition_ms,
            setpoint_debounce_ms: self.setpoint_debounce_ms,
            mode_change_transition_ms: self.mode_change_transition_ms,
            mode_debounce_ms: self.mode_debounce_ms,
            startup_transition_ms: self.startup_transition_ms,
            startup_debounce_ms: self.startup_debounce_ms,
            fan_only_timeout_ms: self.fan_only_timeout_ms,
        }
    }

    fn desired_mode(&self) -> Result<DesiredMode> {
        match self.desired_mode.to_ascii_lowercase().as_str() {
            "heat" => Ok(DesiredMode::Heat),
            "cool" => Ok(DesiredMode::Cool),
            "off" => Ok(DesiredMode::Off),
            other => Err(Error::Config(format!(
                "device {}: desired_mode must be one of heat, cool, off (got {other:?})",
                self.name
            ))),
        }
    }

    pub fn controls(&self) -> Result<ClimateControls> {
        Ok(ClimateControls {
            desired_setpoint_c: self.desired_setpoint_c,
            desired_mode: self.desired_mode()?,
            enable_comfort_setpoint: self.enable_comfort_setpoint,
            comfort_setpoint_c: self.comfort_setpoint_c,
            management_enabled: self.management_enabled,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DehumidifierDeviceConfig {
    pub name: String,
    pub priority: i32,
    #[serde(default = "default_management_enabled")]
    pub management_enabled: bool,

    pub min_setpoint_pct: f64,
    pub max_setpoint_pct: f64,
    pub setpoint_step_pct: f64,
    pub expected_dehumidifying_w: f64,
    pub expected_fan_only_w: f64,
    pub fan_only_timeout_ms: u64,
    pub setpoint_change_transition_ms: u64,
    pub setpoint_debounce_ms: u64,

    pub desired_setpoint_pct: f64,
    #[serde(default)]
    pub enable_comfort_setpoint: bool,
    #[serde(default)]
    pub comfort_setpoint_pct: Option<f64>,
}

impl DehumidifierDeviceConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_toml(path.as_ref()).await
    }

    pub fn options(&self) -> DehumidifierOptions {
        DehumidifierOptions {
            min_setpoint_pct: self.min_setpoint_pct,
            max_setpoint_pct: self.max_setpoint_pct,
            setpoint_step_pct: self.setpoint_step_pct,
            expected_dehumidifying_w: self.expected_dehumidifying_w,
            expected_fan_only_w: self.expected_fan_only_w,
            fan_only_timeout_ms: self.fan_only_timeout_ms,
            setpoint_change_transition_ms: self.setpoint_change_transition_ms,
            setpoint_debounce_ms: self.setpoint_debounce_ms,
        }
    }

    pub fn controls(&self) -> DehumidifierControls {
        DehumidifierControls {
            desired_setpoint_pct: self.desired_setpoint_pct,
            enable_comfort_setpoint: self.enable_comfort_setpoint,
            comfort_setpoint_pct: self.comfort_setpoint_pct,
            management_enabled: self.management_enabled,
        }
    }
}

/// One entry under a project's `devices/` directory, discriminated by a
/// `type` field the way the reference stack's `.device.toml` documents are.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfig {
    Boolean(BooleanDeviceConfig),
    DirectConsumption(DirectConsumptionDeviceConfig),
    Climate(ClimateDeviceConfig),
    Dehumidifier(DehumidifierDeviceConfig),
}

impl DeviceConfig {
    pub fn name(&self) -> &str {
        match self {
            DeviceConfig::Boolean(c) => &c.name,
            DeviceConfig::DirectConsumption(c) => &c.name,
            DeviceConfig::Climate(c) => &c.name,
            DeviceConfig::Dehumidifier(c) => &c.name,
        }
    }
}

/// Scan `project_dir/devices/*.toml`, skipping and warning on any file that
/// fails to parse rather than aborting the whole load.
pub async fn load_devices_dir(project_dir: impl AsRef<Path>) -> Result<Vec<DeviceConfig>> {
    let devices_dir = project_dir.as_ref().join("devices");
    let mut out = Vec::new();

    let mut entries = match tokio::fs::read_dir(&devices_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %devices_dir.display(), "no devices directory found");
            return Ok(out);
        }
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match read_toml::<DeviceConfig>(&path).await {
            Ok(cfg) => {
                debug!(device = cfg.name(), path = %path.display(), "loaded device config");
                out.push(cfg);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to load device config"),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_desired_mode_string() {
        let cfg = ClimateDeviceConfig {
            name: "living-room-ac".into(),
            priority: 1,
            management_enabled: true,
            min_setpoint_c: 16.0,
            max_setpoint_c: 30.0,
            setpoint_step_c: 0.5,
            compressor_startup_min_w: 300.0,
            power_on_setpoint_offset_c: 1.0,
            consumption_per_degree_w: 150.0,
            max_compressor_w: 2000.0,
            fan_only_min_w: 50.0,
            heat_cool_min_w: 200.0,
            setpoint_change_transition_ms: 1_000,
            setpoint_debounce_ms: 5_000,
            mode_change_transition_ms: 2_000,
            mode_debounce_ms: 10_000,
            startup_transition_ms: 3_000,
            startup_debounce_ms: 15_000,
            fan_only_timeout_ms: 600_000,
            desired_setpoint_c: 24.0,
            desired_mode: "freezing".into(),
            enable_comfort_setpoint: false,
            comfort_setpoint_c: None,
        };
        assert!(matches!(cfg.controls(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn manager_manifest_rejects_out_of_order_thresholds() {
        let dir = std::env::temp_dir().join(format!("lm-config-test-{:?}", std::thread::current().id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("manager.toml");
        tokio::fs::write(&path, "desired_grid_w = 100\nmax_before_shed_w = 50\nmin_before_add_w = 10\n")
            .await
            .unwrap();

        let result = ManagerManifest::load(&path).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
