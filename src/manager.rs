//! DeviceLoadManager: the periodic bang-bang arbitration loop.

use std::sync::Arc;

use async_trait::async_trait;

use crate::device::{ChangeState, Device};
use crate::entities::Sensor;
use crate::error::{Error, Result};
use crate::increment::pick_largest_within_budget;
use crate::service::Service;
use crate::transition::PendingKind;

pub struct DeviceLoadManager {
    devices: Vec<Arc<dyn Device>>,
    grid_sensor: Arc<dyn Sensor>,
    desired_grid_w: f64,
    max_before_shed_w: f64,
    min_before_add_w: f64,
}

impl DeviceLoadManager {
    pub fn new(
        devices: Vec<Arc<dyn Device>>,
        grid_sensor: Arc<dyn Sensor>,
        desired_grid_w: f64,
        max_before_shed_w: f64,
        min_before_add_w: f64,
    ) -> Result<Self> {
        if !(min_before_add_w < desired_grid_w && desired_grid_w < max_before_shed_w) {
            return Err(Error::Config(format!(
                "load manager thresholds must satisfy min < desired < max (min={min_before_add_w}, desired={desired_grid_w}, max={max_before_shed_w})"
            )));
        }
        Ok(Self {
            devices,
            grid_sensor,
            desired_grid_w,
            max_before_shed_w,
            min_before_add_w,
        })
    }

    pub async fn tick(&self) {
        let grid = self.grid_sensor.state().await;
        let Some(grid_w) = grid.value() else {
            tracing::warn!("grid consumption reading is absent; skipping tick");
            return;
        };

        if grid_w > self.max_before_shed_w {
            let excess = grid_w - self.desired_grid_w;
            self.shed(excess).await;
        } else if grid_w < self.min_before_add_w {
            let surplus = self.desired_grid_w - grid_w;
            self.add(surplus).await;
        }
    }

    async fn shed(&self, excess_w: f64) {
        let mut budget = excess_w;
        let mut ordered: Vec<&Arc<dyn Device>> = self.devices.iter().collect();
        // Descending priority: higher value sheds first. Stable sort keeps
        // same-priority devices in list order.
        ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));

        for device in ordered {
            if budget <= 0.0 {
                break;
            }
            if !device.management_enabled() || !device.change_state().is_actionable() {
                continue;
            }
            let offered = device.decrease_increments().await;
            let Some(&picked) = pick_largest_within_budget(&offered, budget) else {
                continue;
            };
            match device.decrease_consumption_by(picked).await {
                Ok(()) => budget -= picked.delta_w().abs(),
                Err(err) => tracing::error!(device = device.name(), error = %err, "shed mutator failed"),
            }
        }

        if budget > 0.0 {
            tracing::warn!(remaining_w = budget, "shed budget not fully covered this tick");
        }
    }

    async fn add(&self, surplus_w: f64) {
        let mut budget = surplus_w;

        // Pre-pass: a device with a pending increase is already going to
        // draw more; don't double-count the load it's about to add.
        for device in &self.devices {
            if let ChangeState::Pending {
                kind: PendingKind::Increase,
                expected_future_w,
            } = device.change_state()
            {
                let current = device.current_consumption_w().await;
                budget -= expected_future_w - current;
            }
        }

        let mut ordered: Vec<&Arc<dyn Device>> = self.devices.iter().collect();
        // Ascending priority: lower value is filled first.
        ordered.sort_by(|a, b| a.priority().cmp(&b.priority()));

        for device in ordered {
            if budget <= 0.0 {
                break;
            }
            if !device.management_enabled() || !device.change_state().is_actionable() {
                continue;
            }
            let offered = device.increase_increments().await;
            let Some(&picked) = pick_largest_within_budget(&offered, budget) else {
                continue;
            };
            match device.increase_consumption_by(picked).await {
                Ok(()) => budget -= picked.delta_w(),
                Err(err) => tracing::error!(device = device.name(), error = %err, "add mutator failed"),
            }
        }
    }

    pub async fn stop(&self) {
        for device in &self.devices {
            device.stop().await;
        }
    }
}

#[async_trait]
impl Service for DeviceLoadManager {
    async fn on_tick(&self) {
        self.tick().await;
    }

    async fn on_stop(&self) {
        self.stop().await;
    }
}
