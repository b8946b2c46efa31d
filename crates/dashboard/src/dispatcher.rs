//! User commands: apply locally first, then publish. No acknowledgement is
//! awaited; if the publish fails the optimistic state stays as it is.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::mqtt::{Actuator, Channel, TankIndex};
use crate::reconciler::Reconciler;

/// Clamp a requested level into [0, 100]. Anything at or above 100 is 100.
pub fn clamp_percent(value: i64) -> i64 {
    if value < 0 {
        0
    } else if value >= 100 {
        100
    } else {
        value
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    bus: Arc<dyn Bus>,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>, bus: Arc<dyn Bus>) -> Self {
        Self { reconciler, bus }
    }

    pub async fn toggle_fan(&self) -> bool {
        self.toggle(Actuator::Fan).await
    }

    pub async fn toggle_heater(&self) -> bool {
        self.toggle(Actuator::Heater).await
    }

    pub async fn toggle_led_light(&self) -> bool {
        self.toggle(Actuator::LedLight).await
    }

    /// Flip an actuator based on the local state only, and announce it.
    /// After unmount nothing changes or goes out, and the stored value is
    /// returned.
    pub async fn toggle(&self, actuator: Actuator) -> bool {
        let Some(on) = self.reconciler.toggle_actuator(actuator).await else {
            debug!(%actuator, "toggle after unmount ignored");
            return self.reconciler.snapshot().await.actuators.get(actuator);
        };
        info!(%actuator, on, "toggle");
        let payload = self.reconciler.channels().encoding().encode(on);
        self.publish(Channel::Actuator(actuator), payload).await;
        on
    }

    /// Returns the value actually stored and published.
    pub async fn set_tank_level(&self, tank: TankIndex, value: i64) -> i64 {
        let level = clamp_percent(value);
        if !self.reconciler.write_tank_level(tank, level).await {
            debug!(%tank, "tank level after unmount ignored");
            return self.reconciler.snapshot().await.tank_level(tank);
        }
        info!(%tank, requested = value, level, "set tank level");
        self.publish(Channel::Tank(tank), level.to_string().into_bytes())
            .await;
        level
    }

    /// Returns the value actually stored and published.
    pub async fn set_water_level(&self, value: i64) -> i64 {
        let level = clamp_percent(value);
        if !self.reconciler.write_water_level(level).await {
            debug!("water level after unmount ignored");
            return self.reconciler.snapshot().await.water_level;
        }
        info!(requested = value, level, "set water level");
        self.publish(Channel::WaterLevel, level.to_string().into_bytes())
            .await;
        level
    }

    async fn publish(&self, channel: Channel, payload: Vec<u8>) {
        let topic = self.reconciler.channels().topic(channel);
        if let Err(e) = self.bus.publish(topic, payload) {
            warn!(topic, error = %e, "publish failed, local state kept");
            self.reconciler
                .record_error(format!("publish {channel}: {e}"))
                .await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
