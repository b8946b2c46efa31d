//! The single mutation point for farm state.
//!
//! Three writers land here: REST poll results, inbound bus messages, and the
//! dispatcher's optimistic updates. Each field follows last-write-wins with no
//! ordering between writers; that is the behavior the dashboard has always
//! had, races included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{PayloadError, RestError};
use crate::mqtt::{self, Actuator, Channel, ChannelTable, TankIndex};
use crate::state::{EventKind, FarmSnapshot, FarmState, Metric, Metrics, Samples};

pub type SharedState = Arc<RwLock<FarmState>>;

/// A decoded inbound message, ready to write.
#[derive(Debug, PartialEq)]
enum Update {
    Metrics(Metrics),
    Actuator(Actuator, bool),
    Tank(TankIndex, i64),
    WaterLevel(i64),
}

/// What happened to an inbound bus message.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Applied(Channel),
    /// Topic is not in the channel table.
    Unrouted,
    /// Payload did not parse; nothing changed.
    Rejected(PayloadError),
    /// Arrived after unmount; dropped.
    Detached,
}

pub struct Reconciler {
    state: SharedState,
    channels: Arc<ChannelTable>,
    mounted: AtomicBool,
}

impl Reconciler {
    pub fn new(channels: Arc<ChannelTable>) -> Self {
        Self {
            state: Arc::new(RwLock::new(FarmState::new())),
            channels,
            mounted: AtomicBool::new(true),
        }
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub async fn snapshot(&self) -> FarmSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Detach from the view. Every later poll result or bus message is
    /// discarded.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Inbound: bus
    // -----------------------------------------------------------------------

    pub async fn apply_message(&self, topic: &str, payload: &[u8]) -> Outcome {
        let Some(channel) = self.channels.resolve(topic) else {
            debug!(topic, "unrouted topic");
            return Outcome::Unrouted;
        };

        let decoded = decode(channel, payload, &self.channels);

        let mut st = self.state.write().await;
        if !self.is_mounted() {
            debug!(topic, "bus message after unmount dropped");
            return Outcome::Detached;
        }

        let update = match decoded {
            Ok(u) => u,
            Err(e) => {
                warn!(topic, %channel, error = %e, "discarding bad payload");
                st.record(EventKind::Error, format!("{channel}: {e}"));
                return Outcome::Rejected(e);
            }
        };

        let detail = match update {
            Update::Metrics(metrics) => {
                let present = Metric::ALL.len() - metrics.loading().len();
                st.snapshot.metrics = metrics;
                format!("overview replaced metrics ({present} series)")
            }
            Update::Actuator(a, on) => {
                st.snapshot.actuators.set(a, on);
                format!("{a} {}", if on { "on" } else { "off" })
            }
            Update::Tank(t, v) => {
                st.snapshot.set_tank_level(t, v);
                format!("{t}={v}")
            }
            Update::WaterLevel(v) => {
                st.snapshot.water_level = v;
                format!("waterLevel={v}")
            }
        };
        debug!(topic, %detail, "applied bus message");
        st.record(EventKind::Echo, detail);
        Outcome::Applied(channel)
    }

    pub async fn set_connected(&self, connected: bool) {
        let mut st = self.state.write().await;
        if st.mqtt_connected != connected {
            st.mqtt_connected = connected;
            let detail = if connected { "mqtt connected" } else { "mqtt disconnected" };
            st.record(EventKind::System, detail.to_string());
        }
    }

    pub async fn record_error(&self, detail: String) {
        self.state.write().await.record(EventKind::Error, detail);
    }

    // -----------------------------------------------------------------------
    // Inbound: REST
    // -----------------------------------------------------------------------

    /// Store one metric's poll result. Returns whether the snapshot changed.
    pub async fn apply_poll(&self, metric: Metric, result: Result<Samples, RestError>) -> bool {
        let samples = match result {
            Ok(s) => s,
            Err(e) => {
                if self.is_mounted() {
                    warn!(metric = metric.path_key(), error = %e, "metric fetch failed");
                    self.record_error(format!("{}: {e}", metric.path_key())).await;
                }
                return false;
            }
        };

        let mut st = self.state.write().await;
        if !self.is_mounted() {
            debug!(metric = metric.path_key(), "poll result after unmount dropped");
            return false;
        }
        let n = samples.len();
        st.snapshot.metrics.set(metric, samples);
        st.record(EventKind::Poll, format!("{} ({n} samples)", metric.path_key()));
        true
    }

    // -----------------------------------------------------------------------
    // Optimistic writes (dispatcher)
    // -----------------------------------------------------------------------

    /// Negate the local state of an actuator and return the new value.
    /// `None` once unmounted.
    pub(crate) async fn toggle_actuator(&self, actuator: Actuator) -> Option<bool> {
        let mut st = self.state.write().await;
        if !self.is_mounted() {
            return None;
        }
        let on = !st.snapshot.actuators.get(actuator);
        st.snapshot.actuators.set(actuator, on);
        st.record(
            EventKind::Command,
            format!("{actuator} -> {}", if on { "on" } else { "off" }),
        );
        Some(on)
    }

    /// Returns false once unmounted.
    pub(crate) async fn write_tank_level(&self, tank: TankIndex, value: i64) -> bool {
        let mut st = self.state.write().await;
        if !self.is_mounted() {
            return false;
        }
        st.snapshot.set_tank_level(tank, value);
        st.record(EventKind::Command, format!("{tank} -> {value}"));
        true
    }

    pub(crate) async fn write_water_level(&self, value: i64) -> bool {
        let mut st = self.state.write().await;
        if !self.is_mounted() {
            return false;
        }
        st.snapshot.water_level = value;
        st.record(EventKind::Command, format!("waterLevel -> {value}"));
        true
    }
}

fn decode(channel: Channel, payload: &[u8], table: &ChannelTable) -> Result<Update, PayloadError> {
    Ok(match channel {
        Channel::Overview => Update::Metrics(mqtt::parse_overview(payload)?),
        Channel::Actuator(a) => Update::Actuator(a, table.encoding().decode(payload)?),
        Channel::Tank(t) => Update::Tank(t, mqtt::parse_level(payload)?),
        Channel::WaterLevel => Update::WaterLevel(mqtt::parse_level(payload)?),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
