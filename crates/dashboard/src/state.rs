use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use time::OffsetDateTime;

use crate::mqtt::{Actuator, TankIndex};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

/// Tank level before anything has been heard from the bus.
pub const DEFAULT_TANK_LEVEL: i64 = 50;

/// Water level before anything has been heard from the bus.
pub const DEFAULT_WATER_LEVEL: i64 = 0;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// A metric series as the backend returns it: an ordered list of sample
/// records, passed through without interpretation.
pub type Samples = Vec<serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    TempHum,
    WaterLevel,
    Illumination,
    Tds,
    LiquidTemp,
    Prediction,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::TempHum,
        Metric::WaterLevel,
        Metric::Illumination,
        Metric::Tds,
        Metric::LiquidTemp,
        Metric::Prediction,
    ];

    /// Path segment under `/dummy/status/`.
    pub fn path_key(self) -> &'static str {
        match self {
            Self::TempHum => "temp_hum",
            Self::WaterLevel => "water_level",
            Self::Illumination => "illumination",
            Self::Tds => "tds",
            Self::LiquidTemp => "liquid_temp",
            Self::Prediction => "prediction",
        }
    }
}

/// The chart data bundle. `None` means "still loading".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    #[serde(rename = "tempHumData")]
    pub temp_hum: Option<Samples>,
    #[serde(rename = "waterLevelData")]
    pub water_level: Option<Samples>,
    #[serde(rename = "illuminationData")]
    pub illumination: Option<Samples>,
    #[serde(rename = "tdsData")]
    pub tds: Option<Samples>,
    #[serde(rename = "liquidTempData")]
    pub liquid_temp: Option<Samples>,
    #[serde(rename = "predictionData")]
    pub prediction: Option<Samples>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<&Samples> {
        match metric {
            Metric::TempHum => self.temp_hum.as_ref(),
            Metric::WaterLevel => self.water_level.as_ref(),
            Metric::Illumination => self.illumination.as_ref(),
            Metric::Tds => self.tds.as_ref(),
            Metric::LiquidTemp => self.liquid_temp.as_ref(),
            Metric::Prediction => self.prediction.as_ref(),
        }
    }

    /// Replace one series in full.
    pub fn set(&mut self, metric: Metric, samples: Samples) {
        let slot = match metric {
            Metric::TempHum => &mut self.temp_hum,
            Metric::WaterLevel => &mut self.water_level,
            Metric::Illumination => &mut self.illumination,
            Metric::Tds => &mut self.tds,
            Metric::LiquidTemp => &mut self.liquid_temp,
            Metric::Prediction => &mut self.prediction,
        };
        *slot = Some(samples);
    }

    /// True once every series has arrived at least once.
    pub fn is_loaded(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_some())
    }

    pub fn loading(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.get(*m).is_none())
            .collect()
    }

    /// Most recent sample of a series.
    pub fn latest(&self, metric: Metric) -> Option<&serde_json::Value> {
        self.get(metric).and_then(|s| s.last())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorState {
    pub fan: bool,
    pub heater: bool,
    pub led_light: bool,
}

impl ActuatorState {
    pub fn get(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Heater => self.heater,
            Actuator::LedLight => self.led_light,
        }
    }

    pub fn set(&mut self, actuator: Actuator, on: bool) {
        match actuator {
            Actuator::Fan => self.fan = on,
            Actuator::Heater => self.heater = on,
            Actuator::LedLight => self.led_light = on,
        }
    }
}

/// Canonical farm state for one mounted dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmSnapshot {
    pub metrics: Metrics,
    pub actuators: ActuatorState,
    pub tank_levels: [i64; TankIndex::COUNT],
    pub water_level: i64,
}

impl Default for FarmSnapshot {
    fn default() -> Self {
        Self {
            metrics: Metrics::default(),
            actuators: ActuatorState {
                fan: false,
                heater: false,
                led_light: false,
            },
            tank_levels: [DEFAULT_TANK_LEVEL; TankIndex::COUNT],
            water_level: DEFAULT_WATER_LEVEL,
        }
    }
}

impl FarmSnapshot {
    pub fn tank_level(&self, tank: TankIndex) -> i64 {
        self.tank_levels[tank.slot()]
    }

    pub fn set_tank_level(&mut self, tank: TankIndex, value: i64) {
        self.tank_levels[tank.slot()] = value;
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize)]
pub struct FarmEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A REST series arrived.
    Poll,
    /// A bus message changed the snapshot.
    Echo,
    /// A user command was applied locally and published.
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// Live state (snapshot + connection + events)
// ---------------------------------------------------------------------------

pub struct FarmState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub snapshot: FarmSnapshot,
    pub events: VecDeque<FarmEvent>,
}

impl Default for FarmState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub loaded: bool,
    pub loading: Vec<Metric>,
    pub latest_prediction: Option<serde_json::Value>,
    pub snapshot: FarmSnapshot,
    pub events: Vec<FarmEvent>,
}

impl FarmState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            snapshot: FarmSnapshot::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(FarmEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }

    pub fn to_status(&self) -> StatusResponse {
        let metrics = &self.snapshot.metrics;
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            loaded: metrics.is_loaded(),
            loading: metrics.loading(),
            latest_prediction: metrics.latest(Metric::Prediction).cloned(),
            snapshot: self.snapshot.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
