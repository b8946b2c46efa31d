//! TOML config file loading, environment overrides, and validation of the
//! REST endpoint, broker connection, and channel table.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::mqtt::{Actuator, ActuatorEncoding, Channel, ChannelTable, Preset, TankIndex};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rest: RestConfig,
    pub mqtt: MqttConfig,
    pub channels: ChannelsConfig,
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub base_url: String,
    /// 0 polls once at mount and never again.
    pub poll_interval_sec: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1".to_string(),
            poll_interval_sec: 0,
        }
    }
}

impl RestConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_sec > 0).then(|| Duration::from_secs(self.poll_interval_sec))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Mqtt,
    Ws,
    Wss,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Some(Self::Mqtt),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Only used for `ws` / `wss`.
    pub ws_path: String,
    pub client_id: String,
    pub keep_alive_sec: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            protocol: Protocol::Mqtt,
            ws_path: "/mqtt".to_string(),
            client_id: "farm-dashboard".to_string(),
            keep_alive_sec: 30,
        }
    }
}

/// Channel names: a preset plus optional per-channel overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub preset: Preset,
    pub encoding: Option<ActuatorEncoding>,
    pub overview: Option<String>,
    pub fan: Option<String>,
    pub heater: Option<String>,
    pub led_light: Option<String>,
    pub tanks: Option<Vec<String>>,
    pub water_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

// ---------------------------------------------------------------------------
// Channel table resolution
// ---------------------------------------------------------------------------

impl ChannelsConfig {
    /// Topic per channel after overrides. Tank overrides are ignored unless
    /// there are exactly four of them; `validate` reports that case.
    fn resolved_topics(&self) -> Vec<(Channel, String)> {
        let base = ChannelTable::preset(self.preset);
        base.channels()
            .map(|c| {
                let over = match c {
                    Channel::Overview => self.overview.clone(),
                    Channel::Actuator(Actuator::Fan) => self.fan.clone(),
                    Channel::Actuator(Actuator::Heater) => self.heater.clone(),
                    Channel::Actuator(Actuator::LedLight) => self.led_light.clone(),
                    Channel::Tank(t) => self
                        .tanks
                        .as_ref()
                        .filter(|v| v.len() == TankIndex::COUNT)
                        .map(|v| v[t.get() as usize - 1].clone()),
                    Channel::WaterLevel => self.water_level.clone(),
                };
                (c, over.unwrap_or_else(|| base.topic(c).to_string()))
            })
            .collect()
    }

    pub fn table(&self) -> ChannelTable {
        let base = ChannelTable::preset(self.preset);
        let topics: HashMap<Channel, String> = self.resolved_topics().into_iter().collect();
        let topic = |c: Channel| topics.get(&c).cloned().unwrap_or_default();
        ChannelTable::new(
            topic(Channel::Overview),
            Actuator::ALL.map(|a| topic(Channel::Actuator(a))),
            [1, 2, 3, 4].map(|n| {
                TankIndex::new(n)
                    .map(|t| topic(Channel::Tank(t)))
                    .unwrap_or_default()
            }),
            topic(Channel::WaterLevel),
            self.encoding.unwrap_or(base.encoding()),
        )
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_rest(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_channels(&mut errors);

        if self.web.port == 0 {
            errors.push("web.port must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_rest(&self, errors: &mut Vec<String>) {
        let url = self.rest.base_url.trim();
        if url.is_empty() {
            errors.push("rest.base_url is empty".to_string());
        } else if url.contains("://") && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            errors.push(format!("rest.base_url '{url}' must use http or https"));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if self.mqtt.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".to_string());
        }
        if self.mqtt.protocol != Protocol::Mqtt && !self.mqtt.ws_path.starts_with('/') {
            errors.push(format!(
                "mqtt.ws_path '{}' must start with '/'",
                self.mqtt.ws_path
            ));
        }
    }

    fn validate_channels(&self, errors: &mut Vec<String>) {
        if let Some(tanks) = &self.channels.tanks {
            if tanks.len() != TankIndex::COUNT {
                errors.push(format!(
                    "channels.tanks must list exactly {} topics, got {}",
                    TankIndex::COUNT,
                    tanks.len()
                ));
            }
        }

        let mut seen: HashMap<String, Channel> = HashMap::new();
        for (channel, topic) in self.channels.resolved_topics() {
            if topic.trim().is_empty() {
                errors.push(format!("channel '{channel}': topic is empty"));
                continue;
            }
            if topic.contains('+') || topic.contains('#') {
                errors.push(format!(
                    "channel '{channel}': topic '{topic}' contains a wildcard"
                ));
            }
            if let Some(prev) = seen.insert(topic.clone(), channel) {
                errors.push(format!(
                    "channel '{channel}': topic '{topic}' is already used by '{prev}'"
                ));
            }
        }
    }

    /// Apply environment overrides. `get` looks a variable up; main passes
    /// `std::env::var`, tests pass a map.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("BASE_URL") {
            self.rest.base_url = v;
        }
        if let Some(v) = get("MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = get("MQTT_PORT") {
            self.mqtt.port = v
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT '{v}' is not a port number"))?;
        }
        if let Some(v) = get("MQTT_PROTOCOL") {
            self.mqtt.protocol = match Protocol::parse(&v) {
                Some(p) => p,
                None => bail!("MQTT_PROTOCOL '{v}' is not one of mqtt, ws, wss"),
            };
        }
        if let Some(v) = get("WEB_PORT") {
            self.web.port = v
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT '{v}' is not a port number"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file (defaults if it does not exist), apply
/// environment overrides from the process environment, and validate.
pub fn load(path: &str) -> Result<Config> {
    load_with(path, |k| std::env::var(k).ok())
}

/// Same as [`load`], with environment lookups going through `get`.
pub fn load_with<F>(path: &str, get: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "no config file, using defaults");
        Config::default()
    };

    config.apply_env(get)?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        preset = ?config.channels.preset,
        broker = %config.mqtt.host,
        port = config.mqtt.port,
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
