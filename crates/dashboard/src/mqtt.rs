//! Channel table and payload codecs.
//!
//! Every topic the dashboard touches is defined here, in one table per
//! deployment revision. Inbound topics resolve to a tagged [`Channel`] so the
//! reconciler can `match` on it instead of comparing strings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::PayloadError;
use crate::state::Metrics;

// ---------------------------------------------------------------------------
// Controllable entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Actuator {
    Fan,
    Heater,
    LedLight,
}

impl Actuator {
    pub const ALL: [Actuator; 3] = [Actuator::Fan, Actuator::Heater, Actuator::LedLight];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Heater => "heater",
            Self::LedLight => "ledLight",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four pump tanks, numbered 1-4 like the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TankIndex(u8);

impl TankIndex {
    pub const COUNT: usize = 4;

    pub fn new(n: i64) -> Option<Self> {
        if (1..=Self::COUNT as i64).contains(&n) {
            Some(Self(n as u8))
        } else {
            None
        }
    }

    pub fn all() -> impl Iterator<Item = TankIndex> {
        (1..=Self::COUNT as u8).map(TankIndex)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub(crate) fn slot(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for TankIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tank{}", self.0)
    }
}

/// What an inbound topic writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Overview,
    Actuator(Actuator),
    Tank(TankIndex),
    WaterLevel,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overview => f.write_str("overview"),
            Self::Actuator(a) => write!(f, "{a}"),
            Self::Tank(t) => write!(f, "{t}"),
            Self::WaterLevel => f.write_str("waterLevel"),
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator payload encoding
// ---------------------------------------------------------------------------

/// How actuator on/off states travel on the bus. Each deployment uses
/// exactly one; the two are never mixed on a single channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorEncoding {
    /// Raw `"1"` / `"0"`.
    Binary,
    /// `{"command":"on"}` / `{"command":"off"}`.
    JsonCommand,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandMsg {
    command: String,
}

impl ActuatorEncoding {
    pub fn encode(self, on: bool) -> Vec<u8> {
        match self {
            Self::Binary => if on { b"1".to_vec() } else { b"0".to_vec() },
            Self::JsonCommand => {
                let msg = CommandMsg {
                    command: if on { "on" } else { "off" }.to_string(),
                };
                // A two-field struct with a plain string always serializes.
                serde_json::to_vec(&msg).unwrap_or_default()
            }
        }
    }

    /// Decode an echoed actuator state. Anything other than the exact
    /// literals of this encoding is an error, so callers leave the prior
    /// value untouched.
    pub fn decode(self, payload: &[u8]) -> Result<bool, PayloadError> {
        let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        match self {
            Self::Binary => match text.trim() {
                "1" => Ok(true),
                "0" => Ok(false),
                other => Err(PayloadError::UnknownCommand(other.to_string())),
            },
            Self::JsonCommand => {
                let msg: CommandMsg = serde_json::from_str(text)?;
                match msg.command.as_str() {
                    "on" => Ok(true),
                    "off" => Ok(false),
                    other => Err(PayloadError::UnknownCommand(other.to_string())),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Level / overview payloads
// ---------------------------------------------------------------------------

/// Parse a tank or water-level payload: a plain decimal string. The value is
/// not clamped; whatever the bus says is stored. Fractions are truncated
/// toward zero.
pub fn parse_level(payload: &[u8]) -> Result<i64, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let s = text.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() < i64::MAX as f64 => Ok(v.trunc() as i64),
        _ => Err(PayloadError::NotNumeric(s.to_string())),
    }
}

/// Parse a full-overview payload. It must be a JSON object; metrics it does
/// not mention come back as absent.
pub fn parse_overview(payload: &[u8]) -> Result<Metrics, PayloadError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(PayloadError::Json("overview is not an object".to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Channel table
// ---------------------------------------------------------------------------

/// Channel names of one deployment revision of the farm firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    SmartFarm,
    Plkit,
}

/// The single source of truth for topic names. Inbound topics resolve to a
/// [`Channel`]; outbound commands look their topic up by `Channel`.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    overview: String,
    actuators: [String; 3],
    tanks: [String; TankIndex::COUNT],
    water_level: String,
    encoding: ActuatorEncoding,
    by_topic: HashMap<String, Channel>,
}

impl ChannelTable {
    pub fn new(
        overview: String,
        actuators: [String; 3],
        tanks: [String; TankIndex::COUNT],
        water_level: String,
        encoding: ActuatorEncoding,
    ) -> Self {
        let mut table = Self {
            overview,
            actuators,
            tanks,
            water_level,
            encoding,
            by_topic: HashMap::new(),
        };
        let entries: Vec<(String, Channel)> = table
            .channels()
            .map(|c| (table.topic(c).to_string(), c))
            .collect();
        for (topic, channel) in entries {
            // First binding wins if a topic is listed twice; config
            // validation rejects that case before we get here.
            table.by_topic.entry(topic).or_insert(channel);
        }
        table
    }

    pub fn preset(preset: Preset) -> Self {
        let t = |s: &str| s.to_string();
        match preset {
            Preset::SmartFarm => Self::new(
                t("smartFarm/overview"),
                [
                    t("smartFarm/control/fan"),
                    t("smartFarm/control/heater"),
                    t("smartFarm/control/ledLight"),
                ],
                [
                    t("smartFarm/control/tank1"),
                    t("smartFarm/control/tank2"),
                    t("smartFarm/control/tank3"),
                    t("smartFarm/control/tank4"),
                ],
                t("smartFarm/control/waterLevel"),
                ActuatorEncoding::Binary,
            ),
            Preset::Plkit => Self::new(
                t("PLKIT/overview"),
                [
                    t("PLKIT/control/fan"),
                    t("PLKIT/control/heater"),
                    t("PLKIT/control/Light"),
                ],
                [
                    t("PLKIT/control/nutreinet_solution_pump_FE"),
                    t("PLKIT/control/Plus_water_pump_FE"),
                    t("PLKIT/control/farm_pump_FE"),
                    t("PLKIT/control/recycle_pump_FE"),
                ],
                t("PLKIT/control/Water_level_FE"),
                ActuatorEncoding::JsonCommand,
            ),
        }
    }

    /// Every channel in subscription order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> {
        std::iter::once(Channel::Overview)
            .chain(Actuator::ALL.into_iter().map(Channel::Actuator))
            .chain(TankIndex::all().map(Channel::Tank))
            .chain(std::iter::once(Channel::WaterLevel))
    }

    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Overview => &self.overview,
            Channel::Actuator(a) => &self.actuators[a.slot()],
            Channel::Tank(t) => &self.tanks[t.slot()],
            Channel::WaterLevel => &self.water_level,
        }
    }

    pub fn resolve(&self, topic: &str) -> Option<Channel> {
        self.by_topic.get(topic).copied()
    }

    pub fn encoding(&self) -> ActuatorEncoding {
        self.encoding
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- TankIndex ----------------------------------------------------------

    #[test]
    fn tank_index_accepts_one_to_four() {
        for n in 1..=4 {
            assert_eq!(TankIndex::new(n).map(TankIndex::get), Some(n as u8));
        }
    }

    #[test]
    fn tank_index_rejects_out_of_range() {
        assert!(TankIndex::new(0).is_none());
        assert!(TankIndex::new(5).is_none());
        assert!(TankIndex::new(-1).is_none());
    }

    // -- Actuator names -----------------------------------------------------

    #[test]
    fn actuator_from_name_round_trips_display() {
        for a in Actuator::ALL {
            assert_eq!(Actuator::from_name(&a.to_string()), Some(a));
        }
        assert_eq!(Actuator::from_name("pump"), None);
    }

    // -- ActuatorEncoding::Binary -------------------------------------------

    #[test]
    fn binary_encodes_one_and_zero() {
        assert_eq!(ActuatorEncoding::Binary.encode(true), b"1");
        assert_eq!(ActuatorEncoding::Binary.encode(false), b"0");
    }

    #[test]
    fn binary_decodes_with_whitespace() {
        assert_eq!(ActuatorEncoding::Binary.decode(b" 1\n"), Ok(true));
        assert_eq!(ActuatorEncoding::Binary.decode(b"0"), Ok(false));
    }

    #[test]
    fn binary_rejects_anything_else() {
        assert!(ActuatorEncoding::Binary.decode(b"on").is_err());
        assert!(ActuatorEncoding::Binary.decode(b"2").is_err());
        assert!(ActuatorEncoding::Binary.decode(b"").is_err());
        assert_eq!(
            ActuatorEncoding::Binary.decode(&[0xff, 0xfe]),
            Err(PayloadError::NotUtf8)
        );
    }

    // -- ActuatorEncoding::JsonCommand --------------------------------------

    #[test]
    fn json_command_encodes_on_off() {
        let on: serde_json::Value =
            serde_json::from_slice(&ActuatorEncoding::JsonCommand.encode(true)).unwrap();
        assert_eq!(on, serde_json::json!({"command": "on"}));
        let off: serde_json::Value =
            serde_json::from_slice(&ActuatorEncoding::JsonCommand.encode(false)).unwrap();
        assert_eq!(off, serde_json::json!({"command": "off"}));
    }

    #[test]
    fn json_command_decodes_on_off() {
        let enc = ActuatorEncoding::JsonCommand;
        assert_eq!(enc.decode(br#"{"command":"on"}"#), Ok(true));
        assert_eq!(enc.decode(br#"{"command":"off","by":"panel"}"#), Ok(false));
    }

    #[test]
    fn json_command_rejects_raw_digits_and_unknown_commands() {
        let enc = ActuatorEncoding::JsonCommand;
        assert!(matches!(enc.decode(b"1"), Err(PayloadError::Json(_))));
        assert_eq!(
            enc.decode(br#"{"command":"toggle"}"#),
            Err(PayloadError::UnknownCommand("toggle".into()))
        );
        assert!(enc.decode(b"{not json").is_err());
    }

    // -- parse_level --------------------------------------------------------

    #[test]
    fn parse_level_plain_integer() {
        assert_eq!(parse_level(b"42"), Ok(42));
        assert_eq!(parse_level(b" 7 "), Ok(7));
    }

    #[test]
    fn parse_level_is_not_clamped() {
        assert_eq!(parse_level(b"150"), Ok(150));
        assert_eq!(parse_level(b"-20"), Ok(-20));
    }

    #[test]
    fn parse_level_truncates_fractions() {
        assert_eq!(parse_level(b"42.9"), Ok(42));
        assert_eq!(parse_level(b"-3.5"), Ok(-3));
    }

    #[test]
    fn parse_level_rejects_garbage() {
        assert!(matches!(parse_level(b"abc"), Err(PayloadError::NotNumeric(_))));
        assert!(parse_level(b"").is_err());
        assert!(parse_level(b"NaN").is_err());
        assert!(parse_level(b"inf").is_err());
    }

    // -- parse_overview -----------------------------------------------------

    #[test]
    fn parse_overview_reads_camel_case_fields() {
        let json = br#"{"tempHumData":[{"temp":21,"hum":40}],"tdsData":[]}"#;
        let m = parse_overview(json).unwrap();
        assert_eq!(m.temp_hum.as_ref().map(Vec::len), Some(1));
        assert_eq!(m.tds.as_ref().map(Vec::len), Some(0));
        assert!(m.prediction.is_none());
    }

    #[test]
    fn parse_overview_rejects_non_object() {
        assert!(parse_overview(b"[]").is_err());
        assert!(parse_overview(b"42").is_err());
        assert!(parse_overview(b"oops").is_err());
    }

    // -- ChannelTable -------------------------------------------------------

    #[test]
    fn smart_farm_preset_resolves_every_topic() {
        let table = ChannelTable::preset(Preset::SmartFarm);
        assert_eq!(table.resolve("smartFarm/overview"), Some(Channel::Overview));
        assert_eq!(
            table.resolve("smartFarm/control/ledLight"),
            Some(Channel::Actuator(Actuator::LedLight))
        );
        assert_eq!(
            table.resolve("smartFarm/control/tank3"),
            Some(Channel::Tank(TankIndex::new(3).unwrap()))
        );
        assert_eq!(
            table.resolve("smartFarm/control/waterLevel"),
            Some(Channel::WaterLevel)
        );
        assert_eq!(table.encoding(), ActuatorEncoding::Binary);
    }

    #[test]
    fn plkit_preset_uses_pump_names() {
        let table = ChannelTable::preset(Preset::Plkit);
        assert_eq!(
            table.resolve("PLKIT/control/farm_pump_FE"),
            Some(Channel::Tank(TankIndex::new(3).unwrap()))
        );
        assert_eq!(
            table.topic(Channel::Actuator(Actuator::LedLight)),
            "PLKIT/control/Light"
        );
        assert_eq!(table.resolve("smartFarm/control/tank3"), None);
        assert_eq!(table.encoding(), ActuatorEncoding::JsonCommand);
    }

    #[test]
    fn table_lists_nine_channels_in_order() {
        let table = ChannelTable::preset(Preset::SmartFarm);
        let channels: Vec<Channel> = table.channels().collect();
        assert_eq!(channels.len(), 9);
        assert_eq!(channels[0], Channel::Overview);
        assert_eq!(channels[8], Channel::WaterLevel);
    }

    #[test]
    fn topic_and_resolve_agree() {
        let table = ChannelTable::preset(Preset::Plkit);
        for c in table.channels() {
            assert_eq!(table.resolve(table.topic(c)), Some(c));
        }
    }

    #[test]
    fn duplicate_topic_keeps_first_binding() {
        let t = |s: &str| s.to_string();
        let table = ChannelTable::new(
            t("o"),
            [t("f"), t("h"), t("l")],
            [t("a"), t("b"), t("a"), t("d")],
            t("w"),
            ActuatorEncoding::Binary,
        );
        assert_eq!(
            table.resolve("a"),
            Some(Channel::Tank(TankIndex::new(1).unwrap()))
        );
    }

    #[test]
    fn unknown_topic_resolves_to_none() {
        let table = ChannelTable::preset(Preset::SmartFarm);
        assert_eq!(table.resolve("smartFarm/control/pump"), None);
        assert_eq!(table.resolve(""), None);
    }
}
