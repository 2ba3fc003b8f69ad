//! Wire protocol
//!
//! Both channels carry text. The command channel exchanges JSON objects
//! in both directions: the device pushes snapshots or deltas keyed by
//! state key, the client answers with small command objects. The
//! telemetry channel pushes named events with a short string payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Literal used by the device for the overall power state.
pub const STATE_ON: &str = "ON";
pub const STATE_OFF: &str = "OFF";

/// State keys shared by the device and the client. There is no schema
/// negotiation: the set is fixed by convention.
pub mod keys {
    pub const STATE: &str = "state";
    pub const BRIGHTNESS: &str = "brightness";
    pub const COLOR_TEMP: &str = "color_temp";
    pub const COLOR: &str = "color";
    pub const RED: &str = "r";
    pub const GREEN: &str = "g";
    pub const BLUE: &str = "b";
    pub const WHITE: &str = "white_value";
    pub const GAMMA: &str = "gamma";
    pub const HA_DISCOVERY: &str = "ha_discovery";
    pub const REST_API: &str = "rest_api";

    pub const INFO: &str = "info";
    pub const SETTINGS: &str = "settings";
    pub const COMMAND: &str = "command";
    /// Short namespace names still sent by older firmware.
    pub const INFO_LEGACY: &str = "d";
    pub const SETTINGS_LEGACY: &str = "s";

    pub const APP_NAME: &str = "app_name";
    pub const HOSTNAME: &str = "hostname";
    pub const API_KEY: &str = "api_key";
    pub const WIFI_SSID: &str = "wifi_ssid";
    pub const WIFI_PSK: &str = "wifi_psk";
}

/// Possible errors when decoding an inbound frame
#[derive(Debug)]
pub enum Error {
    /// The text is not JSON at all.
    Json(serde_json::Error),
    /// Valid JSON, but not an object, so there are no keys to route.
    NotAnObject,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Json(err) => write!(f, "malformed json: {}", err),
            Error::NotAnObject => write!(f, "frame is not a json object"),
        }
    }
}

/// One inbound command-channel frame. Either a full snapshot or a delta:
/// every top-level key is handled on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame(Map<String, Value>);

impl Frame {
    pub fn parse(text: &str) -> Result<Frame, Error> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Frame(map)),
            _ => Err(Error::NotAnObject),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn entries(&self) -> serde_json::map::Iter<'_> {
        self.0.iter()
    }
}

/// Composite color value. The three channels always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

/// Destructive device-level commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCommand {
    Restart,
    Reset,
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::Restart => "restart",
            DeviceCommand::Reset => "reset",
        }
    }
}

/// Outbound command-channel payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `{ <key>: value }` from a broadcasting toggle.
    Toggle { key: String, value: Value },
    /// `{ state: "ON", <key>: value }` from a committed range edit.
    Level { key: String, value: i64 },
    /// `{ state: "ON", color: { r, g, b } }`
    Color(Rgb),
    /// `{ settings: { <field>: value, ... } }`
    Settings(Map<String, Value>),
    /// `{ command: "restart" | "reset" }`
    Device(DeviceCommand),
}

impl Command {
    pub fn to_value(&self) -> Value {
        let mut msg = Map::new();
        match self {
            Command::Toggle { key, value } => {
                msg.insert(key.clone(), value.clone());
            }
            Command::Level { key, value } => {
                msg.insert(keys::STATE.to_string(), Value::from(STATE_ON));
                msg.insert(key.clone(), Value::from(*value));
            }
            Command::Color(rgb) => {
                msg.insert(keys::STATE.to_string(), Value::from(STATE_ON));
                msg.insert(
                    keys::COLOR.to_string(),
                    serde_json::to_value(rgb).unwrap_or(Value::Null),
                );
            }
            Command::Settings(draft) => {
                msg.insert(keys::SETTINGS.to_string(), Value::Object(draft.clone()));
            }
            Command::Device(cmd) => {
                msg.insert(keys::COMMAND.to_string(), Value::from(cmd.name()));
            }
        }
        Value::Object(msg)
    }

    /// Serializes as a single JSON text frame.
    pub fn serialize(&self) -> String {
        self.to_value().to_string()
    }
}

/// Numbers may arrive either as JSON numbers or as numeric strings.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Text rendering of a value for text bindings: strings verbatim,
/// everything else in its JSON form.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Payload of an `ota` telemetry event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// The device started receiving an image.
    Start,
    /// Percentage received, capped at 100.
    Progress(u8),
    Unrecognized(String),
}

impl OtaEvent {
    pub fn parse(data: &str) -> OtaEvent {
        let data = data.trim();
        if data == "start" {
            return OtaEvent::Start;
        }
        if let Some(rest) = data.strip_prefix("p-") {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(p) = digits.parse::<u64>() {
                return OtaEvent::Progress(std::cmp::min(p, 100) as u8);
            }
        }
        OtaEvent::Unrecognized(data.to_string())
    }
}

/// Telemetry channel events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// The event stream is established.
    Open,
    /// The event stream failed or closed.
    Error(String),
    /// Unnamed event, diagnostic only.
    Message(String),
    Ota(OtaEvent),
    Other { name: String, data: String },
}

impl TelemetryEvent {
    pub fn from_named(name: &str, data: &str) -> TelemetryEvent {
        match name {
            "" | "message" => TelemetryEvent::Message(data.to_string()),
            "ota" => TelemetryEvent::Ota(OtaEvent::parse(data)),
            _ => TelemetryEvent::Other {
                name: name.to_string(),
                data: data.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn power_level_and_color_shapes() {
        let level = Command::Level {
            key: keys::BRIGHTNESS.to_string(),
            value: 128,
        };
        assert_eq!(level.to_value(), json!({"state": "ON", "brightness": 128}));

        let color = Command::Color(Rgb { r: 1, g: 2, b: 3 });
        assert_eq!(
            color.to_value(),
            json!({"state": "ON", "color": {"r": 1, "g": 2, "b": 3}})
        );

        let restart = Command::Device(DeviceCommand::Restart);
        assert_eq!(restart.serialize(), r#"{"command":"restart"}"#);
    }

    #[test]
    fn frames_must_be_objects() {
        assert!(matches!(Frame::parse("not json"), Err(Error::Json(_))));
        assert!(matches!(Frame::parse("[1,2]"), Err(Error::NotAnObject)));
        let frame = Frame::parse(r#"{"brightness": 10}"#).unwrap();
        assert_eq!(frame.get("brightness"), Some(&json!(10)));
    }

    #[test]
    fn ota_payloads() {
        assert_eq!(OtaEvent::parse("start"), OtaEvent::Start);
        assert_eq!(OtaEvent::parse("p-42"), OtaEvent::Progress(42));
        assert_eq!(OtaEvent::parse("p-100"), OtaEvent::Progress(100));
        assert_eq!(OtaEvent::parse("p-250"), OtaEvent::Progress(100));
        assert_eq!(OtaEvent::parse("p-7%"), OtaEvent::Progress(7));
        assert_eq!(
            OtaEvent::parse("p-x"),
            OtaEvent::Unrecognized("p-x".to_string())
        );
        assert_eq!(
            TelemetryEvent::from_named("ota", "p-5"),
            TelemetryEvent::Ota(OtaEvent::Progress(5))
        );
    }

    #[test]
    fn lenient_values() {
        assert_eq!(value_as_i64(&json!("42")), Some(42));
        assert_eq!(value_as_i64(&json!(12.6)), Some(13));
        assert_eq!(value_as_i64(&json!(true)), None);
        assert_eq!(value_as_bool(&json!(1)), Some(true));
        assert_eq!(value_as_bool(&json!("false")), Some(false));
        assert_eq!(value_as_text(&json!(7)), "7");
    }
}
