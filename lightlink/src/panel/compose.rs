//! Command composer
//!
//! Turns user intent into outbound commands. Payloads are kept minimal:
//! one key per toggle, `state: "ON"` plus one key per committed level, and
//! the full color triple whenever any one channel changes.

use super::mirror::MirrorSet;
use crate::link::proto::{keys, Command, DeviceCommand, Rgb, STATE_OFF, STATE_ON};
use serde_json::{Map, Value};

/// Value a toggle broadcasts. The power state travels as `"ON"`/`"OFF"`,
/// every other key as the raw boolean.
pub fn toggle_value(key: &str, state: bool) -> Value {
    if key == keys::STATE {
        Value::from(if state { STATE_ON } else { STATE_OFF })
    } else {
        Value::Bool(state)
    }
}

pub fn toggle(key: &str, state: bool) -> Command {
    Command::Toggle {
        key: key.to_string(),
        value: toggle_value(key, state),
    }
}

pub fn level(key: &str, value: i64) -> Command {
    Command::Level {
        key: key.to_string(),
        value,
    }
}

pub fn color(rgb: Rgb) -> Command {
    Command::Color(rgb)
}

/// True for the three grouped color channel keys.
pub fn is_color_channel(key: &str) -> bool {
    matches!(key, keys::RED | keys::GREEN | keys::BLUE)
}

/// Command for a completed edit of range `key`, after the mirror took the
/// new value. Color channels always produce the composite of all three.
pub fn range_commit(mirrors: &MirrorSet, key: &str) -> Option<Command> {
    if is_color_channel(key) {
        Some(color(mirrors.rgb()))
    } else {
        mirrors.range(key).map(|range| level(key, range.value()))
    }
}

pub fn settings(draft: Map<String, Value>) -> Command {
    Command::Settings(draft)
}

pub fn device(cmd: DeviceCommand) -> Command {
    Command::Device(cmd)
}
