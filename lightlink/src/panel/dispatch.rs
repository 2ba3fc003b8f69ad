//! Message dispatcher
//!
//! Routes the top-level keys of an inbound frame. Frames may be full
//! snapshots or deltas with any subset of keys; every key is handled on
//! its own and unknown keys are ignored.

use super::mirror::{MirrorSet, StateMirror};
use super::view::{Scope, View};
use crate::link::proto::{keys, value_as_bool, value_as_text, Frame};
use serde_json::{Map, Value};

/// Flat device state keys routed straight to their mirror.
const STATE_KEYS: [&str; 5] = [
    keys::STATE,
    keys::BRIGHTNESS,
    keys::COLOR_TEMP,
    keys::WHITE,
    keys::GAMMA,
];

/// Settings keys that also drive a local toggle, and that toggle's key.
const SETTINGS_SWITCHES: [(&str, &str); 2] = [
    ("switch_ha_discovery", keys::HA_DISCOVERY),
    ("switch_rest_api", keys::REST_API),
];

#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    /// Title before the hostname suffix, so repeated settings frames do not
    /// keep appending.
    base_title: Option<String>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    pub fn dispatch(&mut self, frame: &Frame, mirrors: &mut MirrorSet, view: &mut dyn View) {
        for (key, value) in frame.entries() {
            match key.as_str() {
                keys::INFO | keys::INFO_LEGACY => match value.as_object() {
                    Some(info) => self.apply_info(info, view),
                    None => log::debug!("ignoring non-object {}", key),
                },
                keys::SETTINGS | keys::SETTINGS_LEGACY => match value.as_object() {
                    Some(settings) => self.apply_settings(settings, mirrors, view),
                    None => log::debug!("ignoring non-object {}", key),
                },
                keys::COLOR => apply_color(value, mirrors, view),
                key if STATE_KEYS.contains(&key) => match mirrors.get_mut(key) {
                    Some(mirror) => {
                        if !mirror.apply(value, view) {
                            log::debug!("ignoring {} = {}", key, value);
                        }
                    }
                    None => log::debug!("no mirror for {}", key),
                },
                _ => log::debug!("ignoring unknown key {}", key),
            }
        }
    }

    fn apply_info(&mut self, info: &Map<String, Value>, view: &mut dyn View) {
        if let Some(name) = info.get(keys::APP_NAME) {
            let name = value_as_text(name);
            view.set_title(&name);
            self.base_title = Some(name);
        }
        for (key, value) in info {
            view.bind_text(key, &value_as_text(value), Scope::Anywhere);
        }
    }

    fn apply_settings(
        &mut self,
        settings: &Map<String, Value>,
        mirrors: &mut MirrorSet,
        view: &mut dyn View,
    ) {
        if let Some(hostname) = settings.get(keys::HOSTNAME) {
            let base = self.base_title.get_or_insert_with(|| view.title()).clone();
            view.set_title(&format!("{} - {}", base, value_as_text(hostname)));
        }
        for (key, value) in settings {
            view.bind_text(key, &value_as_text(value), Scope::Content);
            view.set_field_value(key, value);

            let switch = SETTINGS_SWITCHES
                .iter()
                .find(|(field, _)| *field == key.as_str());
            if let Some((_, toggle_key)) = switch {
                match (value_as_bool(value), mirrors.toggle_mut(toggle_key)) {
                    (Some(on), Some(toggle)) => toggle.set_state(on, view),
                    _ => log::debug!("ignoring {} = {}", key, value),
                }
            }
        }
    }
}

/// `color` carries the three channels; each present numeric channel is
/// applied.
fn apply_color(value: &Value, mirrors: &mut MirrorSet, view: &mut dyn View) {
    let color = match value.as_object() {
        Some(color) => color,
        None => {
            log::debug!("ignoring color = {}", value);
            return;
        }
    };
    for channel in [keys::RED, keys::GREEN, keys::BLUE] {
        if let (Some(v), Some(range)) = (color.get(channel), mirrors.range_mut(channel)) {
            if !range.apply(v, view) {
                log::debug!("ignoring color.{} = {}", channel, v);
            }
        }
    }
}
