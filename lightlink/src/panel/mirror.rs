//! State mirrors
//!
//! A mirror reflects one state key of the device into one view node.
//! Inbound values go through `StateMirror::apply` and never send anything.
//! User interaction goes through the typed methods on `Toggle` and `Range`,
//! which may hand back a `Command` for the caller to send.

use super::compose;
use super::view::View;
use crate::link::proto::{keys, value_as_bool, value_as_i64, Command, Rgb, STATE_OFF};
use serde_json::Value;
use std::collections::BTreeMap;

/// Common interface of toggle and range mirrors.
pub trait StateMirror {
    fn key(&self) -> &str;

    /// View node the mirror renders into.
    fn node(&self) -> String;

    /// Applies an inbound value from the device. Returns false when the
    /// value has the wrong shape for this mirror; nothing changes then.
    fn apply(&mut self, value: &Value, view: &mut dyn View) -> bool;

    /// Renders the current value.
    fn render(&self, view: &mut dyn View);
}

/// Boolean state key
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle {
    key: String,
    state: bool,
    /// Whether user toggles are sent to the device.
    broadcast: bool,
    /// Settings section shown only while this toggle is on.
    gates: Option<String>,
}

impl Toggle {
    pub fn new(key: &str, broadcast: bool) -> Toggle {
        Toggle {
            key: key.to_string(),
            state: false,
            broadcast,
            gates: None,
        }
    }

    pub fn gating(mut self, section: &str) -> Toggle {
        self.gates = Some(section.to_string());
        self
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn set_state(&mut self, state: bool, view: &mut dyn View) {
        self.state = state;
        self.render(view);
    }

    /// User click. Returns the command to send for broadcasting toggles.
    pub fn toggle_state(&mut self, view: &mut dyn View) -> Option<Command> {
        self.set_state(!self.state, view);
        if self.broadcast {
            Some(compose::toggle(&self.key, self.state))
        } else {
            None
        }
    }
}

impl StateMirror for Toggle {
    fn key(&self) -> &str {
        &self.key
    }

    fn node(&self) -> String {
        format!("switch_{}", self.key)
    }

    fn apply(&mut self, value: &Value, view: &mut dyn View) -> bool {
        let state = if self.key == keys::STATE {
            // Anything but "OFF" means on.
            match value {
                Value::String(s) => s != STATE_OFF,
                Value::Bool(b) => *b,
                _ => true,
            }
        } else {
            match value_as_bool(value) {
                Some(b) => b,
                None => return false,
            }
        };
        self.set_state(state, view);
        true
    }

    fn render(&self, view: &mut dyn View) {
        view.set_checked(&self.node(), self.state);
        if let Some(section) = &self.gates {
            view.set_section_visible(section, self.state);
        }
    }
}

/// Numeric state key with bounds
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    key: String,
    value: i64,
    min: i64,
    max: i64,
    /// Value under the pointer while an edit is in flight.
    pending: Option<i64>,
}

impl Range {
    pub fn new(key: &str, min: i64, max: i64) -> Range {
        Range {
            key: key.to_string(),
            value: min,
            min,
            max,
            pending: None,
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn is_editing(&self) -> bool {
        self.pending.is_some()
    }

    fn fill_of(&self, v: i64) -> f64 {
        if self.max == self.min {
            return 0.0;
        }
        // Device values are not clamped and may sit anywhere in i64.
        (v as f64 - self.min as f64) / (self.max as f64 - self.min as f64) * 100.0
    }

    /// Fill percentage of what is displayed.
    pub fn fill(&self) -> f64 {
        self.fill_of(self.pending.unwrap_or(self.value))
    }

    /// Device value. Not clamped; the device is trusted. Cancels any edit
    /// in flight.
    pub fn set_value(&mut self, value: i64, view: &mut dyn View) {
        self.value = value;
        self.pending = None;
        self.render(view);
    }

    /// Live pointer feedback: fill only, nothing is committed.
    pub fn pointer_move(&mut self, value: i64, view: &mut dyn View) {
        self.pending = Some(value);
        view.set_fill(&self.node(), self.fill_of(value));
    }

    /// Completed edit. The caller composes the command, see
    /// `compose::range_commit`.
    pub fn commit(&mut self, value: i64, view: &mut dyn View) {
        self.set_value(value, view);
    }
}

impl StateMirror for Range {
    fn key(&self) -> &str {
        &self.key
    }

    fn node(&self) -> String {
        format!("slider_{}", self.key)
    }

    fn apply(&mut self, value: &Value, view: &mut dyn View) -> bool {
        match value_as_i64(value) {
            Some(v) => {
                self.set_value(v, view);
                true
            }
            None => false,
        }
    }

    fn render(&self, view: &mut dyn View) {
        view.set_range(&self.node(), self.value, self.fill());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mirror {
    Toggle(Toggle),
    Range(Range),
}

impl StateMirror for Mirror {
    fn key(&self) -> &str {
        match self {
            Mirror::Toggle(t) => t.key(),
            Mirror::Range(r) => r.key(),
        }
    }

    fn node(&self) -> String {
        match self {
            Mirror::Toggle(t) => t.node(),
            Mirror::Range(r) => r.node(),
        }
    }

    fn apply(&mut self, value: &Value, view: &mut dyn View) -> bool {
        match self {
            Mirror::Toggle(t) => t.apply(value, view),
            Mirror::Range(r) => r.apply(value, view),
        }
    }

    fn render(&self, view: &mut dyn View) {
        match self {
            Mirror::Toggle(t) => t.render(view),
            Mirror::Range(r) => r.render(view),
        }
    }
}

/// Section of the settings form shown while Home Assistant discovery is on.
pub const HA_DISCOVERY_SECTION: &str = "mqtt_ha_discovery";
/// Section of the settings form shown while the REST API is on.
pub const REST_API_SECTION: &str = "rest_api_key";

/// Mirrors of one session, by state key.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSet {
    mirrors: BTreeMap<String, Mirror>,
}

impl Default for MirrorSet {
    fn default() -> MirrorSet {
        MirrorSet::builtin()
    }
}

impl MirrorSet {
    pub fn empty() -> MirrorSet {
        MirrorSet {
            mirrors: BTreeMap::new(),
        }
    }

    /// Every control of the light.
    pub fn builtin() -> MirrorSet {
        let mut set = MirrorSet::empty();
        set.insert(Mirror::Toggle(Toggle::new(keys::STATE, true)));
        set.insert(Mirror::Range(Range::new(keys::BRIGHTNESS, 0, 255)));
        set.insert(Mirror::Range(Range::new(keys::COLOR_TEMP, 153, 500)));
        set.insert(Mirror::Range(Range::new(keys::RED, 0, 255)));
        set.insert(Mirror::Range(Range::new(keys::GREEN, 0, 255)));
        set.insert(Mirror::Range(Range::new(keys::BLUE, 0, 255)));
        set.insert(Mirror::Range(Range::new(keys::WHITE, 0, 255)));
        set.insert(Mirror::Toggle(Toggle::new(keys::GAMMA, true)));
        set.insert(Mirror::Toggle(
            Toggle::new(keys::HA_DISCOVERY, false).gating(HA_DISCOVERY_SECTION),
        ));
        set.insert(Mirror::Toggle(
            Toggle::new(keys::REST_API, false).gating(REST_API_SECTION),
        ));
        set
    }

    pub fn insert(&mut self, mirror: Mirror) {
        self.mirrors.insert(mirror.key().to_string(), mirror);
    }

    pub fn get(&self, key: &str) -> Option<&Mirror> {
        self.mirrors.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Mirror> {
        self.mirrors.get_mut(key)
    }

    pub fn toggle(&self, key: &str) -> Option<&Toggle> {
        match self.mirrors.get(key) {
            Some(Mirror::Toggle(t)) => Some(t),
            _ => None,
        }
    }

    pub fn toggle_mut(&mut self, key: &str) -> Option<&mut Toggle> {
        match self.mirrors.get_mut(key) {
            Some(Mirror::Toggle(t)) => Some(t),
            _ => None,
        }
    }

    pub fn range(&self, key: &str) -> Option<&Range> {
        match self.mirrors.get(key) {
            Some(Mirror::Range(r)) => Some(r),
            _ => None,
        }
    }

    pub fn range_mut(&mut self, key: &str) -> Option<&mut Range> {
        match self.mirrors.get_mut(key) {
            Some(Mirror::Range(r)) => Some(r),
            _ => None,
        }
    }

    /// Current color as the three channel mirrors show it.
    pub fn rgb(&self) -> Rgb {
        let channel = |key: &str| self.range(key).map(|r| r.value()).unwrap_or(0);
        Rgb {
            r: channel(keys::RED),
            g: channel(keys::GREEN),
            b: channel(keys::BLUE),
        }
    }

    /// Completed edit of range `key`: takes the value and returns what to
    /// send. `None` if there is no such range.
    pub fn commit(&mut self, key: &str, value: i64, view: &mut dyn View) -> Option<Command> {
        self.range_mut(key)?.commit(value, view);
        compose::range_commit(self, key)
    }

    /// Completed edit of all three color channels at once. One composite
    /// command carries the whole color.
    pub fn commit_color(&mut self, color: Rgb, view: &mut dyn View) -> Command {
        for (key, value) in [(keys::RED, color.r), (keys::GREEN, color.g), (keys::BLUE, color.b)] {
            if let Some(range) = self.range_mut(key) {
                range.commit(value, view);
            }
        }
        compose::color(color)
    }

    pub fn render_all(&self, view: &mut dyn View) {
        for mirror in self.mirrors.values() {
            mirror.render(view);
        }
    }
}
