//! View binding
//!
//! The panel never touches a concrete UI. Everything it renders goes
//! through `View`: checked switches, range sliders with their fill, text
//! bound by tag, form fields, dependent section visibility, and the two
//! modals (firmware update progress and "please wait").
//!
//! `ViewModel` is the in-memory implementation used by the tools and the
//! tests.

use crate::link::proto::{value_as_bool, value_as_text};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Where tagged text nodes are looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every tagged node, header included.
    Anywhere,
    /// Only nodes inside the page content.
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Modal {
    /// Firmware update progress
    Ota,
    /// Shown while waiting for the device to come back.
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Password,
    Checkbox,
    /// Choice field; never validated.
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Checked(bool),
}

impl FieldValue {
    pub fn text(&self) -> &str {
        match self {
            FieldValue::Text(s) => s,
            FieldValue::Checked(true) => "true",
            FieldValue::Checked(false) => "false",
        }
    }
}

/// One field of the settings form. The identifier may carry a dotted
/// namespace prefix, like `net.hostname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub id: String,
    pub kind: FieldKind,
    pub value: FieldValue,
}

impl FormField {
    pub fn text(id: &str, value: &str) -> FormField {
        FormField {
            id: id.to_string(),
            kind: FieldKind::Text,
            value: FieldValue::Text(value.to_string()),
        }
    }

    pub fn password(id: &str) -> FormField {
        FormField {
            id: id.to_string(),
            kind: FieldKind::Password,
            value: FieldValue::Text(String::new()),
        }
    }

    pub fn checkbox(id: &str, checked: bool) -> FormField {
        FormField {
            id: id.to_string(),
            kind: FieldKind::Checkbox,
            value: FieldValue::Checked(checked),
        }
    }

    pub fn select(id: &str, value: &str) -> FormField {
        FormField {
            id: id.to_string(),
            kind: FieldKind::Select,
            value: FieldValue::Text(value.to_string()),
        }
    }

    /// Field name without namespace prefix.
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }
}

/// Rendering surface driven by the panel.
pub trait View {
    fn title(&self) -> String;
    fn set_title(&mut self, title: &str);

    /// Checked state of a switch node.
    fn set_checked(&mut self, node: &str, checked: bool);

    /// Value, readout and fill percentage of a slider node.
    fn set_range(&mut self, node: &str, value: i64, fill: f64);

    /// Fill percentage only, for live pointer feedback.
    fn set_fill(&mut self, node: &str, fill: f64);

    /// Writes `text` into every node tagged `tag` within `scope`.
    fn bind_text(&mut self, tag: &str, text: &str, scope: Scope);

    /// Assigns a value to the form field whose identifier is `id`, if any.
    fn set_field_value(&mut self, id: &str, value: &Value);

    fn set_section_visible(&mut self, section: &str, visible: bool);

    /// Snapshot of every input and select field of the settings form.
    fn form_fields(&self) -> Vec<FormField>;

    fn mark_invalid(&mut self, field: &str, message: &str);
    fn clear_invalid(&mut self, field: &str);

    fn open_modal(&mut self, modal: Modal);
    fn set_progress(&mut self, percent: u8);
    fn append_progress_message(&mut self, message: &str);

    /// Back to the freshly loaded state.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slider {
    pub value: i64,
    pub fill: f64,
}

/// In-memory view
#[derive(Debug, Clone)]
pub struct ViewModel {
    title: String,
    switches: BTreeMap<String, bool>,
    sliders: BTreeMap<String, Slider>,
    header_text: BTreeMap<String, String>,
    content_text: BTreeMap<String, String>,
    fields: Vec<FormField>,
    hidden: BTreeSet<String>,
    invalid: BTreeMap<String, String>,
    modals: BTreeSet<Modal>,
    progress: Option<u8>,
    progress_messages: Vec<String>,
}

pub static DEFAULT_TITLE: &str = "AiLight";

/// Settings form of the device web interface.
pub fn default_form() -> Vec<FormField> {
    vec![
        FormField::text("hostname", ""),
        FormField::text("wifi_ssid", ""),
        FormField::password("wifi_psk"),
        FormField::text("mqtt_server", ""),
        FormField::text("mqtt_port", ""),
        FormField::text("mqtt_user", ""),
        FormField::password("mqtt_password"),
        FormField::text("mqtt_state_topic", ""),
        FormField::text("mqtt_command_topic", ""),
        FormField::text("mqtt_lwt_topic", ""),
        FormField::checkbox("switch_ha_discovery", false),
        FormField::text("mqtt_ha_discovery_prefix", ""),
        FormField::checkbox("switch_rest_api", false),
        FormField::text("api_key", ""),
        FormField::select("powerup_mode", "0"),
    ]
}

impl Default for ViewModel {
    fn default() -> ViewModel {
        ViewModel::with_form(default_form())
    }
}

impl ViewModel {
    pub fn new() -> ViewModel {
        ViewModel::default()
    }

    pub fn with_form(fields: Vec<FormField>) -> ViewModel {
        ViewModel {
            title: DEFAULT_TITLE.to_string(),
            switches: BTreeMap::new(),
            sliders: BTreeMap::new(),
            header_text: BTreeMap::new(),
            content_text: BTreeMap::new(),
            fields,
            hidden: BTreeSet::new(),
            invalid: BTreeMap::new(),
            modals: BTreeSet::new(),
            progress: None,
            progress_messages: Vec::new(),
        }
    }

    pub fn checked(&self, node: &str) -> Option<bool> {
        self.switches.get(node).copied()
    }

    pub fn slider(&self, node: &str) -> Option<Slider> {
        self.sliders.get(node).copied()
    }

    /// Text of the content node tagged `tag`, falling back to the header.
    pub fn text(&self, tag: &str) -> Option<&str> {
        self.content_text
            .get(tag)
            .or_else(|| self.header_text.get(tag))
            .map(|s| s.as_str())
    }

    pub fn header_text(&self, tag: &str) -> Option<&str> {
        self.header_text.get(tag).map(|s| s.as_str())
    }

    pub fn field(&self, id: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Sets a field the way a user would type or click it.
    pub fn input(&mut self, id: &str, value: &str) -> bool {
        match self.fields.iter_mut().find(|f| f.id == id) {
            Some(field) => {
                field.value = match field.kind {
                    FieldKind::Checkbox => FieldValue::Checked(
                        value_as_bool(&Value::from(value)).unwrap_or(false),
                    ),
                    _ => FieldValue::Text(value.to_string()),
                };
                if field.kind == FieldKind::Checkbox {
                    let checked = field.value == FieldValue::Checked(true);
                    self.switches.insert(id.to_string(), checked);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_section_visible(&self, section: &str) -> bool {
        !self.hidden.contains(section)
    }

    pub fn validation_message(&self, field: &str) -> Option<&str> {
        self.invalid.get(field).map(|s| s.as_str())
    }

    pub fn validation_messages(&self) -> impl Iterator<Item = (&str, &str)> {
        self.invalid.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_modal_open(&self, modal: Modal) -> bool {
        self.modals.contains(&modal)
    }

    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn progress_messages(&self) -> &[String] {
        &self.progress_messages
    }
}

impl View for ViewModel {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn set_checked(&mut self, node: &str, checked: bool) {
        self.switches.insert(node.to_string(), checked);
        // A checkbox in the form is the same node as its switch.
        if let Some(field) = self
            .fields
            .iter_mut()
            .find(|f| f.id == node && f.kind == FieldKind::Checkbox)
        {
            field.value = FieldValue::Checked(checked);
        }
    }

    fn set_range(&mut self, node: &str, value: i64, fill: f64) {
        self.sliders.insert(node.to_string(), Slider { value, fill });
    }

    fn set_fill(&mut self, node: &str, fill: f64) {
        let slider = self
            .sliders
            .entry(node.to_string())
            .or_insert(Slider { value: 0, fill });
        slider.fill = fill;
    }

    fn bind_text(&mut self, tag: &str, text: &str, scope: Scope) {
        if scope == Scope::Anywhere {
            self.header_text.insert(tag.to_string(), text.to_string());
        }
        self.content_text.insert(tag.to_string(), text.to_string());
    }

    fn set_field_value(&mut self, id: &str, value: &Value) {
        let field = match self.fields.iter_mut().find(|f| f.id == id) {
            Some(field) => field,
            None => return,
        };
        match field.kind {
            FieldKind::Checkbox => {
                let checked = value_as_bool(value).unwrap_or(false);
                field.value = FieldValue::Checked(checked);
                self.switches.insert(id.to_string(), checked);
            }
            _ => field.value = FieldValue::Text(value_as_text(value)),
        }
    }

    fn set_section_visible(&mut self, section: &str, visible: bool) {
        if visible {
            self.hidden.remove(section);
        } else {
            self.hidden.insert(section.to_string());
        }
    }

    fn form_fields(&self) -> Vec<FormField> {
        self.fields.clone()
    }

    fn mark_invalid(&mut self, field: &str, message: &str) {
        self.invalid.insert(field.to_string(), message.to_string());
    }

    fn clear_invalid(&mut self, field: &str) {
        self.invalid.remove(field);
    }

    fn open_modal(&mut self, modal: Modal) {
        self.modals.insert(modal);
    }

    fn set_progress(&mut self, percent: u8) {
        self.progress = Some(percent);
    }

    fn append_progress_message(&mut self, message: &str) {
        self.progress_messages.push(message.to_string());
    }

    fn reset(&mut self) {
        let form = self
            .fields
            .iter()
            .map(|f| FormField {
                value: match f.kind {
                    FieldKind::Checkbox => FieldValue::Checked(false),
                    _ => FieldValue::Text(String::new()),
                },
                ..f.clone()
            })
            .collect();
        *self = ViewModel::with_form(form);
    }
}

impl fmt::Display for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        for (node, checked) in &self.switches {
            writeln!(f, "  {:<24} {}", node, if *checked { "on" } else { "off" })?;
        }
        for (node, slider) in &self.sliders {
            writeln!(f, "  {:<24} {:>4} ({:.0}%)", node, slider.value, slider.fill)?;
        }
        if let Some(p) = self.progress {
            writeln!(f, "  {:<24} {}%", "firmware update", p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_binding_leaves_header_alone() {
        let mut view = ViewModel::new();
        view.bind_text("hostname", "light-1", Scope::Content);
        view.bind_text("app_version", "1.2", Scope::Anywhere);
        assert_eq!(view.header_text("hostname"), None);
        assert_eq!(view.text("hostname"), Some("light-1"));
        assert_eq!(view.header_text("app_version"), Some("1.2"));
    }

    #[test]
    fn checkbox_field_tracks_switch() {
        let mut view = ViewModel::new();
        view.set_checked("switch_rest_api", true);
        assert_eq!(
            view.field("switch_rest_api").map(|f| &f.value),
            Some(&FieldValue::Checked(true))
        );
        view.set_field_value("switch_rest_api", &json!(false));
        assert_eq!(view.checked("switch_rest_api"), Some(false));
    }

    #[test]
    fn field_values_from_json() {
        let mut view = ViewModel::new();
        view.set_field_value("mqtt_port", &json!(1883));
        view.set_field_value("no_such_field", &json!("x"));
        assert_eq!(
            view.field("mqtt_port").map(|f| f.value.text()),
            Some("1883")
        );
        assert!(view.field("no_such_field").is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut view = ViewModel::new();
        view.input("hostname", "light");
        view.open_modal(Modal::Reload);
        view.set_section_visible("rest_api_key", false);
        view.reset();
        assert!(!view.is_modal_open(Modal::Reload));
        assert!(view.is_section_visible("rest_api_key"));
        assert_eq!(view.field("hostname").map(|f| f.value.text()), Some(""));
        assert_eq!(view.title(), DEFAULT_TITLE);
    }

    #[test]
    fn namespaced_field_name() {
        let field = FormField::text("net.wifi.hostname", "x");
        assert_eq!(field.name(), "hostname");
        assert_eq!(FormField::text("hostname", "x").name(), "hostname");
    }
}
