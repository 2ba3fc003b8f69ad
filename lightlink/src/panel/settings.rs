//! Settings commit pipeline
//!
//! Validates the whole settings form and produces a single settings
//! command, or nothing at all. Every failing field is reported; fields
//! without a rule pass through unchanged.

use super::compose;
use super::view::{FieldKind, FieldValue, FormField, View};
use crate::link::proto::{keys, Command};
use serde_json::{Map, Value};

pub const HOSTNAME_INVALID: &str = "This hostname is invalid.";
pub const WIFI_SSID_INVALID: &str = "A WiFi SSID must be present with a maximum of 31 characters.";
pub const WIFI_PSK_INVALID: &str =
    "A WiFi Passphrase Key (Password) must be between 8 and 63 characters.";
pub const API_KEY_INVALID: &str = "An API Key must be between 8 and 32 characters.";

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field identifier as it appears in the form.
    pub id: String,
    pub message: &'static str,
}

/// Every field that failed validation in one commit attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn message_for(&self, id: &str) -> Option<&'static str> {
        self.errors.iter().find(|e| e.id == id).map(|e| e.message)
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", error.id, error.message)?;
        }
        Ok(())
    }
}

/// Dotted labels of letters, digits and hyphens. Each label is 1 to 63
/// characters, starts with a letter and does not end with a hyphen.
pub fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|label| {
            let bytes = label.as_bytes();
            match (bytes.first(), bytes.last()) {
                (Some(first), Some(last)) => {
                    bytes.len() <= 63
                        && first.is_ascii_alphabetic()
                        && last.is_ascii_alphanumeric()
                        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
                }
                _ => false,
            }
        })
}

fn length_between(value: &str, min: usize, max: usize) -> bool {
    let len = value.chars().count();
    len >= min && len <= max
}

/// Checks one field by its unqualified name.
pub fn validate(name: &str, value: &str) -> Result<(), &'static str> {
    let ok = match name {
        keys::HOSTNAME => is_valid_hostname(value),
        keys::WIFI_SSID => length_between(value, 1, 31),
        keys::WIFI_PSK => value.is_empty() || length_between(value, 8, 63),
        keys::API_KEY => value.is_empty() || length_between(value, 8, 32),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(match name {
            keys::HOSTNAME => HOSTNAME_INVALID,
            keys::WIFI_SSID => WIFI_SSID_INVALID,
            keys::WIFI_PSK => WIFI_PSK_INVALID,
            _ => API_KEY_INVALID,
        })
    }
}

/// Builds the draft from a form snapshot. Pure: the view is not touched.
pub fn build_draft(fields: &[FormField]) -> Result<Map<String, Value>, ValidationReport> {
    let mut draft = Map::new();
    let mut report = ValidationReport::default();
    for field in fields {
        let name = field.name();
        let value = match (&field.value, field.kind) {
            (FieldValue::Checked(b), _) => Value::Bool(*b),
            (FieldValue::Text(s), FieldKind::Select) => Value::String(s.clone()),
            (FieldValue::Text(s), _) => {
                if let Err(message) = validate(name, s) {
                    report.errors.push(FieldError {
                        id: field.id.clone(),
                        message,
                    });
                    continue;
                }
                Value::String(s.clone())
            }
        };
        draft.insert(name.to_string(), value);
    }
    if report.is_empty() {
        Ok(draft)
    } else {
        Err(report)
    }
}

/// Runs a commit over the view's settings form: clears old markers, marks
/// every failing field and returns the settings command only if all passed.
pub fn commit(view: &mut dyn View) -> Result<Command, ValidationReport> {
    let fields = view.form_fields();
    for field in &fields {
        view.clear_invalid(&field.id);
    }
    match build_draft(&fields) {
        Ok(draft) => Ok(compose::settings(draft)),
        Err(report) => {
            for error in &report.errors {
                view.mark_invalid(&error.id, error.message);
            }
            Err(report)
        }
    }
}

/// Fresh 32 character hexadecimal API key.
pub fn generate_api_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::view::ViewModel;

    #[test]
    fn hostnames() {
        let longest = "x".repeat(63);
        let too_long = "x".repeat(64);
        for good in ["ailight", "my-device.local", "a", "A1.b2-c3", longest.as_str()] {
            assert!(is_valid_hostname(good), "{}", good);
        }
        for bad in [
            "",
            "bad_host!",
            "-lead",
            "trail-",
            "a..b",
            "1abc",
            "ends.",
            too_long.as_str(),
        ] {
            assert!(!is_valid_hostname(bad), "{}", bad);
        }
    }

    #[test]
    fn field_rules() {
        assert_eq!(validate("wifi_ssid", ""), Err(WIFI_SSID_INVALID));
        assert_eq!(validate("wifi_ssid", &"s".repeat(31)), Ok(()));
        assert_eq!(validate("wifi_ssid", &"s".repeat(32)), Err(WIFI_SSID_INVALID));
        assert_eq!(validate("wifi_psk", ""), Ok(()));
        assert_eq!(validate("wifi_psk", "1234567"), Err(WIFI_PSK_INVALID));
        assert_eq!(validate("wifi_psk", "12345678"), Ok(()));
        assert_eq!(validate("wifi_psk", &"p".repeat(64)), Err(WIFI_PSK_INVALID));
        assert_eq!(validate("api_key", ""), Ok(()));
        assert_eq!(validate("api_key", &"k".repeat(33)), Err(API_KEY_INVALID));
        assert_eq!(validate("mqtt_server", ""), Ok(()));
    }

    #[test]
    fn errors_are_collected_and_nothing_is_sent() {
        let mut view = ViewModel::with_form(vec![
            FormField::text("hostname", "no good"),
            FormField::text("wifi_ssid", ""),
            FormField::text("mqtt_server", "broker"),
        ]);
        let report = commit(&mut view).unwrap_err();
        assert_eq!(report.len(), 2);
        assert_eq!(view.validation_message("hostname"), Some(HOSTNAME_INVALID));
        assert_eq!(view.validation_message("wifi_ssid"), Some(WIFI_SSID_INVALID));

        // Fixing the form clears the markers.
        view.input("hostname", "good");
        view.input("wifi_ssid", "home");
        assert!(commit(&mut view).is_ok());
        assert_eq!(view.validation_messages().count(), 0);
    }

    #[test]
    fn draft_types_and_prefixes() {
        let fields = vec![
            FormField::text("net.hostname", "light"),
            FormField::text("wifi_ssid", "home"),
            FormField::checkbox("switch_rest_api", true),
            FormField::select("powerup_mode", ""),
            FormField::text("custom_key", ""),
        ];
        let draft = build_draft(&fields).unwrap();
        assert_eq!(draft.get("hostname"), Some(&Value::from("light")));
        assert_eq!(draft.get("switch_rest_api"), Some(&Value::Bool(true)));
        assert_eq!(draft.get("powerup_mode"), Some(&Value::from("")));
        assert_eq!(draft.get("custom_key"), Some(&Value::from("")));
        assert!(!draft.contains_key("net.hostname"));
    }

    #[test]
    fn api_keys_are_hex() {
        let key = generate_api_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
        assert_eq!(validate("api_key", &key), Ok(()));
    }
}
