use lightlink::link::proto::{keys, Command, OtaEvent, Rgb, TelemetryEvent};
use lightlink::panel::ota::{Effect, COMPLETED_MESSAGE};
use lightlink::panel::settings::{HOSTNAME_INVALID, WIFI_PSK_INVALID};
use lightlink::panel::view::{FormField, Modal, ViewModel};
use lightlink::panel::{Intent, MirrorSet, Outcome, Panel, View};
use serde_json::json;
use std::time::Instant;

fn panel() -> Panel<ViewModel, Vec<Command>> {
    Panel::new(ViewModel::new(), Vec::new())
}

fn panel_with_form(fields: Vec<FormField>) -> Panel<ViewModel, Vec<Command>> {
    Panel::new(ViewModel::with_form(fields), Vec::new())
}

fn sent(panel: &Panel<ViewModel, Vec<Command>>) -> Vec<serde_json::Value> {
    panel.link().iter().map(|c| c.to_value()).collect()
}

#[test]
fn power_toggle_is_spelled_out() {
    let mut panel = panel();
    panel.on_text(r#"{"state": "OFF"}"#);
    panel.toggle(keys::STATE);
    panel.toggle(keys::STATE);
    assert_eq!(sent(&panel), vec![json!({"state": "ON"}), json!({"state": "OFF"})]);
}

#[test]
fn other_toggles_send_raw_booleans() {
    let mut panel = panel();
    panel.on_text(r#"{"gamma": false}"#);
    panel.toggle(keys::GAMMA);
    panel.toggle(keys::GAMMA);
    assert_eq!(sent(&panel), vec![json!({"gamma": true}), json!({"gamma": false})]);
}

#[test]
fn any_color_channel_commits_the_whole_color() {
    let mut panel = panel();
    panel.on_text(r#"{"color": {"r": 1, "g": 2, "b": 3}}"#);
    let now = Instant::now();
    for (key, value) in [("r", 100), ("g", 150), ("b", 200)] {
        let intent = Intent::RangeCommit {
            key: key.to_string(),
            value,
        };
        assert_eq!(panel.handle(intent, now), Outcome::Sent);
    }
    assert_eq!(
        sent(&panel),
        vec![
            json!({"state": "ON", "color": {"r": 100, "g": 2, "b": 3}}),
            json!({"state": "ON", "color": {"r": 100, "g": 150, "b": 3}}),
            json!({"state": "ON", "color": {"r": 100, "g": 150, "b": 200}}),
        ]
    );
}

#[test]
fn whole_color_goes_out_in_one_frame() {
    let mut panel = panel();
    let color = Rgb { r: 10, g: 20, b: 30 };
    assert_eq!(panel.handle(Intent::ColorCommit(color), Instant::now()), Outcome::Sent);
    assert_eq!(
        sent(&panel),
        vec![json!({"state": "ON", "color": {"r": 10, "g": 20, "b": 30}})]
    );
    assert_eq!(panel.mirrors().rgb(), color);
}

#[test]
fn extreme_level_from_device_is_harmless() {
    let mut panel = panel();
    panel.on_text(r#"{"color_temp": -9223372036854775808}"#);
    assert_eq!(panel.mirrors().range(keys::COLOR_TEMP).map(|r| r.value()), Some(i64::MIN));
    assert!(panel.view().slider("slider_color_temp").unwrap().fill < 0.0);
    assert!(panel.link().is_empty());
}

#[test]
fn level_commit() {
    let mut panel = panel();
    panel.commit_range(keys::COLOR_TEMP, 370);
    assert_eq!(sent(&panel), vec![json!({"state": "ON", "color_temp": 370})]);
}

#[test]
fn short_passphrase_blocks_save() {
    let mut panel = panel_with_form(vec![
        FormField::text("net.hostname", "my-device.local"),
        FormField::text("wifi_ssid", "home"),
        FormField::text("wifi_psk", "short"),
    ]);
    let report = panel.save().unwrap_err();
    assert!(panel.link().is_empty());
    assert_eq!(report.len(), 1);
    assert_eq!(report.message_for("wifi_psk"), Some(WIFI_PSK_INVALID));

    let view = panel.view();
    assert_eq!(view.validation_messages().count(), 1);
    assert_eq!(view.validation_message("wifi_psk"), Some(WIFI_PSK_INVALID));
    assert_eq!(view.validation_message("net.hostname"), None);
    assert_eq!(view.validation_message("wifi_ssid"), None);
}

#[test]
fn bad_hostname_blocks_whole_commit() {
    let mut panel = panel_with_form(vec![
        FormField::text("hostname", "bad_host!"),
        FormField::text("wifi_ssid", "home"),
        FormField::text("wifi_psk", "longenough1"),
    ]);
    let outcome = panel.handle(Intent::Save, Instant::now());
    assert!(matches!(&outcome, Outcome::Invalid(report) if report.len() == 1));
    assert!(panel.link().is_empty());
    assert_eq!(panel.view().validation_messages().count(), 1);
    assert_eq!(panel.view().validation_message("hostname"), Some(HOSTNAME_INVALID));
}

#[test]
fn valid_form_is_sent_once() {
    let mut panel = panel_with_form(vec![
        FormField::text("net.hostname", "my-device.local"),
        FormField::text("wifi_ssid", "home"),
        FormField::text("wifi_psk", "longenough1"),
        FormField::checkbox("switch_ha_discovery", true),
        FormField::select("powerup_mode", "1"),
    ]);
    assert!(panel.save().is_ok());
    assert_eq!(
        sent(&panel),
        vec![json!({"settings": {
            "hostname": "my-device.local",
            "wifi_ssid": "home",
            "wifi_psk": "longenough1",
            "switch_ha_discovery": true,
            "powerup_mode": "1"
        }})]
    );
}

#[test]
fn inbound_color_updates_mirrors_silently() {
    let mut panel = panel();
    panel.on_text(r#"{"color": {"r": 10, "g": 20, "b": 30}}"#);
    assert!(panel.link().is_empty());
    for (key, value) in [("r", 10), ("g", 20), ("b", 30)] {
        assert_eq!(panel.mirrors().range(key).map(|r| r.value()), Some(value));
        let slider = panel.view().slider(&format!("slider_{}", key)).unwrap();
        assert_eq!(slider.value, value);
        assert!((slider.fill - value as f64 / 255.0 * 100.0).abs() < 1e-9);
    }
}

#[test]
fn ota_completes_exactly_once() {
    let mut panel = panel();
    let now = Instant::now();
    let mut effects = Vec::new();
    for data in ["p-10", "p-55", "p-100", "p-100"] {
        let event = TelemetryEvent::from_named("ota", data);
        effects.extend(panel.on_telemetry(&event, now));
    }
    let reloads = effects.iter().filter(|e| **e == Effect::ScheduleReload).count();
    assert_eq!(reloads, 1);
    assert_eq!(panel.view().progress_messages(), &[COMPLETED_MESSAGE.to_string()]);
    assert!(panel.ota().is_completed());
    assert!(panel.reload_timer().is_armed());
}

#[test]
fn ota_start_opens_progress() {
    let mut panel = panel();
    panel.on_telemetry(&TelemetryEvent::Ota(OtaEvent::Start), Instant::now());
    assert!(panel.view().is_modal_open(Modal::Ota));
    assert_eq!(panel.view().progress(), None);
}

#[test]
fn malformed_text_changes_nothing() {
    let mut panel = panel();
    panel.on_text(r#"{"brightness": 12, "state": "ON"}"#);
    let mirrors = panel.mirrors().clone();
    let view = panel.view().to_string();

    for text in ["not json", "{\"brightness\": ", "[1, 2, 3]", "42", ""] {
        panel.on_text(text);
    }
    assert_eq!(panel.mirrors(), &mirrors);
    assert_eq!(panel.view().to_string(), view);
    assert!(panel.link().is_empty());
}

#[test]
fn snapshot_then_delta() {
    let mut panel = panel();
    panel.on_text(
        r#"{"d": {"app_name": "AiLight", "app_version": "0.6.0"},
            "s": {"hostname": "ailight-1", "wifi_ssid": "home",
                  "switch_ha_discovery": true, "switch_rest_api": false}}"#,
    );
    panel.on_text(
        r#"{"state": "ON", "brightness": 200, "color_temp": 250,
            "color": {"r": 255, "g": 128, "b": 0}, "white_value": 0, "gamma": true}"#,
    );
    panel.on_text(r#"{"brightness": 100}"#);

    let view = panel.view();
    assert_eq!(view.title(), "AiLight - ailight-1");
    assert_eq!(view.checked("switch_ha_discovery"), Some(true));
    assert!(view.is_section_visible("mqtt_ha_discovery"));
    assert!(!view.is_section_visible("rest_api_key"));
    assert_eq!(view.slider("slider_brightness").map(|s| s.value), Some(100));
    assert_eq!(view.slider("slider_color_temp").map(|s| s.value), Some(250));
    assert_eq!(view.checked("switch_state"), Some(true));
    assert_eq!(
        view.field("wifi_ssid").map(|f| f.value.text().to_string()),
        Some("home".to_string())
    );
    assert!(panel.link().is_empty());
    assert_ne!(panel.mirrors(), &MirrorSet::builtin());
}
