//! Panel session
//!
//! A `Panel` is one client session, the native counterpart of a loaded
//! control page. It owns the view, the mirrors, the OTA monitor, the reload
//! timer and the command sink. Inbound items are handled one at a time, in
//! arrival order, through `process`; user intent comes in through `handle`.
//!
//! A reload throws away all session state and, for a live connection,
//! reconnects both channels.

use super::compose;
use super::dispatch::Dispatcher;
use super::mirror::MirrorSet;
use super::ota::{self, OtaMonitor};
use super::settings::{self, ValidationReport};
use super::view::{Modal, View};
use crate::link::connection::{CommandSink, ConnectError, Connection, Inbound, LinkEvent};
use crate::link::proto::{keys, Command, DeviceCommand, Frame, Rgb, TelemetryEvent};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Time the device needs to come back after a restart, reset or update.
pub const WAIT: Duration = Duration::from_secs(10);

pub const RESTART_PROMPT: &str = "Are you sure you want to restart your Ai-Thinker RGBW Light?";
pub const RESET_PROMPT: &str = "You are about to reset your Ai-Thinker RGBW Light to the factory defaults!\n Are you sure you want to reset?";

/// Synchronous yes/no gate in front of destructive commands.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Declined,
}

/// Single-fire reload timer. Once armed it cannot be cancelled; arming it
/// again keeps the first deadline.
#[derive(Debug, Default, Clone)]
pub struct ReloadTimer {
    deadline: Option<Instant>,
}

impl ReloadTimer {
    /// Arms the timer. Returns false if it already was.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + WAIT);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }
}

/// What a user can ask the panel to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Toggle(String),
    /// Pointer moving over a range, nothing committed yet.
    RangeMove { key: String, value: i64 },
    RangeCommit { key: String, value: i64 },
    /// All three color channels in one edit.
    ColorCommit(Rgb),
    Save,
    Restart,
    Reset,
    GenerateApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Local change only.
    Applied,
    Sent,
    Invalid(ValidationReport),
    Declined,
    /// No control with that key.
    Unknown(String),
}

/// Result of one `Panel::step`.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Idle,
    Processed(Inbound),
    Reloaded,
}

pub struct Panel<V: View, S: CommandSink = Connection> {
    view: V,
    link: S,
    mirrors: MirrorSet,
    dispatcher: Dispatcher,
    ota: OtaMonitor,
    reload: ReloadTimer,
    confirm: Box<dyn Confirm>,
}

impl<V: View, S: CommandSink> Panel<V, S> {
    /// Creates a session. Destructive commands are declined until a
    /// confirmation gate is installed with `with_confirm`.
    pub fn new(mut view: V, link: S) -> Panel<V, S> {
        let mirrors = MirrorSet::builtin();
        mirrors.render_all(&mut view);
        Panel {
            view,
            link,
            mirrors,
            dispatcher: Dispatcher::new(),
            ota: OtaMonitor::new(),
            reload: ReloadTimer::default(),
            confirm: Box::new(|_: &str| false),
        }
    }

    pub fn with_confirm<C: Confirm + 'static>(mut self, confirm: C) -> Panel<V, S> {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn link(&self) -> &S {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut S {
        &mut self.link
    }

    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    pub fn ota(&self) -> &OtaMonitor {
        &self.ota
    }

    pub fn reload_timer(&self) -> &ReloadTimer {
        &self.reload
    }

    /// Handles one inbound item completely.
    pub fn process(&mut self, inbound: &Inbound, now: Instant) {
        match inbound {
            Inbound::Frame(frame) => self.on_frame(frame),
            Inbound::Telemetry(event) => {
                self.on_telemetry(event, now);
            }
            Inbound::Link(event) => self.on_link(event),
        }
    }

    pub fn on_frame(&mut self, frame: &Frame) {
        self.dispatcher
            .dispatch(frame, &mut self.mirrors, &mut self.view);
    }

    /// Raw command-channel text. Anything that is not a JSON object is
    /// dropped.
    pub fn on_text(&mut self, text: &str) {
        match Frame::parse(text) {
            Ok(frame) => self.on_frame(&frame),
            Err(err) => log::debug!("dropping frame: {}", err),
        }
    }

    /// Telemetry channel. Returns the OTA effects that were performed.
    pub fn on_telemetry(&mut self, event: &TelemetryEvent, now: Instant) -> Vec<ota::Effect> {
        match event {
            TelemetryEvent::Ota(ota_event) => {
                let effects = self.ota.handle(ota_event);
                for effect in &effects {
                    match effect {
                        ota::Effect::OpenProgress => self.view.open_modal(Modal::Ota),
                        ota::Effect::SetProgress(p) => self.view.set_progress(*p),
                        ota::Effect::AppendMessage(msg) => {
                            self.view.append_progress_message(msg)
                        }
                        ota::Effect::ScheduleReload => {
                            self.reload.schedule(now);
                        }
                    }
                }
                effects
            }
            TelemetryEvent::Open => {
                log::debug!("telemetry open");
                Vec::new()
            }
            TelemetryEvent::Error(err) => {
                log::debug!("telemetry error: {}", err);
                Vec::new()
            }
            TelemetryEvent::Message(data) => {
                log::debug!("message {}", data);
                Vec::new()
            }
            TelemetryEvent::Other { name, data } => {
                log::debug!("ignoring event {}: {}", name, data);
                Vec::new()
            }
        }
    }

    fn on_link(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Opened(channel) => log::debug!("{:?} channel open", channel),
            LinkEvent::Closed(channel) => log::debug!("{:?} channel closed", channel),
            LinkEvent::Error(channel, err) => log::debug!("{:?} channel error: {}", channel, err),
        }
    }

    fn send(&mut self, cmd: Command) -> Outcome {
        self.link.send(&cmd);
        Outcome::Sent
    }

    pub fn handle(&mut self, intent: Intent, now: Instant) -> Outcome {
        match intent {
            Intent::Toggle(key) => self.toggle(&key),
            Intent::RangeMove { key, value } => match self.mirrors.range_mut(&key) {
                Some(range) => {
                    range.pointer_move(value, &mut self.view);
                    Outcome::Applied
                }
                None => Outcome::Unknown(key),
            },
            Intent::RangeCommit { key, value } => self.commit_range(&key, value),
            Intent::ColorCommit(color) => self.commit_color(color),
            Intent::Save => match self.save() {
                Ok(()) => Outcome::Sent,
                Err(report) => Outcome::Invalid(report),
            },
            Intent::Restart => match self.restart(now) {
                Confirmation::Confirmed => Outcome::Sent,
                Confirmation::Declined => Outcome::Declined,
            },
            Intent::Reset => match self.reset(now) {
                Confirmation::Confirmed => Outcome::Sent,
                Confirmation::Declined => Outcome::Declined,
            },
            Intent::GenerateApiKey => {
                self.generate_api_key();
                Outcome::Applied
            }
        }
    }

    /// User click on a toggle.
    pub fn toggle(&mut self, key: &str) -> Outcome {
        let toggle = match self.mirrors.toggle_mut(key) {
            Some(toggle) => toggle,
            None => return Outcome::Unknown(key.to_string()),
        };
        match toggle.toggle_state(&mut self.view) {
            Some(cmd) => self.send(cmd),
            None => Outcome::Applied,
        }
    }

    /// Completed edit of a range.
    pub fn commit_range(&mut self, key: &str, value: i64) -> Outcome {
        match self.mirrors.commit(key, value, &mut self.view) {
            Some(cmd) => self.send(cmd),
            None => Outcome::Unknown(key.to_string()),
        }
    }

    /// Completed edit of the whole color.
    pub fn commit_color(&mut self, color: Rgb) -> Outcome {
        let cmd = self.mirrors.commit_color(color, &mut self.view);
        self.send(cmd)
    }

    /// Commits the settings form, all or nothing.
    pub fn save(&mut self) -> Result<(), ValidationReport> {
        let cmd = settings::commit(&mut self.view)?;
        self.send(cmd);
        Ok(())
    }

    pub fn restart(&mut self, now: Instant) -> Confirmation {
        self.destructive(DeviceCommand::Restart, RESTART_PROMPT, now)
    }

    pub fn reset(&mut self, now: Instant) -> Confirmation {
        self.destructive(DeviceCommand::Reset, RESET_PROMPT, now)
    }

    fn destructive(&mut self, cmd: DeviceCommand, prompt: &str, now: Instant) -> Confirmation {
        if !self.confirm.confirm(prompt) {
            log::info!("{} declined", cmd.name());
            return Confirmation::Declined;
        }
        self.send(compose::device(cmd));
        self.view.open_modal(Modal::Reload);
        self.reload.schedule(now);
        Confirmation::Confirmed
    }

    /// Writes a fresh key into the `api_key` field and returns it.
    pub fn generate_api_key(&mut self) -> String {
        let key = settings::generate_api_key();
        self.view.set_field_value(keys::API_KEY, &Value::from(key.as_str()));
        key
    }

    /// Performs the reload once the timer is due. Returns true if it did.
    pub fn poll_reload(&mut self, now: Instant) -> bool {
        if !self.reload.is_due(now) {
            return false;
        }
        log::info!("reloading session");
        self.view.reset();
        self.mirrors = MirrorSet::builtin();
        self.mirrors.render_all(&mut self.view);
        self.dispatcher = Dispatcher::new();
        self.ota = OtaMonitor::new();
        self.reload = ReloadTimer::default();
        true
    }
}

impl<V: View> Panel<V, Connection> {
    /// Opens both channels.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        self.link.connect()?;
        self.link.connect_telemetry()
    }

    /// Waits up to `timeout` for one inbound item and handles it, then
    /// performs a due reload, reconnecting both channels.
    pub fn step(&mut self, timeout: Duration) -> Result<Step, ConnectError> {
        let now = Instant::now();
        let timeout = match self.reload.deadline() {
            Some(deadline) => std::cmp::min(timeout, deadline.saturating_duration_since(now)),
            None => timeout,
        };
        let inbound = self.link.recv_timeout(timeout);
        if let Some(inbound) = &inbound {
            self.process(inbound, Instant::now());
        }
        if self.poll_reload(Instant::now()) {
            self.link.close();
            self.connect()?;
            return Ok(Step::Reloaded);
        }
        Ok(match inbound {
            Some(inbound) => Step::Processed(inbound),
            None => Step::Idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::proto::OtaEvent;
    use crate::panel::view::ViewModel;
    use serde_json::json;

    fn panel() -> Panel<ViewModel, Vec<Command>> {
        Panel::new(ViewModel::new(), Vec::new())
    }

    #[test]
    fn reload_timer_is_single_fire() {
        let t0 = Instant::now();
        let mut timer = ReloadTimer::default();
        assert!(timer.schedule(t0));
        assert!(!timer.schedule(t0 + Duration::from_secs(5)));
        assert_eq!(timer.deadline(), Some(t0 + WAIT));
        assert!(!timer.is_due(t0 + Duration::from_secs(9)));
        assert!(timer.is_due(t0 + WAIT));
    }

    #[test]
    fn declined_restart_sends_nothing() {
        let mut panel = panel();
        let now = Instant::now();
        assert_eq!(panel.restart(now), Confirmation::Declined);
        assert!(panel.link().is_empty());
        assert!(!panel.reload_timer().is_armed());
    }

    #[test]
    fn confirmed_reset_waits_and_reloads() {
        let mut prompts = Vec::new();
        let mut panel = panel().with_confirm(move |prompt: &str| {
            prompts.push(prompt.to_string());
            prompt == RESET_PROMPT
        });
        let now = Instant::now();
        panel.on_text(r#"{"brightness": 40}"#);

        assert_eq!(panel.handle(Intent::Reset, now), Outcome::Sent);
        assert_eq!(panel.link()[0].to_value(), json!({"command": "reset"}));
        assert!(panel.view().is_modal_open(Modal::Reload));

        assert!(!panel.poll_reload(now + Duration::from_secs(1)));
        assert!(panel.poll_reload(now + WAIT));
        assert!(!panel.view().is_modal_open(Modal::Reload));
        assert_eq!(panel.mirrors().range(keys::BRIGHTNESS).map(|r| r.value()), Some(0));
        assert!(!panel.reload_timer().is_armed());
    }

    #[test]
    fn local_toggle_sends_nothing() {
        let mut panel = panel();
        assert_eq!(panel.toggle(keys::HA_DISCOVERY), Outcome::Applied);
        assert_eq!(panel.toggle("nope"), Outcome::Unknown("nope".to_string()));
        assert!(panel.link().is_empty());
    }

    #[test]
    fn pointer_moves_are_not_sent() {
        let mut panel = panel();
        let now = Instant::now();
        let intent = Intent::RangeMove {
            key: keys::BRIGHTNESS.to_string(),
            value: 51,
        };
        assert_eq!(panel.handle(intent, now), Outcome::Applied);
        assert!(panel.link().is_empty());
        let fill = panel.view().slider("slider_brightness").map(|s| s.fill);
        assert!(fill.is_some_and(|f| (f - 20.0).abs() < 1e-9));
        assert_eq!(panel.mirrors().range(keys::BRIGHTNESS).map(|r| r.value()), Some(0));
    }

    #[test]
    fn api_key_lands_in_form() {
        let mut panel = panel();
        let key = panel.generate_api_key();
        assert_eq!(
            panel.view().field("api_key").map(|f| f.value.text().to_string()),
            Some(key)
        );
    }

    #[test]
    fn ota_completion_schedules_reload() {
        let mut panel = panel();
        let now = Instant::now();
        panel.on_telemetry(&TelemetryEvent::Ota(OtaEvent::Start), now);
        assert!(panel.view().is_modal_open(Modal::Ota));
        panel.on_telemetry(&TelemetryEvent::Ota(OtaEvent::Progress(100)), now);
        assert_eq!(panel.view().progress(), Some(100));
        assert!(panel.reload_timer().is_armed());
        assert!(!panel.view().is_modal_open(Modal::Reload));
    }
}
