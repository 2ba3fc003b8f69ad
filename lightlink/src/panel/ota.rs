//! Firmware update progress
//!
//! `transition` is pure; the session performs the returned effects.

use crate::link::proto::OtaEvent;

pub const COMPLETED_MESSAGE: &str =
    "Completed successfully! Please wait for your Ai-Thinker RGBW Light to be restarted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OtaState {
    #[default]
    Idle,
    Active {
        percent: u8,
    },
    /// Latched; only a new session goes back to `Idle`.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenProgress,
    SetProgress(u8),
    AppendMessage(&'static str),
    ScheduleReload,
}

pub fn transition(state: OtaState, event: &OtaEvent) -> (OtaState, Vec<Effect>) {
    match (state, event) {
        (OtaState::Idle, OtaEvent::Start) => {
            (OtaState::Active { percent: 0 }, vec![Effect::OpenProgress])
        }
        (_, OtaEvent::Start) => (state, vec![Effect::OpenProgress]),
        (OtaState::Completed, OtaEvent::Progress(p)) => (state, vec![Effect::SetProgress(*p)]),
        (OtaState::Idle, OtaEvent::Progress(p)) | (OtaState::Active { .. }, OtaEvent::Progress(p)) => {
            // Only `start` opens the progress view.
            let mut effects = vec![Effect::SetProgress(*p)];
            if *p >= 100 {
                effects.push(Effect::AppendMessage(COMPLETED_MESSAGE));
                effects.push(Effect::ScheduleReload);
                (OtaState::Completed, effects)
            } else {
                (OtaState::Active { percent: *p }, effects)
            }
        }
        (_, OtaEvent::Unrecognized(data)) => {
            log::debug!("ignoring ota event {:?}", data);
            (state, Vec::new())
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct OtaMonitor {
    state: OtaState,
}

impl OtaMonitor {
    pub fn new() -> OtaMonitor {
        OtaMonitor::default()
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == OtaState::Completed
    }

    pub fn handle(&mut self, event: &OtaEvent) -> Vec<Effect> {
        let (next, effects) = transition(self.state, event);
        if next != self.state {
            log::info!("firmware update: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[OtaEvent]) -> (OtaMonitor, Vec<Effect>) {
        let mut monitor = OtaMonitor::new();
        let effects = events.iter().flat_map(|e| monitor.handle(e)).collect();
        (monitor, effects)
    }

    #[test]
    fn completes_once() {
        let (monitor, effects) = run(&[
            OtaEvent::Start,
            OtaEvent::Progress(10),
            OtaEvent::Progress(55),
            OtaEvent::Progress(100),
            OtaEvent::Progress(100),
        ]);
        assert!(monitor.is_completed());
        let count = |want: &Effect| effects.iter().filter(|e| *e == want).count();
        assert_eq!(count(&Effect::AppendMessage(COMPLETED_MESSAGE)), 1);
        assert_eq!(count(&Effect::ScheduleReload), 1);
        assert_eq!(count(&Effect::SetProgress(100)), 2);
        assert_eq!(count(&Effect::OpenProgress), 1);
    }

    #[test]
    fn progress_without_start_keeps_view_closed() {
        let (state, effects) = transition(OtaState::Idle, &OtaEvent::Progress(5));
        assert_eq!(state, OtaState::Active { percent: 5 });
        assert_eq!(effects, vec![Effect::SetProgress(5)]);
    }

    #[test]
    fn garbage_changes_nothing() {
        let state = OtaState::Active { percent: 40 };
        let (next, effects) = transition(state, &OtaEvent::Unrecognized("p-".to_string()));
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }
}
