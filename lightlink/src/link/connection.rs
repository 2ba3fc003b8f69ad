//! Connection manager
//!
//! A `Connection` owns the command channel and the telemetry channel of
//! one device. Both ports deliver into a single crossbeam queue, which the
//! session thread drains in arrival order through `recv_timeout`/`try_recv`.
//!
//! Sending is fire-and-forget: there is no acknowledgement, no retry and no
//! reconnection. A send while the command channel is not open is dropped
//! with a log line.

use super::port::{self, PortEvent, RecvError};
use super::proto::{Command, Frame, TelemetryEvent};
use super::util::{self, Endpoint};

use crossbeam::channel;
use std::io;
use std::time::Duration;

/// Which of the two channels an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Command,
    Telemetry,
}

/// Channel lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened(Channel),
    Closed(Channel),
    Error(Channel, String),
}

/// Something for the session to process
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed command-channel frame.
    Frame(Frame),
    Telemetry(TelemetryEvent),
    Link(LinkEvent),
}

/// Anything that accepts outbound commands. The session composes commands
/// and hands them to a sink; `Connection` is the real one.
pub trait CommandSink {
    fn send(&mut self, cmd: &Command);
}

/// Collecting sink, handy when nothing should go on the wire.
impl CommandSink for Vec<Command> {
    fn send(&mut self, cmd: &Command) {
        self.push(cmd.clone());
    }
}

#[derive(Debug)]
pub enum ConnectError {
    Resolve(io::Error),
    IO(io::Error),
}

impl From<io::Error> for ConnectError {
    fn from(err: io::Error) -> ConnectError {
        ConnectError::IO(err)
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Resolve(err) => write!(f, "cannot resolve device address: {}", err),
            ConnectError::IO(err) => write!(f, "cannot connect: {}", err),
        }
    }
}

/// Raw delivery from a port thread. Each delivery carries the generation
/// of the channel it belongs to, so that anything a discarded port still
/// reports can be told apart.
enum Delivery {
    Command(u64, PortEvent<String>),
    Telemetry(u64, PortEvent<port::sse::Event>),
}

/// Default size of the inbound queue shared by both ports.
pub static DEFAULT_RX_CHANNEL_SIZE: usize = 64;

pub struct Connection {
    command_endpoint: Endpoint,
    telemetry_endpoint: Endpoint,
    command: Option<port::Port<String>>,
    telemetry: Option<port::sse::EventStream>,
    generation: u64,
    telemetry_generation: u64,
    command_open: bool,
    telemetry_open: bool,
    rx_send: channel::Sender<Delivery>,
    rx: channel::Receiver<Delivery>,
    subscribers: Vec<channel::Sender<LinkEvent>>,
}

impl Connection {
    /// Creates a connection to the device web server at `host:port`.
    /// Nothing is opened until `connect()`.
    pub fn new(host: &str, port: u16) -> Connection {
        Connection::with_endpoints(Endpoint::command(host, port), Endpoint::telemetry(host, port))
    }

    pub fn with_endpoints(command: Endpoint, telemetry: Endpoint) -> Connection {
        let size = util::env_bufsize("LIGHTLINK_RX_BUFSIZE", DEFAULT_RX_CHANNEL_SIZE);
        let (rx_send, rx) = channel::bounded::<Delivery>(size);
        Connection {
            command_endpoint: command,
            telemetry_endpoint: telemetry,
            command: None,
            telemetry: None,
            generation: 0,
            telemetry_generation: 0,
            command_open: false,
            telemetry_open: false,
            rx_send,
            rx,
            subscribers: Vec::new(),
        }
    }

    pub fn command_endpoint(&self) -> &Endpoint {
        &self.command_endpoint
    }

    pub fn telemetry_endpoint(&self) -> &Endpoint {
        &self.telemetry_endpoint
    }

    /// Opens the command channel, closing the current one first if any.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        if self.command.take().is_some() {
            log::info!("closing command channel to {}", self.command_endpoint.url());
            self.set_command_open(false);
        }
        self.generation += 1;
        let generation = self.generation;
        let rx_send = self.rx_send.clone();
        self.command_endpoint
            .resolve()
            .map_err(ConnectError::Resolve)?;
        let port = port::Port::websocket(&self.command_endpoint, move |event| {
            rx_send
                .send(Delivery::Command(generation, event))
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        })?;
        log::info!("connecting command channel to {}", self.command_endpoint.url());
        self.command = Some(port);
        Ok(())
    }

    /// Opens the telemetry channel. A second call while it is open does
    /// nothing.
    pub fn connect_telemetry(&mut self) -> Result<(), ConnectError> {
        if self.telemetry.is_some() {
            return Ok(());
        }
        self.telemetry_generation += 1;
        let generation = self.telemetry_generation;
        let rx_send = self.rx_send.clone();
        self.telemetry_endpoint
            .resolve()
            .map_err(ConnectError::Resolve)?;
        let port = port::sse::EventStream::open(&self.telemetry_endpoint, move |event| {
            rx_send
                .send(Delivery::Telemetry(generation, event))
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        })?;
        log::info!("connecting telemetry channel to {}", self.telemetry_endpoint.url());
        self.telemetry = Some(port);
        Ok(())
    }

    /// Drops both channels. In-flight sends are not guaranteed delivered.
    pub fn close(&mut self) {
        if self.command.take().is_some() {
            self.set_command_open(false);
        }
        if self.telemetry.take().is_some() && self.telemetry_open {
            self.telemetry_open = false;
            self.notify(LinkEvent::Closed(Channel::Telemetry));
        }
        self.generation += 1;
        self.telemetry_generation += 1;
    }

    pub fn is_open(&self) -> bool {
        self.command.is_some() && self.command_open
    }

    pub fn is_telemetry_open(&self) -> bool {
        self.telemetry.is_some() && self.telemetry_open
    }

    /// Returns a receiver of lifecycle events for this connection.
    pub fn subscribe(&mut self) -> channel::Receiver<LinkEvent> {
        let (s, r) = channel::unbounded();
        self.subscribers.push(s);
        r
    }

    fn notify(&mut self, event: LinkEvent) {
        self.subscribers.retain(|sub| sub.send(event.clone()).is_ok());
    }

    fn set_command_open(&mut self, open: bool) {
        if self.command_open != open {
            self.command_open = open;
            let event = if open {
                LinkEvent::Opened(Channel::Command)
            } else {
                LinkEvent::Closed(Channel::Command)
            };
            self.notify(event);
        }
    }

    /// Turns a raw delivery into something for the session, updating the
    /// lifecycle state on the way. Stale and malformed input yields `None`.
    fn accept(&mut self, delivery: Delivery) -> Option<Inbound> {
        match delivery {
            Delivery::Command(generation, _) if generation != self.generation => None,
            Delivery::Telemetry(generation, _) if generation != self.telemetry_generation => None,
            Delivery::Command(_, PortEvent::Opened) => {
                log::info!("[WEBSOCKET] Connected to {}", self.command_endpoint.url());
                self.set_command_open(true);
                Some(Inbound::Link(LinkEvent::Opened(Channel::Command)))
            }
            Delivery::Command(_, PortEvent::Received(text)) => match Frame::parse(&text) {
                Ok(frame) => Some(Inbound::Frame(frame)),
                Err(err) => {
                    log::debug!("[WEBSOCKET] dropping frame: {}", err);
                    None
                }
            },
            Delivery::Command(_, PortEvent::Failed(err)) => {
                self.command.take();
                let was_open = self.command_open;
                self.set_command_open(false);
                Some(Inbound::Link(match err {
                    RecvError::Disconnected if was_open => {
                        log::info!("[WEBSOCKET] Connection closed");
                        LinkEvent::Closed(Channel::Command)
                    }
                    err => {
                        log::warn!("[WEBSOCKET] Error: {}", err);
                        let event = LinkEvent::Error(Channel::Command, err.to_string());
                        self.notify(event.clone());
                        event
                    }
                }))
            }
            Delivery::Telemetry(_, PortEvent::Opened) => {
                log::info!("[EVENTSOURCE] Connected to {}", self.telemetry_endpoint.url());
                self.telemetry_open = true;
                self.notify(LinkEvent::Opened(Channel::Telemetry));
                Some(Inbound::Telemetry(TelemetryEvent::Open))
            }
            Delivery::Telemetry(_, PortEvent::Received(event)) => Some(Inbound::Telemetry(
                TelemetryEvent::from_named(&event.name, &event.data),
            )),
            Delivery::Telemetry(_, PortEvent::Failed(err)) => {
                if self.telemetry.take().is_none() {
                    return None;
                }
                log::info!("[EVENTSOURCE] Connection closed: {}", err);
                self.telemetry_open = false;
                self.notify(LinkEvent::Closed(Channel::Telemetry));
                Some(Inbound::Telemetry(TelemetryEvent::Error(err.to_string())))
            }
        }
    }

    /// Waits up to `timeout` for the next inbound item.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Inbound> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let delivery = self.rx.recv_deadline(deadline).ok()?;
            if let Some(inbound) = self.accept(delivery) {
                return Some(inbound);
            }
        }
    }

    /// Returns the next inbound item if one is already queued.
    pub fn try_recv(&mut self) -> Option<Inbound> {
        loop {
            let delivery = self.rx.try_recv().ok()?;
            if let Some(inbound) = self.accept(delivery) {
                return Some(inbound);
            }
        }
    }
}

impl CommandSink for Connection {
    fn send(&mut self, cmd: &Command) {
        let text = cmd.serialize();
        match &self.command {
            Some(port) if self.command_open => match port.try_send(text.clone()) {
                Ok(()) => log::debug!("[WEBSOCKET] sent {}", text),
                Err(err) => log::warn!("[WEBSOCKET] dropped outgoing frame: {:?}", err),
            },
            _ => log::debug!("[WEBSOCKET] not open, dropped {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::proto::DeviceCommand;

    #[test]
    fn send_without_channel_is_silent() {
        let mut conn = Connection::new("127.0.0.1", 1);
        assert!(!conn.is_open());
        conn.send(&Command::Device(DeviceCommand::Restart));
        assert!(conn.try_recv().is_none());
    }

    #[test]
    fn malformed_and_stale_deliveries_are_dropped() {
        let mut conn = Connection::new("127.0.0.1", 1);
        conn.generation = 2;
        assert_eq!(
            conn.accept(Delivery::Command(2, PortEvent::Received("{oops".to_string()))),
            None
        );
        assert_eq!(
            conn.accept(Delivery::Command(1, PortEvent::Opened)),
            None
        );
        assert!(!conn.command_open);

        let inbound = conn.accept(Delivery::Command(
            2,
            PortEvent::Received(r#"{"brightness":3}"#.to_string()),
        ));
        assert!(matches!(inbound, Some(Inbound::Frame(_))));
    }

    #[test]
    fn lifecycle_is_observable() {
        let mut conn = Connection::new("127.0.0.1", 1);
        let events = conn.subscribe();
        conn.generation = 1;
        conn.accept(Delivery::Command(1, PortEvent::Opened));
        conn.accept(Delivery::Command(1, PortEvent::Failed(RecvError::Disconnected)));
        assert_eq!(events.try_recv(), Ok(LinkEvent::Opened(Channel::Command)));
        assert_eq!(events.try_recv(), Ok(LinkEvent::Closed(Channel::Command)));
        assert!(!conn.is_open());
    }

    #[test]
    fn stale_telemetry_failure_keeps_current_stream() {
        let mut conn = Connection::new("127.0.0.1", 1);
        let events = conn.subscribe();
        conn.telemetry_generation = 2;
        conn.telemetry_open = true;
        assert_eq!(
            conn.accept(Delivery::Telemetry(1, PortEvent::Failed(RecvError::Disconnected))),
            None
        );
        assert!(conn.telemetry_open);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn ota_events_pass_through() {
        let mut conn = Connection::new("127.0.0.1", 1);
        conn.telemetry_generation = 1;
        let inbound = conn.accept(Delivery::Telemetry(1, PortEvent::Received(port::sse::Event {
            name: "ota".to_string(),
            data: "start".to_string(),
        })));
        assert_eq!(
            inbound,
            Some(Inbound::Telemetry(TelemetryEvent::Ota(
                crate::link::proto::OtaEvent::Start
            )))
        );
    }
}
