//! Event stream
//!
//! The telemetry channel: an HTTP GET on a `text/event-stream` resource,
//! read with a blocking `reqwest` client on a dedicated thread and decoded
//! into named events. Like `Port`, it reports to its owner through a
//! callback, and dropping the `EventStream` shuts the thread down.

use super::super::util::Endpoint;
use super::{PortEvent, RecvError};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name; `message` when the stream did not name it.
    pub name: String,
    pub data: String,
}

/// Line-oriented event stream decoder. Feed it body bytes in any split;
/// events come out once their terminating blank line arrived.
#[derive(Default)]
pub struct EventParser {
    line: Vec<u8>,
    /// Last byte seen was a CR, so a following LF belongs to it.
    after_cr: bool,
    name: String,
    data: Vec<String>,
    events: VecDeque<Event>,
}

impl EventParser {
    pub fn new() -> EventParser {
        EventParser::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    let line = std::mem::take(&mut self.line);
                    self.process_line(&String::from_utf8_lossy(&line));
                }
                _ => {
                    self.after_cr = false;
                    self.line.push(byte);
                }
            }
        }
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.name = value.to_string(),
            "data" => self.data.push(value.to_string()),
            // id and retry only matter for reconnection, which is not done.
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let name = std::mem::take(&mut self.name);
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.events.push_back(Event {
            name: if name.is_empty() {
                "message".to_string()
            } else {
                name
            },
            data,
        });
    }
}

/// Bounds connecting, waiting for the response head and every single body
/// read. A body read running into it only means the thread checks whether
/// its owner is still there.
pub static READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Handle of a running event stream thread.
pub struct EventStream {
    closed: Arc<AtomicBool>,
}

impl EventStream {
    /// Opens the stream at `endpoint`. Events and lifecycle changes are
    /// passed to `rx` from the stream thread. If `rx` returns an `Err()`,
    /// the stream is closed.
    pub fn open<RXT: Fn(PortEvent<Event>) -> io::Result<()> + Send + 'static>(
        endpoint: &Endpoint,
        rx: RXT,
    ) -> io::Result<EventStream> {
        let closed = Arc::new(AtomicBool::new(false));
        let url = endpoint.url();
        let flag = closed.clone();
        thread::Builder::new()
            .name("lightlink-events".to_string())
            .spawn(move || stream_thread(&url, &flag, rx))?;
        Ok(EventStream { closed })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn is_timeout(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::TimedOut {
        return true;
    }
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .map_or(false, |err| err.is_timeout())
}

fn stream_thread<RXT: Fn(PortEvent<Event>) -> io::Result<()>>(
    url: &str,
    closed: &AtomicBool,
    rx: RXT,
) {
    let fail = |err: RecvError| {
        if !closed.load(Ordering::SeqCst) {
            let _ = rx(PortEvent::Failed(err));
        }
    };

    let client = match reqwest::blocking::Client::builder()
        .timeout(READ_TIMEOUT)
        .no_proxy()
        .build()
    {
        Ok(client) => client,
        Err(err) => return fail(RecvError::Http(err)),
    };
    let mut response = match client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .send()
    {
        Ok(response) => response,
        Err(err) => return fail(RecvError::Http(err)),
    };
    if !response.status().is_success() {
        return fail(RecvError::Handshake(response.status().to_string()));
    }
    if closed.load(Ordering::SeqCst) || rx(PortEvent::Opened).is_err() {
        return;
    }

    let mut parser = EventParser::new();
    let mut buf = [0u8; 1024];
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }
        match response.read(&mut buf) {
            Ok(0) => return fail(RecvError::Disconnected),
            Ok(size) => {
                parser.feed(&buf[..size]);
                while let Some(event) = parser.next_event() {
                    if closed.load(Ordering::SeqCst) || rx(PortEvent::Received(event)).is_err() {
                        return;
                    }
                }
            }
            Err(err) if is_timeout(&err) || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return fail(RecvError::IO(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(parser: &mut EventParser) -> Vec<Event> {
        std::iter::from_fn(|| parser.next_event()).collect()
    }

    #[test]
    fn named_events_split_anywhere() {
        let mut parser = EventParser::new();
        parser.feed(b"event: ota\r\nda");
        assert!(drain(&mut parser).is_empty());
        parser.feed(b"ta: p-10\r\n\r\n: keepalive\n\nevent: ota\ndata: p-55\n\n");
        assert_eq!(
            drain(&mut parser),
            vec![
                Event {
                    name: "ota".to_string(),
                    data: "p-10".to_string()
                },
                Event {
                    name: "ota".to_string(),
                    data: "p-55".to_string()
                },
            ]
        );
    }

    #[test]
    fn unnamed_multiline_message() {
        let mut parser = EventParser::new();
        parser.feed(b"id: 4\ndata: hello\ndata: world\n\n");
        let events = drain(&mut parser);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "message");
        assert_eq!(events[0].data, "hello\nworld");
    }
}
