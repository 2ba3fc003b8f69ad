//! Abstract port
//!
//! The `Port` object provides a few things:
//! - Abstracting the specific `RawPort` of the WebSocket command channel
//!   away from its owner.
//! - Connecting the ports to external code via an owned callback, which
//!   bridges the `mio` world of the low level ports with crossbeam
//!   channels.
//! - Automating basic port operations: polling, as-needed draining of
//!   partial writes, and holding back outgoing messages until the
//!   protocol handshake is over.
//!
//! Note: `Port` sets up a dedicated thread to perform the above. The
//! telemetry channel is an `sse::EventStream`, which runs its own thread.

mod iobuf;
pub mod sse;
pub mod ws;

use super::util::Endpoint;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub use iobuf::IOBUF_SIZE;

/// Possible errors when receiving from a `Port`
#[derive(Debug)]
pub enum RecvError {
    /// Nothing available at this time.
    NotReady,
    /// The remote end closed the connection.
    Disconnected,
    /// The handshake was refused, e.g. a non-101 upgrade reply.
    Handshake(String),
    /// The peer violated the framing rules.
    Protocol(&'static str),
    /// A single frame or header block exceeds the receive buffer.
    Overflow,
    /// Low level IO error.
    IO(io::Error),
    /// HTTP client error on the event stream.
    Http(reqwest::Error),
}

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvError::NotReady => write!(f, "not ready"),
            RecvError::Disconnected => write!(f, "disconnected"),
            RecvError::Handshake(status) => write!(f, "handshake refused: {}", status),
            RecvError::Protocol(what) => write!(f, "protocol error: {}", what),
            RecvError::Overflow => write!(f, "frame exceeds receive buffer"),
            RecvError::IO(err) => write!(f, "io error: {}", err),
            RecvError::Http(err) => write!(f, "http error: {}", err),
        }
    }
}

/// Possible errors when sending to a `Port`
#[derive(Debug)]
pub enum SendError {
    /// Used internally by `RawPort`s: the message was written partially and
    /// the rest must be drained before anything else is sent.
    MustDrain,
    /// The outgoing queue is full.
    Full,
    /// The port thread is gone.
    Disconnected,
    /// The message does not fit in the transmit buffer.
    Oversize,
    IO(io::Error),
}

/// What the port thread reports to its owner through the rx callback.
#[derive(Debug)]
pub enum PortEvent<T> {
    /// The handshake completed; messages may follow.
    Opened,
    Received(T),
    /// The port is being torn down because of this error.
    Failed(RecvError),
}

/// Generic interface for the low level part of a port.
trait RawPort {
    type Rx;
    type Tx;

    /// Returns a message without blocking, or `RecvError::NotReady` if one
    /// is not available. Any other error tears the port down.
    fn recv(&mut self) -> Result<Self::Rx, RecvError>;

    /// Attempts to send a message. `MustDrain` means it was written
    /// partially and `drain()` has to succeed before the next send.
    fn send(&mut self, msg: &Self::Tx) -> Result<(), SendError>;

    /// Drain a partially written message.
    fn drain(&mut self) -> Result<(), SendError> {
        Ok(())
    }

    /// Whether there is buffered outgoing data. This includes data the port
    /// queued by itself, like the handshake request or a pong.
    fn has_data_to_drain(&self) -> bool {
        false
    }

    /// True until the protocol handshake is complete. `Port` holds back
    /// outgoing messages while this is true.
    fn startup_holdoff(&self) -> bool {
        false
    }

    /// Best-effort goodbye before the stream is dropped.
    fn shutdown(&mut self) {}
}

/// Opaque abstract port object, encapsulating I/O with an underlying
/// `RawPort` on a dedicated thread.
pub struct Port<Tx> {
    tx: Option<crossbeam::channel::Sender<Tx>>,
    waker: mio::Waker,
    /// Raised when the owner drops the port.
    closed: Arc<AtomicBool>,
}

/// Size of the queue of outgoing messages to the port thread.
pub static DEFAULT_TX_CHANNEL_SIZE: usize = 32;

const WAKER: mio::Token = mio::Token(0);
const STREAM: mio::Token = mio::Token(1);

impl<Tx: Send + 'static> Port<Tx> {
    /// Port thread event loop. Bridges `mio` and `crossbeam::channel`
    /// and takes care of tx draining and the startup holdoff.
    fn poller_thread<
        RawPortT: RawPort<Tx = Tx> + mio::event::Source,
        RxCallbackT: Fn(PortEvent<RawPortT::Rx>) -> io::Result<()>,
    >(
        mut raw_port: RawPortT,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        tx: crossbeam::channel::Receiver<Tx>,
        closed: Arc<AtomicBool>,
    ) {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(4);
        let mut needs_draining = raw_port.has_data_to_drain();
        let mut startup = raw_port.startup_holdoff();
        // Set when the tx queue was signaled while we could not send.
        let mut needs_tx_queue_check = false;

        let interest = if needs_draining {
            mio::Interest::READABLE.add(mio::Interest::WRITABLE)
        } else {
            mio::Interest::READABLE
        };
        if let Err(e) = poll.registry().register(&mut raw_port, STREAM, interest) {
            let _ = rx(PortEvent::Failed(RecvError::IO(e)));
            return;
        }

        'ioloop: loop {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = rx(PortEvent::Failed(RecvError::IO(e)));
                break 'ioloop;
            }

            let mut check_tx_channel = false;

            for event in events.iter() {
                match event.token() {
                    WAKER => {
                        // Messages were queued, or the port was dropped.
                        if closed.load(Ordering::SeqCst) && (needs_draining || startup) {
                            // Nothing queued can go out, so do not wait for
                            // the handshake or the drain to finish.
                            break 'ioloop;
                        }
                        if needs_draining || startup {
                            needs_tx_queue_check = true;
                        } else {
                            check_tx_channel = true;
                        }
                    }
                    STREAM => {
                        if event.is_writable() && needs_draining {
                            match raw_port.drain() {
                                Ok(_) => needs_draining = false,
                                Err(SendError::MustDrain) => {}
                                Err(SendError::IO(e)) => {
                                    let _ = rx(PortEvent::Failed(RecvError::IO(e)));
                                    break 'ioloop;
                                }
                                Err(_) => {
                                    let _ = rx(PortEvent::Failed(RecvError::Disconnected));
                                    break 'ioloop;
                                }
                            }
                        }
                        if event.is_readable() || event.is_read_closed() {
                            loop {
                                match raw_port.recv() {
                                    Ok(msg) => {
                                        if startup && !raw_port.startup_holdoff() {
                                            startup = false;
                                            needs_tx_queue_check = true;
                                            if rx(PortEvent::Opened).is_err() {
                                                break 'ioloop;
                                            }
                                        }
                                        if rx(PortEvent::Received(msg)).is_err() {
                                            break 'ioloop;
                                        }
                                    }
                                    Err(RecvError::NotReady) => break,
                                    Err(e) => {
                                        let _ = rx(PortEvent::Failed(e));
                                        break 'ioloop;
                                    }
                                }
                            }
                        }
                    }
                    mio::Token(x) => {
                        panic!("Unexpected token {}", x);
                    }
                }
            }

            if startup && !raw_port.startup_holdoff() {
                startup = false;
                needs_tx_queue_check = true;
                if rx(PortEvent::Opened).is_err() {
                    break 'ioloop;
                }
            }

            if !needs_draining && !startup && needs_tx_queue_check {
                check_tx_channel = true;
                needs_tx_queue_check = false;
            }

            if check_tx_channel {
                loop {
                    match tx.try_recv() {
                        Ok(msg) => match raw_port.send(&msg) {
                            Ok(_) => {}
                            Err(SendError::MustDrain) => {
                                needs_draining = true;
                                needs_tx_queue_check = true;
                                break;
                            }
                            Err(SendError::Oversize) => {
                                log::warn!("dropping outgoing message larger than the tx buffer");
                            }
                            Err(SendError::IO(e)) => {
                                let _ = rx(PortEvent::Failed(RecvError::IO(e)));
                                break 'ioloop;
                            }
                            Err(_) => {
                                let _ = rx(PortEvent::Failed(RecvError::Disconnected));
                                break 'ioloop;
                            }
                        },
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            // The owner dropped the port.
                            raw_port.shutdown();
                            let _ = raw_port.drain();
                            break 'ioloop;
                        }
                    }
                }
            }

            // The raw port may have queued data on its own (pong, close reply).
            if !needs_draining && raw_port.has_data_to_drain() {
                match raw_port.drain() {
                    Ok(_) => {}
                    Err(SendError::MustDrain) => needs_draining = true,
                    Err(_) => {
                        let _ = rx(PortEvent::Failed(RecvError::Disconnected));
                        break 'ioloop;
                    }
                }
            }

            let interest = if needs_draining {
                mio::Interest::READABLE.add(mio::Interest::WRITABLE)
            } else {
                mio::Interest::READABLE
            };
            if let Err(e) = poll.registry().reregister(&mut raw_port, STREAM, interest) {
                let _ = rx(PortEvent::Failed(RecvError::IO(e)));
                break 'ioloop;
            }
        }
    }

    /// Create a `Port` from a `RawPort` and a rx callback.
    fn from_raw<
        RawPortT: RawPort<Tx = Tx> + mio::event::Source + Send + 'static,
        RxCallbackT: Fn(PortEvent<RawPortT::Rx>) -> io::Result<()> + Send + 'static,
    >(
        raw_port: RawPortT,
        rx: RxCallbackT,
    ) -> io::Result<Port<Tx>> {
        let (tx, ttx) = crossbeam::channel::bounded::<Tx>(DEFAULT_TX_CHANNEL_SIZE);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER)?;
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        thread::Builder::new()
            .name("lightlink-port".to_string())
            .spawn(move || {
                Port::<Tx>::poller_thread(raw_port, poll, rx, ttx, flag);
            })?;
        Ok(Port {
            tx: Some(tx),
            waker,
            closed,
        })
    }

    /// Attempts to queue a message for this port without blocking.
    pub fn try_send(&self, msg: Tx) -> Result<(), SendError> {
        use crossbeam::channel::TrySendError;
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Err(SendError::Disconnected),
        };
        match tx.try_send(msg) {
            Ok(()) => match self.waker.wake() {
                Ok(()) => Ok(()),
                Err(e) => Err(SendError::IO(e)),
            },
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }
}

impl Port<String> {
    /// Opens a WebSocket command channel to `endpoint`. Text frames and
    /// lifecycle changes are passed to `rx` from the port thread. If `rx`
    /// returns an `Err()`, the port is closed.
    pub fn websocket<RXT: Fn(PortEvent<String>) -> io::Result<()> + Send + 'static>(
        endpoint: &Endpoint,
        rx: RXT,
    ) -> io::Result<Port<String>> {
        Port::from_raw(ws::Port::new(endpoint)?, rx)
    }
}

impl<Tx> Drop for Port<Tx> {
    fn drop(&mut self) {
        // Closing the queue and waking the thread makes it shut down.
        self.closed.store(true, Ordering::SeqCst);
        self.tx.take();
        let _ = self.waker.wake();
    }
}
