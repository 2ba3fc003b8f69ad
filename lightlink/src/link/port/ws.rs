//! WebSocket Port
//!
//! Implements a `RawPort` for the command channel: an RFC 6455 client over
//! a non-blocking TCP stream. Only text messages are relevant; binary
//! messages are skipped, pings are answered, and a close frame ends the
//! port.

use super::super::util::Endpoint;
use super::{iobuf::IOBuf, RawPort, RecvError, SendError};
use base64::Engine;
use mio::net::TcpStream;
use sha1::{Digest, Sha1};
use std::io;
use std::io::Write;

/// Appended to the nonce before hashing, RFC 6455 section 1.3.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct WireFrame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Decodes one frame from the start of `data`. Returns the frame and the
/// number of bytes it used, or `NotReady` if more data is needed.
pub(crate) fn decode_frame(data: &[u8]) -> Result<(WireFrame, usize), RecvError> {
    if data.len() < 2 {
        return Err(RecvError::NotReady);
    }
    let fin = data[0] & 0x80 != 0;
    let opcode = data[0] & 0x0f;
    let masked = data[1] & 0x80 != 0;
    let (len, mut hdr) = match data[1] & 0x7f {
        126 => {
            if data.len() < 4 {
                return Err(RecvError::NotReady);
            }
            (u16::from_be_bytes([data[2], data[3]]) as u64, 4)
        }
        127 => {
            if data.len() < 10 {
                return Err(RecvError::NotReady);
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[2..10]);
            (u64::from_be_bytes(b), 10)
        }
        n => (n as u64, 2),
    };
    let mask = if masked {
        if data.len() < hdr + 4 {
            return Err(RecvError::NotReady);
        }
        let m = [data[hdr], data[hdr + 1], data[hdr + 2], data[hdr + 3]];
        hdr += 4;
        Some(m)
    } else {
        None
    };
    if len > (super::IOBUF_SIZE - hdr) as u64 {
        return Err(RecvError::Overflow);
    }
    let total = hdr + len as usize;
    if data.len() < total {
        return Err(RecvError::NotReady);
    }
    let mut payload = data[hdr..total].to_vec();
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }
    Ok((
        WireFrame {
            fin,
            opcode,
            payload,
        },
        total,
    ))
}

/// Encodes a single final client frame. Client frames are always masked.
pub(crate) fn encode_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode);
    match payload.len() {
        n if n < 126 => out.push(0x80 | n as u8),
        n if n <= u16::MAX as usize => {
            out.push(0x80 | 126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(0x80 | 127);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out
}

fn new_mask() -> [u8; 4] {
    let id = uuid::Uuid::new_v4();
    let b = id.as_bytes();
    [b[0], b[1], b[2], b[3]]
}

fn new_nonce() -> String {
    base64::engine::general_purpose::STANDARD.encode(uuid::Uuid::new_v4().as_bytes())
}

/// `Sec-WebSocket-Accept` value a server must answer `nonce` with.
pub fn accept_key(nonce: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(nonce.as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sha.finalize())
}

/// Finds the end of an HTTP header block. Returns the size of the block
/// including the terminating empty line.
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Splits an HTTP response header block into the status code, the status
/// line and lower-cased header names with their values.
fn parse_response_head(head: &[u8]) -> Option<(u16, String, Vec<(String, String)>)> {
    let text = std::str::from_utf8(head).ok()?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next()?.to_string();
    let mut parts = status_line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?.parse().ok()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    Some((code, status_line, headers))
}

/// Builds the upgrade request for `endpoint` carrying `nonce`.
pub(crate) fn handshake_request(endpoint: &Endpoint, nonce: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        endpoint.path,
        endpoint.host_header(),
        nonce
    )
}

/// RawPort for the command channel
pub struct Port {
    stream: TcpStream,
    /// Incoming buffer, used to reassemble partial frames.
    rxbuf: IOBuf,
    /// Outgoing buffer, used for all-or-none frame writes.
    txbuf: IOBuf,
    /// Set once the server accepted the upgrade.
    upgraded: bool,
    /// `Sec-WebSocket-Key` sent with the upgrade request.
    nonce: String,
    /// Payload of a fragmented text message being reassembled.
    fragments: Option<Vec<u8>>,
    closing: bool,
}

impl Port {
    /// Starts connecting to `endpoint`. The upgrade request is queued and
    /// goes out as soon as the stream becomes writable.
    pub fn new(endpoint: &Endpoint) -> Result<Port, io::Error> {
        let stream = TcpStream::connect(endpoint.resolve()?)?;
        let nonce = new_nonce();
        let request = handshake_request(endpoint, &nonce);
        let mut port = Port {
            stream,
            rxbuf: IOBuf::new(),
            txbuf: IOBuf::new(),
            upgraded: false,
            nonce,
            fragments: None,
            closing: false,
        };
        port.txbuf
            .add_data(request.as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "request too large"))?;
        Ok(port)
    }

    /// Writes a frame, buffering whatever the socket does not take.
    fn write_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<(), SendError> {
        let raw = encode_frame(opcode, payload, new_mask());
        if self.has_data_to_drain() {
            // Keep frames in order behind what is already queued.
            self.txbuf.add_data(&raw)?;
            return Err(SendError::MustDrain);
        }
        match self.stream.write(&raw) {
            Ok(size) if size == raw.len() => Ok(()),
            Ok(size) => {
                self.txbuf.add_data(&raw[size..])?;
                Err(SendError::MustDrain)
            }
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected => {
                    self.txbuf.add_data(&raw)?;
                    Err(SendError::MustDrain)
                }
                _ => Err(SendError::IO(err)),
            },
        }
    }

    fn queue_control(&mut self, opcode: u8, payload: &[u8]) {
        let raw = encode_frame(opcode, payload, new_mask());
        if self.txbuf.add_data(&raw).is_err() {
            log::debug!("tx buffer full, dropping control frame {:#x}", opcode);
        }
    }

    /// Consumes the upgrade response if it is complete.
    fn recv_handshake(&mut self) -> Result<(), RecvError> {
        let size = match find_header_end(self.rxbuf.data()) {
            Some(size) => size,
            None if self.rxbuf.size() == super::IOBUF_SIZE => return Err(RecvError::Overflow),
            None => return Err(RecvError::NotReady),
        };
        let (code, status, headers) = parse_response_head(&self.rxbuf.data()[..size])
            .ok_or(RecvError::Protocol("malformed upgrade response"))?;
        if code != 101 {
            return Err(RecvError::Handshake(status));
        }
        let expected = accept_key(&self.nonce);
        let accepted = headers
            .iter()
            .any(|(name, value)| name == "sec-websocket-accept" && *value == expected);
        if !accepted {
            return Err(RecvError::Handshake(
                "missing or wrong Sec-WebSocket-Accept".to_string(),
            ));
        }
        self.rxbuf.consume(size);
        self.upgraded = true;
        Ok(())
    }

    /// Attempts to receive a text message only from data already buffered.
    fn recv_buffered(&mut self) -> Result<String, RecvError> {
        if !self.upgraded {
            self.recv_handshake()?;
        }
        loop {
            let (frame, size) = decode_frame(self.rxbuf.data())?;
            self.rxbuf.consume(size);
            match frame.opcode {
                OP_TEXT => {
                    if self.fragments.is_some() {
                        return Err(RecvError::Protocol("text frame inside fragmented message"));
                    }
                    if frame.fin {
                        return text_payload(frame.payload);
                    }
                    self.fragments = Some(frame.payload);
                }
                OP_CONTINUATION => {
                    let mut buf = match self.fragments.take() {
                        Some(buf) => buf,
                        // Continuation of a skipped binary message
                        None => continue,
                    };
                    if buf.len() + frame.payload.len() > super::IOBUF_SIZE {
                        return Err(RecvError::Overflow);
                    }
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return text_payload(buf);
                    }
                    self.fragments = Some(buf);
                }
                OP_BINARY => {
                    log::debug!("ignoring binary frame of {} bytes", frame.payload.len());
                }
                OP_PING => self.queue_control(OP_PONG, &frame.payload),
                OP_PONG => {}
                OP_CLOSE => {
                    if !self.closing {
                        self.closing = true;
                        let code = frame.payload.get(..2).unwrap_or(&[]).to_vec();
                        self.queue_control(OP_CLOSE, &code);
                        let _ = self.txbuf.drain(&mut self.stream);
                    }
                    return Err(RecvError::Disconnected);
                }
                _ => return Err(RecvError::Protocol("unknown opcode")),
            }
        }
    }
}

fn text_payload(payload: Vec<u8>) -> Result<String, RecvError> {
    String::from_utf8(payload).map_err(|_| RecvError::Protocol("text frame is not utf-8"))
}

impl RawPort for Port {
    type Rx = String;
    type Tx = String;

    fn recv(&mut self) -> Result<String, RecvError> {
        loop {
            match self.recv_buffered() {
                Err(RecvError::NotReady) => {}
                res => return res,
            }
            self.rxbuf.refill(&mut self.stream)?;
        }
    }

    fn send(&mut self, text: &String) -> Result<(), SendError> {
        if self.closing {
            return Err(SendError::Disconnected);
        }
        self.write_frame(OP_TEXT, text.as_bytes())
    }

    fn drain(&mut self) -> Result<(), SendError> {
        self.txbuf.drain(&mut self.stream)
    }

    fn has_data_to_drain(&self) -> bool {
        !self.txbuf.empty()
    }

    fn startup_holdoff(&self) -> bool {
        !self.upgraded
    }

    fn shutdown(&mut self) {
        if self.upgraded && !self.closing {
            self.closing = true;
            // 1000: normal closure
            self.queue_control(OP_CLOSE, &1000u16.to_be_bytes());
        }
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
