//! Internal buffer for the stream-oriented ports.

use super::{RecvError, SendError};
use std::io;

/// Size of the internal buffer. Bounds the largest frame or header block
/// that can be received, and the largest frame that can be queued.
pub const IOBUF_SIZE: usize = 16384;

/// Buffer used by the ports to reassemble frames on reception and to
/// guarantee all-or-nothing frame writes on transmission.
pub struct IOBuf {
    /// Valid data (possibly none) is delimited by `start` and `end`.
    buf: Box<[u8; IOBUF_SIZE]>,
    start: usize,
    end: usize,
}

impl IOBuf {
    pub fn new() -> IOBuf {
        IOBuf {
            buf: Box::new([0; IOBUF_SIZE]),
            start: 0,
            end: 0,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards `len` bytes off the beginning of the contained data.
    /// `len` must be at most `size()`.
    pub fn consume(&mut self, len: usize) {
        if len > self.size() {
            panic!("Invalid consume for more data that is contained");
        }
        self.start += len;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Refills the buffer as much as possible from `reader`.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<(), RecvError> {
        self.compact();
        if self.end == IOBUF_SIZE {
            // A zero-sized read would look like EOF.
            return Err(RecvError::Overflow);
        }
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Err(RecvError::Disconnected),
            Ok(size) => {
                self.end += size;
                Ok(())
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock => Err(RecvError::NotReady),
                io::ErrorKind::Interrupted => Ok(()),
                _ => Err(RecvError::IO(e)),
            },
        }
    }

    /// Appends all of `data`, or nothing if it does not fit.
    pub fn add_data(&mut self, data: &[u8]) -> Result<(), SendError> {
        self.compact();
        if IOBUF_SIZE - self.end < data.len() {
            return Err(SendError::Oversize);
        }
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Writes out as much of the contained data as `writer` accepts.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> Result<(), SendError> {
        while !self.empty() {
            match writer.write(&self.buf[self.start..self.end]) {
                Ok(0) => return Err(SendError::Disconnected),
                Ok(size) => self.consume(size),
                Err(e) => {
                    return match e.kind() {
                        io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected => {
                            Err(SendError::MustDrain)
                        }
                        _ => Err(SendError::IO(e)),
                    };
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_consume_and_drain() {
        let mut buf = IOBuf::new();
        let mut src: &[u8] = b"hello world";
        buf.refill(&mut src).unwrap();
        assert_eq!(buf.data(), b"hello world");
        buf.consume(6);
        assert_eq!(buf.data(), b"world");

        let mut out = Vec::new();
        buf.drain(&mut out).unwrap();
        assert_eq!(out, b"world");
        assert!(buf.empty());
    }

    #[test]
    fn eof_is_disconnect() {
        let mut buf = IOBuf::new();
        let mut src: &[u8] = b"";
        assert!(matches!(buf.refill(&mut src), Err(RecvError::Disconnected)));
    }

    #[test]
    fn oversize_is_rejected_whole() {
        let mut buf = IOBuf::new();
        buf.add_data(&[1u8; IOBUF_SIZE - 1]).unwrap();
        assert!(matches!(buf.add_data(&[0u8; 2]), Err(SendError::Oversize)));
        assert_eq!(buf.size(), IOBUF_SIZE - 1);
    }
}
