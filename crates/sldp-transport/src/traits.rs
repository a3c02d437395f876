//! Transport trait definitions

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::error::{Result, TransportError};

/// Non-blocking byte socket
///
/// Both calls return [`io::ErrorKind::WouldBlock`] when the socket is not
/// ready; `Ok(0)` from `try_read` means the peer closed.
pub trait Socket {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: Socket + ?Sized> Socket for Arc<T> {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).try_read(buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        (**self).try_write(buf)
    }
}

/// Readiness the transport wants to be woken for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    ReadWrite,
}

impl Interest {
    pub fn is_writable(&self) -> bool {
        matches!(self, Interest::ReadWrite)
    }
}

/// Readiness reported by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const READABLE: Readiness = Readiness {
        readable: true,
        writable: false,
    };

    pub const WRITABLE: Readiness = Readiness {
        readable: false,
        writable: true,
    };
}

/// Handshake progress reported by a [`TlsEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NeedWrap,
    NeedUnwrap,
    NeedTask,
    /// The operation that produced this status completed the handshake
    Finished,
    NotHandshaking,
}

impl HandshakeStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, HandshakeStatus::Finished | HandshakeStatus::NotHandshaking)
    }
}

/// Outcome of one wrap/unwrap call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// Not enough ciphertext buffered for a record
    BufferUnderflow,
    /// Destination buffer too small
    BufferOverflow,
    /// Peer sent close_notify
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl EngineResult {
    pub fn new(
        status: EngineStatus,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        Self {
            status,
            handshake_status,
            bytes_consumed,
            bytes_produced,
        }
    }
}

/// Work the engine hands back to the caller during a handshake
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// A TLS client engine driven by explicit wrap/unwrap calls
///
/// `wrap` consumes plaintext from the front of `src` and appends records to
/// `dst`; `unwrap` consumes ciphertext from `src` and appends plaintext to
/// `dst`. Neither may write past `dst`'s capacity.
pub trait TlsEngine: Send {
    fn begin_handshake(&mut self) -> Result<()>;

    fn handshake_status(&self) -> HandshakeStatus;

    fn wrap(&mut self, src: &mut SizedBuffer, dst: &mut SizedBuffer) -> Result<EngineResult>;

    fn unwrap(&mut self, src: &mut SizedBuffer, dst: &mut SizedBuffer) -> Result<EngineResult>;

    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Initial size of the ciphertext buffer
    fn packet_buffer_size(&self) -> usize;

    /// Initial size of the plaintext buffer
    fn application_buffer_size(&self) -> usize;
}

/// Byte queue with a fixed logical capacity
///
/// Consumed bytes are dropped from the front, so the free space is always
/// `capacity - len`.
#[derive(Debug)]
pub struct SizedBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl SizedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Buffered bytes; whatever the caller leaves stays queued
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append all of `data` or fail without appending
    pub fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining_capacity() {
            return Err(TransportError::BufferFull {
                needed: data.len(),
                available: self.remaining_capacity(),
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Append as much of `data` as fits; returns the count appended
    pub fn put_within(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining_capacity());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    /// Drop `n` bytes from the front
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Raise the capacity, keeping buffered bytes
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.buf.reserve(capacity - self.buf.len());
            self.capacity = capacity;
        }
    }

    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Let `fill` write up to `max` bytes into the free space
    pub fn fill_with<F>(&mut self, max: usize, fill: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let start = self.buf.len();
        let max = max.min(self.remaining_capacity());
        self.buf.resize(start + max, 0);
        match fill(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n.min(max));
                Ok(n.min(max))
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// One non-blocking read from `socket` into the free space
    pub fn read_from<S: Socket + ?Sized>(&mut self, socket: &S, max: usize) -> io::Result<usize> {
        self.fill_with(max, |buf| socket.try_read(buf))
    }

    /// One non-blocking write of the buffered bytes; written bytes are consumed
    pub fn write_to<S: Socket + ?Sized>(&mut self, socket: &S) -> io::Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        let n = socket.try_write(&self.buf)?;
        self.consume(n);
        Ok(n)
    }
}

/// Why a transport closed
#[derive(Debug)]
pub enum CloseReason {
    /// Local release
    Requested,
    /// Orderly close by the peer
    PeerClosed,
    /// No traffic for too many ticks
    Inactivity,
    Failed(TransportError),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Failed(_) | CloseReason::Inactivity)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by client"),
            CloseReason::PeerClosed => f.write_str("closed by server"),
            CloseReason::Inactivity => f.write_str("inactivity timeout"),
            CloseReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Upper layer fed by a [`crate::Transport`]
///
/// After every callback the transport drains [`poll_outbound`](Self::poll_outbound)
/// and sends what it yields.
pub trait TransportHandler {
    /// Connected (and, with TLS, handshake finished)
    fn on_connect(&mut self) -> sldp_core::Result<()>;

    /// Plaintext arrived; consume what can be used and leave the rest
    fn on_receive(&mut self, data: &mut BytesMut) -> sldp_core::Result<()>;

    /// Outbound queue fully drained
    fn on_send(&mut self) {}

    /// Next chunk to send, if any
    fn poll_outbound(&mut self) -> Option<Bytes>;

    /// Called exactly once
    fn on_close(&mut self, reason: &CloseReason);
}
