//! Readiness-driven transport
//!
//! [`Transport`] owns a connected non-blocking socket and moves bytes between
//! it and a [`TransportHandler`]. With [`Security::Tls`] every byte goes
//! through a [`TlsEngine`] first, driven as an explicit
//! wrap/unwrap/task state machine:
//!
//! ```text
//! connect ready ──► NEED_WRAP (client hello) ──► send
//!                        │
//!    readable ──► NEED_UNWRAP ◄──► NEED_WRAP ◄──► NEED_TASK
//!                        │
//!                 FINISHED / NOT_HANDSHAKING ──► on_connect
//! ```
//!
//! Every failure closes the transport; nothing here retries.

use std::io;
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    CloseReason, EngineStatus, HandshakeStatus, Interest, Readiness, SizedBuffer, Socket,
    TlsEngine, TransportHandler,
};

/// Plaintext outbound queue (21 KiB)
pub const OUTBOUND_CAPACITY: usize = 21 * 1024;

/// Raw inbound buffer (4 MiB)
pub const INBOUND_CAPACITY: usize = 4 * 1024 * 1024;

/// Ticks without traffic before the transport gives up
pub const INACTIVITY_THRESHOLD: u32 = 5;

/// Largest single socket read
const READ_CHUNK: usize = 64 * 1024;

/// TLS engine plus its scratch buffers
pub struct TlsLayer {
    engine: Box<dyn TlsEngine>,
    /// Ciphertext waiting for the socket
    wrapped: SizedBuffer,
    /// Decrypted bytes not yet consumed by the handler
    unwrapped: SizedBuffer,
    handshake_finished: bool,
}

impl TlsLayer {
    pub fn new(engine: Box<dyn TlsEngine>) -> Self {
        let wrapped = SizedBuffer::with_capacity(engine.packet_buffer_size());
        let unwrapped = SizedBuffer::with_capacity(engine.application_buffer_size());
        Self {
            engine,
            wrapped,
            unwrapped,
            handshake_finished: false,
        }
    }

    pub fn is_handshake_finished(&self) -> bool {
        self.handshake_finished
    }

    /// Current plaintext buffer capacity
    pub fn unwrapped_capacity(&self) -> usize {
        self.unwrapped.capacity()
    }
}

/// Plain or TLS byte path
pub enum Security {
    Plain,
    Tls(TlsLayer),
}

impl Security {
    pub fn tls(engine: Box<dyn TlsEngine>) -> Self {
        Security::Tls(TlsLayer::new(engine))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Security::Tls(_))
    }
}

/// Non-blocking transport state machine
pub struct Transport<S: Socket> {
    socket: Option<S>,
    security: Security,
    outbound: SizedBuffer,
    inbound: SizedBuffer,
    interest: Interest,
    inactivity: u32,
    connected: bool,
}

impl<S: Socket> Transport<S> {
    pub fn new(socket: S, security: Security) -> Self {
        Self::with_capacities(socket, security, OUTBOUND_CAPACITY, INBOUND_CAPACITY)
    }

    pub fn with_capacities(socket: S, security: Security, outbound: usize, inbound: usize) -> Self {
        Self {
            socket: Some(socket),
            security,
            outbound: SizedBuffer::with_capacity(outbound),
            inbound: SizedBuffer::with_capacity(inbound),
            interest: Interest::Read,
            inactivity: 0,
            connected: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    /// Handler has been notified of the connection
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn inactivity_count(&self) -> u32 {
        self.inactivity
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    /// Plaintext bytes still queued
    pub fn pending_outbound(&self) -> usize {
        match &self.security {
            Security::Plain => self.outbound.len(),
            Security::Tls(tls) => self.outbound.len() + tls.wrapped.len(),
        }
    }

    // === Event entry points ===
    //
    // Each one converts any failure into a close.

    /// The socket finished connecting
    pub fn on_connected<H: TransportHandler>(&mut self, handler: &mut H) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.handle_connected(handler) {
            self.fail(handler, e);
        }
    }

    pub fn on_ready<H: TransportHandler>(&mut self, readiness: Readiness, handler: &mut H) {
        if readiness.readable && !self.is_closed() {
            if let Err(e) = self.handle_readable(handler) {
                self.fail(handler, e);
            }
        }
        if readiness.writable && !self.is_closed() {
            if let Err(e) = self.handle_writable(handler) {
                self.fail(handler, e);
            }
        }
    }

    /// Queue bytes from outside a handler callback
    pub fn send<H: TransportHandler>(&mut self, data: &[u8], handler: &mut H) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.send_bytes(data).and_then(|_| self.pump(handler)) {
            self.fail(handler, e);
        }
    }

    /// Let the handler emit anything it queued outside a callback
    pub fn flush<H: TransportHandler>(&mut self, handler: &mut H) {
        if self.is_closed() || !self.connected {
            return;
        }
        if let Err(e) = self.pump(handler) {
            self.fail(handler, e);
        }
    }

    /// Periodic inactivity check
    pub fn tick<H: TransportHandler>(&mut self, handler: &mut H) {
        if self.is_closed() {
            return;
        }
        self.inactivity += 1;
        if self.inactivity > INACTIVITY_THRESHOLD {
            warn!("Inactivity timeout expired after {} ticks", self.inactivity);
            self.close(handler, CloseReason::Inactivity);
        }
    }

    /// Close the socket and notify the handler; later calls do nothing
    pub fn close<H: TransportHandler>(&mut self, handler: &mut H, reason: CloseReason) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        drop(socket);
        self.outbound.clear();
        self.inbound.clear();
        self.connected = false;
        debug!("Transport closed: {}", reason);
        handler.on_close(&reason);
    }

    fn fail<H: TransportHandler>(&mut self, handler: &mut H, error: TransportError) {
        let reason = match error {
            TransportError::Protocol(sldp_core::Error::ConnectionClosed) => CloseReason::PeerClosed,
            other => CloseReason::Failed(other),
        };
        self.close(handler, reason);
    }

    // === Internals ===

    fn handle_connected<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        self.inactivity = 0;
        self.interest = Interest::Read;

        match &mut self.security {
            Security::Plain => {}
            Security::Tls(tls) => {
                tls.engine.begin_handshake()?;
                let hs = tls.engine.handshake_status();
                if hs != HandshakeStatus::NeedWrap {
                    return Err(TransportError::HandshakeFailed(format!(
                        "unexpected handshake status on connect: {hs:?}"
                    )));
                }
                debug!("TLS handshake started");
                let result = tls.engine.wrap(&mut self.outbound, &mut tls.wrapped)?;
                if result.status != EngineStatus::Ok {
                    return Err(TransportError::HandshakeFailed(format!(
                        "client hello wrap failed: {:?}",
                        result.status
                    )));
                }
                self.write_wrapped()?;
                // Some engines finish from the first wrap alone
                if result.handshake_status.is_done() {
                    self.finish_tls_handshake(handler)?;
                }
                return Ok(());
            }
        }

        self.finish_connect(handler)
    }

    fn finish_connect<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        self.connected = true;
        handler.on_connect()?;
        self.pump(handler)
    }

    fn finish_tls_handshake<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        if let Security::Tls(tls) = &mut self.security {
            tls.handshake_finished = true;
        }
        debug!("TLS handshake finished");
        self.finish_connect(handler)?;
        // Application data may have arrived together with the last flight
        self.unwrap_application_data(handler)
    }

    fn handle_readable<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        if self.inbound.remaining_capacity() == 0 {
            return Err(TransportError::BufferFull {
                needed: 1,
                available: 0,
            });
        }

        let bytes_read = match self.inbound.read_from(socket, READ_CHUNK) {
            Ok(0) => return Err(TransportError::Protocol(sldp_core::Error::ConnectionClosed)),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        trace!("Read {} bytes", bytes_read);
        self.inactivity = 0;

        match &self.security {
            Security::Plain => {}
            Security::Tls(tls) if tls.handshake_finished => {
                return self.unwrap_application_data(handler);
            }
            Security::Tls(_) => return self.continue_handshake(handler),
        }

        handler.on_receive(self.inbound.bytes_mut())?;
        self.pump(handler)
    }

    /// Drive the handshake as far as the buffered ciphertext allows
    fn continue_handshake<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        let Security::Tls(tls) = &mut self.security else {
            return Ok(());
        };

        let mut hs = tls.engine.handshake_status();
        let mut status = EngineStatus::Ok;

        while !hs.is_done() && status == EngineStatus::Ok {
            match hs {
                HandshakeStatus::NeedUnwrap => {
                    let result = tls.engine.unwrap(&mut self.inbound, &mut tls.unwrapped)?;
                    hs = result.handshake_status;
                    status = result.status;

                    if status == EngineStatus::BufferOverflow {
                        let capacity = tls.unwrapped.capacity() * 2;
                        tls.unwrapped.grow(capacity);
                        status = EngineStatus::Ok;
                    }
                }
                HandshakeStatus::NeedWrap => {
                    let result = tls.engine.wrap(&mut self.outbound, &mut tls.wrapped)?;
                    hs = result.handshake_status;
                    status = result.status;

                    if status == EngineStatus::Ok {
                        let Some(socket) = self.socket.as_ref() else {
                            return Ok(());
                        };
                        if write_some(socket, &mut tls.wrapped, &mut self.inactivity)? {
                            self.interest = Interest::ReadWrite;
                        }
                    }
                }
                HandshakeStatus::NeedTask => {
                    while let Some(task) = tls.engine.delegated_task() {
                        trace!("Running delegated TLS task");
                        task();
                    }
                    hs = tls.engine.handshake_status();
                    if hs == HandshakeStatus::NeedTask {
                        return Err(TransportError::HandshakeFailed(
                            "engine still needs a task after running all delegated tasks".into(),
                        ));
                    }
                }
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => break,
            }
        }

        match status {
            EngineStatus::Ok if hs.is_done() => self.finish_tls_handshake(handler),
            EngineStatus::Closed => Err(TransportError::HandshakeFailed(
                "peer closed during handshake".into(),
            )),
            // Underflow: wait for the next flight
            _ => Ok(()),
        }
    }

    fn unwrap_application_data<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            let Security::Tls(tls) = &mut self.security else {
                return Ok(());
            };

            let result = tls.engine.unwrap(&mut self.inbound, &mut tls.unwrapped)?;
            match result.status {
                EngineStatus::Ok => {}
                EngineStatus::BufferUnderflow => {
                    if !tls.unwrapped.is_empty() {
                        handler.on_receive(tls.unwrapped.bytes_mut())?;
                    }
                    return self.pump(handler);
                }
                EngineStatus::BufferOverflow => {
                    let capacity = tls.unwrapped.capacity() * 2;
                    trace!("Growing unwrap buffer to {} bytes", capacity);
                    tls.unwrapped.grow(capacity);
                }
                EngineStatus::Closed => {
                    return Err(TransportError::Protocol(sldp_core::Error::ConnectionClosed));
                }
            }

            if !tls.unwrapped.is_empty() {
                handler.on_receive(tls.unwrapped.bytes_mut())?;
            }
            self.pump(handler)?;
        }
    }

    fn handle_writable<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        let drained = if self.security.is_tls() {
            !self.write_wrapped()? && !self.wrap_remaining()?
        } else {
            let Some(socket) = self.socket.as_ref() else {
                return Ok(());
            };
            !write_some(socket, &mut self.outbound, &mut self.inactivity)?
        };

        if drained {
            self.interest = Interest::Read;
            handler.on_send();
            self.pump(handler)?;
        }
        Ok(())
    }

    /// Wrap plaintext left over from a previous send; true if still pending
    fn wrap_remaining(&mut self) -> Result<bool> {
        let Security::Tls(tls) = &self.security else {
            return Ok(false);
        };
        if self.outbound.is_empty() || !tls.handshake_finished {
            return Ok(false);
        }
        self.wrap_outbound()?;
        self.write_wrapped()
    }

    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        if let Security::Tls(tls) = &self.security {
            if !tls.wrapped.is_empty() {
                return Err(TransportError::SendPending);
            }
        }

        self.outbound.put_slice(data)?;

        if self.security.is_tls() {
            self.wrap_outbound()?;
            self.write_wrapped()?;
            return Ok(());
        }

        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        if write_some(socket, &mut self.outbound, &mut self.inactivity)? {
            self.interest = Interest::ReadWrite;
        }
        Ok(())
    }

    fn wrap_outbound(&mut self) -> Result<()> {
        let Security::Tls(tls) = &mut self.security else {
            return Ok(());
        };
        let result = tls.engine.wrap(&mut self.outbound, &mut tls.wrapped)?;
        if result.status != EngineStatus::Ok {
            return Err(TransportError::HandshakeFailed(format!(
                "failed to wrap output data: {:?}",
                result.status
            )));
        }
        Ok(())
    }

    /// Write pending ciphertext; true if some is still queued
    fn write_wrapped(&mut self) -> Result<bool> {
        let (Some(socket), Security::Tls(tls)) = (self.socket.as_ref(), &mut self.security) else {
            return Ok(false);
        };
        let pending = write_some(socket, &mut tls.wrapped, &mut self.inactivity)?;
        if pending {
            self.interest = Interest::ReadWrite;
        }
        Ok(pending)
    }

    /// Send everything the handler has queued
    fn pump<H: TransportHandler>(&mut self, handler: &mut H) -> Result<()> {
        while !self.is_closed() {
            if let Security::Tls(tls) = &self.security {
                // Wait for the socket before wrapping another record
                if !tls.wrapped.is_empty() {
                    break;
                }
            }
            let Some(chunk) = handler.poll_outbound() else {
                break;
            };
            self.send_bytes(&chunk)?;
        }
        Ok(())
    }
}

/// One write attempt; returns true if bytes remain queued
fn write_some<S: Socket + ?Sized>(socket: &S, buf: &mut SizedBuffer, inactivity: &mut u32) -> Result<bool> {
    match buf.write_to(socket) {
        Ok(n) => {
            if n > 0 {
                *inactivity = 0;
                trace!("Wrote {} bytes", n);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }
    Ok(!buf.is_empty())
}

impl Socket for tokio::net::TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write(self, buf)
    }
}

impl From<Interest> for tokio::io::Interest {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => tokio::io::Interest::READABLE,
            Interest::ReadWrite => tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE,
        }
    }
}

impl From<tokio::io::Ready> for Readiness {
    fn from(ready: tokio::io::Ready) -> Self {
        Readiness {
            readable: ready.is_readable() || ready.is_read_closed(),
            writable: ready.is_writable(),
        }
    }
}
