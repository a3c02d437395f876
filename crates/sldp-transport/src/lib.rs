//! SLDP Transport Layer
//!
//! Non-blocking byte transport for the SLDP client:
//! - [`Transport`]: readiness-driven state machine over any [`Socket`],
//!   plain or TLS
//! - [`TlsEngine`]: the wrap/unwrap/task contract the TLS path is driven
//!   through
//! - [`RustlsEngine`]: the rustls implementation of it
//!
//! The transport never blocks and never spawns. An outer driver waits for
//! readiness and feeds the events in.

pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(feature = "tls")]
pub mod tls;

pub use error::{Result, TransportError};
pub use tcp::{Security, TlsLayer, Transport, INACTIVITY_THRESHOLD, INBOUND_CAPACITY, OUTBOUND_CAPACITY};
pub use traits::{
    CloseReason, DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, Interest, Readiness,
    SizedBuffer, Socket, TlsEngine, TransportHandler,
};

#[cfg(feature = "tls")]
pub use tls::{CertVerification, RustlsEngine};
