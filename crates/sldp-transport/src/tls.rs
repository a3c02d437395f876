//! rustls-backed TLS engine
//!
//! Adapts [`rustls::ClientConnection`] to the [`TlsEngine`] contract.
//! rustls does its handshake work inline, so it never hands out delegated
//! tasks.

use rustls::pki_types::ServerName;
use rustls::ClientConnection;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    DelegatedTask, EngineResult, EngineStatus, HandshakeStatus, SizedBuffer, TlsEngine,
};

/// Largest plaintext fragment of one TLS record
const MAX_FRAGMENT: usize = 16 * 1024;

/// Worst-case per-record expansion
const RECORD_OVERHEAD: usize = 325;

/// Certificate verification mode
#[derive(Debug, Clone, Default)]
pub enum CertVerification {
    /// Verify against the platform root store
    #[default]
    SystemRoots,
    /// Accept any certificate (trust-all)
    SkipVerification,
}

impl CertVerification {
    pub fn from_trust_all(trust_all_certs: bool) -> Self {
        if trust_all_certs {
            CertVerification::SkipVerification
        } else {
            CertVerification::SystemRoots
        }
    }
}

fn client_config(verification: &CertVerification) -> Result<rustls::ClientConfig> {
    match verification {
        CertVerification::SkipVerification => {
            warn!("TLS certificate verification disabled");
            Ok(rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth())
        }
        CertVerification::SystemRoots => {
            let mut root_store = rustls::RootCertStore::empty();
            let cert_result = rustls_native_certs::load_native_certs();

            for err in &cert_result.errors {
                debug!("Certificate loading error: {}", err);
            }
            for cert in cert_result.certs {
                if let Err(e) = root_store.add(cert) {
                    debug!("Failed to add system cert: {}", e);
                }
            }

            info!("Loaded {} system root certificates", root_store.len());

            if root_store.is_empty() {
                return Err(TransportError::ConnectionFailed(
                    "No root certificates available".to_string(),
                ));
            }

            Ok(rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth())
        }
    }
}

/// [`TlsEngine`] over a rustls client session
pub struct RustlsEngine {
    conn: ClientConnection,
    established: bool,
}

impl RustlsEngine {
    pub fn new(host: &str, verification: &CertVerification) -> Result<Self> {
        let config = client_config(verification)?;
        Self::with_config(host, Arc::new(config))
    }

    pub fn with_config(host: &str, config: Arc<rustls::ClientConfig>) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;
        let conn = ClientConnection::new(config, server_name)?;
        Ok(Self {
            conn,
            established: false,
        })
    }

    /// Status after an operation; reports `Finished` exactly once
    fn settle(&mut self) -> HandshakeStatus {
        let hs = self.handshake_status();
        if hs == HandshakeStatus::Finished {
            self.established = true;
        }
        hs
    }
}

impl TlsEngine for RustlsEngine {
    fn begin_handshake(&mut self) -> Result<()> {
        // The client hello is queued when the session is created
        Ok(())
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.established {
            HandshakeStatus::NotHandshaking
        } else if self.conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if self.conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else {
            HandshakeStatus::Finished
        }
    }

    fn wrap(&mut self, src: &mut SizedBuffer, dst: &mut SizedBuffer) -> Result<EngineResult> {
        let mut consumed = 0;

        if !src.is_empty() && !self.conn.is_handshaking() {
            let chunk = src.len().min(MAX_FRAGMENT);
            if dst.remaining_capacity() < chunk + RECORD_OVERHEAD {
                return Ok(EngineResult::new(
                    EngineStatus::BufferOverflow,
                    self.handshake_status(),
                    0,
                    0,
                ));
            }
            consumed = self.conn.writer().write(&src.as_slice()[..chunk])?;
            src.consume(consumed);
        }

        let before = dst.len();
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut RecordSink(dst)) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        let produced = dst.len() - before;

        let status = if produced == 0 && self.conn.wants_write() {
            EngineStatus::BufferOverflow
        } else {
            EngineStatus::Ok
        };
        Ok(EngineResult::new(status, self.settle(), consumed, produced))
    }

    fn unwrap(&mut self, src: &mut SizedBuffer, dst: &mut SizedBuffer) -> Result<EngineResult> {
        let mut consumed = 0;

        // Plaintext left over from a previous call is delivered before more
        // ciphertext is read
        let mut state = self.conn.process_new_packets()?;
        while state.plaintext_bytes_to_read() == 0 && !src.is_empty() {
            let mut ciphertext = src.as_slice();
            let n = self.conn.read_tls(&mut ciphertext)?;
            if n == 0 {
                break;
            }
            src.consume(n);
            consumed += n;
            state = self.conn.process_new_packets()?;
        }

        let pending = state.plaintext_bytes_to_read();
        let want = pending.min(dst.remaining_capacity());

        let mut produced = 0;
        while produced < want {
            let n = dst.fill_with(want - produced, |buf| self.conn.reader().read(buf))?;
            if n == 0 {
                break;
            }
            produced += n;
        }

        let status = if state.peer_has_closed() && pending == 0 {
            EngineStatus::Closed
        } else if pending > produced {
            EngineStatus::BufferOverflow
        } else if consumed == 0 && produced == 0 {
            EngineStatus::BufferUnderflow
        } else {
            EngineStatus::Ok
        };
        Ok(EngineResult::new(status, self.settle(), consumed, produced))
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        None
    }

    fn packet_buffer_size(&self) -> usize {
        MAX_FRAGMENT + RECORD_OVERHEAD
    }

    fn application_buffer_size(&self) -> usize {
        MAX_FRAGMENT
    }
}

/// `io::Write` into the free space of a [`SizedBuffer`]
struct RecordSink<'a>(&'a mut SizedBuffer);

impl Write for RecordSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.0.put_within(data);
        if n == 0 && !data.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Certificate verifier that accepts everything (trust-all mode)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
