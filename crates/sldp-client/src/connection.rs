//! Connection handle and its tokio driver
//!
//! Each connection runs on one spawned task. The task owns the socket, the
//! [`Transport`] and the [`ProtocolEngine`]; it waits on socket readiness,
//! the inactivity tick and the command channel, and feeds each event into
//! the sans-IO layers. Nothing inside those layers blocks.

use sldp_core::{PlayRequest, StreamBuffer};
use sldp_transport::{CloseReason, Security, Transport, TransportError, TransportHandler};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::builder::ConnectionBuilder;
use crate::config::ConnectionConfig;
use crate::engine::{Catalog, ProtocolEngine};
use crate::error::{ClientError, Result};

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Play(Vec<PlayRequest>, Reply),
    Cancel(Vec<u32>, Reply),
    Close,
}

/// Handle to one running SLDP connection
///
/// Dropping the handle releases the connection.
pub struct Connection {
    connection_id: u32,
    catalog: Catalog,
    commands: mpsc::UnboundedSender<Command>,
    done: watch::Receiver<bool>,
}

impl Connection {
    pub fn builder(config: ConnectionConfig) -> ConnectionBuilder {
        ConnectionBuilder::new(config)
    }

    /// Connect with default factory, dispatcher and no listener
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        ConnectionBuilder::new(config).connect()
    }

    pub(crate) fn spawn(config: ConnectionConfig, mut engine: ProtocolEngine) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (done_tx, done) = watch::channel(false);
        let connection_id = engine.connection_id();
        let catalog = engine.catalog();

        engine.start();
        tokio::spawn(async move {
            drive(config, engine, rx).await;
            let _ = done_tx.send(true);
        });

        Self {
            connection_id,
            catalog,
            commands,
            done,
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Request the given catalog streams
    pub async fn play_streams(&self, requests: Vec<PlayRequest>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Play(requests, tx))?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Stop the given catalog streams; their buffers are released
    pub async fn cancel_streams(&self, stream_ids: Vec<u32>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Cancel(stream_ids, tx))?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    pub fn stream_by_id(&self, stream_id: u32) -> Option<Arc<StreamBuffer>> {
        self.catalog.read().get(&stream_id).cloned()
    }

    /// Every announced stream, ordered by stream id
    pub fn stream_info(&self) -> Vec<Arc<StreamBuffer>> {
        self.catalog.read().values().cloned().collect()
    }

    /// Close the connection; calling it again does nothing
    pub fn release(&self) {
        if !self.is_closed() {
            let _ = self.commands.send(Command::Close);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the driver has stopped
    pub async fn closed(&self) {
        let mut done = self.done.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Release and wait for the driver to stop
    pub async fn close(&self) {
        self.release();
        self.closed().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.connection_id)
            .field("streams", &self.catalog.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn drive(
    config: ConnectionConfig,
    mut engine: ProtocolEngine,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Connecting to {}", config.url());

    let stream = tokio::select! {
        result = TcpStream::connect(addr.as_str()) => match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connect to {} failed: {}", addr, e);
                engine.on_close(&CloseReason::Failed(TransportError::ConnectionFailed(
                    e.to_string(),
                )));
                return;
            }
        },
        _ = until_close(&mut commands) => {
            engine.on_close(&CloseReason::Requested);
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {}", e);
    }

    let security = match security_for(&config) {
        Ok(security) => security,
        Err(e) => {
            engine.on_close(&CloseReason::Failed(e));
            return;
        }
    };

    let stream = Arc::new(stream);
    let mut transport = Transport::new(stream.clone(), security);
    transport.on_connected(&mut engine);

    let period = config.inactivity_tick();
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !transport.is_closed() {
        let interest = transport.interest();
        tokio::select! {
            ready = stream.ready(interest.into()) => match ready {
                Ok(ready) => transport.on_ready(ready.into(), &mut engine),
                Err(e) => transport.close(&mut engine, CloseReason::Failed(e.into())),
            },
            _ = tick.tick() => transport.tick(&mut engine),
            command = commands.recv() => match command {
                Some(Command::Play(requests, reply)) => {
                    let result = engine.play(&requests);
                    finish_command(&mut transport, &mut engine, result, reply);
                }
                Some(Command::Cancel(stream_ids, reply)) => {
                    let result = engine.cancel(&stream_ids);
                    finish_command(&mut transport, &mut engine, result, reply);
                }
                Some(Command::Close) | None => {
                    transport.close(&mut engine, CloseReason::Requested);
                }
            },
        }
    }

    debug!("Driver for connection {} stopped", engine.connection_id());
}

/// Flush what a command queued; a failed encode is fatal for the connection
fn finish_command(
    transport: &mut Transport<Arc<TcpStream>>,
    engine: &mut ProtocolEngine,
    result: sldp_core::Result<()>,
    reply: Reply,
) {
    let outcome = match result {
        Ok(()) => {
            transport.flush(engine);
            if transport.is_closed() {
                Err(ClientError::Closed)
            } else {
                Ok(())
            }
        }
        Err(sldp_core::Error::InvalidState(message)) => Err(ClientError::Rejected(message)),
        Err(e) => {
            let message = e.to_string();
            transport.close(engine, CloseReason::Failed(e.into()));
            Err(ClientError::Rejected(message))
        }
    };
    let _ = reply.send(outcome);
}

/// Reject commands until a close arrives or every handle is gone
async fn until_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Play(_, reply) | Command::Cancel(_, reply) => {
                let _ = reply.send(Err(ClientError::Rejected("not connected".into())));
            }
            Command::Close => return,
        }
    }
}

#[cfg(feature = "tls")]
fn security_for(config: &ConnectionConfig) -> std::result::Result<Security, TransportError> {
    use sldp_transport::{CertVerification, RustlsEngine};

    if !config.tls {
        return Ok(Security::Plain);
    }
    let verification = CertVerification::from_trust_all(config.trust_all_certs);
    let engine = RustlsEngine::new(&config.host, &verification)?;
    Ok(Security::tls(Box::new(engine)))
}

#[cfg(not(feature = "tls"))]
fn security_for(config: &ConnectionConfig) -> std::result::Result<Security, TransportError> {
    if config.tls {
        return Err(TransportError::ConnectionFailed(
            "built without tls support".into(),
        ));
    }
    Ok(Security::Plain)
}
