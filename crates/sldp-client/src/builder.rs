//! Connection builder pattern

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sldp_core::{Clock, DefaultBufferFactory, MonotonicClock, StreamBufferFactory};
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::engine::ProtocolEngine;
use crate::error::Result;
use crate::listener::{Dispatch, Listener, Notifier, SerialDispatcher};

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    factory: Option<Arc<dyn StreamBufferFactory>>,
    listener: Option<Arc<dyn Listener>>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    clock: Arc<dyn Clock>,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl ConnectionBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            factory: None,
            listener: None,
            dispatcher: None,
            clock: Arc::new(MonotonicClock),
            rng: None,
        }
    }

    /// Buffer factory; defaults to [`DefaultBufferFactory`] sized from the config
    pub fn factory(mut self, factory: Arc<dyn StreamBufferFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Where listener callbacks run; defaults to a [`SerialDispatcher`]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Local clock for the steady anchor and the default factory
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Source of WebSocket masks and the upgrade key
    pub fn rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// The engine without a driver, for callers running their own loop
    ///
    /// Without an explicit dispatcher this needs a tokio runtime.
    pub fn build_engine(self) -> Result<ProtocolEngine> {
        Ok(self.into_parts()?.1)
    }

    /// Validate the config and spawn the connection; needs a tokio runtime
    pub fn connect(self) -> Result<Connection> {
        let (config, engine) = self.into_parts()?;
        Ok(Connection::spawn(config, engine))
    }

    fn into_parts(self) -> Result<(ConnectionConfig, ProtocolEngine)> {
        self.config.validate()?;

        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(
                DefaultBufferFactory::new(self.config.buffer_capacity)
                    .with_clock(self.clock.clone()),
            )
        });
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(SerialDispatcher::spawn()));
        let notifier = Notifier::new(self.config.connection_id, self.listener, dispatcher);
        let rng = self
            .rng
            .unwrap_or_else(|| Box::new(StdRng::from_entropy()));

        let engine = ProtocolEngine::new(&self.config, factory, notifier, self.clock, rng);
        Ok((self.config, engine))
    }
}
