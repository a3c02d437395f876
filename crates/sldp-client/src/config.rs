//! Connection configuration

use serde::{Deserialize, Serialize};
use sldp_core::{DEFAULT_PORT, DEFAULT_USER_AGENT};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Default inactivity tick period
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Everything needed to open one SLDP connection
///
/// Deserializes from TOML with every field optional:
///
/// ```toml
/// host = "demo.example.com"
/// app = "live"
/// stream = "stream1"
/// tls = true
/// port = 443
/// steady_delay_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Identity reported with every listener notification
    pub connection_id: u32,
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
    pub tls: bool,
    /// Accept any server certificate
    pub trust_all_certs: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub user_agent: String,
    /// Low-delay playback offset; 0 disables steady clock sync
    pub steady_delay_ms: u32,
    /// Ring capacity of every stream buffer
    pub buffer_capacity: usize,
    pub inactivity_tick_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_id: 0,
            host: String::new(),
            port: DEFAULT_PORT,
            app: String::new(),
            stream: String::new(),
            tls: false,
            trust_all_certs: false,
            user: None,
            pass: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            steady_delay_ms: 0,
            buffer_capacity: sldp_core::buffer::DEFAULT_CAPACITY,
            inactivity_tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: &str, app: &str, stream: &str) -> Self {
        Self {
            host: host.to_string(),
            app: app.to_string(),
            stream: stream.to_string(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check the fields a connection cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ClientError::InvalidConfig("host is empty".into()));
        }
        if self.app.is_empty() {
            return Err(ClientError::InvalidConfig("app is empty".into()));
        }
        if self.stream.is_empty() {
            return Err(ClientError::InvalidConfig("stream is empty".into()));
        }
        if self.port == 0 {
            return Err(ClientError::InvalidConfig("port is 0".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(ClientError::InvalidConfig("buffer_capacity is 0".into()));
        }
        if self.inactivity_tick_ms == 0 {
            return Err(ClientError::InvalidConfig("inactivity_tick_ms is 0".into()));
        }
        Ok(())
    }

    /// `ws://` / `wss://` form, for logs
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/{}/{}",
            scheme, self.host, self.port, self.app, self.stream
        )
    }

    pub fn user_agent(&self) -> &str {
        if self.user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            &self.user_agent
        }
    }

    pub fn playback_delay_us(&self) -> i64 {
        self.steady_delay_ms as i64 * 1000
    }

    pub fn inactivity_tick(&self) -> Duration {
        Duration::from_millis(self.inactivity_tick_ms)
    }
}
