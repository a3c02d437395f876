//! SLDP Client Library
//!
//! Client for Softvelum Low Delay Protocol live streams.
//!
//! # Example
//!
//! ```ignore
//! use sldp_client::{Connection, ConnectionConfig};
//! use sldp_core::PlayRequest;
//!
//! #[tokio::main]
//! async fn main() -> sldp_client::Result<()> {
//!     let conn = Connection::connect(ConnectionConfig::new("example.com", "live", "stream"))?;
//!
//!     // ...wait for the listener's stream info notification...
//!
//!     let requests = conn
//!         .stream_info()
//!         .iter()
//!         .map(|s| PlayRequest::live(s.stream_id()))
//!         .collect();
//!     conn.play_streams(requests).await?;
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod listener;

pub use builder::ConnectionBuilder;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use engine::{Catalog, Phase, ProtocolEngine};
pub use error::{ClientError, Result};
pub use listener::{Dispatch, InlineDispatcher, Job, Listener, Notifier, SerialDispatcher};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::ConnectionBuilder;
    pub use crate::config::ConnectionConfig;
    pub use crate::connection::Connection;
    pub use crate::error::{ClientError, Result};
    pub use crate::listener::Listener;
    pub use sldp_core::{DiagnosticInfo, PlayRequest, State, Status, StreamBuffer};
}
