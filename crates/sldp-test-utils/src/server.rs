//! Scripted in-process SLDP server
//!
//! Accepts plain TCP connections, answers the upgrade request, sends a
//! status command and then serves scripted media for every Play it sees.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde_json::Value;
use sldp_core::FrameType;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::frames::{
    binary_frame, close_frame, decode_client_frame, media_message, text_frame, upgrade_accepted,
    StatusBuilder,
};

/// A media frame to send once the client plays
#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    /// Index into the Play command's `streams` array
    pub entry: usize,
    pub frame_type: FrameType,
    pub timestamp: i64,
    pub steady: Option<i64>,
    pub payload: Vec<u8>,
}

impl ScriptedFrame {
    pub fn new(entry: usize, frame_type: FrameType, timestamp: i64, payload: &[u8]) -> Self {
        Self {
            entry,
            frame_type,
            timestamp,
            steady: None,
            payload: payload.to_vec(),
        }
    }

    pub fn with_steady(mut self, steady: i64) -> Self {
        self.steady = Some(steady);
        self
    }
}

/// What the server does on each connection
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Raw upgrade response
    pub response: String,
    /// Status command sent right after a 101
    pub status: Option<String>,
    /// Sent after every Play
    pub media: Vec<ScriptedFrame>,
    /// Send a close frame once the media is out
    pub close_after_media: bool,
    /// Drop the socket right after the upgrade response
    pub hang_up_after_upgrade: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            response: upgrade_accepted(),
            status: Some(StatusBuilder::new().build()),
            media: Vec::new(),
            close_after_media: false,
            hang_up_after_upgrade: false,
        }
    }
}

impl ServerScript {
    pub fn with_status(status: StatusBuilder) -> Self {
        Self {
            status: Some(status.build()),
            ..Default::default()
        }
    }

    pub fn rejecting(response: String) -> Self {
        Self {
            response,
            status: None,
            ..Default::default()
        }
    }

    pub fn media(mut self, media: Vec<ScriptedFrame>) -> Self {
        self.media = media;
        self
    }
}

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<String>>,
    commands: Mutex<Vec<Value>>,
    connections: AtomicU32,
}

/// Test server bound to an ephemeral localhost port
pub struct TestServer {
    port: u16,
    recorded: Arc<Recorded>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let port = listener.local_addr().expect("local addr").port();
        let recorded = Arc::new(Recorded::default());
        let script = Arc::new(script);

        let shared = recorded.clone();
        let handle = tokio::spawn(async move {
            while let Ok((socket, peer)) = listener.accept().await {
                debug!("Test server accepted {}", peer);
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = shared.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(socket, &script, &shared).await {
                        debug!("Test server connection ended: {}", e);
                    }
                });
            }
        });

        Self {
            port,
            recorded,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Upgrade requests received so far
    pub fn requests(&self) -> Vec<String> {
        self.recorded.requests.lock().clone()
    }

    /// Control commands received so far, in order
    pub fn commands(&self) -> Vec<Value> {
        self.recorded.commands.lock().clone()
    }

    pub fn commands_named(&self, name: &str) -> Vec<Value> {
        self.commands()
            .into_iter()
            .filter(|c| c["command"] == name)
            .collect()
    }

    pub fn connection_count(&self) -> u32 {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(mut socket: TcpStream, script: &ServerScript, recorded: &Recorded) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);

    let request_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if socket.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
    };
    let request = buf.split_to(request_end);
    recorded
        .requests
        .lock()
        .push(String::from_utf8_lossy(&request).into_owned());

    socket.write_all(script.response.as_bytes()).await?;
    if script.hang_up_after_upgrade || !script.response.contains(" 101 ") {
        return Ok(());
    }

    if let Some(status) = &script.status {
        socket.write_all(&text_frame(status)).await?;
    }

    loop {
        while let Some((frame, used)) = decode_client_frame(&buf) {
            let _ = buf.split_to(used);
            let Some(command) = frame.json() else {
                continue;
            };
            recorded.commands.lock().push(command.clone());

            if command["command"] == "Play" {
                for bytes in scripted_media(&command, &script.media) {
                    socket.write_all(&bytes).await?;
                }
                if script.close_after_media {
                    socket.write_all(&close_frame()).await?;
                }
            }
        }

        if socket.read_buf(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}

fn scripted_media(play: &Value, media: &[ScriptedFrame]) -> Vec<Bytes> {
    let streams = play["streams"].as_array().cloned().unwrap_or_default();
    media
        .iter()
        .filter_map(|frame| {
            let sn: u8 = streams.get(frame.entry)?["sn"].as_str()?.parse().ok()?;
            let message = media_message(
                sn,
                frame.frame_type,
                frame.timestamp,
                frame.steady,
                &frame.payload,
            );
            Some(binary_frame(&message))
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
