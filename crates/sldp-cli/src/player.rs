//! `sldp play`: connect, play the whole catalog, report until stopped

use anyhow::{bail, Result};
use colored::Colorize;
use serde::Serialize;
use sldp_client::{Connection, ConnectionConfig, Listener};
use sldp_core::{DiagnosticInfo, PlayRequest, State, Status, StreamBuffer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct PlayOptions {
    /// Stop after this long; `None` runs until Ctrl+C or disconnect
    pub run_for: Option<Duration>,
    pub report_every: Duration,
}

enum Event {
    Catalog,
    State(State, Status, DiagnosticInfo),
}

/// Forwards listener callbacks into the player loop
struct ChannelListener {
    tx: mpsc::UnboundedSender<Event>,
}

impl Listener for ChannelListener {
    fn on_stream_info_received(&self, _connection_id: u32) {
        let _ = self.tx.send(Event::Catalog);
    }

    fn on_state_changed(
        &self,
        _connection_id: u32,
        state: State,
        status: Status,
        info: &DiagnosticInfo,
    ) {
        let _ = self.tx.send(Event::State(state, status, info.clone()));
    }
}

/// One catalog entry as printed at startup
#[derive(Debug, Serialize)]
struct StreamSummary {
    id: u32,
    kind: &'static str,
    stream: String,
    mime: Option<&'static str>,
    timescale: u32,
    bandwidth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
}

impl StreamSummary {
    fn of(buffer: &StreamBuffer) -> Self {
        Self {
            id: buffer.stream_id(),
            kind: buffer.media_type().as_str(),
            stream: buffer.stream().to_string(),
            mime: buffer.mime_type(),
            timescale: buffer.timescale(),
            bandwidth: buffer.bandwidth(),
            resolution: buffer
                .size()
                .map(|s| format!("{}x{}", s.width, s.height)),
        }
    }
}

pub async fn run(
    config: ConnectionConfig,
    options: PlayOptions,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let (tx, mut events) = mpsc::unbounded_channel();
    let drift = config.steady_delay_ms > 0;
    let connection = Connection::builder(config)
        .listener(Arc::new(ChannelListener { tx }))
        .connect()?;

    // Wait for the catalog
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Catalog) => break,
                Some(Event::State(State::Disconnected, status, info)) => {
                    bail!("Disconnected before stream info: {} {}", status, describe(&info));
                }
                Some(Event::State(state, status, _)) => log_state(state, status),
                None => bail!("Connection listener dropped"),
            },
            _ = shutdown_rx.recv() => {
                connection.close().await;
                return Ok(());
            }
        }
    }

    let streams = connection.stream_info();
    println!("{} {} stream(s)", "Catalog".green().bold(), streams.len());
    for stream in &streams {
        let summary = StreamSummary::of(stream);
        println!("  {}", serde_json::to_string(&summary)?);
    }

    let ids: Vec<u32> = streams.iter().map(|s| s.stream_id()).collect();
    connection
        .play_streams(ids.iter().map(|&id| PlayRequest::live(id)).collect())
        .await?;
    println!("{} Playing {} stream(s)", "OK".green().bold(), ids.len());

    let deadline = options.run_for.map(|d| tokio::time::Instant::now() + d);
    let mut report = tokio::time::interval(options.report_every);
    report.tick().await;

    let mut disconnected = false;
    loop {
        let until_deadline = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = report.tick() => {
                for stream in &streams {
                    report_stream(stream, drift);
                }
            }
            event = events.recv() => match event {
                Some(Event::State(State::Disconnected, status, info)) => {
                    warn!("Disconnected: {} {}", status, describe(&info));
                    disconnected = true;
                    break;
                }
                Some(Event::State(state, status, _)) => log_state(state, status),
                Some(Event::Catalog) => {}
                None => break,
            },
            _ = until_deadline => {
                info!("Play time elapsed");
                break;
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    if !disconnected {
        if let Err(e) = connection.cancel_streams(ids).await {
            warn!("Cancel failed: {}", e);
        }
    }
    connection.close().await;

    for stream in &streams {
        report_stream(stream, drift);
    }
    println!("{} Released", "OK".green().bold());
    Ok(())
}

fn report_stream(buffer: &StreamBuffer, drift: bool) {
    let end = buffer.end_timestamp();
    let last_ms = end.map(|ts| ts.pts_ms());
    let drift_s = if drift {
        end.map(|ts| buffer.get_deviation_for_play_time(ts.pts_us()))
    } else {
        None
    };

    info!(
        stream_id = buffer.stream_id(),
        kind = buffer.media_type().as_str(),
        messages = buffer.message_index(),
        last_pts_ms = ?last_ms,
        drift_s = ?drift_s,
        "stream report"
    );
}

fn log_state(state: State, status: Status) {
    info!("State {} ({})", state, status);
}

fn describe(info: &DiagnosticInfo) -> String {
    if info.is_empty() {
        String::new()
    } else {
        serde_json::to_string(info).unwrap_or_default()
    }
}
