//! Common test helpers and utilities for SLDP tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A scripted SLDP server ([`TestServer`])
//! - Wire builders for server frames and status commands ([`frames`])
//! - A listener that records every notification ([`EventCollector`])

pub mod frames;
pub mod server;

pub use server::{ScriptedFrame, ServerScript, TestServer};

use parking_lot::Mutex;
use sldp_client::Listener;
use sldp_core::{DiagnosticInfo, State, Status};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// A localhost port with nothing listening on it
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    check()
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || counter.load(Ordering::SeqCst) >= target,
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || flag.load(Ordering::SeqCst),
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Event Collector
// ============================================================================

/// One recorded state notification
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub connection_id: u32,
    pub state: State,
    pub status: Status,
    pub info: DiagnosticInfo,
}

/// Listener recording every notification it receives
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<StateEvent>>,
    catalogs: AtomicU32,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.events.lock().clone()
    }

    /// `(state, status)` pairs in arrival order
    pub fn states(&self) -> Vec<(State, Status)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.state, e.status))
            .collect()
    }

    pub fn last_event(&self, state: State) -> Option<StateEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.state == state)
            .cloned()
    }

    pub fn count_of(&self, state: State) -> usize {
        self.events.lock().iter().filter(|e| e.state == state).count()
    }

    pub fn catalog_count(&self) -> u32 {
        self.catalogs.load(Ordering::SeqCst)
    }

    pub async fn wait_for_state(&self, state: State, max_wait: Duration) -> Option<StateEvent> {
        if wait_for(|| self.count_of(state) > 0, DEFAULT_CHECK_INTERVAL, max_wait).await {
            self.last_event(state)
        } else {
            None
        }
    }

    pub async fn wait_for_catalog(&self, max_wait: Duration) -> bool {
        wait_for_count(&self.catalogs, 1, max_wait).await
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.catalogs.store(0, Ordering::SeqCst);
    }
}

impl Listener for EventCollector {
    fn on_stream_info_received(&self, _connection_id: u32) {
        self.catalogs.fetch_add(1, Ordering::SeqCst);
    }

    fn on_state_changed(
        &self,
        connection_id: u32,
        state: State,
        status: Status,
        info: &DiagnosticInfo,
    ) {
        self.events.lock().push(StateEvent {
            connection_id,
            state,
            status,
            info: info.clone(),
        });
    }
}
