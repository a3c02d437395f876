//! Connection event listener and notification dispatch
//!
//! The protocol engine never calls a [`Listener`] directly. Every
//! notification is packaged as a [`Job`] and handed to a [`Dispatch`]
//! implementation, which decides where and when it runs.

use sldp_core::{DiagnosticInfo, State, Status};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives connection events
pub trait Listener: Send + Sync {
    /// The stream catalog is available through the connection
    fn on_stream_info_received(&self, _connection_id: u32) {}

    fn on_state_changed(
        &self,
        connection_id: u32,
        state: State,
        status: Status,
        info: &DiagnosticInfo,
    );
}

/// A queued notification
pub type Job = Box<dyn FnOnce() + Send>;

/// Scheduling facility for listener notifications
pub trait Dispatch: Send + Sync {
    fn post(&self, job: Job);
}

/// Runs every job immediately on the posting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatch for InlineDispatcher {
    fn post(&self, job: Job) {
        job();
    }
}

/// Runs jobs in posting order on a dedicated tokio task
#[derive(Debug, Clone)]
pub struct SerialDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialDispatcher {
    /// Spawn the draining task; must be called inside a tokio runtime
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("Notification dispatcher stopped");
        });
        Self { tx }
    }
}

impl Dispatch for SerialDispatcher {
    fn post(&self, job: Job) {
        if self.tx.send(job).is_err() {
            debug!("Notification dropped, dispatcher is gone");
        }
    }
}

/// Binds a listener to a dispatcher for one connection
#[derive(Clone)]
pub struct Notifier {
    connection_id: u32,
    listener: Option<Arc<dyn Listener>>,
    dispatch: Arc<dyn Dispatch>,
}

impl Notifier {
    pub fn new(
        connection_id: u32,
        listener: Option<Arc<dyn Listener>>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Self {
        Self {
            connection_id,
            listener,
            dispatch,
        }
    }

    /// A notifier that drops everything
    pub fn silent(connection_id: u32) -> Self {
        Self::new(connection_id, None, Arc::new(InlineDispatcher))
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn state_changed(&self, state: State, status: Status, info: DiagnosticInfo) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let id = self.connection_id;
        self.dispatch
            .post(Box::new(move || listener.on_state_changed(id, state, status, &info)));
    }

    pub fn stream_info_received(&self) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let id = self.connection_id;
        self.dispatch
            .post(Box::new(move || listener.on_stream_info_received(id)));
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("connection_id", &self.connection_id)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(u32, State, Status)>>,
        catalogs: Mutex<Vec<u32>>,
    }

    impl Listener for Recorder {
        fn on_stream_info_received(&self, connection_id: u32) {
            self.catalogs.lock().push(connection_id);
        }

        fn on_state_changed(&self, id: u32, state: State, status: Status, _: &DiagnosticInfo) {
            self.events.lock().push((id, state, status));
        }
    }

    #[test]
    fn test_inline_notifier() {
        let recorder = Arc::new(Recorder::default());
        let notifier = Notifier::new(7, Some(recorder.clone()), Arc::new(InlineDispatcher));

        notifier.state_changed(State::Connected, Status::Success, DiagnosticInfo::new());
        notifier.stream_info_received();

        assert_eq!(
            recorder.events.lock().as_slice(),
            &[(7, State::Connected, Status::Success)]
        );
        assert_eq!(recorder.catalogs.lock().as_slice(), &[7]);
    }

    #[test]
    fn test_silent_notifier() {
        let notifier = Notifier::silent(1);
        notifier.state_changed(State::Play, Status::Success, DiagnosticInfo::new());
    }

    #[tokio::test]
    async fn test_serial_dispatcher_keeps_order() {
        let dispatcher = SerialDispatcher::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for i in 0..10 {
            let seen = seen.clone();
            dispatcher.post(Box::new(move || seen.lock().push(i)));
        }
        dispatcher.post(Box::new(move || {
            let _ = done_tx.send(());
        }));

        done_rx.await.unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }
}
