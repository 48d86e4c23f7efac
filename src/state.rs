use crate::commands::{CMD_MUTE, CMD_VOLUME};
use crate::subscription::StateUpdate;
use crate::types::{DeviceState, Value};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Callback invoked with every published snapshot
pub type StateCallback = Arc<dyn Fn(&DeviceState) + Send + Sync>;

/// Why a snapshot was published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotificationKind {
    /// Nothing published yet
    Initial,
    Changed,
    Disconnected,
}

#[derive(Debug, Clone)]
pub(crate) struct Notification {
    pub kind: NotificationKind,
    pub state: Arc<DeviceState>,
}

/// Fans a published snapshot out to the callback, subscribers and status waiters
pub(crate) struct Notifier {
    latest: watch::Sender<Notification>,
    updates: broadcast::Sender<StateUpdate>,
    callback: RwLock<Option<StateCallback>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(Notification {
            kind: NotificationKind::Initial,
            state: Arc::new(DeviceState::new()),
        });
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            latest,
            updates,
            callback: RwLock::new(None),
        }
    }

    pub fn set_callback(&self, callback: Option<StateCallback>) {
        *self.callback.write() = callback;
    }

    /// Receiver that resolves on the next publication
    pub fn waiter(&self) -> watch::Receiver<Notification> {
        self.latest.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    /// Last published snapshot
    pub fn latest(&self) -> Arc<DeviceState> {
        self.latest.borrow().state.clone()
    }

    fn publish(&self, kind: NotificationKind, state: DeviceState) {
        let state = Arc::new(state);

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&state);
        }

        let update = match kind {
            NotificationKind::Disconnected => StateUpdate::Disconnected,
            _ => StateUpdate::Changed(state.clone()),
        };
        let _ = self.updates.send(update);

        self.latest.send_replace(Notification { kind, state });
    }
}

/// Owner of the device state for one session.
///
/// Lives inside the session task, which is the only writer. Changes are
/// published after a short quiet period: the first `apply` arms the deadline
/// and later ones ride along until it passes.
pub(crate) struct StateAggregator {
    state: DeviceState,
    delay: Duration,
    deadline: Option<Instant>,
    notifier: Arc<Notifier>,
}

impl StateAggregator {
    pub fn new(notifier: Arc<Notifier>, delay: Duration) -> Self {
        Self {
            state: DeviceState::new(),
            delay,
            deadline: None,
            notifier,
        }
    }

    pub fn apply(&mut self, key: &str, value: Value) {
        self.state.insert(key, value);

        // volume changes implicitly disable mute
        if key == CMD_VOLUME {
            self.state.insert(CMD_MUTE, Value::Bool(false));
        }

        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.delay);
        }
    }

    /// When the pending publication is due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Publish the current state; called when the deadline passes
    pub fn fire(&mut self) {
        self.deadline = None;
        tracing::trace!(keys = self.state.len(), "State changed");
        self.notifier.publish(NotificationKind::Changed, self.state.clone());
    }

    /// Drop all state and announce the disconnect
    pub fn clear(&mut self) {
        self.deadline = None;
        self.state.clear();
        self.notifier.publish(NotificationKind::Disconnected, DeviceState::new());
    }

    #[cfg(test)]
    pub fn state(&self) -> &DeviceState {
        &self.state
    }
}
