use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Last known state of the device link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeviceStatus {
    /// The link is up and the last command succeeded.
    Connected,
    /// The link is up but the last command timed out.
    Degraded,
    Disconnected,
    /// The link reported a failure.
    Error(String),
}

impl DeviceStatus {
    /// Only a healthy link counts as connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, DeviceStatus::Connected)
    }

    /// Whether a link is attached at all.
    pub fn link_up(&self) -> bool {
        matches!(self, DeviceStatus::Connected | DeviceStatus::Degraded)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Connected => f.write_str("Connected"),
            DeviceStatus::Degraded => f.write_str("Degraded"),
            DeviceStatus::Disconnected => f.write_str("Disconnected"),
            DeviceStatus::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Link transitions reported by whatever owns the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Error(String),
}

struct SessionState {
    status: DeviceStatus,
    epoch: u64,
}

/// Connectivity model shared by the channel and every manager.
///
/// The epoch counts link sessions. It advances on every connect and on the
/// first transition to a down state; anything cached against an older epoch
/// belongs to a previous device session.
pub struct DeviceSession {
    state: Mutex<SessionState>,
    tx: watch::Sender<DeviceStatus>,
}

impl DeviceSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DeviceStatus::Disconnected);
        Self {
            state: Mutex::new(SessionState {
                status: DeviceStatus::Disconnected,
                epoch: 0,
            }),
            tx,
        }
    }

    /// Last known status. Never blocks on the device.
    pub fn status(&self) -> DeviceStatus {
        self.lock().status.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Receive every status change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.tx.subscribe()
    }

    /// Apply a link transition. The new status is visible immediately.
    pub fn push(&self, event: LinkEvent) {
        let mut state = self.lock();
        match event {
            LinkEvent::Connected => {
                state.epoch += 1;
                info!(epoch = state.epoch, "device connected");
                self.set(&mut state, DeviceStatus::Connected);
            }
            LinkEvent::Disconnected => {
                if state.status.link_up() {
                    state.epoch += 1;
                }
                info!(epoch = state.epoch, "device disconnected");
                self.set(&mut state, DeviceStatus::Disconnected);
            }
            LinkEvent::Error(reason) => {
                if state.status.link_up() {
                    state.epoch += 1;
                }
                warn!(epoch = state.epoch, %reason, "device link error");
                self.set(&mut state, DeviceStatus::Error(reason));
            }
        }
    }

    /// A command on a live link timed out.
    pub(crate) fn mark_degraded(&self) {
        let mut state = self.lock();
        if state.status == DeviceStatus::Connected {
            debug!(epoch = state.epoch, "device degraded");
            self.set(&mut state, DeviceStatus::Degraded);
        }
    }

    /// The channel worker started using a new link. Restores `Connected` if
    /// the previous link was reported lost after the new one was queued.
    pub(crate) fn link_installed(&self) {
        let mut state = self.lock();
        if !state.status.link_up() {
            state.epoch += 1;
            info!(epoch = state.epoch, "device connected on queued link");
            self.set(&mut state, DeviceStatus::Connected);
        }
    }

    /// A command on a live link completed.
    pub(crate) fn mark_healthy(&self) {
        let mut state = self.lock();
        if state.status == DeviceStatus::Degraded {
            debug!(epoch = state.epoch, "device recovered");
            self.set(&mut state, DeviceStatus::Connected);
        }
    }

    fn set(&self, state: &mut SessionState, status: DeviceStatus) {
        state.status = status.clone();
        self.tx.send_replace(status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}
