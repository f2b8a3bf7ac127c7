//! Background tasks: the status poller and the TOTP countdown.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vaultkey_frame::msg;

use crate::channel::CommandChannel;
use crate::error::DeviceError;
use crate::session::DeviceSession;

/// Handles to running background tasks.
pub struct Background {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Background {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Token that stops every task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every task and wait for all of them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                debug!(error = %err, "background task ended abnormally");
            }
        }
    }
}

/// Ping the device every `interval` so the session status stays current.
///
/// The channel marks the session degraded or disconnected on failure and
/// healthy again on success; the poller only supplies the traffic.
pub fn spawn_status_poll(
    channel: Arc<CommandChannel>,
    session: Arc<DeviceSession>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !session.status().link_up() {
                        continue;
                    }
                    match channel.send(msg::PING, Bytes::from_static(b"PING")).await {
                        Ok(_) => trace!(status = %session.status(), "status poll"),
                        Err(DeviceError::Busy(_)) => trace!("status poll skipped; channel busy"),
                        Err(err) => debug!(error = %err, "status poll failed"),
                    }
                }
            }
        }
        debug!("status poller stopped");
    })
}
