//! The single serialization point between the host and the device.
//!
//! A dedicated worker thread owns the link and executes one command at a
//! time, in arrival order. Callers hand requests over through a bounded queue
//! and await the reply on a oneshot. Attach and detach travel through the
//! same queue so a reconnect is ordered with respect to pending commands.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use vaultkey_frame::msg::msg_type_name;
use vaultkey_frame::{classify_response, FrameError, FrameReader, FrameWriter, Response, MAX_PAYLOAD};
use vaultkey_transport::DeviceLink;
use zeroize::Zeroizing;

use crate::config::ChannelConfig;
use crate::error::DeviceError;
use crate::session::{DeviceSession, LinkEvent};
use crate::status::StatusToken;

type Reply = oneshot::Sender<Result<Response, DeviceError>>;

/// Outgoing payload. Secret payloads are wiped when the request is dropped.
enum Payload {
    Plain(Bytes),
    Secret(Zeroizing<Vec<u8>>),
}

impl Payload {
    fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Plain(bytes) => bytes,
            Payload::Secret(secret) => secret,
        }
    }
}

struct Request {
    msg_type: u8,
    payload: Payload,
    timeout: Duration,
    deadline: Instant,
    reply: Reply,
}

enum Job {
    Command(Request),
    Attach(Connection),
    Detach,
}

/// Both halves of an attached link.
struct Connection {
    reader: FrameReader<Box<dyn DeviceLink>>,
    writer: FrameWriter<Box<dyn DeviceLink>>,
    label: String,
}

impl Connection {
    fn open(link: Box<dyn DeviceLink>) -> Result<Self, vaultkey_transport::TransportError> {
        let write_half = link.try_clone_link()?;
        let label = link.describe();
        Ok(Self {
            reader: FrameReader::new(link),
            writer: FrameWriter::new(write_half),
            label,
        })
    }
}

/// Why a round trip did not produce a response.
enum Failure {
    Timeout,
    Lost(String),
    Protocol(FrameError),
}

impl From<FrameError> for Failure {
    fn from(err: FrameError) -> Self {
        if err.is_timeout() {
            return Failure::Timeout;
        }
        match err {
            FrameError::ConnectionClosed => Failure::Lost("device closed the link".to_string()),
            FrameError::Io(io) => Failure::Lost(io.to_string()),
            other => Failure::Protocol(other),
        }
    }
}

/// Serializes commands onto the device link.
pub struct CommandChannel {
    jobs: mpsc::Sender<Job>,
    session: Arc<DeviceSession>,
    config: ChannelConfig,
    worker: Option<JoinHandle<()>>,
}

impl CommandChannel {
    /// Start the worker thread. No link is attached yet.
    pub fn new(session: Arc<DeviceSession>, config: ChannelConfig) -> Result<Self, DeviceError> {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let worker = Worker {
            jobs: rx,
            session: Arc::clone(&session),
            conn: None,
        };
        let handle = std::thread::Builder::new()
            .name("vaultkey-channel".to_string())
            .spawn(move || worker.run())
            .map_err(DeviceError::WorkerSpawn)?;

        Ok(Self {
            jobs: tx,
            session,
            config,
            worker: Some(handle),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Hand a new link to the worker, replacing any current one.
    ///
    /// The session reports `Connected` once the link is queued; commands
    /// queued after this call run on the new link. If the old link is lost
    /// before the worker reaches the new one, the worker restores
    /// `Connected` when it installs it.
    pub async fn attach(&self, link: Box<dyn DeviceLink>) -> Result<(), vaultkey_transport::TransportError> {
        let conn = Connection::open(link)?;
        let label = conn.label.clone();
        self.session.push(LinkEvent::Connected);
        if self.jobs.send(Job::Attach(conn)).await.is_err() {
            self.session.push(LinkEvent::Disconnected);
            return Err(vaultkey_transport::TransportError::Shutdown);
        }
        info!(link = %label, "device link attached");
        Ok(())
    }

    /// Drop the current link after already-queued commands have run.
    pub async fn detach(&self) {
        if self.jobs.send(Job::Detach).await.is_err() {
            debug!("command worker already stopped");
        }
        self.session.push(LinkEvent::Disconnected);
    }

    /// Send a command with the configured default timeout.
    pub async fn send(&self, msg_type: u8, payload: impl Into<Bytes>) -> Result<Bytes, DeviceError> {
        self.send_with_timeout(msg_type, payload, self.config.default_timeout)
            .await
    }

    /// Send a command whose payload is key material.
    ///
    /// The payload is wiped once the worker is done with it, on every path.
    pub async fn send_secret(&self, msg_type: u8, payload: Zeroizing<Vec<u8>>) -> Result<Bytes, DeviceError> {
        self.submit(msg_type, Payload::Secret(payload), self.config.default_timeout)
            .await
    }

    /// Send a command and wait for its response.
    ///
    /// A device refusal (ERROR frame) is returned as an error. Nothing is
    /// retried; dropping the returned future does not cancel a command the
    /// worker has already written, the response is read and discarded.
    pub async fn send_with_timeout(
        &self,
        msg_type: u8,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes, DeviceError> {
        self.submit(msg_type, Payload::Plain(payload.into()), timeout)
            .await
    }

    async fn submit(&self, msg_type: u8, payload: Payload, timeout: Duration) -> Result<Bytes, DeviceError> {
        let len = payload.as_slice().len();
        if len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD,
            }
            .into());
        }

        let (reply, rx) = oneshot::channel();
        let request = Request {
            msg_type,
            payload,
            timeout,
            deadline: Instant::now() + timeout,
            reply,
        };
        self.jobs
            .try_send(Job::Command(request))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DeviceError::Busy(self.config.queue_depth),
                mpsc::error::TrySendError::Closed(_) => DeviceError::Disconnected,
            })?;
        trace!(msg_type, msg_name = msg_type_name(msg_type), len, "command queued");

        let response = match tokio::time::timeout(timeout + self.config.reply_grace, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(DeviceError::LinkLost("command worker stopped".to_string())),
            Err(_) => {
                self.session.mark_degraded();
                return Err(DeviceError::Timeout(timeout));
            }
        };

        match response {
            Response::Reply(payload) => Ok(payload),
            Response::Refused(token) => Err(refusal(&token)),
        }
    }

    /// Stop accepting commands and wait for the worker to exit.
    ///
    /// Commands already queued still run.
    pub fn shutdown(self) {
        let CommandChannel { jobs, worker, .. } = self;
        drop(jobs);
        if let Some(handle) = worker {
            if handle.join().is_err() {
                warn!("command worker panicked");
            }
        }
    }
}

fn refusal(token: &[u8]) -> DeviceError {
    match StatusToken::parse(token) {
        StatusToken::Locked => DeviceError::Locked,
        StatusToken::AuthRequired => DeviceError::AuthRequired,
        other => DeviceError::Rejected(other.to_string()),
    }
}

struct Worker {
    jobs: mpsc::Receiver<Job>,
    session: Arc<DeviceSession>,
    conn: Option<Connection>,
}

impl Worker {
    fn run(mut self) {
        while let Some(job) = self.jobs.blocking_recv() {
            match job {
                Job::Command(request) => self.dispatch(request),
                Job::Attach(conn) => self.install(conn),
                Job::Detach => {
                    if let Some(conn) = self.conn.take() {
                        debug!(link = %conn.label, "device link detached");
                    }
                }
            }
        }
        debug!("command worker exiting");
    }

    fn dispatch(&mut self, request: Request) {
        if request.reply.is_closed() {
            debug!(msg_type = request.msg_type, "caller gone before dispatch; skipping");
            return;
        }
        if Instant::now() >= request.deadline {
            debug!(msg_type = request.msg_type, "deadline passed while queued");
            let _ = request.reply.send(Err(DeviceError::Timeout(request.timeout)));
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            let _ = request.reply.send(Err(DeviceError::Disconnected));
            return;
        };

        match round_trip(conn, &request) {
            Ok(response) => {
                self.session.mark_healthy();
                let _ = request.reply.send(Ok(response));
            }
            Err(Failure::Timeout) => {
                let dropped = conn.reader.discard_buffered();
                warn!(
                    msg_type = request.msg_type,
                    msg_name = msg_type_name(request.msg_type),
                    dropped,
                    "device did not answer in time"
                );
                self.session.mark_degraded();
                let _ = request.reply.send(Err(DeviceError::Timeout(request.timeout)));
            }
            Err(Failure::Protocol(err)) => {
                conn.reader.discard_buffered();
                warn!(msg_type = request.msg_type, error = %err, "protocol error");
                let _ = request.reply.send(Err(DeviceError::Protocol(err)));
            }
            Err(Failure::Lost(reason)) => {
                warn!(msg_type = request.msg_type, %reason, "device link lost");
                self.conn = None;
                let _ = request.reply.send(Err(DeviceError::LinkLost(reason.clone())));
                if !self.flush(&reason) {
                    self.session.push(LinkEvent::Disconnected);
                }
            }
        }
    }

    fn install(&mut self, conn: Connection) {
        debug!(link = %conn.label, "worker switched to new link");
        self.conn = Some(conn);
        self.session.link_installed();
    }

    /// Fail every command queued behind a lost link. Stops at the next
    /// attach, which applies to commands queued after it. Returns whether a
    /// new link was installed.
    fn flush(&mut self, reason: &str) -> bool {
        let mut flushed = 0usize;
        let mut attached = false;
        while let Ok(job) = self.jobs.try_recv() {
            match job {
                Job::Command(request) => {
                    flushed += 1;
                    let _ = request.reply.send(Err(DeviceError::LinkLost(reason.to_string())));
                }
                Job::Attach(conn) => {
                    self.install(conn);
                    attached = true;
                    break;
                }
                Job::Detach => {}
            }
        }
        if flushed > 0 {
            debug!(flushed, "flushed queued commands after link loss");
        }
        attached
    }
}

/// A write that cannot finish by the deadline leaves a partial frame on the
/// link, so it is treated as losing the link.
fn write_failure(err: FrameError) -> Failure {
    if err.is_timeout() {
        return Failure::Lost("device stopped accepting writes".to_string());
    }
    Failure::from(err)
}

fn round_trip(conn: &mut Connection, request: &Request) -> Result<Response, Failure> {
    let remaining = request.deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(Failure::Timeout);
    }
    conn.writer.set_write_timeout(Some(remaining))?;
    conn.writer
        .send(request.msg_type, request.payload.as_slice())
        .map_err(write_failure)?;

    loop {
        let remaining = request.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Failure::Timeout);
        }
        conn.reader.set_read_timeout(Some(remaining))?;

        let frame = conn.reader.read_frame()?;
        let got = frame.msg_type;
        match classify_response(request.msg_type, frame) {
            Some(response) => return Ok(response),
            None => debug!(
                expected = request.msg_type,
                got,
                "dropping stale frame"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_tokens_map_to_device_errors() {
        assert!(matches!(refusal(b"LOCKED"), DeviceError::Locked));
        assert!(matches!(refusal(b"AUTH_REQUIRED"), DeviceError::AuthRequired));
        assert!(matches!(refusal(b"NOT_FOUND"), DeviceError::Rejected(t) if t == "NOT_FOUND"));
    }

    #[test]
    fn io_failures_are_link_loss_and_deadlines_are_timeouts() {
        let timed_out = FrameError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(matches!(Failure::from(timed_out), Failure::Timeout));
        assert!(matches!(
            Failure::from(FrameError::ConnectionClosed),
            Failure::Lost(_)
        ));
        let reset = FrameError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(matches!(Failure::from(reset), Failure::Lost(_)));
        assert!(matches!(
            Failure::from(FrameError::UnsupportedVersion(3)),
            Failure::Protocol(_)
        ));
    }

    #[test]
    fn write_deadline_is_link_loss() {
        let blocked = FrameError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(matches!(write_failure(blocked), Failure::Lost(_)));
        assert!(matches!(
            write_failure(FrameError::ConnectionClosed),
            Failure::Lost(_)
        ));
    }

    #[test]
    fn secret_payload_is_sent_as_is() {
        let secret = Payload::Secret(Zeroizing::new(vec![7u8; 32]));
        assert_eq!(secret.as_slice(), &[7u8; 32]);
        let plain = Payload::Plain(Bytes::from_static(b"PING"));
        assert_eq!(plain.as_slice(), b"PING");
    }

    #[tokio::test]
    async fn no_link_is_disconnected() {
        let session = Arc::new(DeviceSession::new());
        let channel = CommandChannel::new(session, ChannelConfig::default()).unwrap();
        let err = channel.send(vaultkey_frame::msg::PING, "PING").await.unwrap_err();
        assert!(matches!(err, DeviceError::Disconnected));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_queueing() {
        let session = Arc::new(DeviceSession::new());
        let channel = CommandChannel::new(session, ChannelConfig::default()).unwrap();
        let err = channel
            .send(vaultkey_frame::msg::KEYBOARD_TYPE, vec![b'a'; MAX_PAYLOAD + 1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Protocol(FrameError::PayloadTooLarge { .. })
        ));

        let err = channel
            .send_secret(vaultkey_frame::msg::KEYBOARD_TYPE, Zeroizing::new(vec![b'a'; MAX_PAYLOAD + 1]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Protocol(FrameError::PayloadTooLarge { .. })
        ));
    }
}
