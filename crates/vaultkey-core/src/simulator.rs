//! An in-process VaultKey device.
//!
//! [`SimulatedDevice`] speaks the same frames as the firmware over a
//! [`SimLink`], so the whole host stack can run without hardware. It keeps a
//! log of every frame it received and exposes knobs for the failure modes a
//! real link has: silence, latency, a stalled reader and disconnects.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};
use vaultkey_frame::{decode_frame_partial, encode_frame, msg, response_type, Frame, MAX_PAYLOAD};
use vaultkey_transport::DeviceLink;

use crate::auth::LOCKOUT_THRESHOLD;
use crate::config::KdfConfig;
use crate::error::AuthError;
use crate::fido::{encode_credentials, FidoCredential};
use crate::kdf::{derive_key, KEY_LEN};
use crate::vault::{CAPACITY, NAME_MAX, SECRET_MAX};

const DEFAULT_INFO: &str = "VaultKey v1.0 (simulated)";

enum Answer {
    Reply(Vec<u8>),
    Refuse(&'static str),
}

fn status(token: &str) -> Answer {
    Answer::Reply(token.as_bytes().to_vec())
}

struct Pending {
    ready_at: Instant,
    bytes: Vec<u8>,
    pos: usize,
}

struct DeviceState {
    pin_key: Vec<u8>,
    fail_count: u32,
    unlocked: bool,
    entries: Vec<(String, Vec<u8>)>,
    fido: Vec<FidoCredential>,
    fido_pin: Option<Vec<u8>>,
    totp_seed: u64,
    info: String,
    typed: Vec<Vec<u8>>,
    received: Vec<(u8, Bytes)>,
    inbox: BytesMut,
    outbox: VecDeque<Pending>,
    connected: bool,
    silent: bool,
    stalled: bool,
    latency: Duration,
}

impl DeviceState {
    fn locked(&self) -> bool {
        self.fail_count >= LOCKOUT_THRESHOLD
    }

    fn handle(&mut self, frame: &Frame) -> Answer {
        let payload = frame.payload.as_ref();
        match frame.msg_type {
            msg::PING => Answer::Reply(payload.to_vec()),
            msg::INFO => Answer::Reply(self.info.as_bytes().to_vec()),
            msg::AUTH => self.authenticate(payload),
            msg::GET_SECURITY => {
                let mut out = self.fail_count.to_le_bytes().to_vec();
                out.push(u8::from(self.locked()));
                Answer::Reply(out)
            }
            msg::LOCK => {
                self.unlocked = false;
                status("OK")
            }
            msg::TOTP => match <[u8; 8]>::try_from(payload) {
                Ok(time) => Answer::Reply(self.code_for(u64::from_le_bytes(time)).into_bytes()),
                Err(_) => Answer::Refuse("FAIL"),
            },
            msg::KEYBOARD_TYPE => {
                self.typed.push(payload.to_vec());
                status("OK")
            }
            msg::VAULT_LIST | msg::VAULT_GET | msg::VAULT_ADD | msg::VAULT_DELETE if !self.unlocked => {
                Answer::Refuse("AUTH_REQUIRED")
            }
            msg::VAULT_LIST => {
                let mut out = Vec::new();
                for (name, _) in &self.entries {
                    out.push(name.len() as u8);
                    out.extend_from_slice(name.as_bytes());
                }
                Answer::Reply(out)
            }
            msg::VAULT_GET => match parse_name(payload) {
                Some(name) => match self.entries.iter().find(|(n, _)| *n == name) {
                    Some((_, secret)) => Answer::Reply(secret.clone()),
                    None => Answer::Refuse("NOT_FOUND"),
                },
                None => Answer::Refuse("FAIL"),
            },
            msg::VAULT_ADD => self.add_entry(payload),
            msg::VAULT_DELETE => match parse_name(payload) {
                Some(name) => match self.entries.iter().position(|(n, _)| *n == name) {
                    Some(index) => {
                        self.entries.remove(index);
                        status("OK")
                    }
                    None => status("NOT_FOUND"),
                },
                None => status("FAIL"),
            },
            msg::FIDO_LIST => match encode_credentials(&self.fido) {
                Ok(list) => Answer::Reply(list),
                Err(_) => Answer::Refuse("FAIL"),
            },
            msg::FIDO_DELETE => match self.fido.iter().position(|c| c.credential_id == payload) {
                Some(index) => {
                    self.fido.remove(index);
                    status("OK")
                }
                None => status("NOT_FOUND"),
            },
            msg::FIDO_PIN_STATUS => Answer::Reply(vec![u8::from(self.fido_pin.is_some())]),
            msg::FIDO_SET_PIN if payload.len() == KEY_LEN => {
                self.fido_pin = Some(payload.to_vec());
                status("OK")
            }
            msg::FIDO_SET_PIN => status("FAIL"),
            _ => Answer::Refuse("UNSUPPORTED"),
        }
    }

    fn authenticate(&mut self, key: &[u8]) -> Answer {
        if self.locked() {
            return Answer::Refuse("LOCKED");
        }
        if key == self.pin_key.as_slice() {
            self.fail_count = 0;
            self.unlocked = true;
            status("OK")
        } else {
            self.fail_count += 1;
            self.unlocked = false;
            status("FAIL")
        }
    }

    fn add_entry(&mut self, payload: &[u8]) -> Answer {
        let Some((name, secret)) = parse_add(payload) else {
            return status("FAIL");
        };
        if self.entries.iter().any(|(n, _)| *n == name) {
            return status("EXISTS");
        }
        if self.entries.len() >= CAPACITY {
            return status("FULL");
        }
        self.entries.push((name, secret));
        status("OK")
    }

    /// Stand-in for the firmware's HMAC-based code: deterministic per window.
    fn code_for(&self, unix_time: u64) -> String {
        let window = unix_time / crate::totp::WINDOW_SECONDS;
        let mixed = (window ^ self.totp_seed).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        format!("{:06}", (mixed >> 32) % 1_000_000)
    }

    fn receive(&mut self, frame: Frame) {
        trace!(msg_type = frame.msg_type, len = frame.payload.len(), "simulator received frame");
        let answer = self.handle(&frame);
        self.received.push((frame.msg_type, frame.payload));
        if self.silent {
            return;
        }
        let (msg_type, payload) = match answer {
            Answer::Reply(payload) => (response_type(frame.msg_type), payload),
            Answer::Refuse(token) => (msg::ERROR, token.as_bytes().to_vec()),
        };
        self.queue_frame(msg_type, &payload);
    }

    fn queue_frame(&mut self, msg_type: u8, payload: &[u8]) {
        let mut wire = BytesMut::new();
        if encode_frame(msg_type, payload, &mut wire).is_err() {
            debug!(msg_type, "simulator reply too large; dropped");
            return;
        }
        self.outbox.push_back(Pending {
            ready_at: Instant::now() + self.latency,
            bytes: wire.to_vec(),
            pos: 0,
        });
    }
}

fn parse_name(payload: &[u8]) -> Option<String> {
    let (&len, rest) = payload.split_first()?;
    if rest.len() != len as usize {
        return None;
    }
    String::from_utf8(rest.to_vec()).ok()
}

fn parse_add(payload: &[u8]) -> Option<(String, Vec<u8>)> {
    let (&name_len, rest) = payload.split_first()?;
    let name_len = name_len as usize;
    let name = rest.get(..name_len)?;
    let (&secret_len, secret) = rest.get(name_len..)?.split_first()?;
    if secret.len() != secret_len as usize
        || name.is_empty()
        || name.len() > NAME_MAX
        || secret.is_empty()
        || secret.len() > SECRET_MAX
    {
        return None;
    }
    Some((String::from_utf8(name.to_vec()).ok()?, secret.to_vec()))
}

struct Shared {
    state: Mutex<DeviceState>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`SimulatedDevice`].
pub struct SimulatorBuilder {
    pin: String,
    kdf: KdfConfig,
    entries: Vec<(String, Vec<u8>)>,
    fido: Vec<FidoCredential>,
    info: String,
}

impl SimulatorBuilder {
    /// Use these derivation parameters for the device PIN; the host must
    /// use the same ones.
    pub fn kdf(mut self, kdf: KdfConfig) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn entry(mut self, name: &str, secret: &[u8]) -> Self {
        self.entries.push((name.to_string(), secret.to_vec()));
        self
    }

    pub fn fido_credential(mut self, rp_id: &str, credential_id: &[u8]) -> Self {
        self.fido.push(FidoCredential {
            rp_id: rp_id.to_string(),
            credential_id: credential_id.to_vec(),
        });
        self
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn build(self) -> Result<SimulatedDevice, AuthError> {
        let pin_key = derive_key(&self.pin, &self.kdf)?;
        let state = DeviceState {
            pin_key: pin_key.as_bytes().to_vec(),
            fail_count: 0,
            unlocked: false,
            entries: self.entries,
            fido: self.fido,
            fido_pin: None,
            totp_seed: 0x5641_554C_544B_4559,
            info: self.info,
            typed: Vec::new(),
            received: Vec::new(),
            inbox: BytesMut::new(),
            outbox: VecDeque::new(),
            connected: true,
            silent: false,
            stalled: false,
            latency: Duration::ZERO,
        };
        Ok(SimulatedDevice {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                ready: Condvar::new(),
            }),
        })
    }
}

/// A simulated token. Clones share the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    shared: Arc<Shared>,
}

impl SimulatedDevice {
    pub fn builder(pin: &str) -> SimulatorBuilder {
        SimulatorBuilder {
            pin: pin.to_string(),
            kdf: KdfConfig::default(),
            entries: Vec::new(),
            fido: Vec::new(),
            info: DEFAULT_INFO.to_string(),
        }
    }

    /// A device with no entries whose PIN is `pin`.
    pub fn new(pin: &str, kdf: &KdfConfig) -> Result<Self, AuthError> {
        Self::builder(pin).kdf(kdf.clone()).build()
    }

    /// A new link handle onto this device.
    pub fn link(&self) -> SimLink {
        SimLink {
            shared: Arc::clone(&self.shared),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
        }
    }

    /// How many frames of `msg_type` the device has received.
    pub fn frames_received(&self, msg_type: u8) -> usize {
        self.shared
            .lock()
            .received
            .iter()
            .filter(|(t, _)| *t == msg_type)
            .count()
    }

    /// Message types received, in order.
    pub fn received_types(&self) -> Vec<u8> {
        self.shared.lock().received.iter().map(|(t, _)| *t).collect()
    }

    /// Payloads received for `msg_type`, in order.
    pub fn payloads_received(&self, msg_type: u8) -> Vec<Bytes> {
        self.shared
            .lock()
            .received
            .iter()
            .filter(|(t, _)| *t == msg_type)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Everything typed through the keyboard interface.
    pub fn typed(&self) -> Vec<Vec<u8>> {
        self.shared.lock().typed.clone()
    }

    pub fn fail_count(&self) -> u32 {
        self.shared.lock().fail_count
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.shared.lock().entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn entry_secret(&self, name: &str) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, secret)| secret.clone())
    }

    pub fn fido_pin_key(&self) -> Option<Vec<u8>> {
        self.shared.lock().fido_pin.clone()
    }

    /// Stop answering; frames are still received and logged.
    pub fn set_silent(&self, silent: bool) {
        self.shared.lock().silent = silent;
    }

    /// Stop draining the host's writes, as a wedged bridge would. Writes
    /// block until unstalled or their write timeout passes.
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.lock().stalled = stalled;
        self.shared.ready.notify_all();
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.lock().latency = latency;
    }

    /// End the device-side unlocked session, as an idle timeout would.
    pub fn expire_session(&self) {
        self.shared.lock().unlocked = false;
    }

    /// Clear the fail counter the way a service reset would.
    pub fn reset_lockout(&self) {
        self.shared.lock().fail_count = 0;
    }

    /// Queue an unsolicited frame for the host to read.
    pub fn inject_frame(&self, msg_type: u8, payload: &[u8]) {
        let mut state = self.shared.lock();
        state.queue_frame(msg_type, payload);
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Pull the cable: reads see end-of-stream and writes fail.
    pub fn disconnect(&self) {
        let mut state = self.shared.lock();
        state.connected = false;
        state.unlocked = false;
        state.inbox.clear();
        state.outbox.clear();
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Plug the device back in. Attach a fresh [`link`](Self::link).
    pub fn reconnect(&self) {
        self.shared.lock().connected = true;
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("SimulatedDevice")
            .field("entries", &state.entries.len())
            .field("fail_count", &state.fail_count)
            .field("unlocked", &state.unlocked)
            .field("connected", &state.connected)
            .finish()
    }
}

/// One handle onto a [`SimulatedDevice`]'s pipe.
pub struct SimLink {
    shared: Arc<Shared>,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
}

impl Read for SimLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let timeout = *self.read_timeout.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = self.shared.lock();
        loop {
            if !state.connected {
                return Ok(0);
            }
            let now = Instant::now();
            if let Some(front) = state.outbox.front_mut() {
                if front.ready_at <= now {
                    let n = buf.len().min(front.bytes.len() - front.pos);
                    buf[..n].copy_from_slice(&front.bytes[front.pos..front.pos + n]);
                    front.pos += n;
                    if front.pos == front.bytes.len() {
                        state.outbox.pop_front();
                    }
                    return Ok(n);
                }
            }
            if deadline.is_some_and(|d| now >= d) {
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }

            let ready_at = state.outbox.front().map(|p| p.ready_at);
            let wake = match (deadline, ready_at) {
                (Some(d), Some(r)) => Some(d.min(r)),
                (Some(at), None) | (None, Some(at)) => Some(at),
                (None, None) => None,
            };
            state = match wake {
                Some(at) => {
                    self.shared
                        .ready
                        .wait_timeout(state, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl Write for SimLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = *self.write_timeout.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = self.shared.lock();
        loop {
            if !state.connected {
                return Err(io::Error::from(ErrorKind::BrokenPipe));
            }
            if !state.stalled {
                break;
            }
            let now = Instant::now();
            state = match deadline {
                Some(d) if now >= d => return Err(io::Error::from(ErrorKind::WouldBlock)),
                Some(d) => {
                    self.shared
                        .ready
                        .wait_timeout(state, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        state.inbox.put_slice(buf);
        loop {
            match decode_frame_partial(&mut state.inbox, MAX_PAYLOAD) {
                Ok(Some(frame)) => state.receive(frame),
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "simulator dropped undecodable input");
                    state.inbox.clear();
                    break;
                }
            }
        }
        drop(state);
        self.shared.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DeviceLink for SimLink {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> vaultkey_transport::Result<()> {
        *self.read_timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
        Ok(())
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> vaultkey_transport::Result<()> {
        *self.write_timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
        Ok(())
    }

    fn try_clone_link(&self) -> vaultkey_transport::Result<Box<dyn DeviceLink>> {
        Ok(Box::new(SimLink {
            shared: Arc::clone(&self.shared),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
        }))
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}
