//! PIN authentication and the host-side projection of the device lockout.
//!
//! The device is the authority on the fail counter. The host keeps its own
//! view so that, once five attempts have failed, no further PIN attempt is
//! ever put on the wire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};
use vaultkey_frame::msg;
use zeroize::Zeroizing;

use crate::channel::CommandChannel;
use crate::config::KdfConfig;
use crate::error::{AuthError, DeviceError};
use crate::kdf::{derive_key_blocking, DerivedKey};
use crate::session::DeviceSession;
use crate::status::StatusToken;

/// Failed attempts after which the device locks permanently.
pub const LOCKOUT_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    AwaitingPin,
    Authenticating,
    Authenticated,
    /// Terminal until the device is reset out of band.
    LockedOut,
}

/// Fail counter and lock flag. `locked` holds exactly when the counter has
/// reached [`LOCKOUT_THRESHOLD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityStatus {
    fail_count: u32,
    locked: bool,
}

impl SecurityStatus {
    pub fn from_fail_count(fail_count: u32) -> Self {
        Self {
            fail_count,
            locked: fail_count >= LOCKOUT_THRESHOLD,
        }
    }

    /// Build from the device's report. A set lock flag raises the counter to
    /// the threshold if the device reported less.
    pub fn from_device(fail_count: u32, locked: bool) -> Self {
        if locked {
            Self::from_fail_count(fail_count.max(LOCKOUT_THRESHOLD))
        } else {
            Self::from_fail_count(fail_count)
        }
    }

    /// Decode a GET_SECURITY reply: `[fail_count:u32 LE][locked:u8]`.
    pub fn decode(payload: &[u8]) -> Result<Self, DeviceError> {
        match payload {
            [a, b, c, d, flag] => Ok(Self::from_device(
                u32::from_le_bytes([*a, *b, *c, *d]),
                *flag != 0,
            )),
            _ => Err(DeviceError::BadResponse {
                what: "security status",
                detail: format!("expected 5 bytes, got {}", payload.len()),
            }),
        }
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn remaining_attempts(&self) -> u32 {
        LOCKOUT_THRESHOLD.saturating_sub(self.fail_count)
    }
}

impl Default for SecurityStatus {
    fn default() -> Self {
        Self::from_fail_count(0)
    }
}

/// The device's answer to an AUTH request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    Accepted,
    WrongPin,
    Locked,
    /// Anything else; carries the raw text.
    DeviceFault(String),
}

impl AuthResponse {
    pub fn parse(payload: &[u8]) -> Self {
        match StatusToken::parse(payload) {
            StatusToken::Ok => AuthResponse::Accepted,
            StatusToken::Fail => AuthResponse::WrongPin,
            StatusToken::Locked => AuthResponse::Locked,
            other => AuthResponse::DeviceFault(other.to_string()),
        }
    }
}

struct Inner {
    state: AuthState,
    /// Session epoch the current state was reached in.
    epoch: u64,
    security: SecurityStatus,
}

/// PIN authentication state machine.
pub struct Authenticator {
    channel: Arc<CommandChannel>,
    session: Arc<DeviceSession>,
    kdf: KdfConfig,
    inner: Mutex<Inner>,
}

impl Authenticator {
    pub fn new(channel: Arc<CommandChannel>, session: Arc<DeviceSession>, kdf: KdfConfig) -> Self {
        Self {
            channel,
            session,
            kdf,
            inner: Mutex::new(Inner {
                state: AuthState::AwaitingPin,
                epoch: 0,
                security: SecurityStatus::default(),
            }),
        }
    }

    pub fn kdf_config(&self) -> &KdfConfig {
        &self.kdf
    }

    /// Current state. An authentication from an earlier link session reads
    /// as `AwaitingPin`.
    pub fn state(&self) -> AuthState {
        let mut inner = self.lock_inner();
        self.expire_stale(&mut inner);
        inner.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    /// The last security status this host knows of, without asking the device.
    pub fn cached_security(&self) -> SecurityStatus {
        self.lock_inner().security
    }

    /// Ask the device for its fail counter and lock flag.
    ///
    /// Always allowed, also while locked out. What comes back updates the
    /// host projection; while locked out in the same link session the
    /// projection stays locked whatever the device says.
    pub async fn security_status(&self) -> Result<SecurityStatus, AuthError> {
        let reported = match self.channel.send(msg::GET_SECURITY, Bytes::new()).await {
            Ok(payload) => SecurityStatus::decode(&payload)?,
            Err(DeviceError::Locked) => SecurityStatus::from_device(0, true),
            Err(err) => return Err(err.into()),
        };
        Ok(self.apply_security(reported))
    }

    fn apply_security(&self, reported: SecurityStatus) -> SecurityStatus {
        let epoch = self.session.epoch();
        let mut inner = self.lock_inner();
        self.expire_stale(&mut inner);

        if reported.locked() {
            let fail_count = reported.fail_count().max(inner.security.fail_count());
            self.enter_lockout(&mut inner, fail_count);
        } else if inner.state == AuthState::LockedOut {
            if inner.epoch != epoch {
                info!(epoch, "device reports lockout cleared; accepting PIN attempts again");
                inner.state = AuthState::AwaitingPin;
                inner.epoch = epoch;
                inner.security = reported;
            } else {
                warn!(
                    fail_count = reported.fail_count(),
                    "device reports unlocked within a locked-out session; keeping lockout"
                );
            }
        } else {
            inner.security = reported;
        }
        inner.security
    }

    /// Derive the key for `pin` and authenticate with it.
    pub async fn authenticate(&self, pin: &str) -> Result<(), AuthError> {
        let attempt = self.begin()?;
        let key = match derive_key_blocking(pin, &self.kdf).await {
            Ok(key) => key,
            Err(err) => {
                attempt.abandon();
                return Err(err);
            }
        };
        self.finish(attempt, &key).await
    }

    /// Authenticate with an already-derived key.
    pub async fn authenticate_key(&self, key: &DerivedKey) -> Result<(), AuthError> {
        let attempt = self.begin()?;
        self.finish(attempt, key).await
    }

    /// Ask the device to end its unlocked session.
    pub async fn lock(&self) -> Result<(), AuthError> {
        let reply = self.channel.send(msg::LOCK, Bytes::new()).await?;
        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                let mut inner = self.lock_inner();
                if inner.state != AuthState::LockedOut {
                    inner.state = AuthState::AwaitingPin;
                }
                info!("device session locked");
                Ok(())
            }
            other => Err(AuthError::DeviceFault(other.to_string())),
        }
    }

    /// The device refused a command for lack of an unlocked session.
    pub(crate) fn note_auth_required(&self) {
        let mut inner = self.lock_inner();
        if inner.state == AuthState::Authenticated {
            debug!("device session expired; PIN required again");
            inner.state = AuthState::AwaitingPin;
        }
    }

    fn begin(&self) -> Result<Attempt<'_>, AuthError> {
        let mut inner = self.lock_inner();
        self.expire_stale(&mut inner);
        let previous = match inner.state {
            AuthState::LockedOut => return Err(AuthError::AlreadyLocked),
            AuthState::Authenticating => return Err(AuthError::InProgress),
            state => state,
        };
        inner.state = AuthState::Authenticating;
        Ok(Attempt {
            auth: self,
            previous,
            armed: true,
        })
    }

    async fn finish(&self, attempt: Attempt<'_>, key: &DerivedKey) -> Result<(), AuthError> {
        let result = self
            .channel
            .send_secret(msg::AUTH, Zeroizing::new(key.as_bytes().to_vec()))
            .await;

        match result {
            Ok(reply) => match AuthResponse::parse(&reply) {
                AuthResponse::Accepted => {
                    let epoch = self.session.epoch();
                    let mut inner = self.lock_inner();
                    inner.state = AuthState::Authenticated;
                    inner.epoch = epoch;
                    inner.security = SecurityStatus::default();
                    attempt.disarm();
                    info!(epoch, "authenticated");
                    Ok(())
                }
                AuthResponse::WrongPin => self.record_failure(attempt).await,
                AuthResponse::Locked => {
                    attempt.disarm();
                    Err(self.lock_out())
                }
                AuthResponse::DeviceFault(text) => {
                    attempt.restore(AuthState::AwaitingPin);
                    warn!(reply = %text, "unrecognised authentication reply");
                    Err(AuthError::DeviceFault(text))
                }
            },
            Err(err) if err.is_lock_indicator() => {
                attempt.disarm();
                Err(self.lock_out())
            }
            Err(err) => {
                attempt.restore(AuthState::AwaitingPin);
                Err(err.into())
            }
        }
    }

    /// A wrong PIN. The device's counter is authoritative; if it can't be
    /// read the host counts the failure itself.
    async fn record_failure(&self, attempt: Attempt<'_>) -> Result<(), AuthError> {
        let known = self.cached_security().fail_count();
        let fail_count = match self.channel.send(msg::GET_SECURITY, Bytes::new()).await {
            Ok(payload) => match SecurityStatus::decode(&payload) {
                Ok(status) if status.locked() => status.fail_count(),
                Ok(status) => status.fail_count().max(known + 1),
                Err(err) => {
                    warn!(error = %err, "unreadable security status; counting locally");
                    known + 1
                }
            },
            Err(DeviceError::Locked) => LOCKOUT_THRESHOLD,
            Err(err) => {
                warn!(error = %err, "security status unavailable; counting locally");
                known + 1
            }
        };

        let status = SecurityStatus::from_fail_count(fail_count);
        let mut inner = self.lock_inner();
        attempt.disarm();
        if status.locked() {
            self.enter_lockout(&mut inner, fail_count);
            return Err(AuthError::Locked { fail_count });
        }

        inner.state = AuthState::AwaitingPin;
        inner.security = status;
        drop(inner);
        warn!(fail_count, remaining = status.remaining_attempts(), "wrong PIN");
        Err(AuthError::WrongPin {
            fail_count,
            remaining: status.remaining_attempts(),
        })
    }

    fn lock_out(&self) -> AuthError {
        let mut inner = self.lock_inner();
        let fail_count = inner.security.fail_count().max(LOCKOUT_THRESHOLD);
        self.enter_lockout(&mut inner, fail_count);
        AuthError::Locked { fail_count }
    }

    fn enter_lockout(&self, inner: &mut Inner, fail_count: u32) {
        let status = SecurityStatus::from_device(fail_count, true);
        if inner.state != AuthState::LockedOut {
            warn!(fail_count = status.fail_count(), "device locked out");
        }
        inner.state = AuthState::LockedOut;
        inner.epoch = self.session.epoch();
        inner.security = status;
    }

    fn expire_stale(&self, inner: &mut Inner) {
        if inner.state == AuthState::Authenticated && inner.epoch != self.session.epoch() {
            debug!("authentication belongs to an earlier link session");
            inner.state = AuthState::AwaitingPin;
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An authentication in flight. If it is dropped before an outcome is
/// recorded (the caller's future was cancelled, derivation failed), the
/// state it replaced comes back.
struct Attempt<'a> {
    auth: &'a Authenticator,
    previous: AuthState,
    armed: bool,
}

impl Attempt<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }

    fn abandon(self) {}

    fn restore(mut self, state: AuthState) {
        self.previous = state;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.auth.lock_inner();
        if inner.state == AuthState::Authenticating {
            inner.state = self.previous;
        }
    }
}
