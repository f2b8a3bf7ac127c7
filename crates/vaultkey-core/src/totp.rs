//! One-time codes. The device holds the seed; the host supplies the time,
//! runs the countdown and fetches a fresh code at each window boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vaultkey_frame::msg;

use crate::channel::CommandChannel;
use crate::error::TotpError;
use crate::session::DeviceSession;

/// Length of one code window in seconds.
pub const WINDOW_SECONDS: u64 = 30;

/// Digits in a code.
pub const CODE_DIGITS: usize = 6;

/// Source of Unix time.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seconds until the current code expires, in `1..=30`.
pub fn seconds_remaining(now: u64) -> u64 {
    WINDOW_SECONDS - now % WINDOW_SECONDS
}

pub fn window_index(now: u64) -> u64 {
    now / WINDOW_SECONDS
}

/// Tracks which window the countdown last displayed.
#[derive(Debug, Default)]
pub struct Countdown {
    last_window: Option<u64>,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick at `now`. Returns true when a window boundary was
    /// crossed since the previous tick. A burst of skipped ticks still
    /// counts as one crossing.
    pub fn observe(&mut self, now: u64) -> bool {
        let window = window_index(now);
        let crossed = matches!(self.last_window, Some(last) if last != window);
        self.last_window = Some(window);
        crossed
    }
}

/// What a UI shows for the one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotpState {
    pub code: Option<String>,
    pub seconds_remaining: u64,
}

struct Latest {
    epoch: u64,
    /// Time the code was requested for. A slower, older fetch never replaces it.
    requested_at: u64,
    code: String,
}

struct Inner {
    countdown: Countdown,
    latest: Option<Latest>,
}

/// Fetches and caches the device's current one-time code.
pub struct TotpProvider {
    channel: Arc<CommandChannel>,
    session: Arc<DeviceSession>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    in_flight: AtomicBool,
}

impl TotpProvider {
    pub fn new(channel: Arc<CommandChannel>, session: Arc<DeviceSession>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel,
            session,
            clock,
            inner: Mutex::new(Inner {
                countdown: Countdown::new(),
                latest: None,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Ask the device for the code of the current window.
    pub async fn current_code(&self) -> Result<String, TotpError> {
        let now = self.clock.now_unix();
        let epoch = self.session.epoch();
        let payload = self.channel.send(msg::TOTP, now.to_le_bytes().to_vec()).await?;
        let code = parse_code(&payload)?;

        // Fetches complete in channel order; the last one to complete wins.
        self.lock_inner().latest = Some(Latest {
            epoch,
            requested_at: now,
            code: code.clone(),
        });
        Ok(code)
    }

    /// Fetch unless a fetch is already running. Returns `None` when skipped.
    pub async fn refresh(&self) -> Result<Option<String>, TotpError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("code fetch already in flight");
            return Ok(None);
        }
        let _guard = InFlight(&self.in_flight);
        self.current_code().await.map(Some)
    }

    /// Advance the countdown to the clock's current time. Returns true when
    /// a fetch is due.
    pub fn observe_tick(&self) -> bool {
        let now = self.clock.now_unix();
        self.lock_inner().countdown.observe(now)
    }

    /// Countdown and the most recent code of the current link session.
    pub fn snapshot(&self) -> TotpState {
        let now = self.clock.now_unix();
        let epoch = self.session.epoch();
        let inner = self.lock_inner();
        let code = inner
            .latest
            .as_ref()
            .filter(|latest| latest.epoch == epoch && window_index(latest.requested_at) == window_index(now))
            .map(|latest| latest.code.clone());
        TotpState {
            code,
            seconds_remaining: seconds_remaining(now),
        }
    }

    /// Drive the countdown every `tick` until cancelled. Fetches once at
    /// start and once per window boundary; fetches run beside the timer.
    pub async fn run(self: Arc<Self>, tick: Duration, cancel: CancellationToken) {
        self.observe_tick();
        self.spawn_refresh();

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.observe_tick() {
                        self.spawn_refresh();
                    }
                }
            }
        }
        debug!("totp countdown stopped");
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = provider.refresh().await {
                warn!(error = %err, "one-time code fetch failed");
            }
        });
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn parse_code(payload: &[u8]) -> Result<String, TotpError> {
    if payload.len() == CODE_DIGITS && payload.iter().all(u8::is_ascii_digit) {
        Ok(payload.iter().map(|b| char::from(*b)).collect())
    } else {
        Err(TotpError::InvalidCode(String::from_utf8_lossy(payload).into_owned()))
    }
}
