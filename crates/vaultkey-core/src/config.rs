//! Tunables for the host core. Every struct has a `Default` matching the
//! shipped firmware's expectations.

use std::time::Duration;

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of commands that may wait behind the one in flight.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Application salt mixed into every PIN derivation.
pub const DEFAULT_KDF_SALT: &[u8] = b"vaultkey-host-v1";

/// Command channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline applied by [`CommandChannel::send`](crate::CommandChannel::send).
    pub default_timeout: Duration,
    /// Maximum number of queued commands before `Busy` is returned.
    pub queue_depth: usize,
    /// Extra time the caller waits for the worker to report a deadline it
    /// already enforces itself.
    pub reply_grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            reply_grace: Duration::from_millis(250),
        }
    }
}

/// Argon2id parameters for PIN derivation.
///
/// The device stores the key derived with exactly these parameters, so
/// changing any of them means every provisioned PIN stops matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfConfig {
    pub salt: Vec<u8>,
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            salt: DEFAULT_KDF_SALT.to_vec(),
            memory_kib: 2048,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Background task cadence.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the status poller pings the device.
    pub status_interval: Duration,
    /// Countdown tick for the TOTP provider.
    pub totp_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(5),
            totp_tick: Duration::from_secs(1),
        }
    }
}

/// Everything [`VaultKeyHost`](crate::VaultKeyHost) needs to start.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub channel: ChannelConfig,
    pub kdf: KdfConfig,
    pub scheduler: SchedulerConfig,
}

impl HostConfig {
    /// Override the per-command deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.channel.default_timeout = timeout;
        self
    }
}
