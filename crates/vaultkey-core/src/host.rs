use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vaultkey_frame::msg;
use vaultkey_transport::DeviceLink;

use crate::auth::{AuthState, Authenticator, SecurityStatus};
use crate::channel::CommandChannel;
use crate::config::HostConfig;
use crate::error::{AuthError, Result};
use crate::fido::{FidoCredential, FidoManager};
use crate::kdf::{derive_key_blocking, DerivedKey, KEY_LEN};
use crate::scheduler::{spawn_status_poll, Background};
use crate::session::{DeviceSession, DeviceStatus, LinkEvent};
use crate::totp::{Clock, SystemClock, TotpProvider, TotpState};
use crate::vault::{SecretBytes, VaultManager};

/// The host-facing surface: one value per connected token.
pub struct VaultKeyHost {
    config: HostConfig,
    session: Arc<DeviceSession>,
    channel: Arc<CommandChannel>,
    auth: Arc<Authenticator>,
    vault: VaultManager,
    fido: FidoManager,
    totp: Arc<TotpProvider>,
}

impl VaultKeyHost {
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a host whose one-time codes use `clock`.
    pub fn with_clock(config: HostConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let session = Arc::new(DeviceSession::new());
        let channel = Arc::new(CommandChannel::new(
            Arc::clone(&session),
            config.channel.clone(),
        )?);
        let auth = Arc::new(Authenticator::new(
            Arc::clone(&channel),
            Arc::clone(&session),
            config.kdf.clone(),
        ));
        let vault = VaultManager::new(Arc::clone(&channel), Arc::clone(&session), Arc::clone(&auth));
        let fido = FidoManager::new(Arc::clone(&channel), config.kdf.clone());
        let totp = Arc::new(TotpProvider::new(
            Arc::clone(&channel),
            Arc::clone(&session),
            clock,
        ));

        Ok(Self {
            config,
            session,
            channel,
            auth,
            vault,
            fido,
            totp,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    pub fn totp(&self) -> &Arc<TotpProvider> {
        &self.totp
    }

    // Link management

    /// Use `link` for every following command.
    pub async fn attach_link(&self, link: Box<dyn DeviceLink>) -> Result<()> {
        self.channel.attach(link).await?;
        Ok(())
    }

    pub async fn detach_link(&self) {
        self.channel.detach().await;
    }

    /// Forward a transition observed by the link owner.
    pub fn report_link_event(&self, event: LinkEvent) {
        self.session.push(event);
    }

    /// Last known link state. Never blocks.
    pub fn get_device_status(&self) -> DeviceStatus {
        self.session.status()
    }

    /// Start the status poller and the TOTP countdown.
    pub fn spawn_background(&self) -> Background {
        let cancel = CancellationToken::new();
        let mut background = Background::new(cancel.clone());
        background.push(spawn_status_poll(
            Arc::clone(&self.channel),
            Arc::clone(&self.session),
            self.config.scheduler.status_interval,
            cancel.child_token(),
        ));
        background.push(tokio::spawn(
            Arc::clone(&self.totp).run(self.config.scheduler.totp_tick, cancel.child_token()),
        ));
        info!("background tasks started");
        background
    }

    // Raw commands

    /// Send an arbitrary command and return the response payload.
    ///
    /// AUTH frames go through the lockout state machine like
    /// [`authenticate`](Self::authenticate) does, so a locked-out host never
    /// sends one.
    pub async fn send_command(&self, msg_type: u8, payload: &[u8]) -> Result<Bytes> {
        if msg_type == msg::AUTH {
            let key = DerivedKey::from_slice(payload).ok_or(AuthError::KeyLength {
                expected: KEY_LEN,
                got: payload.len(),
            })?;
            self.auth.authenticate_key(&key).await?;
            return Ok(Bytes::from_static(b"OK"));
        }
        Ok(self.channel.send(msg_type, Bytes::copy_from_slice(payload)).await?)
    }

    /// Liveness probe; returns the device's echo.
    pub async fn ping(&self, text: &str) -> Result<String> {
        let echo = self.channel.send(msg::PING, text.as_bytes().to_vec()).await?;
        Ok(String::from_utf8_lossy(&echo).into_owned())
    }

    /// Firmware identification.
    pub async fn device_info(&self) -> Result<String> {
        let info = self.channel.send(msg::INFO, Bytes::new()).await?;
        Ok(String::from_utf8_lossy(&info).into_owned())
    }

    // Authentication

    pub async fn derive_key(&self, pin: &str) -> Result<DerivedKey> {
        Ok(derive_key_blocking(pin, &self.config.kdf).await?)
    }

    pub async fn authenticate(&self, pin: &str) -> Result<()> {
        Ok(self.auth.authenticate(pin).await?)
    }

    pub async fn lock(&self) -> Result<()> {
        Ok(self.auth.lock().await?)
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub async fn get_security_status(&self) -> Result<SecurityStatus> {
        Ok(self.auth.security_status().await?)
    }

    // One-time codes

    pub async fn get_totp(&self) -> Result<String> {
        Ok(self.totp.current_code().await?)
    }

    pub fn totp_state(&self) -> TotpState {
        self.totp.snapshot()
    }

    // Vault

    pub async fn list_vault(&self) -> Result<Vec<String>> {
        Ok(self.vault.list().await?)
    }

    pub fn cached_vault_names(&self) -> Option<Vec<String>> {
        self.vault.cached_names()
    }

    pub async fn add_vault_entry(&self, name: &str, secret: &[u8]) -> Result<()> {
        Ok(self.vault.add(name, secret).await?)
    }

    pub async fn delete_vault_entry(&self, name: &str) -> Result<()> {
        Ok(self.vault.delete(name).await?)
    }

    pub async fn get_vault_secret(&self, name: &str) -> Result<SecretBytes> {
        Ok(self.vault.get_secret(name).await?)
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        Ok(self.vault.type_text(text.as_bytes()).await?)
    }

    pub async fn type_secret(&self, name: &str) -> Result<()> {
        Ok(self.vault.type_secret(name).await?)
    }

    // FIDO2

    pub async fn list_fido_credentials(&self) -> Result<Vec<FidoCredential>> {
        Ok(self.fido.list().await?)
    }

    pub async fn delete_fido_credential(&self, credential_id: &[u8]) -> Result<()> {
        Ok(self.fido.delete(credential_id).await?)
    }

    pub async fn fido_pin_status(&self) -> Result<bool> {
        Ok(self.fido.pin_status().await?)
    }

    pub async fn set_fido_pin(&self, pin: &str) -> Result<()> {
        Ok(self.fido.set_pin(pin).await?)
    }
}
