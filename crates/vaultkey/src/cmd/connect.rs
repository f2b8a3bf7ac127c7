use tracing::{debug, info};
use vaultkey_core::{AuthError, Error, HostConfig, KdfConfig, SimulatedDevice, VaultKeyHost};
use vaultkey_transport::connect_bridge;

use crate::cmd::{Context, Target};
use crate::exit::{host_error, transport_error, CliError, CliResult, INTERNAL, USAGE};

/// A host attached to its target for the lifetime of one command.
pub struct Session {
    pub host: VaultKeyHost,
    pub device: String,
}

impl Session {
    pub async fn close(&self) {
        self.host.detach_link().await;
    }
}

pub async fn open(ctx: &Context) -> CliResult<Session> {
    let target = ctx
        .target
        .clone()
        .ok_or_else(|| CliError::new(USAGE, "no device selected"))?;
    let config = HostConfig::default().with_timeout(ctx.timeout);
    let host = VaultKeyHost::new(config.clone()).map_err(|err| host_error("host setup failed", err))?;

    match target {
        Target::Bridge(path) => {
            let link = connect_bridge(&path).map_err(|err| transport_error("connect failed", err))?;
            host.attach_link(Box::new(link))
                .await
                .map_err(|err| host_error("attach failed", err))?;
            info!(path = %path.display(), "attached to device bridge");
            Ok(Session {
                host,
                device: path.display().to_string(),
            })
        }
        Target::Simulator { pin } => {
            let kdf = config.kdf.clone();
            let device = tokio::task::spawn_blocking(move || demo_device(&pin, kdf))
                .await
                .map_err(|err| CliError::new(INTERNAL, format!("simulator setup failed: {err}")))?
                .map_err(|err| host_error("simulator setup failed", Error::Auth(err)))?;
            host.attach_link(Box::new(device.link()))
                .await
                .map_err(|err| host_error("attach failed", err))?;
            debug!("attached to simulated token");
            Ok(Session {
                host,
                device: "simulator".to_string(),
            })
        }
    }
}

fn demo_device(pin: &str, kdf: KdfConfig) -> Result<SimulatedDevice, AuthError> {
    SimulatedDevice::builder(pin)
        .kdf(kdf)
        .entry("github", b"correct-horse-battery")
        .entry("email", b"hunter2")
        .fido_credential("github.com", &[0x01, 0x02, 0x03, 0x04])
        .fido_credential("example.org", &[0xCA, 0xFE])
        .build()
}
