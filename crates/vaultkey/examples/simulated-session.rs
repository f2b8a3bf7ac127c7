//! Walk through a full session against the in-process simulated token.
//!
//! ```text
//! cargo run -p vaultkey --example simulated-session
//! ```

use vaultkey::{HostConfig, SimulatedDevice, VaultKeyHost};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = HostConfig::default();
    let device = SimulatedDevice::builder("2468")
        .kdf(config.kdf.clone())
        .entry("github", b"correct-horse-battery")
        .fido_credential("github.com", &[0x10, 0x20, 0x30])
        .build()?;

    let host = VaultKeyHost::new(config)?;
    host.attach_link(Box::new(device.link())).await?;
    let background = host.spawn_background();

    println!("info: {}", host.device_info().await?);
    println!("status: {}", host.get_device_status());

    match host.authenticate("1357").await {
        Ok(()) => println!("unexpected unlock"),
        Err(err) => println!("wrong pin: {err}"),
    }
    println!("security: {:?}", host.get_security_status().await?);

    host.authenticate("2468").await?;
    host.add_vault_entry("email", b"hunter2").await?;
    println!("vault: {:?}", host.list_vault().await?);

    let secret = host.get_vault_secret("email").await?;
    println!("email secret is {} bytes", secret.len());

    for cred in host.list_fido_credentials().await? {
        println!("fido: {} ({} byte id)", cred.rp_id, cred.credential_id.len());
    }

    println!("totp: {}", host.get_totp().await?);

    host.lock().await?;
    println!("auth after lock: {:?}", host.auth_state());

    background.shutdown().await;
    host.detach_link().await;
    Ok(())
}
