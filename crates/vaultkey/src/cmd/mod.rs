use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod auth;
pub mod connect;
pub mod device;
pub mod fido;
pub mod totp;
pub mod vault;
pub mod version;

/// Where commands are sent.
#[derive(Debug, Clone)]
pub enum Target {
    Bridge(PathBuf),
    Simulator { pin: String },
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub target: Option<Target>,
    pub timeout: Duration,
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Echo text through the device.
    Ping(PingArgs),
    /// Show link and authentication state.
    Status,
    /// Print the firmware identification string.
    Info,
    /// Show the PIN fail counter and lock flag.
    Security,
    /// Check a PIN against the device.
    Unlock(PinArgs),
    /// End the device session.
    Lock,
    /// Show the current one-time code.
    Totp(TotpArgs),
    /// Manage vault entries.
    Vault(VaultArgs),
    /// Type text on the host through the device keyboard.
    Type(TypeArgs),
    /// Manage FIDO2 resident credentials.
    Fido(FidoArgs),
    /// Send one raw command frame.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: Context) -> CliResult<i32> {
    if let Command::Version(args) = command {
        return version::run(args);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;

    runtime.block_on(async move {
        let session = connect::open(&ctx).await?;
        let result = match command {
            Command::Ping(args) => device::ping(&session, args, ctx.format).await,
            Command::Status => device::status(&session, ctx.format).await,
            Command::Info => device::info(&session, ctx.format).await,
            Command::Security => device::security(&session, ctx.format).await,
            Command::Unlock(args) => auth::unlock(&session, args, ctx.format).await,
            Command::Lock => auth::lock(&session, ctx.format).await,
            Command::Totp(args) => totp::run(&session, args, ctx.format).await,
            Command::Vault(args) => vault::run(&session, args, ctx.format).await,
            Command::Type(args) => vault::type_text(&session, args, ctx.format).await,
            Command::Fido(args) => fido::run(&session, args, ctx.format).await,
            Command::Send(args) => device::send(&session, args, ctx.format).await,
            Command::Version(args) => version::run(args),
        };
        session.close().await;
        result
    })
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Text to echo.
    #[arg(default_value = "PING")]
    pub text: String,
}

#[derive(Args, Debug)]
pub struct PinArgs {
    /// Device PIN.
    #[arg(long, env = "VAULTKEY_PIN", hide_env_values = true)]
    pub pin: String,
}

#[derive(Args, Debug)]
pub struct TotpArgs {
    /// Keep printing each new code until interrupted.
    #[arg(long)]
    pub watch: bool,
    /// Exit after printing N codes (implies --watch).
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VaultArgs {
    #[command(subcommand)]
    pub command: VaultCommand,
}

#[derive(Subcommand, Debug)]
pub enum VaultCommand {
    /// List entry names.
    List(PinArgs),
    /// Store a new entry.
    Add(VaultAddArgs),
    /// Remove an entry.
    Delete(VaultEntryArgs),
    /// Reveal an entry's secret.
    Get(VaultEntryArgs),
    /// Have the device type an entry's secret.
    Type(VaultEntryArgs),
}

#[derive(Args, Debug)]
pub struct VaultEntryArgs {
    /// Entry name.
    pub name: String,
    #[command(flatten)]
    pub auth: PinArgs,
}

#[derive(Args, Debug)]
pub struct VaultAddArgs {
    /// Entry name.
    pub name: String,
    /// Secret to store.
    #[arg(long, env = "VAULTKEY_SECRET", hide_env_values = true)]
    pub secret: String,
    #[command(flatten)]
    pub auth: PinArgs,
}

#[derive(Args, Debug)]
pub struct TypeArgs {
    /// Text to type.
    pub text: String,
}

#[derive(Args, Debug)]
pub struct FidoArgs {
    #[command(subcommand)]
    pub command: FidoCommand,
}

#[derive(Subcommand, Debug)]
pub enum FidoCommand {
    /// List resident credentials.
    List,
    /// Delete a credential by its hex-encoded id.
    Delete(FidoDeleteArgs),
    /// Show whether a FIDO2 PIN is set.
    PinStatus,
    /// Set the FIDO2 PIN.
    SetPin(FidoSetPinArgs),
}

#[derive(Args, Debug)]
pub struct FidoDeleteArgs {
    /// Credential id as hex.
    pub credential_id: String,
}

#[derive(Args, Debug)]
pub struct FidoSetPinArgs {
    /// New FIDO2 PIN.
    #[arg(long, env = "VAULTKEY_FIDO_PIN", hide_env_values = true)]
    pub new_pin: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Request message type.
    #[arg(long = "type", short = 't')]
    pub msg_type: u8,
    /// Raw string payload.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Hex-encoded payload.
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub fn parse_hex(what: &str, input: &str) -> CliResult<Vec<u8>> {
    hex::decode(input.trim())
        .map_err(|err| CliError::new(USAGE, format!("{what} is not valid hex: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_both_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn durations_reject_zero_and_garbage() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("soon").unwrap_err().code, USAGE);
    }

    #[test]
    fn hex_ids_decode() {
        assert_eq!(parse_hex("id", "dead01").unwrap(), vec![0xde, 0xad, 0x01]);
        assert_eq!(parse_hex("id", "xyz").unwrap_err().code, USAGE);
    }
}
