mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, Context, Target};
use crate::exit::{CliError, USAGE};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "vaultkey", version, about = "VaultKey hardware token CLI")]
struct Cli {
    /// Device bridge socket path.
    #[arg(
        long,
        value_name = "SOCKET",
        env = "VAULTKEY_DEVICE",
        global = true,
        conflicts_with = "simulator"
    )]
    device: Option<PathBuf>,

    /// Talk to an in-process simulated token instead of a device.
    #[arg(long, global = true)]
    simulator: bool,

    /// PIN the simulated token is provisioned with.
    #[arg(long, value_name = "PIN", default_value = "1234", global = true)]
    simulator_pin: String,

    /// Per-command response timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s", global = true)]
    timeout: String,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn target(&self) -> Option<Target> {
        if self.simulator {
            return Some(Target::Simulator {
                pin: self.simulator_pin.clone(),
            });
        }
        self.device.clone().map(Target::Bridge)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = build_context(&cli).and_then(|ctx| cmd::run(cli.command, ctx));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

fn build_context(cli: &Cli) -> Result<Context, CliError> {
    let timeout = cmd::parse_duration(&cli.timeout)?;
    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let target = match cli.target() {
        Some(target) => Some(target),
        None if matches!(cli.command, Command::Version(_)) => None,
        None => {
            return Err(CliError::new(
                USAGE,
                "no device selected: pass --device <SOCKET> or --simulator",
            ))
        }
    };
    Ok(Context {
        target,
        timeout,
        format,
    })
}
