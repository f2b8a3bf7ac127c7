use tracing::info;

use crate::cmd::connect::Session;
use crate::cmd::PinArgs;
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{emit, ActionOutput, AuthOutput, OutputFormat};

/// Authenticate with `pin`. Shared by every command that needs an open session.
pub async fn authenticate(session: &Session, pin: &PinArgs) -> CliResult<()> {
    session
        .host
        .authenticate(&pin.pin)
        .await
        .map_err(|err| host_error("authentication failed", err))?;
    info!("device unlocked");
    Ok(())
}

pub async fn unlock(session: &Session, args: PinArgs, format: OutputFormat) -> CliResult<i32> {
    authenticate(session, &args).await?;
    emit(
        &AuthOutput {
            state: session.host.auth_state(),
        },
        format,
    );
    Ok(SUCCESS)
}

pub async fn lock(session: &Session, format: OutputFormat) -> CliResult<i32> {
    session
        .host
        .lock()
        .await
        .map_err(|err| host_error("lock failed", err))?;
    emit(&ActionOutput::done("lock", session.device.clone()), format);
    Ok(SUCCESS)
}
