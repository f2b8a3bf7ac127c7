use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vaultkey_core::TotpState;

use crate::cmd::connect::Session;
use crate::cmd::TotpArgs;
use crate::exit::{host_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{emit, OutputFormat, TotpOutput};

const WATCH_POLL: Duration = Duration::from_millis(250);

pub async fn run(session: &Session, args: TotpArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.watch && args.count.is_none() {
        let code = session
            .host
            .get_totp()
            .await
            .map_err(|err| host_error("totp failed", err))?;
        let mut state = session.host.totp_state();
        state.code = Some(code);
        emit(&TotpOutput { state }, format);
        return Ok(SUCCESS);
    }

    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;

    let background = session.host.spawn_background();
    let mut printed = 0usize;
    let mut last: Option<String> = None;
    let mut ticker = tokio::time::interval(WATCH_POLL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let state: TotpState = session.host.totp_state();
        if state.code.is_none() || state.code == last {
            continue;
        }
        last = state.code.clone();
        emit(&TotpOutput { state }, format);
        printed += 1;

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    background.shutdown().await;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(cancel: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || cancel.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}
