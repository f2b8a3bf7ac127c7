use crate::cmd::connect::Session;
use crate::cmd::{parse_hex, FidoArgs, FidoCommand};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{emit, ActionOutput, FidoListOutput, OutputFormat, PinStatusOutput};

pub async fn run(session: &Session, args: FidoArgs, format: OutputFormat) -> CliResult<i32> {
    let host = &session.host;
    match args.command {
        FidoCommand::List => {
            let credentials = host
                .list_fido_credentials()
                .await
                .map_err(|err| host_error("fido list failed", err))?;
            emit(&FidoListOutput::new(&credentials), format);
        }
        FidoCommand::Delete(args) => {
            let credential_id = parse_hex("credential id", &args.credential_id)?;
            host.delete_fido_credential(&credential_id)
                .await
                .map_err(|err| host_error("fido delete failed", err))?;
            emit(&ActionOutput::done("delete", args.credential_id), format);
        }
        FidoCommand::PinStatus => {
            let pin_set = host
                .fido_pin_status()
                .await
                .map_err(|err| host_error("fido pin status failed", err))?;
            emit(&PinStatusOutput { pin_set }, format);
        }
        FidoCommand::SetPin(args) => {
            host.set_fido_pin(&args.new_pin)
                .await
                .map_err(|err| host_error("fido set pin failed", err))?;
            emit(&ActionOutput::done("set-pin", session.device.clone()), format);
        }
    }
    Ok(SUCCESS)
}
