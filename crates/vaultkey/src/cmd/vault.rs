use zeroize::Zeroizing;

use crate::cmd::auth::authenticate;
use crate::cmd::connect::Session;
use crate::cmd::{TypeArgs, VaultArgs, VaultCommand};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{emit, ActionOutput, NamesOutput, OutputFormat, SecretOutput};

pub async fn run(session: &Session, args: VaultArgs, format: OutputFormat) -> CliResult<i32> {
    let host = &session.host;
    match args.command {
        VaultCommand::List(pin) => {
            authenticate(session, &pin).await?;
            let names = host
                .list_vault()
                .await
                .map_err(|err| host_error("vault list failed", err))?;
            emit(&NamesOutput::new(names), format);
        }
        VaultCommand::Add(args) => {
            authenticate(session, &args.auth).await?;
            host.add_vault_entry(&args.name, args.secret.as_bytes())
                .await
                .map_err(|err| host_error("vault add failed", err))?;
            emit(&ActionOutput::done("add", args.name), format);
        }
        VaultCommand::Delete(args) => {
            authenticate(session, &args.auth).await?;
            host.delete_vault_entry(&args.name)
                .await
                .map_err(|err| host_error("vault delete failed", err))?;
            emit(&ActionOutput::done("delete", args.name), format);
        }
        VaultCommand::Get(args) => {
            authenticate(session, &args.auth).await?;
            let secret = host
                .get_vault_secret(&args.name)
                .await
                .map_err(|err| host_error("vault get failed", err))?;
            let text = Zeroizing::new(String::from_utf8_lossy(secret.expose()).into_owned());
            emit(
                &SecretOutput {
                    name: &args.name,
                    secret: &text,
                    bytes: secret.expose(),
                },
                format,
            );
        }
        VaultCommand::Type(args) => {
            authenticate(session, &args.auth).await?;
            host.type_secret(&args.name)
                .await
                .map_err(|err| host_error("vault type failed", err))?;
            emit(&ActionOutput::done("type", args.name), format);
        }
    }
    Ok(SUCCESS)
}

pub async fn type_text(session: &Session, args: TypeArgs, format: OutputFormat) -> CliResult<i32> {
    session
        .host
        .type_text(&args.text)
        .await
        .map_err(|err| host_error("type failed", err))?;
    emit(
        &ActionOutput::done("type", format!("{} bytes", args.text.len())),
        format,
    );
    Ok(SUCCESS)
}
