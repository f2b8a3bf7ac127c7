use std::borrow::Cow;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use crate::cmd::connect::Session;
use crate::cmd::{parse_hex, PingArgs, SendArgs};
use crate::exit::{host_error, CliResult, SUCCESS};
use crate::output::{emit, EchoOutput, InfoOutput, OutputFormat, Render, SecurityOutput, StatusOutput};

pub async fn ping(session: &Session, args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let started = Instant::now();
    let echo = session
        .host
        .ping(&args.text)
        .await
        .map_err(|err| host_error("ping failed", err))?;
    emit(
        &EchoOutput {
            sent: args.text,
            echo,
            rtt_ms: started.elapsed().as_millis(),
        },
        format,
    );
    Ok(SUCCESS)
}

pub async fn status(session: &Session, format: OutputFormat) -> CliResult<i32> {
    // A round trip refreshes the session before it is reported.
    let _ = session.host.ping("PING").await;
    emit(
        &StatusOutput {
            device: session.device.clone(),
            status: session.host.get_device_status(),
            auth: session.host.auth_state(),
        },
        format,
    );
    Ok(SUCCESS)
}

pub async fn info(session: &Session, format: OutputFormat) -> CliResult<i32> {
    let info = session
        .host
        .device_info()
        .await
        .map_err(|err| host_error("info failed", err))?;
    emit(
        &InfoOutput {
            device: session.device.clone(),
            info,
        },
        format,
    );
    Ok(SUCCESS)
}

pub async fn security(session: &Session, format: OutputFormat) -> CliResult<i32> {
    let status = session
        .host
        .get_security_status()
        .await
        .map_err(|err| host_error("security query failed", err))?;
    emit(&SecurityOutput::from(status), format);
    Ok(SUCCESS)
}

#[derive(Serialize)]
struct ResponseOutput {
    msg_type: u8,
    size: usize,
    payload: String,
    payload_hex: String,
    #[serde(skip)]
    raw: Bytes,
}

impl Render for ResponseOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["TYPE", "SIZE", "PAYLOAD"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.msg_type.to_string(),
            self.size.to_string(),
            self.payload.clone(),
        ]]
    }

    fn raw(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.raw)
    }
}

pub async fn send(session: &Session, args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = match (&args.data, &args.hex) {
        (Some(data), _) => data.as_bytes().to_vec(),
        (None, Some(hex)) => parse_hex("--hex", hex)?,
        (None, None) => Vec::new(),
    };
    let reply = session
        .host
        .send_command(args.msg_type, &payload)
        .await
        .map_err(|err| host_error("send failed", err))?;
    emit(
        &ResponseOutput {
            msg_type: vaultkey_frame::response_type(args.msg_type),
            size: reply.len(),
            payload: payload_preview(&reply),
            payload_hex: hex::encode(&reply),
            raw: reply,
        },
        format,
    );
    Ok(SUCCESS)
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
