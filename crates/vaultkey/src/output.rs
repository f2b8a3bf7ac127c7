use std::borrow::Cow;
use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use vaultkey_core::{AuthState, DeviceStatus, FidoCredential, SecurityStatus, TotpState};
use zeroize::Zeroizing;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result that can be shown in every output format.
pub trait Render: Serialize {
    fn headers(&self) -> Vec<&'static str>;
    fn rows(&self) -> Vec<Vec<String>>;

    /// Bytes written for `--format raw`. Defaults to the first column.
    fn raw(&self) -> Cow<'_, [u8]> {
        let mut out = Vec::new();
        for row in self.rows() {
            if let Some(first) = row.first() {
                out.extend_from_slice(first.as_bytes());
                out.push(b'\n');
            }
        }
        Cow::Owned(out)
    }
}

/// Print `value` in `format`. Intermediate strings are wiped once printed,
/// since some values carry vault secrets.
pub fn emit<T: Render>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let json = Zeroizing::new(serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()));
            println!("{}", json.as_str());
        }
        OutputFormat::Table => {
            let rows = Zeroizing::new(value.rows());
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(value.headers());
            for row in rows.iter() {
                table.add_row(row);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let headers = value.headers();
            let rows = Zeroizing::new(value.rows());
            for row in rows.iter() {
                let line = Zeroizing::new(
                    headers
                        .iter()
                        .zip(row.iter())
                        .map(|(h, v)| format!("{}={v}", h.to_ascii_lowercase()))
                        .collect::<Vec<_>>()
                        .join(" "),
                );
                println!("{}", line.as_str());
            }
        }
        OutputFormat::Raw => print_raw(&value.raw()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[derive(Serialize)]
pub struct EchoOutput {
    pub sent: String,
    pub echo: String,
    pub rtt_ms: u128,
}

impl Render for EchoOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["ECHO", "SENT", "RTT_MS"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.echo.clone(),
            self.sent.clone(),
            self.rtt_ms.to_string(),
        ]]
    }
}

#[derive(Serialize)]
pub struct StatusOutput {
    pub device: String,
    pub status: DeviceStatus,
    pub auth: AuthState,
}

impl Render for StatusOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["STATUS", "DEVICE", "AUTH"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.status.to_string(),
            self.device.clone(),
            auth_label(self.auth).to_string(),
        ]]
    }
}

#[derive(Serialize)]
pub struct InfoOutput {
    pub device: String,
    pub info: String,
}

impl Render for InfoOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["INFO", "DEVICE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![self.info.clone(), self.device.clone()]]
    }
}

#[derive(Serialize)]
pub struct SecurityOutput {
    #[serde(flatten)]
    pub status: SecurityStatus,
    pub remaining_attempts: u32,
}

impl From<SecurityStatus> for SecurityOutput {
    fn from(status: SecurityStatus) -> Self {
        Self {
            remaining_attempts: status.remaining_attempts(),
            status,
        }
    }
}

impl Render for SecurityOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["LOCKED", "FAIL_COUNT", "REMAINING"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.status.locked().to_string(),
            self.status.fail_count().to_string(),
            self.remaining_attempts.to_string(),
        ]]
    }
}

#[derive(Serialize)]
pub struct AuthOutput {
    pub state: AuthState,
}

impl Render for AuthOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["STATE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![auth_label(self.state).to_string()]]
    }
}

#[derive(Serialize)]
pub struct TotpOutput {
    #[serde(flatten)]
    pub state: TotpState,
}

impl Render for TotpOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["CODE", "REMAINING_S"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.state.code.clone().unwrap_or_default(),
            self.state.seconds_remaining.to_string(),
        ]]
    }
}

#[derive(Serialize)]
pub struct NamesOutput {
    pub count: usize,
    pub names: Vec<String>,
}

impl NamesOutput {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            count: names.len(),
            names,
        }
    }
}

impl Render for NamesOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["NAME"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.names.iter().map(|name| vec![name.clone()]).collect()
    }
}

/// A revealed secret, borrowed from buffers the caller wipes. Raw output
/// writes the bytes unchanged.
#[derive(Serialize)]
pub struct SecretOutput<'a> {
    pub name: &'a str,
    pub secret: &'a str,
    #[serde(skip)]
    pub bytes: &'a [u8],
}

impl Render for SecretOutput<'_> {
    fn headers(&self) -> Vec<&'static str> {
        vec!["NAME", "SECRET"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![self.name.to_string(), self.secret.to_string()]]
    }

    fn raw(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.bytes)
    }
}

#[derive(Serialize)]
pub struct ActionOutput {
    pub action: &'static str,
    pub target: String,
    pub ok: bool,
}

impl ActionOutput {
    pub fn done(action: &'static str, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            ok: true,
        }
    }
}

impl Render for ActionOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["ACTION", "TARGET", "OK"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.action.to_string(),
            self.target.clone(),
            self.ok.to_string(),
        ]]
    }
}

#[derive(Serialize)]
pub struct CredentialRow {
    pub rp_id: String,
    pub credential_id: String,
}

#[derive(Serialize)]
pub struct FidoListOutput {
    pub count: usize,
    pub credentials: Vec<CredentialRow>,
}

impl FidoListOutput {
    pub fn new(credentials: &[FidoCredential]) -> Self {
        let credentials: Vec<CredentialRow> = credentials
            .iter()
            .map(|cred| CredentialRow {
                rp_id: cred.rp_id.clone(),
                credential_id: hex::encode(&cred.credential_id),
            })
            .collect();
        Self {
            count: credentials.len(),
            credentials,
        }
    }
}

impl Render for FidoListOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["RP_ID", "CREDENTIAL_ID"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.credentials
            .iter()
            .map(|cred| vec![cred.rp_id.clone(), cred.credential_id.clone()])
            .collect()
    }
}

#[derive(Serialize)]
pub struct PinStatusOutput {
    pub pin_set: bool,
}

impl Render for PinStatusOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["PIN_SET"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![self.pin_set.to_string()]]
    }
}

fn auth_label(state: AuthState) -> &'static str {
    match state {
        AuthState::AwaitingPin => "awaiting_pin",
        AuthState::Authenticating => "authenticating",
        AuthState::Authenticated => "authenticated",
        AuthState::LockedOut => "locked_out",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fido_ids_are_hex_encoded() {
        let out = FidoListOutput::new(&[FidoCredential {
            rp_id: "github.com".into(),
            credential_id: vec![0xde, 0xad, 0x01],
        }]);
        assert_eq!(out.count, 1);
        assert_eq!(out.rows(), vec![vec!["github.com".to_string(), "dead01".to_string()]]);
    }

    #[test]
    fn secret_raw_output_is_unmodified() {
        let out = SecretOutput {
            name: "github",
            secret: "hunter2",
            bytes: b"hunter2",
        };
        assert!(matches!(out.raw(), Cow::Borrowed(_)));
        assert_eq!(out.raw().as_ref(), b"hunter2");
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["secret"], "hunter2");
    }

    #[test]
    fn status_row_shows_reason_inline() {
        let out = StatusOutput {
            device: "simulator".into(),
            status: DeviceStatus::Error("cable unplugged".into()),
            auth: AuthState::AwaitingPin,
        };
        assert_eq!(
            out.rows(),
            vec![vec![
                "Error: cable unplugged".to_string(),
                "simulator".to_string(),
                "awaiting_pin".to_string(),
            ]]
        );
    }

    #[test]
    fn raw_defaults_to_first_column_lines() {
        let out = NamesOutput::new(vec!["a".into(), "b".into()]);
        assert_eq!(out.raw().as_ref(), b"a\nb\n");
    }

    #[test]
    fn security_json_flattens_status() {
        let out = SecurityOutput::from(SecurityStatus::from_fail_count(2));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["fail_count"], 2);
        assert_eq!(json["locked"], false);
        assert_eq!(json["remaining_attempts"], 3);
    }
}
