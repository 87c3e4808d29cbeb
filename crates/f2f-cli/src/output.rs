//! Output formatting for CLI results.
//!
//! Three formats:
//! - Table: human-readable tables (default)
//! - JSON: structured JSON for scripting
//! - Quiet: no output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use f2f_core::engine::EngineStatus;
use f2f_core::types::{Device, Profile};
use f2f_core::Envelope;
use serde::Serialize;

use crate::ExitCode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// JSON envelope shared by every command.
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// RFC 3339
    pub timestamp: String,
    pub command: String,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            exit_code: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: command.to_string(),
        }
    }
}

impl JsonResponse<()> {
    pub fn failure(message: &str, code: ExitCode, command: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            exit_code: Some(code.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: command.to_string(),
        }
    }
}

/// One decoded envelope, field by field in wire order.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EnvelopeOutput {
    pub kind: String,
    pub fields: Vec<(String, String)>,
}

impl From<&Envelope> for EnvelopeOutput {
    fn from(envelope: &Envelope) -> Self {
        let fields: Vec<(&str, String)> = match envelope {
            Envelope::Provision1 { url, realm, name } => vec![
                ("url", url.clone()),
                ("realm", realm.clone()),
                ("name", name.clone()),
            ],
            Envelope::Provision2 { public_key } => vec![
                ("public_key", public_key.to_base64()),
                ("fingerprint", public_key.fingerprint()),
            ],
            Envelope::Provision3 { name } => vec![("name", name.clone())],
            Envelope::Auth1 {
                name,
                timestamp,
                signature,
            } => vec![
                ("name", name.clone()),
                ("timestamp", timestamp.to_string()),
                ("signature", signature.to_base64()),
            ],
            Envelope::Auth2 {
                name,
                timestamp,
                signature,
                peer_name,
                peer_timestamp,
                peer_signature,
            } => vec![
                ("name", name.clone()),
                ("timestamp", timestamp.to_string()),
                ("signature", signature.to_base64()),
                ("peer_name", peer_name.clone()),
                ("peer_timestamp", peer_timestamp.to_string()),
                ("peer_signature", peer_signature.to_base64()),
            ],
        };
        Self {
            kind: envelope.kind().tag().to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    phase: String,
    device: Option<String>,
    realm: Option<String>,
    pending_peer: Option<String>,
    has_token: bool,
}

pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_devices(&self, devices: &[Device]) -> String {
        match self.format {
            OutputFormat::Table => devices_table(devices),
            OutputFormat::Json => self.to_json_response(&devices, "devices"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_profiles(&self, profiles: &[Profile]) -> String {
        match self.format {
            OutputFormat::Table => profiles_table(profiles),
            OutputFormat::Json => self.to_json_response(&profiles, "profiles"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_envelope(&self, envelope: &Envelope) -> String {
        let output = EnvelopeOutput::from(envelope);
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Field", "Value"]);
                table.add_row(vec!["kind".to_string(), output.kind.clone()]);
                for (k, v) in &output.fields {
                    table.add_row(vec![k.clone(), v.clone()]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&output, "decode"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_status(&self, status: &EngineStatus) -> String {
        let output = StatusOutput {
            phase: status.phase.to_string(),
            device: status.device.clone(),
            realm: status.realm.clone(),
            pending_peer: status.pending_peer.clone(),
            has_token: status.has_token,
        };
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.add_row(vec!["Phase".to_string(), output.phase]);
                table.add_row(vec!["Device".to_string(), output.device.unwrap_or_else(|| "-".into())]);
                table.add_row(vec!["Realm".to_string(), output.realm.unwrap_or_else(|| "-".into())]);
                table.add_row(vec![
                    "Pending peer".to_string(),
                    output.pending_peer.unwrap_or_else(|| "-".into()),
                ]);
                table.add_row(vec![
                    "Token".to_string(),
                    if output.has_token { "cached" } else { "none" }.to_string(),
                ]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&output, "status"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Generic success payload; table mode prints `message` instead.
    pub fn format_success<T: Serialize>(&self, data: &T, message: &str, command: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("✓ {message}"),
            OutputFormat::Json => self.to_json_response(data, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_failure(&self, message: &str, code: ExitCode, command: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("✗ {message}"),
            OutputFormat::Json => to_json(&JsonResponse::failure(message, code, command)),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Only shown in verbose table mode.
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        to_json(&JsonResponse::success(value, command))
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"success\": false, \"error\": \"serialization failed: {e}\"}}"))
}

fn devices_table(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "No devices found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "Realm", "Default", "Fingerprint"]);
    for device in devices {
        table.add_row(vec![
            device.name.clone(),
            device.realm.clone(),
            if device.initialized { "yes" } else { "no" }.to_string(),
            device
                .public_key_fingerprint
                .as_deref()
                .map(short_fingerprint)
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.to_string()
}

fn profiles_table(profiles: &[Profile]) -> String {
    if profiles.is_empty() {
        return "No profiles found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Realm", "Server", "Device"]);
    for profile in profiles {
        table.add_row(vec![
            profile.realm.clone(),
            profile.server_url.clone(),
            profile.device_name.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.to_string()
}

/// First 16 hex digits, grouped in fours.
fn short_fingerprint(fingerprint: &str) -> String {
    let head: Vec<&str> = fingerprint
        .as_bytes()
        .chunks(4)
        .take(4)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    head.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use f2f_crypto::{PublicKey, Signature};

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Quiet.to_string(), "quiet");
    }

    #[test]
    fn test_envelope_fields_in_wire_order() {
        let envelope = Envelope::Auth2 {
            name: "a".into(),
            timestamp: 1,
            signature: Signature::from_bytes([0; 64]),
            peer_name: "b".into(),
            peer_timestamp: 2,
            peer_signature: Signature::from_bytes([0; 64]),
        };
        let output = EnvelopeOutput::from(&envelope);
        assert_eq!(output.kind, "auth2");
        let keys: Vec<_> = output.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["name", "timestamp", "signature", "peer_name", "peer_timestamp", "peer_signature"]
        );
    }

    #[test]
    fn test_devices_json() {
        let key = PublicKey::from_bytes([3; 32]);
        let devices = vec![Device::draft("a", "r1").with_public_key(&key)];
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_devices(&devices)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["command"], "devices");
        assert_eq!(json["data"][0]["name"], "a");
    }

    #[test]
    fn test_empty_tables_and_quiet() {
        let table = OutputFormatter::new(OutputFormat::Table, false);
        assert_eq!(table.format_devices(&[]), "No devices found.");
        assert_eq!(table.format_profiles(&[]), "No profiles found.");
        let quiet = OutputFormatter::new(OutputFormat::Quiet, false);
        assert!(quiet.format_devices(&[]).is_empty());
    }

    #[test]
    fn test_failure_json_carries_exit_code() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let json: serde_json::Value = serde_json::from_str(&formatter.format_failure(
            "connection refused",
            ExitCode::ConnectionFailed,
            "ack",
        ))
        .unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["exit_code"], 4);
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(
            short_fingerprint("0123456789abcdef0123"),
            "0123:4567:89ab:cdef"
        );
    }
}
