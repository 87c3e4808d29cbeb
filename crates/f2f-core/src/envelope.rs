//! Wire envelopes exchanged over the bump channel.
//!
//! An envelope is ASCII text: a kind tag followed by the kind's fields, all
//! joined with `|`. There is no escaping, so field values are checked at
//! emission time and may never contain the delimiter or a line break.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use f2f_crypto::{PublicKey, Signature};

const DELIMITER: char = '|';

// ============================================================================
// Error Types
// ============================================================================

/// Inbound message could not be parsed. The message is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("message is not ASCII")]
    NotAscii,
    #[error("unknown envelope kind '{0}'")]
    UnknownKind(String),
    #[error("malformed {kind} envelope: expected {expected} fields, got {got}")]
    MalformedEnvelope {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid timestamp in {field}: '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Outbound envelope carries a value the wire format cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("field {field} contains a delimiter, line break or non-ASCII character")]
    ForbiddenCharacter { field: &'static str },
    #[error("field {field} is empty")]
    EmptyField { field: &'static str },
}

// ============================================================================
// Envelope
// ============================================================================

/// Kind tag of an envelope, the first wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Provision1,
    Provision2,
    Provision3,
    Auth1,
    Auth2,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 5] = [
        EnvelopeKind::Provision1,
        EnvelopeKind::Provision2,
        EnvelopeKind::Provision3,
        EnvelopeKind::Auth1,
        EnvelopeKind::Auth2,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            EnvelopeKind::Provision1 => "provision1",
            EnvelopeKind::Provision2 => "provision2",
            EnvelopeKind::Provision3 => "provision3",
            EnvelopeKind::Auth1 => "auth1",
            EnvelopeKind::Auth2 => "auth2",
        }
    }

    /// Number of fields after the tag.
    pub fn field_count(self) -> usize {
        match self {
            EnvelopeKind::Provision1 => 3,
            EnvelopeKind::Provision2 => 1,
            EnvelopeKind::Provision3 => 1,
            EnvelopeKind::Auth1 => 3,
            EnvelopeKind::Auth2 => 6,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single bump-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Initiator hands a server-issued identity to a second device.
    Provision1 {
        url: String,
        realm: String,
        name: String,
    },
    /// Second device answers with its freshly generated public key.
    Provision2 { public_key: PublicKey },
    /// Initiator confirms the backend bound the key to `name`.
    Provision3 { name: String },
    /// Requester's signed, timestamped challenge.
    Auth1 {
        name: String,
        timestamp: u64,
        signature: Signature,
    },
    /// Responder's countersignature over the requester's challenge.
    Auth2 {
        name: String,
        timestamp: u64,
        signature: Signature,
        peer_name: String,
        peer_timestamp: u64,
        peer_signature: Signature,
    },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Provision1 { .. } => EnvelopeKind::Provision1,
            Envelope::Provision2 { .. } => EnvelopeKind::Provision2,
            Envelope::Provision3 { .. } => EnvelopeKind::Provision3,
            Envelope::Auth1 { .. } => EnvelopeKind::Auth1,
            Envelope::Auth2 { .. } => EnvelopeKind::Auth2,
        }
    }

    /// Check that every free-text field survives the wire format.
    ///
    /// Keys and signatures are URL-safe base64 and always pass.
    pub fn validate(&self) -> Result<(), EncodeError> {
        match self {
            Envelope::Provision1 { url, realm, name } => {
                check_text("url", url)?;
                check_text("realm", realm)?;
                check_text("name", name)
            }
            Envelope::Provision2 { .. } => Ok(()),
            Envelope::Provision3 { name } => check_text("name", name),
            Envelope::Auth1 { name, .. } => check_text("name", name),
            Envelope::Auth2 {
                name, peer_name, ..
            } => {
                check_text("name", name)?;
                check_text("peer_name", peer_name)
            }
        }
    }

    /// Render the wire text. Call [`Envelope::validate`] first for any
    /// envelope built from untrusted values.
    pub fn encode(&self) -> String {
        let mut fields: Vec<String> = vec![self.kind().tag().to_string()];
        match self {
            Envelope::Provision1 { url, realm, name } => {
                fields.extend([url.clone(), realm.clone(), name.clone()]);
            }
            Envelope::Provision2 { public_key } => fields.push(public_key.to_base64()),
            Envelope::Provision3 { name } => fields.push(name.clone()),
            Envelope::Auth1 {
                name,
                timestamp,
                signature,
            } => {
                fields.extend([name.clone(), timestamp.to_string(), signature.to_base64()]);
            }
            Envelope::Auth2 {
                name,
                timestamp,
                signature,
                peer_name,
                peer_timestamp,
                peer_signature,
            } => {
                fields.extend([
                    name.clone(),
                    timestamp.to_string(),
                    signature.to_base64(),
                    peer_name.clone(),
                    peer_timestamp.to_string(),
                    peer_signature.to_base64(),
                ]);
            }
        }
        fields.join("|")
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }

    /// Parse one inbound message. Never touches protocol state.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        if !raw.is_ascii() {
            return Err(DecodeError::NotAscii);
        }
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotAscii)?;
        let text = strip_line_ending(text);
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        let fields: Vec<&str> = text.split(DELIMITER).collect();
        let kind = EnvelopeKind::from_tag(fields[0])
            .ok_or_else(|| DecodeError::UnknownKind(fields[0].to_string()))?;
        let body = &fields[1..];
        if body.len() != kind.field_count() {
            return Err(DecodeError::MalformedEnvelope {
                kind: kind.tag(),
                expected: kind.field_count(),
                got: body.len(),
            });
        }

        let envelope = match kind {
            EnvelopeKind::Provision1 => Envelope::Provision1 {
                url: text_field("url", body[0])?,
                realm: text_field("realm", body[1])?,
                name: text_field("name", body[2])?,
            },
            EnvelopeKind::Provision2 => Envelope::Provision2 {
                public_key: PublicKey::from_base64(body[0]).map_err(|e| {
                    DecodeError::InvalidField {
                        field: "public_key",
                        reason: e.to_string(),
                    }
                })?,
            },
            EnvelopeKind::Provision3 => Envelope::Provision3 {
                name: text_field("name", body[0])?,
            },
            EnvelopeKind::Auth1 => Envelope::Auth1 {
                name: text_field("name", body[0])?,
                timestamp: parse_timestamp("timestamp", body[1])?,
                signature: parse_signature("signature", body[2])?,
            },
            EnvelopeKind::Auth2 => Envelope::Auth2 {
                name: text_field("name", body[0])?,
                timestamp: parse_timestamp("timestamp", body[1])?,
                signature: parse_signature("signature", body[2])?,
                peer_name: text_field("peer_name", body[3])?,
                peer_timestamp: parse_timestamp("peer_timestamp", body[4])?,
                peer_signature: parse_signature("peer_signature", body[5])?,
            },
        };
        Ok(envelope)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Envelope {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s.as_bytes())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_text(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.is_empty() {
        return Err(EncodeError::EmptyField { field });
    }
    if value
        .chars()
        .any(|c| c == DELIMITER || c == '\r' || c == '\n' || !c.is_ascii())
    {
        return Err(EncodeError::ForbiddenCharacter { field });
    }
    Ok(())
}

fn strip_line_ending(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

fn text_field(field: &'static str, value: &str) -> Result<String, DecodeError> {
    if value.is_empty() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "empty".to_string(),
        });
    }
    Ok(value.to_string())
}

/// Canonical decimal only: digits, no sign, no leading zeros.
fn parse_timestamp(field: &'static str, value: &str) -> Result<u64, DecodeError> {
    let invalid = || DecodeError::InvalidTimestamp {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if value.len() > 1 && value.starts_with('0') {
        return Err(invalid());
    }
    value.parse::<u64>().map_err(|_| invalid())
}

fn parse_signature(field: &'static str, value: &str) -> Result<Signature, DecodeError> {
    Signature::from_base64(value).map_err(|e| DecodeError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(byte: u8) -> Signature {
        Signature::from_bytes([byte; 64])
    }

    #[test]
    fn test_round_trip_every_kind() {
        let envelopes = vec![
            Envelope::Provision1 {
                url: "https://auth.example.com:8443/".into(),
                realm: "r1".into(),
                name: "X".into(),
            },
            Envelope::Provision2 {
                public_key: PublicKey::from_bytes([4u8; 32]),
            },
            Envelope::Provision3 { name: "Y".into() },
            Envelope::Auth1 {
                name: "bob".into(),
                timestamp: 1_700_000_000,
                signature: sig(1),
            },
            Envelope::Auth2 {
                name: "bob".into(),
                timestamp: 1_700_000_000,
                signature: sig(1),
                peer_name: "alice".into(),
                peer_timestamp: 1_700_000_003,
                peer_signature: sig(2),
            },
        ];
        for env in envelopes {
            env.validate().unwrap();
            assert_eq!(Envelope::decode(env.encode().as_bytes()).unwrap(), env);
        }
    }

    #[test]
    fn test_wire_layout() {
        let env = Envelope::Provision1 {
            url: "https://s/".into(),
            realm: "r1".into(),
            name: "X".into(),
        };
        assert_eq!(env.encode(), "provision1|https://s/|r1|X");
        assert_eq!(Envelope::Provision3 { name: "Y".into() }.encode(), "provision3|Y");
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(
            Envelope::decode(b"provision1|https://s/|r1"),
            Err(DecodeError::MalformedEnvelope {
                kind: "provision1",
                expected: 3,
                got: 2
            })
        );
        assert!(matches!(
            Envelope::decode(b"provision3|a|b"),
            Err(DecodeError::MalformedEnvelope { got: 2, .. })
        ));
        assert!(matches!(
            Envelope::decode(b"auth1"),
            Err(DecodeError::MalformedEnvelope { expected: 3, got: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            Envelope::decode(b"auth3|x"),
            Err(DecodeError::UnknownKind("auth3".into()))
        );
        assert_eq!(
            Envelope::decode(b"|x"),
            Err(DecodeError::UnknownKind(String::new()))
        );
    }

    #[test]
    fn test_empty_and_non_ascii() {
        assert_eq!(Envelope::decode(b""), Err(DecodeError::Empty));
        assert_eq!(Envelope::decode(b"\n"), Err(DecodeError::Empty));
        assert_eq!(
            Envelope::decode("provision3|caf\u{e9}".as_bytes()),
            Err(DecodeError::NotAscii)
        );
    }

    #[test]
    fn test_malformed_timestamp() {
        let s = sig(1).to_base64();
        for bad in ["", "-5", "+5", "007", "12a", "99999999999999999999999"] {
            let raw = format!("auth1|bob|{bad}|{s}");
            assert!(
                matches!(
                    Envelope::decode(raw.as_bytes()),
                    Err(DecodeError::InvalidTimestamp { field: "timestamp", .. })
                ),
                "accepted timestamp {bad:?}"
            );
        }
        let zero = format!("auth1|bob|0|{s}");
        assert!(Envelope::decode(zero.as_bytes()).is_ok());
    }

    #[test]
    fn test_bad_signature_field() {
        assert!(matches!(
            Envelope::decode(b"auth1|bob|10|not-a-signature"),
            Err(DecodeError::InvalidField { field: "signature", .. })
        ));
        assert!(matches!(
            Envelope::decode(b"provision2|AAAA"),
            Err(DecodeError::InvalidField { field: "public_key", .. })
        ));
    }

    #[test]
    fn test_trailing_newline_trimmed_once() {
        assert_eq!(
            Envelope::decode(b"provision3|Y\r\n").unwrap(),
            Envelope::Provision3 { name: "Y".into() }
        );
        assert!(Envelope::decode(b"provision3|Y\n\n").is_ok_and(|e| matches!(
            e,
            Envelope::Provision3 { name } if name == "Y\n"
        )));
    }

    #[test]
    fn test_validate_rejects_forbidden_characters() {
        let env = Envelope::Provision1 {
            url: "https://s/".into(),
            realm: "r|1".into(),
            name: "X".into(),
        };
        assert_eq!(
            env.validate(),
            Err(EncodeError::ForbiddenCharacter { field: "realm" })
        );

        let env = Envelope::Provision3 {
            name: "line\nbreak".into(),
        };
        assert_eq!(
            env.validate(),
            Err(EncodeError::ForbiddenCharacter { field: "name" })
        );

        let env = Envelope::Provision3 {
            name: "k\u{f6}k".into(),
        };
        assert!(env.validate().is_err());

        let env = Envelope::Provision3 { name: String::new() };
        assert_eq!(env.validate(), Err(EncodeError::EmptyField { field: "name" }));
    }

    #[test]
    fn test_unpadded_signature_accepted() {
        let s = sig(9).to_base64();
        let raw = format!("auth1|bob|10|{}", s.trim_end_matches('='));
        match Envelope::decode(raw.as_bytes()).unwrap() {
            Envelope::Auth1 { signature, .. } => assert_eq!(signature, sig(9)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
