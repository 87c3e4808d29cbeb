//! Canonical signing payloads.
//!
//! Signer and verifier must reconstruct the signed bytes identically, so every
//! signature in the protocol covers a payload built here.

use crate::keys::Signature;

const DELIMITER: char = '|';

/// Builder for the exact byte string that gets signed.
///
/// The payload is the kind tag followed by the fields in wire order, joined
/// with `|`. Timestamps are rendered as plain decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPayload {
    buf: String,
}

impl SigningPayload {
    pub fn new(kind: &str) -> Self {
        Self {
            buf: kind.to_string(),
        }
    }

    pub fn field(mut self, value: &str) -> Self {
        self.buf.push(DELIMITER);
        self.buf.push_str(value);
        self
    }

    pub fn timestamp(self, ts: u64) -> Self {
        self.field(&ts.to_string())
    }

    pub fn signature(self, sig: &Signature) -> Self {
        self.field(&sig.to_base64())
    }

    /// `auth1|name|ts`
    pub fn auth1(name: &str, ts: u64) -> Self {
        Self::new("auth1").field(name).timestamp(ts)
    }

    /// `auth2|name|ts|sig|peer_name|peer_ts`
    ///
    /// `name`, `ts` and `sig` are the requester's `auth1` values; the
    /// responder signs this with its own key as `peer_name`.
    pub fn auth2(name: &str, ts: u64, sig: &Signature, peer_name: &str, peer_ts: u64) -> Self {
        Self::new("auth2")
            .field(name)
            .timestamp(ts)
            .signature(sig)
            .field(peer_name)
            .timestamp(peer_ts)
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }
}

impl AsRef<[u8]> for SigningPayload {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
