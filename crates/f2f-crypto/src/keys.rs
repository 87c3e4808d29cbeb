//! Public key and signature values as they travel on the wire.
//!
//! Both are carried as URL-safe base64 so they can sit inside a
//! pipe-delimited envelope without escaping.

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

use crate::hash::fingerprint_hex;
use crate::identity::CryptoError;

/// URL-safe alphabet, padded on encode, padding optional on decode.
const WIRE_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], CryptoError> {
    let raw = WIRE_B64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
    if raw.len() != N {
        return Err(CryptoError::InvalidKeyLength {
            expected: N,
            got: raw.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        WIRE_B64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        decode_fixed::<PUBLIC_KEY_LEN>(encoded).map(Self)
    }

    /// Hex digest shown to users for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        fingerprint_hex(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.fingerprint()[..16])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

/// Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        WIRE_B64.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        decode_fixed::<SIGNATURE_LEN>(encoded).map(Self)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for Signature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_base64_round_trip() {
        let pk = PublicKey::from_bytes([0xfb; 32]);
        let encoded = pk.to_base64();
        assert!(!encoded.contains('|'));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(PublicKey::from_base64(&encoded).unwrap(), pk);
    }

    #[test]
    fn test_unpadded_input_accepted() {
        let pk = PublicKey::from_bytes([3u8; 32]);
        let encoded = pk.to_base64();
        let unpadded = encoded.trim_end_matches('=');
        assert_eq!(PublicKey::from_base64(unpadded).unwrap(), pk);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = WIRE_B64.encode([1u8; 16]);
        assert!(matches!(
            PublicKey::from_base64(&short),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
        assert!(matches!(
            Signature::from_base64(&short),
            Err(CryptoError::InvalidKeyLength { expected: 64, got: 16 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Signature::from_base64("not base64 at all!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_fingerprint_matches_hash_of_raw_key() {
        let pk = PublicKey::from_bytes([9u8; 32]);
        assert_eq!(pk.fingerprint(), fingerprint_hex(&[9u8; 32]));
    }
}
