mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;

    use crate::freshness::FreshnessWindow;
    use crate::identity::verify_with_public_key;
    use crate::keys::{PublicKey, Signature};
    use crate::payload::SigningPayload;

    proptest! {
        #[test]
        fn test_freshness_symmetric(now in 0u64..4_000_000_000, delta in 0u64..1_000) {
            let w = FreshnessWindow::default();
            let past = now.saturating_sub(delta);
            let future = now + delta;
            prop_assert_eq!(w.is_expired(now, past), now - past > 10);
            prop_assert_eq!(w.is_expired(now, future), delta > 10);
        }

        #[test]
        fn test_signature_over_payload_verifies(
            seed in any::<[u8; 32]>(),
            name in "[a-zA-Z0-9_-]{1,24}",
            ts in any::<u64>(),
        ) {
            let key = SigningKey::from_bytes(&seed);
            let public = PublicKey::from_bytes(key.verifying_key().to_bytes());
            let payload = SigningPayload::auth1(&name, ts);
            let sig = Signature::from_bytes(key.sign(payload.as_bytes()).to_bytes());

            prop_assert!(verify_with_public_key(&public, payload.as_bytes(), &sig));

            let other = SigningPayload::auth1(&name, ts.wrapping_add(1));
            prop_assert!(!verify_with_public_key(&public, other.as_bytes(), &sig));
        }

        #[test]
        fn test_wire_encoding_has_no_delimiter(bytes in any::<[u8; 32]>(), sig in any::<[u8; 32]>()) {
            let pk = PublicKey::from_bytes(bytes);
            let mut raw = [0u8; 64];
            raw[..32].copy_from_slice(&sig);
            raw[32..].copy_from_slice(&bytes);
            let s = Signature::from_bytes(raw);

            prop_assert!(!pk.to_base64().contains('|'));
            prop_assert!(!s.to_base64().contains('|'));
            prop_assert_eq!(PublicKey::from_base64(&pk.to_base64()).unwrap(), pk);
        }
    }
}
