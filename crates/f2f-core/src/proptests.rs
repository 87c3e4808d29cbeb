mod tests {
    use f2f_crypto::{PublicKey, Signature};
    use proptest::prelude::*;

    use crate::envelope::{EncodeError, Envelope};

    fn field() -> impl Strategy<Value = String> {
        "[ -{}~]{1,40}"
    }

    fn envelope() -> impl Strategy<Value = Envelope> {
        prop_oneof![
            (field(), field(), field())
                .prop_map(|(url, realm, name)| Envelope::Provision1 { url, realm, name }),
            any::<[u8; 32]>().prop_map(|b| Envelope::Provision2 {
                public_key: PublicKey::from_bytes(b)
            }),
            field().prop_map(|name| Envelope::Provision3 { name }),
            (field(), any::<u64>(), any::<[u8; 32]>()).prop_map(|(name, timestamp, half)| {
                let mut sig = [0u8; 64];
                sig[..32].copy_from_slice(&half);
                Envelope::Auth1 {
                    name,
                    timestamp,
                    signature: Signature::from_bytes(sig),
                }
            }),
            (field(), any::<u64>(), field(), any::<u64>()).prop_map(|(name, ts, peer, pts)| {
                Envelope::Auth2 {
                    name,
                    timestamp: ts,
                    signature: Signature::from_bytes([1; 64]),
                    peer_name: peer,
                    peer_timestamp: pts,
                    peer_signature: Signature::from_bytes([2; 64]),
                }
            }),
        ]
    }

    proptest! {
        #[test]
        fn test_validated_envelopes_decode_to_themselves(env in envelope()) {
            prop_assert!(env.validate().is_ok());
            prop_assert_eq!(Envelope::decode(&env.to_bytes()).unwrap(), env);
        }

        #[test]
        fn test_decode_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Envelope::decode(&raw);
        }

        #[test]
        fn test_delimiter_in_field_is_refused(prefix in field(), suffix in field()) {
            let env = Envelope::Provision3 { name: format!("{prefix}|{suffix}") };
            prop_assert!(
                matches!(env.validate(), Err(EncodeError::ForbiddenCharacter { .. })),
                "delimiter accepted"
            );
        }
    }
}
