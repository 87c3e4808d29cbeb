//! End-to-end protocol scenarios driven without an engine.

use std::sync::Arc;

use f2f_core::envelope::Envelope;
use f2f_core::harness::{expect_prompt, expect_send, run_provisioning_flow, settle, tap};
use f2f_core::protocol::{Action, Phase, Protocol, ProtocolConfig};
use f2f_core::remote::{execute, RefreshRequest, RemoteCall, RemoteOp};
use f2f_core::store::{MemoryStore, RecordStore};
use f2f_core::testing::{FixedClock, MockAuthService, MockServiceFactory, RecordedCall};
use f2f_core::ProtocolError;
use f2f_crypto::{IdentityStore, MemoryIdentityStore, SigningPayload};

const NOW: u64 = 1_700_000_000;

struct Device {
    protocol: Protocol<MemoryIdentityStore, MemoryStore>,
    identity: Arc<MemoryIdentityStore>,
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
}

fn device() -> Device {
    let identity = Arc::new(MemoryIdentityStore::new());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(NOW));
    let protocol = Protocol::with_clock(
        identity.clone(),
        store.clone(),
        clock.clone(),
        ProtocolConfig::default(),
    );
    Device {
        protocol,
        identity,
        store,
        clock,
    }
}

fn backend() -> (Arc<MockAuthService>, MockServiceFactory) {
    let mock = Arc::new(MockAuthService::new("r1"));
    let factory = MockServiceFactory::new(mock.clone());
    (mock, factory)
}

#[tokio::test]
async fn scenario_a_provisioning() {
    let (mock, factory) = backend();
    let mut x = device();
    let mut y = device();

    // X obtains a draft from the backend and stages provision1.
    let action = x.protocol.begin_provision("https://s/").unwrap();
    let provision1 = expect_send(settle(&mut x.protocol, &factory, action).await.unwrap()).unwrap();
    let Envelope::Provision1 { url, realm, name } = provision1.clone() else {
        panic!("expected provision1, got {provision1:?}");
    };
    assert_eq!(url, "https://s/");
    assert_eq!(realm, "r1");
    assert_eq!(x.protocol.phase(), Phase::AwaitingPeerKey);

    // Y adopts the draft name, generates a key and answers with it.
    let provision2 = expect_send(tap(&mut y.protocol, &factory, &provision1).await.unwrap()).unwrap();
    let Envelope::Provision2 { public_key } = provision2 else {
        panic!("expected provision2");
    };
    assert_eq!(y.identity.public_key(&name), Some(public_key));
    let stored = y.store.find_device(&name).await.unwrap().unwrap();
    assert_eq!(stored.realm, "r1");
    assert!(!stored.initialized);
    assert_eq!(stored.public_key, Some(public_key.to_base64()));
    assert_eq!(y.protocol.phase(), Phase::AwaitingPeerFinalization);

    // X finalizes Y's key with the backend and stages provision3.
    let provision3 = expect_send(tap(&mut x.protocol, &factory, &provision2).await.unwrap()).unwrap();
    assert_eq!(provision3, Envelope::Provision3 { name: name.clone() });
    assert!(mock.calls().contains(&RecordedCall::FinalizeProvision {
        name: name.clone(),
        public_key,
    }));
    assert_eq!(x.protocol.phase(), Phase::Unprovisioned);

    // Y becomes the realm default.
    assert_eq!(tap(&mut y.protocol, &factory, &provision3).await.unwrap(), Action::None);
    assert!(y.store.find_device(&name).await.unwrap().unwrap().initialized);
    assert_eq!(y.protocol.phase(), Phase::Ready);
    assert_eq!(y.store.default_device().await.unwrap().unwrap().name, name);
}

#[tokio::test]
async fn scenario_a_finalize_failure_is_retryable() {
    let (mock, factory) = backend();
    let mut x = device();
    let mut y = device();

    let action = x.protocol.begin_provision("s").unwrap();
    let provision1 = expect_send(settle(&mut x.protocol, &factory, action).await.unwrap()).unwrap();
    let provision2 = expect_send(tap(&mut y.protocol, &factory, &provision1).await.unwrap()).unwrap();

    mock.fail_next(
        "finalize_provision",
        f2f_core::testing::MockFailure::Status {
            status: 500,
            message: "Internal Server Error".into(),
        },
    );
    let err = tap(&mut x.protocol, &factory, &provision2).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(x.protocol.phase(), Phase::Provisioned);

    let action = x.protocol.finalize().unwrap();
    let provision3 = expect_send(settle(&mut x.protocol, &factory, action).await.unwrap()).unwrap();
    tap(&mut y.protocol, &factory, &provision3).await.unwrap();
    assert_eq!(y.protocol.phase(), Phase::Ready);
}

async fn ready_pair() -> (Device, Device, Arc<MockAuthService>, MockServiceFactory) {
    let (mock, factory) = backend();
    let mut x = device();
    let mut alice = device();
    let mut bob = device();
    run_provisioning_flow(&mut x.protocol, &mut alice.protocol, &factory, "https://s/")
        .await
        .unwrap();
    run_provisioning_flow(&mut x.protocol, &mut bob.protocol, &factory, "https://s/")
        .await
        .unwrap();
    (alice, bob, mock, factory)
}

#[tokio::test]
async fn scenario_b_auth_freshness() {
    let (mut alice, mut bob, mock, factory) = ready_pair().await;
    let bob_name = bob.protocol.local_device().unwrap().name.clone();

    // Five seconds old: accepted, peer looked up, user prompted.
    bob.clock.set(NOW - 5);
    let fresh = expect_send(bob.protocol.request_auth().unwrap()).unwrap();
    assert!(fresh.encode().starts_with(&format!("auth1|{bob_name}|{}|", NOW - 5)));

    let lookups = mock.call_count("get_device");
    let view = expect_prompt(tap(&mut alice.protocol, &factory, &fresh).await.unwrap()).unwrap();
    assert_eq!(view.peer_name, bob_name);
    assert!(view.signature_verified);
    assert_eq!(mock.call_count("get_device"), lookups + 1);

    // Twenty seconds old: rejected before any lookup.
    bob.clock.set(NOW - 20);
    let stale = expect_send(bob.protocol.request_auth().unwrap()).unwrap();
    let err = alice.protocol.handle_message(&stale.to_bytes()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Expired(_)));
    assert_eq!(mock.call_count("get_device"), lookups + 1);
}

#[tokio::test]
async fn scenario_c_auth2_relay() {
    let (mut alice, bob, mock, factory) = ready_pair().await;
    let alice_name = alice.protocol.local_device().unwrap().name.clone();
    let bob_name = bob.protocol.local_device().unwrap().name.clone();

    let ts = NOW;
    let sig = alice
        .identity
        .sign(&alice_name, SigningPayload::auth1(&alice_name, ts).as_bytes())
        .unwrap();
    let peer_ts = NOW + 2;
    let peer_sig = bob
        .identity
        .sign(
            &bob_name,
            SigningPayload::auth2(&alice_name, ts, &sig, &bob_name, peer_ts).as_bytes(),
        )
        .unwrap();
    let expected = RefreshRequest {
        name: alice_name.clone(),
        timestamp: ts,
        signature: sig,
        peer_name: bob_name.clone(),
        peer_timestamp: peer_ts,
        peer_signature: peer_sig,
    };

    let auth2 = Envelope::Auth2 {
        name: alice_name,
        timestamp: ts,
        signature: sig,
        peer_name: bob_name,
        peer_timestamp: peer_ts,
        peer_signature: peer_sig,
    };
    let action = alice.protocol.handle_message(&auth2.to_bytes()).await.unwrap();
    let Action::Call(RemoteCall {
        server_url,
        op: RemoteOp::RefreshToken(request),
    }) = action
    else {
        panic!("expected refresh call, got {action:?}");
    };
    assert_eq!(server_url, "https://s/");
    assert_eq!(request, expected);

    let outcome = execute(&factory, RemoteCall::new(server_url, RemoteOp::RefreshToken(request))).await;
    assert_eq!(alice.protocol.complete(outcome).await.unwrap(), Action::None);
    assert!(alice.protocol.session().token().is_some());
    assert_eq!(
        mock.calls().last(),
        Some(&RecordedCall::RefreshToken(expected))
    );
}

#[tokio::test]
async fn rejected_challenge_sends_nothing() {
    let (mut alice, mut bob, _mock, factory) = ready_pair().await;

    let auth1 = expect_send(bob.protocol.request_auth().unwrap()).unwrap();
    expect_prompt(tap(&mut alice.protocol, &factory, &auth1).await.unwrap()).unwrap();
    assert_eq!(alice.protocol.reject(), Action::None);
    assert!(matches!(
        alice.protocol.accept(),
        Err(ProtocolError::NoPendingChallenge)
    ));
}

#[tokio::test]
async fn malformed_tap_leaves_state_untouched() {
    let (mut alice, _bob, _mock, _factory) = ready_pair().await;
    let before = alice.protocol.phase();

    let err = alice
        .protocol
        .handle_message(b"auth1|bob|notanumber|AAAA")
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
    assert_eq!(alice.protocol.phase(), before);
    assert!(alice.protocol.session().pending().is_none());
}
