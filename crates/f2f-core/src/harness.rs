//! Test harness for F2F core flows.
//!
//! Drives two or three [`Protocol`] instances through the provisioning and
//! authentication handshakes without an engine: envelopes are encoded and
//! decoded as they would be on the bump channel, and backend calls run
//! inline against a [`ServiceFactory`].

use f2f_crypto::IdentityStore;

use crate::envelope::Envelope;
use crate::errors::ProtocolError;
use crate::protocol::{Action, PeerChallengeView, Protocol};
use crate::remote::{execute, ServiceFactory};
use crate::session::BearerToken;
use crate::store::RecordStore;

/// Run backend calls until the machine asks for something else.
pub async fn settle<I: IdentityStore, S: RecordStore>(
    protocol: &mut Protocol<I, S>,
    factory: &dyn ServiceFactory,
    mut action: Action,
) -> Result<Action, ProtocolError> {
    while let Action::Call(call) = action {
        let outcome = execute(factory, call).await;
        action = protocol.complete(outcome).await?;
    }
    Ok(action)
}

pub fn expect_send(action: Action) -> Result<Envelope, ProtocolError> {
    match action {
        Action::Send(envelope) => Ok(envelope),
        other => Err(ProtocolError::InvalidState(format!(
            "expected an envelope to send, got {other:?}"
        ))),
    }
}

pub fn expect_prompt(action: Action) -> Result<PeerChallengeView, ProtocolError> {
    match action {
        Action::Prompt(view) => Ok(view),
        other => Err(ProtocolError::InvalidState(format!(
            "expected a prompt, got {other:?}"
        ))),
    }
}

/// Deliver `envelope` over a simulated tap and settle the result.
pub async fn tap<I: IdentityStore, S: RecordStore>(
    to: &mut Protocol<I, S>,
    factory: &dyn ServiceFactory,
    envelope: &Envelope,
) -> Result<Action, ProtocolError> {
    let action = to.handle_message(&envelope.to_bytes()).await?;
    settle(to, factory, action).await
}

/// Enroll `joiner` through `initiator`.
///
/// 1. Initiator asks the backend for a device draft and stages `provision1`
/// 2. Joiner adopts the draft name, generates a key and stages `provision2`
/// 3. Initiator finalizes the key with the backend and stages `provision3`
/// 4. Joiner becomes ready
///
/// Returns the joiner's device name.
pub async fn run_provisioning_flow<I1, S1, I2, S2>(
    initiator: &mut Protocol<I1, S1>,
    joiner: &mut Protocol<I2, S2>,
    factory: &dyn ServiceFactory,
    endpoint: &str,
) -> Result<String, ProtocolError>
where
    I1: IdentityStore,
    S1: RecordStore,
    I2: IdentityStore,
    S2: RecordStore,
{
    let action = initiator.begin_provision(endpoint)?;
    let provision1 = expect_send(settle(initiator, factory, action).await?)?;

    let provision2 = expect_send(tap(joiner, factory, &provision1).await?)?;
    let provision3 = expect_send(tap(initiator, factory, &provision2).await?)?;
    tap(joiner, factory, &provision3).await?;

    joiner
        .local_device()
        .map(|d| d.name.clone())
        .ok_or_else(|| ProtocolError::InvalidState("joiner did not become ready".into()))
}

/// One full authentication round: `requester` challenges, `responder`
/// approves, and the countersigned envelope goes back to `requester`, which
/// relays it to the backend.
pub async fn run_auth_flow<I1, S1, I2, S2>(
    requester: &mut Protocol<I1, S1>,
    responder: &mut Protocol<I2, S2>,
    factory: &dyn ServiceFactory,
) -> Result<BearerToken, ProtocolError>
where
    I1: IdentityStore,
    S1: RecordStore,
    I2: IdentityStore,
    S2: RecordStore,
{
    let auth1 = expect_send(requester.request_auth()?)?;
    expect_prompt(tap(responder, factory, &auth1).await?)?;
    let auth2 = expect_send(responder.accept()?)?;
    tap(requester, factory, &auth2).await?;

    requester
        .session()
        .token()
        .cloned()
        .ok_or(ProtocolError::NoToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use f2f_crypto::MemoryIdentityStore;

    use crate::protocol::{Phase, ProtocolConfig};
    use crate::store::MemoryStore;
    use crate::testing::{FixedClock, MockAuthService, MockServiceFactory};

    fn device(clock: &Arc<FixedClock>) -> Protocol<MemoryIdentityStore, MemoryStore> {
        Protocol::with_clock(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(MemoryStore::new()),
            clock.clone(),
            ProtocolConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_provision_then_authenticate() {
        let clock = Arc::new(FixedClock::new(1_700_000_000));
        let factory = MockServiceFactory::new(Arc::new(MockAuthService::new("r1")));
        let mut x = device(&clock);
        let mut y = device(&clock);
        let mut z = device(&clock);

        let y_name = run_provisioning_flow(&mut x, &mut y, &factory, "auth.test")
            .await
            .expect("provision y");
        let z_name = run_provisioning_flow(&mut x, &mut z, &factory, "auth.test")
            .await
            .expect("provision z");
        assert_ne!(y_name, z_name);
        assert_eq!(y.phase(), Phase::Ready);
        assert_eq!(x.phase(), Phase::Unprovisioned);

        clock.advance(3);
        let token = run_auth_flow(&mut y, &mut z, &factory)
            .await
            .expect("auth flow");
        assert!(!token.expose().is_empty());

        let action = y.probe().unwrap();
        assert_eq!(settle(&mut y, &factory, action).await.unwrap(), Action::None);
    }
}
