//! Drives a console tap session end to end over an in-memory pipe.

use std::sync::Arc;
use std::time::Duration;

use f2f_cli::output::{OutputFormat, OutputFormatter};
use f2f_cli::tap::{run_session, ConsoleBump};
use f2f_cli::ExitCode;
use f2f_core::engine::{self, EngineEvent, Step};
use f2f_core::store::MemoryStore;
use f2f_core::testing::{MockAuthService, MockServiceFactory};
use f2f_core::{Envelope, Protocol, ProtocolConfig, ProtocolError};
use f2f_crypto::MemoryIdentityStore;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

async fn wait_for<F>(events: &mut broadcast::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event timeout")
}

#[tokio::test]
async fn test_console_session_stages_and_reports() {
    let mock = Arc::new(MockAuthService::new("r1"));
    let protocol = Protocol::new(
        Arc::new(MemoryIdentityStore::new()),
        Arc::new(MemoryStore::new()),
        ProtocolConfig::default(),
    );
    let (bump, inbound) = ConsoleBump::new(false);
    let bump = Arc::new(bump);
    let (handle, task) = engine::spawn(
        protocol,
        bump.clone(),
        Arc::new(MockServiceFactory::new(mock.clone())),
    );
    let mut events = handle.subscribe();

    let (mut input, pipe) = tokio::io::duplex(1024);
    let session = tokio::spawn({
        let handle = handle.clone();
        async move {
            let formatter = OutputFormatter::new(OutputFormat::Quiet, false);
            run_session(handle, inbound, BufReader::new(pipe), &formatter).await
        }
    });

    input.write_all(b"/provision auth.test\n").await.unwrap();
    let staged = wait_for(&mut events, |e| matches!(e, EngineEvent::Staged(_))).await;
    assert!(matches!(staged, EngineEvent::Staged(Envelope::Provision1 { .. })));
    let payload = bump.staged().expect("payload staged");
    assert!(payload.starts_with(b"provision1|"));
    assert_eq!(mock.call_count("provision"), 1);

    // Lines that are not commands go to the protocol as peer payloads.
    input.write_all(b"not-an-envelope\n").await.unwrap();
    match wait_for(&mut events, |e| matches!(e, EngineEvent::Failed { .. })).await {
        EngineEvent::Failed { step, error } => {
            assert_eq!(step, Step::Inbound);
            assert!(matches!(error, ProtocolError::Decode(_)));
        }
        other => panic!("unexpected {other:?}"),
    }

    // Unknown commands are reported locally and the session keeps going.
    input.write_all(b"/dance\n/status\n/quit\n").await.unwrap();
    let code = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session timeout")
        .unwrap()
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    task.await.unwrap();
}

#[tokio::test]
async fn test_session_ends_with_input() {
    let protocol = Protocol::new(
        Arc::new(MemoryIdentityStore::new()),
        Arc::new(MemoryStore::new()),
        ProtocolConfig::default(),
    );
    let (bump, inbound) = ConsoleBump::new(false);
    let mock = Arc::new(MockAuthService::new("r1"));
    let (handle, task) = engine::spawn(
        protocol,
        Arc::new(bump),
        Arc::new(MockServiceFactory::new(mock)),
    );

    let (input, pipe) = tokio::io::duplex(64);
    drop(input);
    let formatter = OutputFormatter::new(OutputFormat::Quiet, false);
    let code = run_session(handle, inbound, BufReader::new(pipe), &formatter)
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    task.await.unwrap();
}
