//! Async engine: runs one [`Protocol`] against a bump channel and a backend.
//!
//! One actor task owns the protocol and applies inputs one at a time:
//! commands from [`EngineHandle`]s, inbound taps forwarded by a reader task,
//! and backend outcomes posted by per-call worker tasks. Nothing the actor
//! awaits touches the network, so a slow backend never delays a tap.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use f2f_crypto::IdentityStore;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bump::BumpChannel;
use crate::envelope::Envelope;
use crate::errors::ProtocolError;
use crate::protocol::{Action, PeerChallengeView, Phase, Protocol};
use crate::remote::{execute, RemoteOutcome, ServiceFactory};
use crate::store::RecordStore;

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Commands and Events
// ============================================================================

#[derive(Debug)]
pub enum EngineCommand {
    Provision(String),
    Finalize,
    RequestAuth,
    Accept,
    Reject,
    Probe,
    Ack(String),
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

impl EngineCommand {
    fn label(&self) -> &'static str {
        match self {
            EngineCommand::Provision(_) => "provision",
            EngineCommand::Finalize => "finalize",
            EngineCommand::RequestAuth => "request_auth",
            EngineCommand::Accept => "accept",
            EngineCommand::Reject => "reject",
            EngineCommand::Probe => "probe",
            EngineCommand::Ack(_) => "ack",
            EngineCommand::Status(_) => "status",
            EngineCommand::Shutdown => "shutdown",
        }
    }
}

/// Snapshot returned by [`EngineHandle::status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub phase: Phase,
    pub device: Option<String>,
    pub realm: Option<String>,
    pub pending_peer: Option<String>,
    pub has_token: bool,
}

/// Where a failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Command(&'static str),
    Inbound,
    Remote(&'static str),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Command(name) => write!(f, "command {name}"),
            Step::Inbound => f.write_str("inbound tap"),
            Step::Remote(op) => write!(f, "backend {op}"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum EngineEvent {
    PhaseChanged(Phase),
    /// Envelope staged for the next tap.
    Staged(Envelope),
    Prompt(PeerChallengeView),
    Reachable { server_url: String },
    Authenticated,
    ProbeSucceeded { body: String },
    Failed { step: Step, error: ProtocolError },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Closed,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front end to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }

    pub async fn provision(&self, endpoint: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineCommand::Provision(endpoint.into())).await
    }

    pub async fn finalize(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Finalize).await
    }

    pub async fn request_auth(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::RequestAuth).await
    }

    pub async fn accept(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Accept).await
    }

    pub async fn reject(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Reject).await
    }

    pub async fn probe(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Probe).await
    }

    pub async fn ack(&self, endpoint: impl Into<String>) -> Result<(), EngineError> {
        self.send(EngineCommand::Ack(endpoint.into())).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Status(tx)).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Shutdown).await
    }
}

// ============================================================================
// Actor
// ============================================================================

enum Input {
    Inbound(Bytes),
    Outcome(RemoteOutcome),
}

struct Engine<I: IdentityStore, S: RecordStore> {
    protocol: Protocol<I, S>,
    bump: Arc<dyn BumpChannel>,
    factory: Arc<dyn ServiceFactory>,
    inputs: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<EngineEvent>,
}

/// Start an engine for `protocol`.
///
/// The actor stops on [`EngineHandle::shutdown`] or once every handle is
/// dropped.
pub fn spawn<I, S>(
    protocol: Protocol<I, S>,
    bump: Arc<dyn BumpChannel>,
    factory: Arc<dyn ServiceFactory>,
) -> (EngineHandle, JoinHandle<()>)
where
    I: IdentityStore + 'static,
    S: RecordStore + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let reader = {
        let bump = bump.clone();
        let inputs = input_tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = bump.recv().await {
                debug!(len = payload.len(), "tap received");
                if inputs.send(Input::Inbound(payload)).is_err() {
                    break;
                }
            }
            debug!("bump channel closed");
        })
    };

    let engine = Engine {
        protocol,
        bump,
        factory,
        inputs: input_tx,
        events: events.clone(),
    };
    let task = tokio::spawn(engine.run(command_rx, input_rx, reader));

    (
        EngineHandle {
            commands: command_tx,
            events,
        },
        task,
    )
}

impl<I, S> Engine<I, S>
where
    I: IdentityStore + 'static,
    S: RecordStore + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        reader: JoinHandle<()>,
    ) {
        info!(phase = %self.protocol.phase(), "engine started");
        let mut phase = self.protocol.phase();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(EngineCommand::Shutdown) => break,
                    Some(EngineCommand::Status(reply)) => {
                        reply.send(self.status()).ok();
                    }
                    Some(command) => {
                        let step = Step::Command(command.label());
                        let result = self.run_command(command);
                        self.apply(step, result, None).await;
                    }
                },
                Some(input) = inputs.recv() => match input {
                    Input::Inbound(payload) => {
                        let result = self.protocol.handle_message(&payload).await;
                        self.apply(Step::Inbound, result, None).await;
                    }
                    Input::Outcome(outcome) => {
                        let step = Step::Remote(outcome.label());
                        let notice = success_notice(&outcome);
                        let result = self.protocol.complete(outcome).await;
                        self.apply(step, result, notice).await;
                    }
                },
            }

            let now = self.protocol.phase();
            if now != phase {
                info!(from = %phase, to = %now, "phase changed");
                phase = now;
                self.emit(EngineEvent::PhaseChanged(now));
            }
        }

        reader.abort();
        info!("engine stopped");
        self.emit(EngineEvent::Stopped);
    }

    fn run_command(&mut self, command: EngineCommand) -> Result<Action, ProtocolError> {
        match command {
            EngineCommand::Provision(endpoint) => self.protocol.begin_provision(&endpoint),
            EngineCommand::Finalize => self.protocol.finalize(),
            EngineCommand::RequestAuth => self.protocol.request_auth(),
            EngineCommand::Accept => self.protocol.accept(),
            EngineCommand::Reject => Ok(self.protocol.reject()),
            EngineCommand::Probe => self.protocol.probe(),
            EngineCommand::Ack(endpoint) => self.protocol.ack(&endpoint),
            EngineCommand::Status(_) | EngineCommand::Shutdown => Ok(Action::None),
        }
    }

    async fn apply(
        &mut self,
        step: Step,
        result: Result<Action, ProtocolError>,
        notice: Option<EngineEvent>,
    ) {
        match result {
            Ok(action) => {
                if let Some(event) = notice {
                    self.emit(event);
                }
                self.dispatch(action).await;
            }
            Err(error) => {
                warn!(step = %step, error = %error, "step failed");
                self.emit(EngineEvent::Failed { step, error });
            }
        }
    }

    async fn dispatch(&mut self, action: Action) {
        match action {
            Action::None => {}
            Action::Send(envelope) => {
                debug!(kind = %envelope.kind(), "staging envelope");
                self.bump.stage(envelope.to_bytes()).await;
                self.emit(EngineEvent::Staged(envelope));
            }
            Action::Call(call) => {
                let factory = self.factory.clone();
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    let outcome = execute(factory.as_ref(), call).await;
                    // The actor may already be gone.
                    inputs.send(Input::Outcome(outcome)).ok();
                });
            }
            Action::Prompt(view) => self.emit(EngineEvent::Prompt(view)),
        }
    }

    fn status(&self) -> EngineStatus {
        let device = self.protocol.local_device();
        EngineStatus {
            phase: self.protocol.phase(),
            device: device.map(|d| d.name.clone()),
            realm: device.map(|d| d.realm.clone()),
            pending_peer: self
                .protocol
                .session()
                .pending()
                .map(|p| p.peer_name.clone()),
            has_token: self.protocol.session().token().is_some(),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        self.events.send(event).ok();
    }
}

fn success_notice(outcome: &RemoteOutcome) -> Option<EngineEvent> {
    match outcome {
        RemoteOutcome::Ack {
            server_url,
            result: Ok(()),
        } => Some(EngineEvent::Reachable {
            server_url: server_url.clone(),
        }),
        RemoteOutcome::Token { result: Ok(_) } => Some(EngineEvent::Authenticated),
        RemoteOutcome::Probe { result: Ok(body) } => {
            Some(EngineEvent::ProbeSucceeded { body: body.clone() })
        }
        _ => None,
    }
}
