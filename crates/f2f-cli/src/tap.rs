//! Interactive tap session.
//!
//! Every stdin line is either a `/command` or a payload received from the
//! peer device (pasted in place of a physical tap). Staged outbound
//! envelopes are printed as `>> <payload>` for the operator to carry over.

use async_trait::async_trait;
use bytes::Bytes;
use f2f_core::bump::BumpChannel;
use f2f_core::engine::{EngineEvent, EngineHandle};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::output::OutputFormatter;
use crate::ExitCode;

/// Prefix printed before a staged envelope.
pub const STAGED_PREFIX: &str = ">> ";

/// Bump channel backed by the console.
pub struct ConsoleBump {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    staged: Mutex<Option<Bytes>>,
    echo: bool,
}

impl ConsoleBump {
    /// Returns the channel and the sender that feeds it inbound payloads.
    pub fn new(echo: bool) -> (Self, mpsc::UnboundedSender<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bump = Self {
            inbound: tokio::sync::Mutex::new(rx),
            staged: Mutex::new(None),
            echo,
        };
        (bump, tx)
    }

    pub fn staged(&self) -> Option<Bytes> {
        self.staged.lock().clone()
    }
}

#[async_trait]
impl BumpChannel for ConsoleBump {
    async fn recv(&self) -> Option<Bytes> {
        self.inbound.lock().await.recv().await
    }

    async fn stage(&self, payload: Bytes) {
        if self.echo {
            println!("{STAGED_PREFIX}{}", String::from_utf8_lossy(&payload));
        }
        *self.staged.lock() = Some(payload);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapCommand {
    Provision(String),
    Finalize,
    Auth,
    Accept,
    Reject,
    Probe,
    Ack(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    Command(TapCommand),
    Payload(String),
}

pub fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Line::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        // Operators often paste the echoed form back in.
        let payload = line.strip_prefix(STAGED_PREFIX.trim_end()).unwrap_or(line);
        return Ok(Line::Payload(payload.trim().to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::to_string);
    let need_arg = |arg: Option<String>| arg.ok_or_else(|| format!("/{name} needs an endpoint"));

    let command = match name {
        "provision" => TapCommand::Provision(need_arg(arg)?),
        "ack" => TapCommand::Ack(need_arg(arg)?),
        "finalize" => TapCommand::Finalize,
        "auth" => TapCommand::Auth,
        "accept" => TapCommand::Accept,
        "reject" => TapCommand::Reject,
        "probe" => TapCommand::Probe,
        "status" => TapCommand::Status,
        "help" => TapCommand::Help,
        "quit" | "exit" => TapCommand::Quit,
        other => return Err(format!("unknown command /{other}; try /help")),
    };
    Ok(Line::Command(command))
}

const HELP: &str = "\
/provision <endpoint>  enroll another device through this backend
/finalize              retry a failed finalize
/auth                  stage an authentication challenge
/accept | /reject      answer a peer challenge
/probe                 call the backend with the cached token
/ack <endpoint>        check that a backend is reachable
/status                show protocol state
/quit                  leave the session
anything else          a payload received from the peer";

fn describe(event: &EngineEvent) -> Option<String> {
    Some(match event {
        EngineEvent::PhaseChanged(phase) => format!("phase: {phase}"),
        EngineEvent::Staged(envelope) => format!("staged {} (tap to send)", envelope.kind()),
        EngineEvent::Prompt(view) => format!(
            "peer '{}' in realm '{}' wants to authenticate (key {}, signature {}). /accept or /reject",
            view.peer_name,
            view.peer_realm,
            view.fingerprint.as_deref().unwrap_or("unknown"),
            if view.signature_verified { "verified" } else { "not checked" },
        ),
        EngineEvent::Reachable { server_url } => format!("✓ {server_url} is reachable"),
        EngineEvent::Authenticated => "✓ authenticated, token cached".to_string(),
        EngineEvent::ProbeSucceeded { .. } => "✓ backend accepted the token".to_string(),
        EngineEvent::Failed { step, error } => format!("✗ {step}: {error}"),
        EngineEvent::Stopped => return None,
    })
}

/// Drive `handle` from `input` until `/quit` or end of input.
pub async fn run_session<R>(
    handle: EngineHandle,
    inbound: mpsc::UnboundedSender<Bytes>,
    input: R,
    formatter: &OutputFormatter,
) -> anyhow::Result<ExitCode>
where
    R: AsyncBufRead + Unpin,
{
    let mut events = handle.subscribe();
    let quiet = formatter.is_quiet();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Stopped) | Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break
                }
                Ok(event) => {
                    if let Some(text) = describe(&event).filter(|_| !quiet) {
                        eprintln!("{text}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer lagged");
                }
            }
        }
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Line::Empty) => continue,
            Ok(Line::Payload(payload)) => {
                if inbound.send(Bytes::from(payload)).is_err() {
                    break;
                }
                continue;
            }
            Ok(Line::Command(command)) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        match command {
            TapCommand::Provision(endpoint) => handle.provision(endpoint).await?,
            TapCommand::Finalize => handle.finalize().await?,
            TapCommand::Auth => handle.request_auth().await?,
            TapCommand::Accept => handle.accept().await?,
            TapCommand::Reject => handle.reject().await?,
            TapCommand::Probe => handle.probe().await?,
            TapCommand::Ack(endpoint) => handle.ack(endpoint).await?,
            TapCommand::Status => {
                let status = handle.status().await?;
                println!("{}", formatter.format_status(&status));
            }
            TapCommand::Help => println!("{HELP}"),
            TapCommand::Quit => break,
        }
    }

    handle.shutdown().await.ok();
    printer.await.ok();
    Ok(ExitCode::Success)
}
