//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use f2f_core::engine;
use f2f_core::protocol::normalize_endpoint;
use f2f_core::remote::{execute, RemoteCall, RemoteOp, RemoteOutcome};
use f2f_core::store::RecordStore;
use f2f_core::Envelope;
use serde::Serialize;

use crate::config::Config;
use crate::output::{OutputFormat, OutputFormatter};
use crate::runtime::{self, Runtime};
use crate::tap::{self, ConsoleBump};
use crate::ExitCode;

/// F2F - face-to-face device provisioning and authentication
#[derive(Parser, Debug)]
#[command(name = "f2f")]
#[command(version, about = "F2F - face-to-face device provisioning and authentication")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "F2F_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the device signing key
    #[arg(long, global = true)]
    pub key_dir: Option<PathBuf>,

    /// SQLite database for device and profile records
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Backend request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that an auth backend is reachable
    Ack(AckArgs),
    /// Decode a bump payload and show its fields
    Decode(DecodeArgs),
    /// List locally known devices
    Devices,
    /// List realm profiles
    Profiles,
    /// Forget all local device records
    Reset(ResetArgs),
    /// Start an interactive tap session
    Tap,
}

#[derive(Args, Debug)]
pub struct AckArgs {
    /// Backend endpoint; `https://` is assumed when no scheme is given
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Raw payload, e.g. `auth1|alice|1700000000|<sig>`
    pub message: String,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Skip the confirmation check
    #[arg(long)]
    pub yes: bool,
}

#[derive(Serialize)]
struct AckOutput {
    server_url: String,
}

#[derive(Serialize)]
struct ResetOutput {
    removed: usize,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> anyhow::Result<ExitCode> {
        let config = Config::load_default().unwrap_or_default();
        self.execute_with_config(config).await
    }

    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);
        match self.command {
            Commands::Ack(args) => ack(&config, &formatter, &args.endpoint).await,
            Commands::Decode(args) => Ok(decode(&formatter, &args.message)),
            Commands::Devices => {
                let store = runtime::open_store(&config)?;
                let devices = store.list_devices().await?;
                print_unless_empty(formatter.format_devices(&devices));
                Ok(ExitCode::Success)
            }
            Commands::Profiles => {
                let store = runtime::open_store(&config)?;
                let profiles = store.list_profiles().await?;
                print_unless_empty(formatter.format_profiles(&profiles));
                Ok(ExitCode::Success)
            }
            Commands::Reset(args) => {
                if !args.yes {
                    print_unless_empty(formatter.format_failure(
                        "refusing to reset without --yes",
                        ExitCode::InvalidInput,
                        "reset",
                    ));
                    return Ok(ExitCode::InvalidInput);
                }
                let store = runtime::open_store(&config)?;
                let removed = store.clear_devices().await?;
                print_unless_empty(formatter.format_success(
                    &ResetOutput { removed },
                    &format!("removed {removed} device record(s)"),
                    "reset",
                ));
                Ok(ExitCode::Success)
            }
            Commands::Tap => tap_session(&config, &formatter).await,
        }
    }
}

fn print_unless_empty(text: String) {
    if !text.is_empty() {
        println!("{text}");
    }
}

async fn ack(config: &Config, formatter: &OutputFormatter, endpoint: &str) -> anyhow::Result<ExitCode> {
    let server_url = match normalize_endpoint(endpoint) {
        Ok(url) => url,
        Err(e) => {
            print_unless_empty(formatter.format_failure(&e.to_string(), ExitCode::InvalidInput, "ack"));
            return Ok(ExitCode::InvalidInput);
        }
    };
    let factory = runtime::http_factory(config)?;
    formatter.progress(&format!("probing {server_url}"));

    let outcome = execute(&*factory, RemoteCall::new(server_url.clone(), RemoteOp::Ack)).await;
    match outcome {
        RemoteOutcome::Ack { result: Ok(()), .. } => {
            print_unless_empty(formatter.format_success(
                &AckOutput { server_url: server_url.clone() },
                &format!("{server_url} is reachable"),
                "ack",
            ));
            Ok(ExitCode::Success)
        }
        RemoteOutcome::Ack { result: Err(e), .. } => {
            let code = ExitCode::for_error(&e);
            print_unless_empty(formatter.format_failure(&e.to_string(), code, "ack"));
            Ok(code)
        }
        other => anyhow::bail!("unexpected outcome for ack: {}", other.label()),
    }
}

fn decode(formatter: &OutputFormatter, message: &str) -> ExitCode {
    match Envelope::decode(message.trim().as_bytes()) {
        Ok(envelope) => {
            print_unless_empty(formatter.format_envelope(&envelope));
            ExitCode::Success
        }
        Err(e) => {
            print_unless_empty(formatter.format_failure(&e.to_string(), ExitCode::InvalidInput, "decode"));
            ExitCode::InvalidInput
        }
    }
}

async fn tap_session(config: &Config, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let runtime = Runtime::open(config)?;
    let protocol = runtime.protocol().await?;
    let (bump, inbound) = ConsoleBump::new(true);
    let (handle, task) = engine::spawn(protocol, Arc::new(bump), runtime.factory.clone());

    if !formatter.is_quiet() {
        eprintln!("tap session started; /help lists commands");
    }
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let code = tap::run_session(handle, inbound, stdin, formatter).await?;
    task.await.ok();
    Ok(code)
}
