//! F2F Core - protocol engine for face-to-face device authentication.
//!
//! This crate implements:
//! - The pipe-delimited envelope codec carried over the bump channel
//! - The provisioning and mutual-authentication state machine
//! - The backend client boundary and its HTTP implementation
//! - Local device/profile persistence
//! - An async engine wiring the bump channel, state machine and backend together

#![forbid(unsafe_code)]

// Core state machine
pub mod protocol;
pub mod session;

// Wire
pub mod envelope;

// Collaborators
pub mod bump;
pub mod remote;
pub mod store;

// Runtime
pub mod engine;

// Supporting modules
pub mod clock;
pub mod errors;
pub mod types;
pub mod testing;
pub mod harness;

// Optional implementations
#[cfg(feature = "http")]
pub mod http_client;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;

pub use envelope::{DecodeError, EncodeError, Envelope};
pub use errors::ProtocolError;
pub use protocol::{Action, Phase, Protocol, ProtocolConfig, SignaturePolicy};
