//! Error types for the protocol core.
//!
//! Every failure is recovered at the handshake-step boundary: the step that
//! hit it reports the error and the state machine stays where it was.

use f2f_crypto::{CryptoError, FreshnessError};
use thiserror::Error;

use crate::envelope::{DecodeError, EncodeError};
use crate::remote::TransportError;
use crate::store::StoreError;

/// Umbrella error for a protocol step.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    /// Inbound message could not be parsed; dropped without state change.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Outbound value cannot be carried by the wire format.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Challenge timestamp outside the freshness window.
    #[error("{0}")]
    Expired(#[from] FreshnessError),

    /// Network I/O failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Backend answered with an application error.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("empty response from server")]
    EmptyResponse,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("no pending peer challenge")]
    NoPendingChallenge,

    #[error("no authentication token")]
    NoToken,

    #[error("challenge from '{0}' names this device")]
    SelfChallenge(String),

    #[error("peer realm '{peer}' does not match local realm '{local}'")]
    RealmMismatch { local: String, peer: String },

    #[error("peer device '{0}' has no public key")]
    PeerNotProvisioned(String),
}

impl ProtocolError {
    /// Transient failures worth retrying by re-tapping or re-issuing the step.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProtocolError::Transport(_) | ProtocolError::EmptyResponse => true,
            ProtocolError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Failures that mean the peer or this device failed authentication.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ProtocolError::Expired(_)
            | ProtocolError::Crypto(_)
            | ProtocolError::SelfChallenge(_)
            | ProtocolError::RealmMismatch { .. }
            | ProtocolError::PeerNotProvisioned(_)
            | ProtocolError::NoToken => true,
            ProtocolError::Server { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}
