//! Backend boundary: the operations the protocol needs from the auth server.
//!
//! The state machine never calls the backend itself. It returns a
//! [`RemoteCall`], the engine runs it with [`execute`] on a worker task, and
//! the resulting [`RemoteOutcome`] is fed back into the state machine.

use std::sync::Arc;

use async_trait::async_trait;
use f2f_crypto::{CryptoError, PublicKey, Signature};
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::session::{BearerToken, ChallengeTicket};
use crate::types::Device;

// ============================================================================
// Error and Response Types
// ============================================================================

/// The request never produced a server response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("unreadable response body: {0}")]
    Body(String),
    #[error("tls configuration error: {0}")]
    Tls(String),
}

/// A server response: payload, empty success, or application error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse<T> {
    Success(T),
    Empty,
    Error { status: u16, message: String },
}

impl<T> ApiResponse<T> {
    /// Payload or the matching protocol error. Empty counts as failure for
    /// operations that must return something.
    pub fn into_result(self) -> Result<T, ProtocolError> {
        match self {
            ApiResponse::Success(value) => Ok(value),
            ApiResponse::Empty => Err(ProtocolError::EmptyResponse),
            ApiResponse::Error { status, message } => Err(ProtocolError::Server { status, message }),
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ApiResponse<U>, E> {
        Ok(match self {
            ApiResponse::Success(value) => ApiResponse::Success(f(value)?),
            ApiResponse::Empty => ApiResponse::Empty,
            ApiResponse::Error { status, message } => ApiResponse::Error { status, message },
        })
    }
}

/// Device record as the backend serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Realm")]
    pub realm: String,
    #[serde(rename = "PublicKey", default)]
    pub public_key: Option<String>,
    #[serde(rename = "PublicKeyFingerprint", default)]
    pub public_key_fingerprint: Option<String>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: realm.into(),
            public_key: None,
            public_key_fingerprint: None,
        }
    }

    /// Parsed public key. The backend sends `""` for devices that were never
    /// finalized.
    pub fn public_key(&self) -> Result<Option<PublicKey>, CryptoError> {
        match self.public_key.as_deref() {
            None | Some("") => Ok(None),
            Some(encoded) => PublicKey::from_base64(encoded).map(Some),
        }
    }

    /// Local record for this device. Fingerprints are recomputed from the
    /// key rather than trusted from the wire.
    pub fn to_device(&self) -> Result<Device, CryptoError> {
        let device = Device::draft(&self.name, &self.realm);
        Ok(match self.public_key()? {
            Some(key) => device.with_public_key(&key),
            None => device,
        })
    }
}

/// The six values the backend needs to adjudicate an authentication round,
/// in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub name: String,
    pub timestamp: u64,
    pub signature: Signature,
    pub peer_name: String,
    pub peer_timestamp: u64,
    pub peer_signature: Signature,
}

impl RefreshRequest {
    pub fn query_pairs(&self) -> [(&'static str, String); 6] {
        [
            ("name", self.name.clone()),
            ("ts", self.timestamp.to_string()),
            ("sig", self.signature.to_base64()),
            ("peerName", self.peer_name.clone()),
            ("peerTs", self.peer_timestamp.to_string()),
            ("peerSig", self.peer_signature.to_base64()),
        ]
    }
}

// ============================================================================
// Service Traits
// ============================================================================

/// Backend operations. Transport failures are the `Err` arm; anything the
/// server said, including errors, is an [`ApiResponse`].
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Liveness probe.
    async fn ack(&self) -> Result<ApiResponse<()>, TransportError>;

    /// Ask the backend for a new device draft (name + realm, no key).
    async fn provision(&self) -> Result<ApiResponse<DeviceInfo>, TransportError>;

    /// Bind `public_key` to the drafted device `name`.
    async fn finalize_provision(
        &self,
        name: &str,
        public_key: &PublicKey,
    ) -> Result<ApiResponse<DeviceInfo>, TransportError>;

    async fn get_device(&self, name: &str) -> Result<ApiResponse<DeviceInfo>, TransportError>;

    async fn refresh_token(
        &self,
        request: &RefreshRequest,
    ) -> Result<ApiResponse<BearerToken>, TransportError>;

    async fn authenticated_probe(
        &self,
        token: &BearerToken,
    ) -> Result<ApiResponse<String>, TransportError>;
}

/// Builds a client for a realm's server URL.
pub trait ServiceFactory: Send + Sync {
    fn service(&self, server_url: &str) -> Result<Arc<dyn AuthService>, TransportError>;

    /// Client for liveness probes; usually configured with a shorter timeout.
    fn ack_service(&self, server_url: &str) -> Result<Arc<dyn AuthService>, TransportError> {
        self.service(server_url)
    }
}

// ============================================================================
// Calls and Outcomes
// ============================================================================

/// A backend operation requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Ack,
    Provision,
    FinalizeProvision { name: String, public_key: PublicKey },
    GetDevice { name: String, ticket: ChallengeTicket },
    RefreshToken(RefreshRequest),
    AuthenticatedProbe { token: BearerToken },
}

impl RemoteOp {
    pub fn label(&self) -> &'static str {
        match self {
            RemoteOp::Ack => "ack",
            RemoteOp::Provision => "provision",
            RemoteOp::FinalizeProvision { .. } => "finalize_provision",
            RemoteOp::GetDevice { .. } => "get_device",
            RemoteOp::RefreshToken(_) => "refresh_token",
            RemoteOp::AuthenticatedProbe { .. } => "authenticated_probe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub server_url: String,
    pub op: RemoteOp,
}

impl RemoteCall {
    pub fn new(server_url: impl Into<String>, op: RemoteOp) -> Self {
        Self {
            server_url: server_url.into(),
            op,
        }
    }
}

/// Result of a [`RemoteCall`], delivered back to the state machine exactly once.
#[derive(Debug, Clone)]
pub enum RemoteOutcome {
    Ack {
        server_url: String,
        result: Result<(), ProtocolError>,
    },
    Provisioned {
        server_url: String,
        result: Result<DeviceInfo, ProtocolError>,
    },
    Finalized {
        result: Result<DeviceInfo, ProtocolError>,
    },
    PeerDevice {
        ticket: ChallengeTicket,
        result: Result<DeviceInfo, ProtocolError>,
    },
    Token {
        result: Result<BearerToken, ProtocolError>,
    },
    Probe {
        result: Result<String, ProtocolError>,
    },
}

impl RemoteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RemoteOutcome::Ack { .. } => "ack",
            RemoteOutcome::Provisioned { .. } => "provision",
            RemoteOutcome::Finalized { .. } => "finalize_provision",
            RemoteOutcome::PeerDevice { .. } => "get_device",
            RemoteOutcome::Token { .. } => "refresh_token",
            RemoteOutcome::Probe { .. } => "authenticated_probe",
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            RemoteOutcome::Ack { result, .. } => result.is_ok(),
            RemoteOutcome::Provisioned { result, .. }
            | RemoteOutcome::Finalized { result }
            | RemoteOutcome::PeerDevice { result, .. } => result.is_ok(),
            RemoteOutcome::Token { result } => result.is_ok(),
            RemoteOutcome::Probe { result } => result.is_ok(),
        }
    }
}

/// Run one backend call to completion.
pub async fn execute(factory: &dyn ServiceFactory, call: RemoteCall) -> RemoteOutcome {
    let RemoteCall { server_url, op } = call;
    let label = op.label();
    tracing::debug!(op = label, server_url = %server_url, "calling backend");

    let outcome = match op {
        RemoteOp::Ack => {
            let result = async {
                let service = factory.ack_service(&server_url)?;
                match service.ack().await? {
                    ApiResponse::Success(()) | ApiResponse::Empty => Ok(()),
                    ApiResponse::Error { status, message } => {
                        Err(ProtocolError::Server { status, message })
                    }
                }
            }
            .await;
            RemoteOutcome::Ack { server_url, result }
        }
        RemoteOp::Provision => {
            let result = async {
                let service = factory.service(&server_url)?;
                service.provision().await?.into_result()
            }
            .await;
            RemoteOutcome::Provisioned { server_url, result }
        }
        RemoteOp::FinalizeProvision { name, public_key } => {
            let result = async {
                let service = factory.service(&server_url)?;
                service
                    .finalize_provision(&name, &public_key)
                    .await?
                    .into_result()
            }
            .await;
            RemoteOutcome::Finalized { result }
        }
        RemoteOp::GetDevice { name, ticket } => {
            let result = async {
                let service = factory.service(&server_url)?;
                service.get_device(&name).await?.into_result()
            }
            .await;
            RemoteOutcome::PeerDevice { ticket, result }
        }
        RemoteOp::RefreshToken(request) => {
            let result = async {
                let service = factory.service(&server_url)?;
                service.refresh_token(&request).await?.into_result()
            }
            .await;
            RemoteOutcome::Token { result }
        }
        RemoteOp::AuthenticatedProbe { token } => {
            let result = async {
                let service = factory.service(&server_url)?;
                match service.authenticated_probe(&token).await? {
                    ApiResponse::Success(body) => Ok(body),
                    // The backend answers a valid token with an empty 200.
                    ApiResponse::Empty => Ok(String::new()),
                    ApiResponse::Error { status, message } => {
                        Err(ProtocolError::Server { status, message })
                    }
                }
            }
            .await;
            RemoteOutcome::Probe { result }
        }
    };

    if !outcome.is_ok() {
        tracing::warn!(op = label, "backend call failed");
    }
    outcome
}
