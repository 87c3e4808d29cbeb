//! Test doubles: an in-process auth backend and a controllable clock.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use f2f_crypto::hash::fingerprint_hex;
use f2f_crypto::{verify_with_public_key, PublicKey, SigningPayload};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::remote::{
    ApiResponse, AuthService, DeviceInfo, RefreshRequest, ServiceFactory, TransportError,
};
use crate::session::BearerToken;

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// A call the mock backend received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Ack,
    Provision,
    FinalizeProvision { name: String, public_key: PublicKey },
    GetDevice { name: String },
    RefreshToken(RefreshRequest),
    AuthenticatedProbe,
}

impl RecordedCall {
    pub fn label(&self) -> &'static str {
        match self {
            RecordedCall::Ack => "ack",
            RecordedCall::Provision => "provision",
            RecordedCall::FinalizeProvision { .. } => "finalize_provision",
            RecordedCall::GetDevice { .. } => "get_device",
            RecordedCall::RefreshToken(_) => "refresh_token",
            RecordedCall::AuthenticatedProbe => "authenticated_probe",
        }
    }
}

/// Injected failure for the next call of a given operation.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transport(TransportError),
    Empty,
    Status { status: u16, message: String },
}

#[derive(Default)]
struct MockState {
    devices: BTreeMap<String, DeviceInfo>,
    next_device: u64,
    tokens: HashSet<String>,
    calls: Vec<RecordedCall>,
    failures: VecDeque<(&'static str, MockFailure)>,
}

/// In-process stand-in for the auth backend.
///
/// Follows the backend's rules: drafts have no key until finalized, a
/// refresh needs two distinct finalized devices of the same realm whose
/// signatures both verify, and the probe accepts only tokens it issued.
pub struct MockAuthService {
    realm: String,
    state: Mutex<MockState>,
}

impl MockAuthService {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Insert or replace a device record directly.
    pub fn register_device(&self, name: &str, realm: &str, public_key: Option<&PublicKey>) {
        let mut info = DeviceInfo::new(name, realm);
        if let Some(key) = public_key {
            info.public_key = Some(key.to_base64());
            info.public_key_fingerprint = Some(key.fingerprint());
        }
        self.state.lock().devices.insert(name.to_string(), info);
    }

    pub fn device(&self, name: &str) -> Option<DeviceInfo> {
        self.state.lock().devices.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.label() == label)
            .count()
    }

    /// Make the next call to `op` (a [`RecordedCall::label`]) fail.
    pub fn fail_next(&self, op: &'static str, failure: MockFailure) {
        self.state.lock().failures.push_back((op, failure));
    }

    fn begin<T>(&self, call: RecordedCall) -> Option<Result<ApiResponse<T>, TransportError>> {
        let mut state = self.state.lock();
        let label = call.label();
        state.calls.push(call);
        let idx = state.failures.iter().position(|(op, _)| *op == label)?;
        let (_, failure) = state.failures.remove(idx)?;
        Some(match failure {
            MockFailure::Transport(e) => Err(e),
            MockFailure::Empty => Ok(ApiResponse::Empty),
            MockFailure::Status { status, message } => Ok(ApiResponse::Error { status, message }),
        })
    }

    fn error<T>(status: u16, message: &str) -> Result<ApiResponse<T>, TransportError> {
        Ok(ApiResponse::Error {
            status,
            message: message.to_string(),
        })
    }

    fn finalized_key(&self, name: &str) -> Option<(String, PublicKey)> {
        let state = self.state.lock();
        let info = state.devices.get(name)?;
        let key = info.public_key().ok().flatten()?;
        Some((info.realm.clone(), key))
    }
}

#[async_trait]
impl AuthService for MockAuthService {
    async fn ack(&self) -> Result<ApiResponse<()>, TransportError> {
        if let Some(r) = self.begin(RecordedCall::Ack) {
            return r;
        }
        Ok(ApiResponse::Empty)
    }

    async fn provision(&self) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        if let Some(r) = self.begin(RecordedCall::Provision) {
            return r;
        }
        let mut state = self.state.lock();
        state.next_device += 1;
        let name = format!("device-{:04}", state.next_device);
        let info = DeviceInfo::new(&name, &self.realm);
        state.devices.insert(name, info.clone());
        Ok(ApiResponse::Success(info))
    }

    async fn finalize_provision(
        &self,
        name: &str,
        public_key: &PublicKey,
    ) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        let call = RecordedCall::FinalizeProvision {
            name: name.to_string(),
            public_key: *public_key,
        };
        if let Some(r) = self.begin(call) {
            return r;
        }
        let mut state = self.state.lock();
        let Some(info) = state.devices.get_mut(name) else {
            return Self::error(404, "Not Found");
        };
        info.public_key = Some(public_key.to_base64());
        info.public_key_fingerprint = Some(public_key.fingerprint());
        Ok(ApiResponse::Success(info.clone()))
    }

    async fn get_device(&self, name: &str) -> Result<ApiResponse<DeviceInfo>, TransportError> {
        if let Some(r) = self.begin(RecordedCall::GetDevice {
            name: name.to_string(),
        }) {
            return r;
        }
        match self.device(name) {
            Some(info) => Ok(ApiResponse::Success(info)),
            None => Self::error(404, "Not Found"),
        }
    }

    async fn refresh_token(
        &self,
        request: &RefreshRequest,
    ) -> Result<ApiResponse<BearerToken>, TransportError> {
        if let Some(r) = self.begin(RecordedCall::RefreshToken(request.clone())) {
            return r;
        }
        if request.name == request.peer_name {
            return Self::error(403, "Forbidden");
        }
        let (Some((realm, key)), Some((peer_realm, peer_key))) = (
            self.finalized_key(&request.name),
            self.finalized_key(&request.peer_name),
        ) else {
            return Self::error(500, "Internal Server Error");
        };
        if realm != peer_realm {
            return Self::error(403, "Forbidden");
        }

        let primary = SigningPayload::auth1(&request.name, request.timestamp);
        let counter = SigningPayload::auth2(
            &request.name,
            request.timestamp,
            &request.signature,
            &request.peer_name,
            request.peer_timestamp,
        );
        if !verify_with_public_key(&key, primary.as_bytes(), &request.signature)
            || !verify_with_public_key(&peer_key, counter.as_bytes(), &request.peer_signature)
        {
            return Self::error(403, "Forbidden");
        }

        let joined: Vec<String> = request.query_pairs().into_iter().map(|(_, v)| v).collect();
        let token = fingerprint_hex(joined.join("|").as_bytes());
        self.state.lock().tokens.insert(token.clone());
        Ok(ApiResponse::Success(BearerToken::new(token)))
    }

    async fn authenticated_probe(
        &self,
        token: &BearerToken,
    ) -> Result<ApiResponse<String>, TransportError> {
        if let Some(r) = self.begin(RecordedCall::AuthenticatedProbe) {
            return r;
        }
        if self.state.lock().tokens.contains(token.expose()) {
            Ok(ApiResponse::Empty)
        } else {
            Self::error(403, "Forbidden")
        }
    }
}

/// Hands out one shared [`MockAuthService`] for every server URL.
pub struct MockServiceFactory {
    service: Arc<MockAuthService>,
    urls: Mutex<Vec<String>>,
}

impl MockServiceFactory {
    pub fn new(service: Arc<MockAuthService>) -> Self {
        Self {
            service,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn service_handle(&self) -> &Arc<MockAuthService> {
        &self.service
    }

    /// Server URLs clients were requested for, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl ServiceFactory for MockServiceFactory {
    fn service(&self, server_url: &str) -> Result<Arc<dyn AuthService>, TransportError> {
        self.urls.lock().push(server_url.to_string());
        Ok(self.service.clone())
    }
}
