//! Provisioning and mutual-authentication state machine.
//!
//! The machine owns two orthogonal slots:
//! - `LocalState`: this device's own identity (unprovisioned, waiting for the
//!   initiator's `provision3`, or ready)
//! - `Enrollment`: a device this one is enrolling on the initiator side
//!
//! Every step returns an [`Action`] instead of doing I/O. Backend calls come
//! back through [`Protocol::complete`]; bump-channel messages arrive through
//! [`Protocol::handle_message`].

use std::fmt;
use std::sync::Arc;

use f2f_crypto::{
    verify_with_public_key, CryptoError, FreshnessWindow, IdentityStore, PublicKey,
    SigningPayload,
};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::envelope::Envelope;
use crate::errors::ProtocolError;
use crate::remote::{DeviceInfo, RefreshRequest, RemoteCall, RemoteOp, RemoteOutcome};
use crate::session::{ChallengeTicket, Session};
use crate::store::RecordStore;
use crate::types::{Device, Profile};

// ============================================================================
// Configuration
// ============================================================================

/// Whether the responder checks an `auth1` signature before prompting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignaturePolicy {
    /// Verify against the peer key fetched from the backend.
    #[default]
    VerifyLocally,
    /// Leave verification to the backend's refresh step.
    DeferToBackend,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub freshness: FreshnessWindow,
    pub signature_policy: SignaturePolicy,
}

// ============================================================================
// States
// ============================================================================

/// This device's own identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalState {
    Unprovisioned,
    /// Keypair generated and `provision2` staged; waiting for `provision3`.
    AwaitingPeerFinalization { profile: Profile, device: Device },
    Ready { profile: Profile, device: Device },
}

/// Initiator-side enrollment of another device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Enrollment {
    Idle,
    /// Server draft obtained, `provision1` staged.
    AwaitingPeerKey { profile: Profile, draft: Device },
    /// Peer key attached; finalize in flight or retryable.
    Provisioned {
        profile: Profile,
        draft: Device,
        public_key: PublicKey,
    },
}

/// Combined view of both slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Unprovisioned,
    AwaitingPeerKey,
    Provisioned,
    AwaitingPeerFinalization,
    Ready,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unprovisioned => "unprovisioned",
            Phase::AwaitingPeerKey => "awaiting-peer-key",
            Phase::Provisioned => "provisioned",
            Phase::AwaitingPeerFinalization => "awaiting-peer-finalization",
            Phase::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// What the user is asked to approve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerChallengeView {
    pub peer_name: String,
    pub peer_realm: String,
    /// Fingerprint of the backend-registered key, for out-of-band comparison.
    pub fingerprint: Option<String>,
    pub timestamp: u64,
    pub signature_verified: bool,
    pub ticket: ChallengeTicket,
}

/// What the caller must do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    /// Stage this envelope for the next tap.
    Send(Envelope),
    /// Run this backend call and feed the outcome to [`Protocol::complete`].
    Call(RemoteCall),
    /// Ask the user to accept or reject a peer challenge.
    Prompt(PeerChallengeView),
}

// ============================================================================
// Protocol
// ============================================================================

/// Single-writer state machine for one device.
pub struct Protocol<I: IdentityStore, S: RecordStore> {
    identity: Arc<I>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ProtocolConfig,
    local: LocalState,
    enrollment: Enrollment,
    session: Session,
}

impl<I: IdentityStore, S: RecordStore> Protocol<I, S> {
    pub fn new(identity: Arc<I>, store: Arc<S>, config: ProtocolConfig) -> Self {
        Self::with_clock(identity, store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        identity: Arc<I>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            identity,
            store,
            clock,
            config,
            local: LocalState::Unprovisioned,
            enrollment: Enrollment::Idle,
            session: Session::new(),
        }
    }

    pub fn local_state(&self) -> &LocalState {
        &self.local
    }

    pub fn enrollment(&self) -> &Enrollment {
        &self.enrollment
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        match (&self.enrollment, &self.local) {
            (Enrollment::AwaitingPeerKey { .. }, _) => Phase::AwaitingPeerKey,
            (Enrollment::Provisioned { .. }, _) => Phase::Provisioned,
            (Enrollment::Idle, LocalState::Unprovisioned) => Phase::Unprovisioned,
            (Enrollment::Idle, LocalState::AwaitingPeerFinalization { .. }) => {
                Phase::AwaitingPeerFinalization
            }
            (Enrollment::Idle, LocalState::Ready { .. }) => Phase::Ready,
        }
    }

    /// The ready local device, if any.
    pub fn local_device(&self) -> Option<&Device> {
        match &self.local {
            LocalState::Ready { device, .. } => Some(device),
            _ => None,
        }
    }

    fn ready(&self) -> Result<(&Profile, &Device), ProtocolError> {
        match &self.local {
            LocalState::Ready { profile, device } => Ok((profile, device)),
            _ => Err(ProtocolError::InvalidState(format!(
                "device is {}, not ready",
                self.phase()
            ))),
        }
    }

    fn send(envelope: Envelope) -> Result<Action, ProtocolError> {
        envelope.validate()?;
        Ok(Action::Send(envelope))
    }

    /// Resume `Ready` from the store's default device and its realm profile.
    pub async fn restore(&mut self) -> Result<Phase, ProtocolError> {
        let Some(device) = self.store.default_device().await? else {
            debug!("no default device to restore");
            return Ok(self.phase());
        };
        let Some(profile) = self.store.find_profile(&device.realm).await? else {
            warn!(device = %device.name, realm = %device.realm, "default device has no profile");
            return Ok(self.phase());
        };
        if self.identity.public_key(&device.name).is_none() {
            warn!(device = %device.name, "default device has no identity key");
            return Ok(self.phase());
        }
        info!(device = %device.name, realm = %profile.realm, "restored ready device");
        self.local = LocalState::Ready { profile, device };
        Ok(self.phase())
    }

    // ------------------------------------------------------------------------
    // User-initiated steps
    // ------------------------------------------------------------------------

    /// Liveness probe against `endpoint`.
    pub fn ack(&self, endpoint: &str) -> Result<Action, ProtocolError> {
        let server_url = normalize_endpoint(endpoint)?;
        Ok(Action::Call(RemoteCall::new(server_url, RemoteOp::Ack)))
    }

    /// Start enrolling another device: ask `endpoint` for a device draft.
    pub fn begin_provision(&mut self, endpoint: &str) -> Result<Action, ProtocolError> {
        let server_url = normalize_endpoint(endpoint)?;
        if self.enrollment != Enrollment::Idle {
            info!("restarting enrollment");
        }
        Ok(Action::Call(RemoteCall::new(server_url, RemoteOp::Provision)))
    }

    /// Retry finalization after a failed attempt.
    pub fn finalize(&self) -> Result<Action, ProtocolError> {
        match &self.enrollment {
            Enrollment::Provisioned {
                profile,
                draft,
                public_key,
            } => Ok(Action::Call(RemoteCall::new(
                profile.server_url.clone(),
                RemoteOp::FinalizeProvision {
                    name: draft.name.clone(),
                    public_key: *public_key,
                },
            ))),
            _ => Err(ProtocolError::InvalidState(format!(
                "nothing to finalize while {}",
                self.phase()
            ))),
        }
    }

    /// Build a signed `auth1` challenge.
    pub fn request_auth(&self) -> Result<Action, ProtocolError> {
        let (_, device) = self.ready()?;
        let timestamp = self.clock.now_secs();
        let payload = SigningPayload::auth1(&device.name, timestamp);
        let signature = self.identity.sign(&device.name, payload.as_bytes())?;
        info!(device = %device.name, timestamp, "requesting authentication");
        Self::send(Envelope::Auth1 {
            name: device.name.clone(),
            timestamp,
            signature,
        })
    }

    /// Countersign the pending challenge.
    ///
    /// If the peer lookup has not succeeded yet, re-issues it instead.
    pub fn accept(&mut self) -> Result<Action, ProtocolError> {
        let pending = self
            .session
            .pending()
            .ok_or(ProtocolError::NoPendingChallenge)?;
        let (profile, device) = self.ready()?;

        if pending.peer_device.is_none() {
            debug!(peer = %pending.peer_name, ticket = %pending.ticket, "peer lookup pending, retrying");
            return Ok(Action::Call(RemoteCall::new(
                profile.server_url.clone(),
                RemoteOp::GetDevice {
                    name: pending.peer_name.clone(),
                    ticket: pending.ticket,
                },
            )));
        }

        let timestamp = self.clock.now_secs();
        let payload = SigningPayload::auth2(
            &pending.peer_name,
            pending.peer_timestamp,
            &pending.peer_signature,
            &device.name,
            timestamp,
        );
        let signature = self.identity.sign(&device.name, payload.as_bytes())?;
        let envelope = Envelope::Auth2 {
            name: pending.peer_name.clone(),
            timestamp: pending.peer_timestamp,
            signature: pending.peer_signature,
            peer_name: device.name.clone(),
            peer_timestamp: timestamp,
            peer_signature: signature,
        };
        envelope.validate()?;

        if let Some(done) = self.session.take_pending() {
            info!(peer = %done.peer_name, "accepted peer challenge");
        }
        Ok(Action::Send(envelope))
    }

    /// Discard the pending challenge, if any.
    pub fn reject(&mut self) -> Action {
        match self.session.take_pending() {
            Some(pending) => info!(peer = %pending.peer_name, "rejected peer challenge"),
            None => debug!("reject with no pending challenge"),
        }
        Action::None
    }

    /// Call the backend's authenticated test route with the cached token.
    pub fn probe(&self) -> Result<Action, ProtocolError> {
        let token = self.session.token().cloned().ok_or(ProtocolError::NoToken)?;
        let (profile, _) = self.ready()?;
        Ok(Action::Call(RemoteCall::new(
            profile.server_url.clone(),
            RemoteOp::AuthenticatedProbe { token },
        )))
    }

    // ------------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------------

    /// Decode and handle one bump-channel message.
    pub async fn handle_message(&mut self, raw: &[u8]) -> Result<Action, ProtocolError> {
        let envelope = Envelope::decode(raw).inspect_err(|e| {
            warn!(error = %e, len = raw.len(), "dropping undecodable message");
        })?;
        self.handle_envelope(envelope).await
    }

    pub async fn handle_envelope(&mut self, envelope: Envelope) -> Result<Action, ProtocolError> {
        debug!(kind = %envelope.kind(), "received envelope");
        match envelope {
            Envelope::Provision1 { url, realm, name } => self.on_provision1(url, realm, name).await,
            Envelope::Provision2 { public_key } => self.on_provision2(public_key).await,
            Envelope::Provision3 { name } => self.on_provision3(name).await,
            Envelope::Auth1 {
                name,
                timestamp,
                signature,
            } => {
                let (profile, device) = self.ready()?;
                if name == device.name {
                    return Err(ProtocolError::SelfChallenge(name));
                }
                let server_url = profile.server_url.clone();
                let now = self.clock.now_secs();
                if let Err(e) = self.config.freshness.check(now, timestamp) {
                    warn!(peer = %name, timestamp, now, "dropping expired challenge");
                    return Err(e.into());
                }
                let ticket = self.session.open_challenge(name.clone(), timestamp, signature);
                info!(peer = %name, ticket = %ticket, "peer challenge received, looking up peer");
                Ok(Action::Call(RemoteCall::new(
                    server_url,
                    RemoteOp::GetDevice { name, ticket },
                )))
            }
            Envelope::Auth2 {
                name,
                timestamp,
                signature,
                peer_name,
                peer_timestamp,
                peer_signature,
            } => {
                let (profile, _) = self.ready()?;
                if name == peer_name {
                    return Err(ProtocolError::SelfChallenge(name));
                }
                info!(requester = %name, responder = %peer_name, "relaying countersigned challenge");
                Ok(Action::Call(RemoteCall::new(
                    profile.server_url.clone(),
                    RemoteOp::RefreshToken(RefreshRequest {
                        name,
                        timestamp,
                        signature,
                        peer_name,
                        peer_timestamp,
                        peer_signature,
                    }),
                )))
            }
        }
    }

    /// Second device: adopt the offered identity and answer with our key.
    async fn on_provision1(
        &mut self,
        url: String,
        realm: String,
        name: String,
    ) -> Result<Action, ProtocolError> {
        if let LocalState::AwaitingPeerFinalization { profile, device } = &self.local {
            if device.name == name && profile.realm == realm && profile.server_url == url {
                if let Some(public_key) = self.identity.public_key(&name) {
                    debug!(device = %name, "provision1 re-delivered, re-staging key");
                    return Self::send(Envelope::Provision2 { public_key });
                }
            }
        }

        let public_key = self.identity.generate(&name)?;

        let profile = Profile {
            realm: realm.clone(),
            server_url: url,
            device_name: Some(name.clone()),
        };
        self.store.upsert_profile(profile.clone()).await?;
        let device = Device::draft(&name, &realm).with_public_key(&public_key);
        self.store.upsert_device(device.clone()).await?;

        info!(
            device = %name,
            realm = %realm,
            fingerprint = %public_key.fingerprint(),
            "joined realm, awaiting finalization"
        );
        self.local = LocalState::AwaitingPeerFinalization { profile, device };
        Self::send(Envelope::Provision2 { public_key })
    }

    /// Initiator: attach the peer's key to the draft and finalize it.
    async fn on_provision2(&mut self, public_key: PublicKey) -> Result<Action, ProtocolError> {
        let (profile, draft) = match std::mem::replace(&mut self.enrollment, Enrollment::Idle) {
            Enrollment::AwaitingPeerKey { profile, draft }
            | Enrollment::Provisioned { profile, draft, .. } => (profile, draft),
            Enrollment::Idle => return self.resend_provision3(&public_key).await,
        };
        let draft = draft.with_public_key(&public_key);
        info!(device = %draft.name, fingerprint = %public_key.fingerprint(), "peer key received");

        let call = RemoteCall::new(
            profile.server_url.clone(),
            RemoteOp::FinalizeProvision {
                name: draft.name.clone(),
                public_key,
            },
        );
        self.enrollment = Enrollment::Provisioned {
            profile,
            draft,
            public_key,
        };
        Ok(Action::Call(call))
    }

    /// A `provision2` after finalization: answer again if the key belongs to a
    /// device this side already enrolled.
    async fn resend_provision3(&self, public_key: &PublicKey) -> Result<Action, ProtocolError> {
        let encoded = public_key.to_base64();
        let enrolled = self
            .store
            .list_devices()
            .await?
            .into_iter()
            .find(|d| d.public_key.as_deref() == Some(encoded.as_str()));
        match enrolled {
            Some(device) if self.local_device().map(|d| &d.name) != Some(&device.name) => {
                debug!(device = %device.name, "provision2 re-delivered, re-staging provision3");
                Self::send(Envelope::Provision3 { name: device.name })
            }
            _ => Err(ProtocolError::InvalidState(
                "received a public key with no enrollment in progress".into(),
            )),
        }
    }

    /// Second device: the backend has bound our key; become the realm default.
    async fn on_provision3(&mut self, name: String) -> Result<Action, ProtocolError> {
        if let LocalState::Ready { device, .. } = &self.local {
            if device.name == name {
                debug!(device = %name, "provision3 re-delivered");
                return Ok(Action::None);
            }
        }

        let device = match &self.local {
            LocalState::AwaitingPeerFinalization { device, .. } if device.name == name => {
                device.clone()
            }
            _ => self.store.find_device(&name).await?.ok_or_else(|| {
                ProtocolError::InvalidState(format!("no local device named '{name}'"))
            })?,
        };

        let held = self.identity.public_key(&name).map(|k| k.to_base64());
        if held.is_none() || held != device.public_key {
            return Err(ProtocolError::InvalidState(format!(
                "no identity key matching device '{name}'"
            )));
        }

        let profile = self
            .store
            .find_profile(&device.realm)
            .await?
            .ok_or_else(|| {
                ProtocolError::InvalidState(format!("no profile for realm '{}'", device.realm))
            })?;

        let device = Device {
            initialized: true,
            ..device
        };
        self.store.upsert_device(device.clone()).await?;

        info!(device = %device.name, realm = %device.realm, "device provisioned and ready");
        self.local = LocalState::Ready { profile, device };
        Ok(Action::None)
    }

    // ------------------------------------------------------------------------
    // Backend results
    // ------------------------------------------------------------------------

    /// Apply the result of a [`RemoteCall`].
    pub async fn complete(&mut self, outcome: RemoteOutcome) -> Result<Action, ProtocolError> {
        match outcome {
            RemoteOutcome::Ack { server_url, result } => {
                result?;
                info!(server_url = %server_url, "server reachable");
                Ok(Action::None)
            }
            RemoteOutcome::Provisioned { server_url, result } => {
                self.on_provisioned(server_url, result?).await
            }
            RemoteOutcome::Finalized { result } => self.on_finalized(result).await,
            RemoteOutcome::PeerDevice { ticket, result } => self.on_peer_device(ticket, result),
            RemoteOutcome::Token { result } => {
                let token = result?;
                self.session.set_token(token);
                info!("bearer token cached");
                Ok(Action::None)
            }
            RemoteOutcome::Probe { result } => {
                result?;
                info!("authenticated probe succeeded");
                Ok(Action::None)
            }
        }
    }

    async fn on_provisioned(
        &mut self,
        server_url: String,
        info: DeviceInfo,
    ) -> Result<Action, ProtocolError> {
        let envelope = Envelope::Provision1 {
            url: server_url.clone(),
            realm: info.realm.clone(),
            name: info.name.clone(),
        };
        envelope.validate()?;

        if self.store.find_profile(&info.realm).await?.is_none() {
            self.store
                .upsert_profile(Profile::new(&info.realm, &server_url))
                .await?;
        }
        let draft = Device::draft(&info.name, &info.realm);
        self.store.upsert_device(draft.clone()).await?;

        info!(device = %info.name, realm = %info.realm, "device draft issued");
        self.enrollment = Enrollment::AwaitingPeerKey {
            profile: Profile::new(info.realm, server_url),
            draft,
        };
        Ok(Action::Send(envelope))
    }

    async fn on_finalized(
        &mut self,
        result: Result<DeviceInfo, ProtocolError>,
    ) -> Result<Action, ProtocolError> {
        let Enrollment::Provisioned { draft, .. } = &self.enrollment else {
            warn!("finalize result with no enrollment in progress, ignoring");
            return Ok(Action::None);
        };
        let info = result?;
        if info.name != draft.name {
            debug!(device = %info.name, draft = %draft.name, "finalize result for an earlier draft ignored");
            return Ok(Action::None);
        }

        let envelope = Envelope::Provision3 {
            name: info.name.clone(),
        };
        envelope.validate()?;
        self.store.upsert_device(draft.clone()).await?;

        info!(device = %info.name, "enrollment finalized");
        self.enrollment = Enrollment::Idle;
        Ok(Action::Send(envelope))
    }

    fn on_peer_device(
        &mut self,
        ticket: ChallengeTicket,
        result: Result<DeviceInfo, ProtocolError>,
    ) -> Result<Action, ProtocolError> {
        let Some(pending) = self.session.pending() else {
            debug!(ticket = %ticket, "peer lookup finished after challenge was dropped");
            return Ok(Action::None);
        };
        if !self.session.is_current(ticket) {
            debug!(ticket = %ticket, current = %pending.ticket, "stale peer lookup ignored");
            return Ok(Action::None);
        }
        // Lookup failures keep the challenge; accept() retries the lookup.
        let info = result?;

        match self.check_peer(&info) {
            Ok(view) => {
                let device = info.to_device()?;
                self.session.attach_peer(ticket, device);
                info!(peer = %view.peer_name, verified = view.signature_verified, "peer challenge ready for decision");
                Ok(Action::Prompt(view))
            }
            Err(e) => {
                self.session.take_pending();
                warn!(peer = %info.name, error = %e, "discarding peer challenge");
                Err(e)
            }
        }
    }

    fn check_peer(&self, info: &DeviceInfo) -> Result<PeerChallengeView, ProtocolError> {
        let pending = self
            .session
            .pending()
            .ok_or(ProtocolError::NoPendingChallenge)?;
        let (profile, _) = self.ready()?;

        if info.name != pending.peer_name {
            return Err(ProtocolError::InvalidState(format!(
                "backend returned device '{}' for '{}'",
                info.name, pending.peer_name
            )));
        }
        if info.realm != profile.realm {
            return Err(ProtocolError::RealmMismatch {
                local: profile.realm.clone(),
                peer: info.realm.clone(),
            });
        }

        let public_key = info.public_key()?;
        let signature_verified = match self.config.signature_policy {
            SignaturePolicy::VerifyLocally => {
                let key = public_key
                    .ok_or_else(|| ProtocolError::PeerNotProvisioned(info.name.clone()))?;
                let payload = SigningPayload::auth1(&pending.peer_name, pending.peer_timestamp);
                if !verify_with_public_key(&key, payload.as_bytes(), &pending.peer_signature) {
                    return Err(CryptoError::SignatureInvalid.into());
                }
                true
            }
            SignaturePolicy::DeferToBackend => false,
        };

        Ok(PeerChallengeView {
            peer_name: pending.peer_name.clone(),
            peer_realm: info.realm.clone(),
            fingerprint: public_key.map(|k| k.fingerprint()),
            timestamp: pending.peer_timestamp,
            signature_verified,
            ticket: pending.ticket,
        })
    }
}

/// Turn user input into a backend base URL. Bare hosts get `https://`.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, ProtocolError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::InvalidEndpoint(endpoint.to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = url::Url::parse(&candidate)
        .map_err(|_| ProtocolError::InvalidEndpoint(endpoint.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ProtocolError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(url.to_string())
}
