//! Transient authentication session state.
//!
//! Holds the responder's pending peer challenge and the relay's bearer token.
//! Owned by the state machine; nothing here is persisted.

use std::fmt;

use f2f_crypto::Signature;

use crate::types::Device;

/// Correlates a peer lookup with the challenge that triggered it.
///
/// Tickets increase monotonically; a lookup result carrying an older ticket
/// than the pending challenge is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChallengeTicket(u64);

impl ChallengeTicket {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChallengeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque token issued by the backend after a successful relay.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authentication` header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(<{} bytes>)", self.0.len())
    }
}

/// An `auth1` challenge awaiting the local user's decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPeerChallenge {
    pub peer_name: String,
    pub peer_timestamp: u64,
    pub peer_signature: Signature,
    pub ticket: ChallengeTicket,
    /// Backend record for the peer, once the lookup has succeeded.
    pub peer_device: Option<Device>,
}

#[derive(Debug, Default)]
pub struct Session {
    pending: Option<PendingPeerChallenge>,
    last_ticket: u64,
    token: Option<BearerToken>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new challenge, replacing any pending one.
    pub fn open_challenge(
        &mut self,
        peer_name: String,
        peer_timestamp: u64,
        peer_signature: Signature,
    ) -> ChallengeTicket {
        self.last_ticket += 1;
        let ticket = ChallengeTicket(self.last_ticket);
        if let Some(old) = self.pending.take() {
            tracing::debug!(peer = %old.peer_name, ticket = %old.ticket, "replacing pending challenge");
        }
        self.pending = Some(PendingPeerChallenge {
            peer_name,
            peer_timestamp,
            peer_signature,
            ticket,
            peer_device: None,
        });
        ticket
    }

    pub fn pending(&self) -> Option<&PendingPeerChallenge> {
        self.pending.as_ref()
    }

    pub fn is_current(&self, ticket: ChallengeTicket) -> bool {
        self.pending.as_ref().is_some_and(|p| p.ticket == ticket)
    }

    /// Attach the fetched peer record if `ticket` is still the pending one.
    pub fn attach_peer(&mut self, ticket: ChallengeTicket, device: Device) -> bool {
        match self.pending.as_mut() {
            Some(p) if p.ticket == ticket => {
                p.peer_device = Some(device);
                true
            }
            _ => false,
        }
    }

    pub fn take_pending(&mut self) -> Option<PendingPeerChallenge> {
        self.pending.take()
    }

    pub fn token(&self) -> Option<&BearerToken> {
        self.token.as_ref()
    }

    pub fn set_token(&mut self, token: BearerToken) {
        self.token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::from_bytes([3u8; 64])
    }

    #[test]
    fn test_latest_challenge_wins() {
        let mut session = Session::new();
        let first = session.open_challenge("bob".into(), 10, sig());
        let second = session.open_challenge("carol".into(), 11, sig());

        assert!(second > first);
        assert!(!session.is_current(first));
        assert!(session.is_current(second));
        assert!(!session.attach_peer(first, Device::draft("bob", "r1")));
        assert!(session.attach_peer(second, Device::draft("carol", "r1")));
        assert_eq!(session.pending().unwrap().peer_name, "carol");
    }

    #[test]
    fn test_take_consumes() {
        let mut session = Session::new();
        session.open_challenge("bob".into(), 10, sig());
        assert!(session.take_pending().is_some());
        assert!(session.take_pending().is_none());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BearerToken::new("secret-token-value");
        let shown = format!("{token:?}");
        assert!(!shown.contains("secret"));
    }
}
