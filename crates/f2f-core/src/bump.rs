//! Bump channel: the one-message-per-tap transport between adjacent devices.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Point-to-point tap transport.
///
/// Inbound taps are delivered one at a time in arrival order. Outbound
/// messages are not sent immediately: they are staged and handed over on
/// the next tap, and a newer staged message replaces an older one.
#[async_trait]
pub trait BumpChannel: Send + Sync {
    /// Next inbound tap payload. `None` once the channel is closed.
    async fn recv(&self) -> Option<Bytes>;

    /// Stage `payload` for the next tap.
    async fn stage(&self, payload: Bytes);
}

/// In-memory bump endpoint. Two of them form a pair via [`MemoryBump::pair`].
pub struct MemoryBump {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    peer: mpsc::UnboundedSender<Bytes>,
    staged: Mutex<Option<Bytes>>,
}

impl MemoryBump {
    pub fn pair() -> (Self, Self) {
        let (to_a, from_b) = mpsc::unbounded_channel();
        let (to_b, from_a) = mpsc::unbounded_channel();
        let a = Self {
            inbound: tokio::sync::Mutex::new(from_b),
            peer: to_b,
            staged: Mutex::new(None),
        };
        let b = Self {
            inbound: tokio::sync::Mutex::new(from_a),
            peer: to_a,
            staged: Mutex::new(None),
        };
        (a, b)
    }

    /// Physically tap: hand the staged payload to the peer.
    ///
    /// The payload stays staged, so tapping again re-delivers it. Returns
    /// `false` when nothing is staged or the peer is gone.
    pub fn tap(&self) -> bool {
        let Some(payload) = self.staged.lock().clone() else {
            return false;
        };
        self.peer.send(payload).is_ok()
    }

    pub fn staged(&self) -> Option<Bytes> {
        self.staged.lock().clone()
    }
}

#[async_trait]
impl BumpChannel for MemoryBump {
    async fn recv(&self) -> Option<Bytes> {
        self.inbound.lock().await.recv().await
    }

    async fn stage(&self, payload: Bytes) {
        tracing::trace!(len = payload.len(), "staged outbound payload");
        *self.staged.lock() = Some(payload);
    }
}
