//! Freshness window for authentication challenges.

/// Default maximum clock skew, in seconds, between a challenge's timestamp
/// and the receiver's clock.
pub const DEFAULT_MAX_SKEW_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreshnessError {
    #[error("challenge expired: {skew_secs}s outside the {max_skew_secs}s window")]
    Expired { skew_secs: u64, max_skew_secs: u64 },
}

/// Symmetric acceptance window around the local clock.
///
/// A timestamp too far in the past (replay) and one too far in the future
/// (skewed clock) are both rejected. Exactly `max_skew_secs` apart is still
/// fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    pub max_skew_secs: u64,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            max_skew_secs: DEFAULT_MAX_SKEW_SECS,
        }
    }
}

impl FreshnessWindow {
    pub fn new(max_skew_secs: u64) -> Self {
        Self { max_skew_secs }
    }

    pub fn skew(now: u64, ts: u64) -> u64 {
        now.abs_diff(ts)
    }

    pub fn is_expired(&self, now: u64, ts: u64) -> bool {
        Self::skew(now, ts) > self.max_skew_secs
    }

    pub fn check(&self, now: u64, ts: u64) -> Result<(), FreshnessError> {
        let skew_secs = Self::skew(now, ts);
        if skew_secs > self.max_skew_secs {
            return Err(FreshnessError::Expired {
                skew_secs,
                max_skew_secs: self.max_skew_secs,
            });
        }
        Ok(())
    }
}
