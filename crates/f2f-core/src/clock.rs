//! Wall-clock source for challenge timestamps.

/// Seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        // Pre-epoch clocks clamp to zero rather than wrapping.
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}
