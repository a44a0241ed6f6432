use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// All queue ordering, deadlines and lifecycle checks run on this; it is
/// what gets persisted and what goes over the wire, so it is a `u64` and
/// not a `SystemTime`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(::bincode::Encode, ::bincode::Decode)]
#[derive(::serde::Serialize, ::serde::Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Clock before Unix epoch")
                .as_millis() as u64,
        )
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }

    /// `self - earlier`, zero when `earlier` is in the future.
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Time left until `self` as seen from `now`, `None` once reached.
    pub fn remaining_from(self, now: Self) -> Option<Duration> {
        if self.0 <= now.0 {
            None
        } else {
            Some(Duration::from_millis(self.0 - now.0))
        }
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}
