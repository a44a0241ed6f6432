//! Protocol constants.
//!
//! These are deliberately not configurable; clients bake matching
//! expectations (countdown lengths, heartbeat tolerance) into their UI.

use std::time::Duration;

/// How long a called party has to confirm presence before being no-showed.
pub const CALL_WINDOW: Duration = Duration::from_secs(120);

/// A session with no activity and an empty roster auto-closes after this.
pub const INACTIVE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Hard cap on session lifetime, activity or not.
pub const MAX_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Keepalive ping interval on subscriber connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Assumed time to serve one party, used for wait estimates.
pub const AVG_SERVICE_TIME: Duration = Duration::from_secs(3 * 60);

/// How long pending push notifications are batched before dispatch.
pub const PUSH_BATCH_DELAY: Duration = Duration::from_secs(3);

/// Upper bound between lifecycle alarm fires.
pub const LIFECYCLE_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Session capacity limits (total guests across live parties).
pub const MAX_GUESTS_MIN: u32 = 1;
pub const MAX_GUESTS_MAX: u32 = 100;

/// Input length limits.
pub const EVENT_NAME_MAX_LEN: usize = 120;
pub const LOCATION_MAX_LEN: usize = 240;
pub const CONTACT_INFO_MAX_LEN: usize = 500;

/// How many random draws session creation attempts before giving up on
/// finding a free short code.
pub const SHORT_CODE_DRAW_ATTEMPTS: usize = 20;
