//! Wall-clock helpers for file names and records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Nanoseconds since the Unix epoch, saturating on overflow.
pub(crate) fn unix_nanos(at: SystemTime) -> u64 {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
}

/// Returns the process-wide next sequence number.
///
/// Paired with a timestamp it keeps names unique when two writers observe
/// the same clock reading.
pub(crate) fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Formats `at` as an RFC 3339 UTC timestamp.
pub(crate) fn rfc3339(at: SystemTime) -> String {
    OffsetDateTime::from(at).format(&Rfc3339).unwrap_or_default()
}
