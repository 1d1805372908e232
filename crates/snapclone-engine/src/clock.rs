//! Wall-clock timestamps for `CloneInfo::create_time`. A trait seam
//! isn't worth it here, but it's isolated in one place in case that
//! changes.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_time_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
