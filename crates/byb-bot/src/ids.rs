//! Client order ID generation.
//!
//! IDs are `BOT_<nanos>`. Monotonicity within a run is guaranteed (the
//! venue correlates acks by these IDs); uniqueness across restarts is not
//! required.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Generate the next client order ID.
pub fn next_client_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
    let mut prev = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_ID.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return format!("BOT_{next}"),
            Err(actual) => prev = actual,
        }
    }
}
