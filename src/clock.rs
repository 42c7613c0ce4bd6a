//! Timestamp helpers.
//!
//! Leases and row timestamps use unix seconds; timer and wait-event
//! arithmetic uses unix milliseconds.

use chrono::Utc;

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
