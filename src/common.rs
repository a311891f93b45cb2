//! Pieces shared by the sound graph and the session layer.
use std::time::{SystemTime, UNIX_EPOCH};

pub mod box_error;
pub mod config;

/// wall clock in microseconds
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

/// wall clock in milliseconds.  Vote debouncing runs on this clock.
pub fn get_milli_time() -> u128 {
    get_micro_time() / 1000
}
