//! crate wide error type.
//!
//! Anything that crosses a thread boundary (the audio callback, the network feeder, the
//! control handle) returns this so errors can be moved between threads.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
