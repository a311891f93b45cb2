//! The session side: interval grid, tempo votes and the glue between the network layer and
//! the audio thread.
//!
//! [`build_session`] hands back the two halves.  The [`SessionEngine`](engine::SessionEngine)
//! goes to an audio driver, the [`SessionHandle`](handle::SessionHandle) stays with the network
//! and UI code.
use std::sync::mpsc;

use crate::{
    common::{box_error::BoxError, config::SessionConfig},
    sound::events::SessionEvent,
};

pub mod engine;
pub mod handle;
pub mod interval;
pub mod param_message;
pub mod transport;
pub mod vote;

use engine::SessionEngine;
use handle::SessionHandle;
use transport::SessionTransport;

/// Check the config and build a session.  Nothing is running yet, start the driver and then
/// [`SessionHandle::start_session`].
pub fn build_session(
    config: SessionConfig,
    transport: Box<dyn SessionTransport>,
) -> Result<(SessionHandle, SessionEngine, mpsc::Receiver<SessionEvent>), BoxError> {
    SessionHandle::build(config, transport)
}
