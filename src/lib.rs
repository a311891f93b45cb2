//! jamsync - interval synchronized jamming
//!
//! provides the audio engine for a client that jams over a server with everybody locked to the
//! same interval grid.  Remote audio is always one interval behind, so it plays in time with
//! what you play now.
//!
//! # Example
//! ```
//! use jamsync::common::config::SessionConfig;
//! use jamsync::session::{build_session, transport::OfflineTransport};
//! use jamsync::sound::SoundCallback;
//!
//! let (mut handle, mut engine, events) =
//!     build_session(SessionConfig::default(), Box::new(OfflineTransport)).unwrap();
//! handle.start_session().unwrap();
//! // At this point some audio driver would use engine.process() as the callback
//! let in_a = [0.0; 128];
//! let in_b = [0.0; 128];
//! let mut out_left = [0.0; 128];
//! let mut out_right = [0.0; 128];
//! engine.process(&in_a, &in_b, &mut out_left, &mut out_right).unwrap();
//! assert!(events.try_iter().count() > 0);
//! ```
extern crate json;
#[macro_use]
extern crate num_derive;

pub mod common;
pub mod dsp;
pub mod session;
pub mod sound;
pub mod utils;
