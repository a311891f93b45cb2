//! components used to make the sound side of a jam session
//!
//! Everything under here runs on, or feeds, the real-time audio thread.

use crate::common::box_error::BoxError;

/// What an audio driver calls once per period.  Stereo is planar: one slice per channel.
pub trait SoundCallback {
    fn process(
        &mut self,
        in_a: &[f32],
        in_b: &[f32],
        out_a: &mut [f32],
        out_b: &mut [f32],
    ) -> Result<(), BoxError>;
}

pub mod audio_node;
pub mod chunk_codec;
pub mod events;
pub mod jack_thread;
pub mod local_input;
pub mod metronome;
pub mod mixer;
pub mod offline_driver;
pub mod processor_chain;
pub mod remote_track;
pub mod room_stream;
pub mod sample_ring;
pub mod track;
