//! Turning encoded network chunks into samples.
//!
//! The session layer hands over whatever bytes the server relayed for a channel.  A
//! [`ChunkDecoder`] turns them into interleaved stereo floats for the track's ring.
//!
//! [`PcmChunkDecoder`] understands the plain PCM audio payload: two planar channels of
//! network endian 16 bit samples stored as offset binary.
use byteorder::{ByteOrder, NetworkEndian};
use simple_error::bail;

use crate::common::box_error::BoxError;

pub trait ChunkDecoder: Send {
    /// append the decoded, interleaved stereo samples of `bytes` to `out`
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<f32>) -> Result<(), BoxError>;
}

pub struct PcmChunkDecoder;

impl PcmChunkDecoder {
    pub fn new() -> PcmChunkDecoder {
        PcmChunkDecoder
    }
    fn convert_to_f32(n: u16) -> f32 {
        (1.0 / 32768.0 * n as f32) - 1.0
    }
}

impl Default for PcmChunkDecoder {
    fn default() -> Self {
        PcmChunkDecoder::new()
    }
}

impl ChunkDecoder for PcmChunkDecoder {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<f32>) -> Result<(), BoxError> {
        if bytes.len() % 4 != 0 {
            bail!("pcm chunk of {} bytes is not whole stereo frames", bytes.len());
        }
        let num_samples = bytes.len() / 4; // 2 bytes per sample and 2 channels of data
        let mut off_1 = 0; // starting offset to first channel
        let mut off_2 = num_samples * 2; // starting offset to 2nd channel
        out.reserve(num_samples * 2);
        for _n in 0..num_samples {
            out.push(Self::convert_to_f32(NetworkEndian::read_u16(&bytes[off_1..off_1 + 2])));
            out.push(Self::convert_to_f32(NetworkEndian::read_u16(&bytes[off_2..off_2 + 2])));
            off_1 += 2;
            off_2 += 2;
        }
        Ok(())
    }
}

fn convert_to_u16(v: &f32) -> u16 {
    // Prevent clipping
    let sample = (v + 1.0).clamp(0.0, 2.0);
    (sample * 32766.0) as u16
}

/// build a pcm chunk out of two channels, what a sending client would put on the wire
pub fn encode_pcm_chunk(chan1: &[f32], chan2: &[f32]) -> Vec<u8> {
    let frames = chan1.len().min(chan2.len());
    let mut buffer = vec![0u8; frames * 4];
    let mut idx = 0;
    for v in &chan1[..frames] {
        NetworkEndian::write_u16(&mut buffer[idx..idx + 2], convert_to_u16(v));
        idx += 2; // move ahead 2 bytes
    }
    for v in &chan2[..frames] {
        NetworkEndian::write_u16(&mut buffer[idx..idx + 2], convert_to_u16(v));
        idx += 2;
    }
    buffer
}
