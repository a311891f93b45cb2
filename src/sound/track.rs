//! Track identity and the per track parameters shared between the control side and the
//! audio thread.
//!
//! All parameters are plain atomics.  The control thread stores, the audio thread loads once
//! per block, so a render never waits on a control change and never sees half a value.
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::{
    dsp::peak_meter::{PeakMeter, Peaks},
    utils::{clip_gain, clip_pan, gain_to_level, level_to_gain},
};

pub type TrackId = u32;

/// the local input is always track 1
pub const LOCAL_INPUT_TRACK_ID: TrackId = 1;
pub const METRONOME_TRACK_ID: TrackId = 2;
pub const ROOM_STREAM_TRACK_ID: TrackId = 3;
/// remote channels get ids from here up
pub const FIRST_REMOTE_TRACK_ID: TrackId = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    LocalInput,
    Remote,
    Metronome,
    RoomStream,
}

pub struct TrackParams {
    gain: AtomicU32,
    pan: AtomicU32,
    mute: AtomicBool,
    solo: AtomicBool,
    peaks: PeakMeter,
}

/// what the audio thread reads at the top of a block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub gain: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
}

impl TrackParams {
    pub fn new() -> TrackParams {
        TrackParams {
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            peaks: PeakMeter::new(),
        }
    }
    pub fn set_gain(&self, gain: f32) -> () {
        self.gain.store(clip_gain(gain).to_bits(), Ordering::Relaxed);
    }
    /// set from a level slider, see [`level_to_gain`]
    pub fn set_level(&self, level: f32) -> () {
        self.set_gain(level_to_gain(level));
    }
    pub fn set_pan(&self, pan: f32) -> () {
        self.pan.store(clip_pan(pan).to_bits(), Ordering::Relaxed);
    }
    pub fn set_mute(&self, mute: bool) -> () {
        self.mute.store(mute, Ordering::Relaxed);
    }
    pub fn set_solo(&self, solo: bool) -> () {
        self.solo.store(solo, Ordering::Relaxed);
    }
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }
    pub fn level(&self) -> f32 {
        gain_to_level(self.gain())
    }
    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }
    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }
    pub fn is_soloed(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }
    pub fn peaks(&self) -> Peaks {
        self.peaks.get()
    }
    pub fn meter(&self) -> &PeakMeter {
        &self.peaks
    }
    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            gain: self.gain(),
            pan: self.pan(),
            mute: self.is_muted(),
            solo: self.is_soloed(),
        }
    }
}

impl Default for TrackParams {
    fn default() -> Self {
        TrackParams::new()
    }
}

#[cfg(test)]
mod test_track {
    use super::*;

    #[test]
    fn defaults() {
        let params = TrackParams::new();
        assert_eq!(
            params.snapshot(),
            ParamSnapshot {
                gain: 1.0,
                pan: 0.0,
                mute: false,
                solo: false
            }
        );
    }

    #[test]
    fn ranges_are_enforced() {
        let params = TrackParams::new();
        params.set_gain(9.0);
        assert_eq!(params.gain(), 4.0);
        params.set_level(0.5);
        assert_eq!(params.gain(), 0.0625);
        assert!((params.level() - 0.5).abs() < 1e-6);
        params.set_pan(-2.0);
        assert_eq!(params.pan(), -1.0);
    }
}
