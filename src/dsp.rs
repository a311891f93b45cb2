//! Small sample level helpers used by the mixer: the pan law and the block peak meter.

pub mod fader;
pub mod peak_meter;
