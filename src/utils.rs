// utility functions

/// highest gain a track can be given.  A level slider at 4^(1/4) lands here.
pub const MAX_GAIN: f32 = 4.0;

/// Map a level slider position onto the perceptual gain curve, `gain = level^4`.
pub fn level_to_gain(level: f32) -> f32 {
    clip_gain(level.max(0.0).powi(4))
}

/// inverse of [`level_to_gain`]
pub fn gain_to_level(gain: f32) -> f32 {
    clip_gain(gain).powf(0.25)
}

/// keep a gain in [0, MAX_GAIN].  NaN ends up at 0.
pub fn clip_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return 0.0;
    }
    gain.clamp(0.0, MAX_GAIN)
}

/// keep a pan value in [-1, 1].  NaN ends up centered.
pub fn clip_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        return 0.0;
    }
    pan.clamp(-1.0, 1.0)
}
