//! Constant power pan law for a mixer channel.
//!
//! Pan runs from -1.0 (hard left) to 1.0 (hard right).  Each side gets `sqrt(1 -/+ pan)`, so
//! center is unity on both sides and a hard pan puts sqrt(2) on one side and nothing on the other.
use std::fmt;

use crate::utils::clip_pan;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fader {
    pan: f32,
    gains: [f32; 2],
}

fn pan_gains(pan: f32) -> [f32; 2] {
    [f32::sqrt(1.0 - pan), f32::sqrt(1.0 + pan)]
}

impl Fader {
    pub fn new() -> Fader {
        Fader::with_pan(0.0)
    }

    pub fn with_pan(pan: f32) -> Fader {
        let pan = clip_pan(pan);
        Fader {
            pan,
            gains: pan_gains(pan),
        }
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// left and right multipliers at unity gain
    pub fn gains(&self) -> [f32; 2] {
        self.gains
    }

    /// Track the shared pan parameter.  The square roots are only redone when it moved.
    pub fn follow(&mut self, pan: f32) -> () {
        let pan = clip_pan(pan);
        if pan != self.pan {
            *self = Fader::with_pan(pan);
        }
    }

    /// scale a stereo block in place by `gain` and the pan
    pub fn apply(&self, gain: f32, left: &mut [f32], right: &mut [f32]) -> () {
        let [l, r] = self.gains;
        left.iter_mut().for_each(|s| *s *= gain * l);
        right.iter_mut().for_each(|s| *s *= gain * r);
    }
}

impl Default for Fader {
    fn default() -> Self {
        Fader::new()
    }
}

impl fmt::Display for Fader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:+.2} (L {:.3} R {:.3})",
            self.pan, self.gains[0], self.gains[1]
        )
    }
}

#[cfg(test)]
mod test_fader {
    use super::*;

    #[test]
    fn center_is_unity() {
        let fader = Fader::default();
        assert_eq!(fader.gains(), [1.0, 1.0]);
        let mut left = [0.25; 3];
        let mut right = [-0.25; 3];
        fader.apply(1.0, &mut left, &mut right);
        assert_eq!(left, [0.25; 3]);
        assert_eq!(right, [-0.25; 3]);
    }

    #[test]
    fn hard_pans() {
        assert_eq!(Fader::with_pan(-1.0).gains(), [f32::sqrt(2.0), 0.0]);
        assert_eq!(Fader::with_pan(1.0).gains(), [0.0, f32::sqrt(2.0)]);
        // past the end stops at the end
        assert_eq!(Fader::with_pan(7.0).pan(), 1.0);
        assert_eq!(Fader::with_pan(f32::NAN).pan(), 0.0);
    }

    #[test]
    fn follow_then_apply() {
        let mut fader = Fader::new();
        fader.follow(1.0);
        let mut left = [0.5; 4];
        let mut right = [0.5; 4];
        fader.apply(2.0, &mut left, &mut right);
        assert_eq!(left, [0.0; 4]);
        assert!((right[0] - f32::sqrt(2.0)).abs() < 1e-6);
        fader.follow(f32::NAN);
        assert_eq!(fader, Fader::new());
    }

    #[test]
    fn shows_pan() {
        assert_eq!(format!("{}", Fader::new()), "+0.00 (L 1.000 R 1.000)");
    }
}
