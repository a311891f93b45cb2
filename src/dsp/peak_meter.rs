//! Per block peak metering.
//!
//! The audio thread writes a [`Peaks`] after every block, the view reads them whenever it
//! wants.  Peaks are overwritten each block, never accumulated.
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Peaks {
    pub left: f32,
    pub right: f32,
}

impl Peaks {
    pub fn max(&self) -> f32 {
        self.left.max(self.right)
    }
}

/// largest absolute sample in the block
pub fn block_peak(data: &[f32]) -> f32 {
    data.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

/// Peak values shared between the audio thread and readers.  The floats live in the bits of
/// atomics so neither side ever waits.
pub struct PeakMeter {
    left: AtomicU32,
    right: AtomicU32,
}

impl PeakMeter {
    pub fn new() -> PeakMeter {
        PeakMeter {
            left: AtomicU32::new(0.0f32.to_bits()),
            right: AtomicU32::new(0.0f32.to_bits()),
        }
    }
    pub fn measure(&self, left: &[f32], right: &[f32]) -> () {
        self.store(Peaks {
            left: block_peak(left),
            right: block_peak(right),
        });
    }
    pub fn store(&self, peaks: Peaks) -> () {
        self.left.store(peaks.left.to_bits(), Ordering::Relaxed);
        self.right.store(peaks.right.to_bits(), Ordering::Relaxed);
    }
    pub fn get(&self) -> Peaks {
        Peaks {
            left: f32::from_bits(self.left.load(Ordering::Relaxed)),
            right: f32::from_bits(self.right.load(Ordering::Relaxed)),
        }
    }
}

impl Default for PeakMeter {
    fn default() -> Self {
        PeakMeter::new()
    }
}

#[cfg(test)]
mod test_peak_meter {
    use super::*;

    #[test]
    fn peak_of_block() {
        assert_eq!(block_peak(&[]), 0.0);
        assert_eq!(block_peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn overwritten_not_accumulated() {
        let meter = PeakMeter::new();
        meter.measure(&[0.9, 0.1], &[-0.2, 0.2]);
        assert_eq!(meter.get(), Peaks { left: 0.9, right: 0.2 });
        meter.measure(&[0.1, 0.1], &[0.0, 0.0]);
        assert_eq!(meter.get(), Peaks { left: 0.1, right: 0.0 });
        assert_eq!(meter.get().max(), 0.1);
    }
}
