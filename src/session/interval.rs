//! The interval grid and the tempo state machine.
//!
//! The [`IntervalController`] lives on the audio thread.  Every block it advances its sample
//! position and reports, as [`IntervalEvent`]s with their offset in the block, the beats and
//! interval boundaries that fall inside it.
//!
//! BPI and BPM only ever change at a boundary.  A change (from a confirmed vote or from the
//! server announcing a new tempo) is parked in [`TempoSlots`] by the control side and picked
//! up here with an atomic swap the next time the position wraps.  Everybody in the session
//! changes tempo on the same beat that way.
use log::{debug, info};
use serde::Serialize;
use simple_error::bail;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};

use crate::common::box_error::BoxError;

/// events are collected into a reused vec, at least this much room up front
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntervalState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalEvent {
    /// a beat starts at `offset`
    Beat { offset: usize, beat: u32, accent: bool },
    /// a new interval starts at `offset`.  `offset` may equal the block length, meaning the
    /// first frame of the next block.
    Boundary { offset: usize, interval: u64 },
    /// pending values were promoted at the boundary at `offset`
    TempoChanged { offset: usize, bpi: u32, bpm: u32 },
}

/// Tempo values shared with the control side.
///
/// The pending pair is written by the control side and swapped out (back to 0) by the audio
/// thread at a boundary.  Both values live in one word so a BPI/BPM pair is always promoted
/// together.  `current_*` are published by the audio thread for readers.
pub struct TempoSlots {
    /// bpi in the high half, bpm in the low half, 0 in a half means no change
    pending: AtomicU64,
    beats_per_accent: AtomicU32,
    current_bpi: AtomicU32,
    current_bpm: AtomicU32,
    position: AtomicU64,
}

fn pack(bpi: u32, bpm: u32) -> u64 {
    (bpi as u64) << 32 | bpm as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

impl TempoSlots {
    pub fn new(bpi: u32, bpm: u32, beats_per_accent: u32) -> TempoSlots {
        TempoSlots {
            pending: AtomicU64::new(0),
            beats_per_accent: AtomicU32::new(beats_per_accent),
            current_bpi: AtomicU32::new(bpi),
            current_bpm: AtomicU32::new(bpm),
            position: AtomicU64::new(0),
        }
    }
    /// Park new values for the next boundary.  A 0 leaves whatever is already parked for that
    /// value alone.
    pub fn schedule(&self, bpi: u32, bpm: u32) -> () {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (old_bpi, old_bpm) = unpack(word);
                Some(pack(
                    if bpi > 0 { bpi } else { old_bpi },
                    if bpm > 0 { bpm } else { old_bpm },
                ))
            });
    }
    pub fn schedule_bpi(&self, bpi: u32) -> () {
        self.schedule(bpi, 0);
    }
    pub fn schedule_bpm(&self, bpm: u32) -> () {
        self.schedule(0, bpm);
    }
    pub fn pending_bpi(&self) -> u32 {
        unpack(self.pending.load(Ordering::Acquire)).0
    }
    pub fn pending_bpm(&self) -> u32 {
        unpack(self.pending.load(Ordering::Acquire)).1
    }
    pub fn has_scheduled_changes(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }
    fn take_pending(&self) -> (u32, u32) {
        unpack(self.pending.swap(0, Ordering::AcqRel))
    }
    /// drop anything parked
    pub fn clear_pending(&self) -> () {
        self.pending.store(0, Ordering::Release);
    }
    /// 0 turns accents off
    pub fn set_beats_per_accent(&self, beats: u32) -> () {
        self.beats_per_accent.store(beats, Ordering::Relaxed);
    }
    pub fn beats_per_accent(&self) -> u32 {
        self.beats_per_accent.load(Ordering::Relaxed)
    }
    pub fn current_bpi(&self) -> u32 {
        self.current_bpi.load(Ordering::Acquire)
    }
    pub fn current_bpm(&self) -> u32 {
        self.current_bpm.load(Ordering::Acquire)
    }
    /// sample position inside the interval as of the last block
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
    fn publish(&self, bpi: u32, bpm: u32) -> () {
        self.current_bpi.store(bpi, Ordering::Release);
        self.current_bpm.store(bpm, Ordering::Release);
    }
}

/// frames in one beat, never less than one
pub fn samples_per_beat(sample_rate: u32, bpm: u32) -> u64 {
    (60 * sample_rate as u64 / bpm.max(1) as u64).max(1)
}

pub struct IntervalController {
    state: IntervalState,
    sample_rate: u32,
    bpi: u32,
    bpm: u32,
    samples_per_beat: u64,
    samples_in_interval: u64,
    position: u64,
    interval: u64,
    slots: Arc<TempoSlots>,
    max_block: usize,
    events: Vec<IntervalEvent>,
}

impl IntervalController {
    pub fn new(sample_rate: u32, slots: Arc<TempoSlots>) -> IntervalController {
        let bpi = slots.current_bpi().max(1);
        let bpm = slots.current_bpm().max(1);
        let mut controller = IntervalController {
            state: IntervalState::Idle,
            sample_rate: sample_rate.max(1),
            bpi,
            bpm,
            samples_per_beat: 1,
            samples_in_interval: 1,
            position: 0,
            interval: 0,
            slots,
            max_block: 0,
            events: Vec::with_capacity(EVENT_CAPACITY),
        };
        controller.recompute();
        controller
    }

    fn recompute(&mut self) -> () {
        self.samples_per_beat = samples_per_beat(self.sample_rate, self.bpm);
        self.samples_in_interval = self.samples_per_beat * self.bpi as u64;
        // a block holds at most one beat per samples_per_beat plus one, and no more boundaries
        // (each maybe with a tempo change) than beats
        let most = 3 * (self.max_block as u64 / self.samples_per_beat + 2) as usize;
        if most > self.events.capacity() {
            self.events.reserve(most - self.events.len());
        }
    }

    /// The longest block [`advance`](Self::advance) will be asked for.  Room for its events is
    /// reserved here and whenever the tempo changes, so `advance` itself never allocates.
    pub fn set_max_block(&mut self, frames: usize) -> () {
        self.max_block = frames;
        self.recompute();
    }

    /// Idle/Stopped -> Running at the top of a fresh interval.  Values parked in the slots
    /// stay parked and get promoted at the first boundary.
    pub fn start(&mut self, bpi: u32, bpm: u32) -> Result<(), BoxError> {
        if bpi == 0 || bpm == 0 {
            bail!("can't start interval with bpi {} bpm {}", bpi, bpm);
        }
        self.bpi = bpi;
        self.bpm = bpm;
        self.recompute();
        self.position = 0;
        self.interval = 0;
        self.slots.publish(bpi, bpm);
        self.slots.position.store(0, Ordering::Relaxed);
        self.state = IntervalState::Running;
        info!("interval started: bpi {} bpm {}", bpi, bpm);
        Ok(())
    }

    pub fn stop(&mut self) -> () {
        if self.state == IntervalState::Running {
            self.state = IntervalState::Stopped;
            info!("interval stopped at position {}", self.position);
        }
    }

    /// Move the grid forward by one block of `frames`.  The returned events are only valid
    /// until the next call.
    pub fn advance(&mut self, frames: usize) -> &[IntervalEvent] {
        self.events.clear();
        if self.state != IntervalState::Running {
            return &self.events;
        }
        let mut offset = 0usize;
        while offset < frames {
            if self.position % self.samples_per_beat == 0 {
                let beat = (self.position / self.samples_per_beat) as u32;
                self.events.push(IntervalEvent::Beat {
                    offset,
                    beat,
                    accent: self.is_accent(beat),
                });
            }
            let next_beat = (self.position / self.samples_per_beat + 1) * self.samples_per_beat;
            let step = (next_beat - self.position).min((frames - offset) as u64);
            self.position += step;
            offset += step as usize;
            if self.position >= self.samples_in_interval {
                self.position -= self.samples_in_interval;
                self.interval += 1;
                self.events.push(IntervalEvent::Boundary {
                    offset,
                    interval: self.interval,
                });
                self.process_scheduled_changes(offset);
            }
        }
        self.slots.position.store(self.position, Ordering::Relaxed);
        &self.events
    }

    // only ever called with the position sitting on a boundary
    fn process_scheduled_changes(&mut self, offset: usize) -> () {
        let (new_bpi, new_bpm) = self.slots.take_pending();
        let mut changed = false;
        if new_bpi > 0 && new_bpi != self.bpi {
            self.bpi = new_bpi;
            changed = true;
        }
        if new_bpm > 0 && new_bpm != self.bpm {
            self.bpm = new_bpm;
            changed = true;
        }
        if changed {
            self.recompute();
            self.slots.publish(self.bpi, self.bpm);
            debug!("tempo promoted at boundary: bpi {} bpm {}", self.bpi, self.bpm);
            self.events.push(IntervalEvent::TempoChanged {
                offset,
                bpi: self.bpi,
                bpm: self.bpm,
            });
        }
    }

    fn is_accent(&self, beat: u32) -> bool {
        let per_accent = self.slots.beats_per_accent();
        per_accent > 0 && beat % per_accent == 0
    }

    pub fn state(&self) -> IntervalState {
        self.state
    }
    pub fn is_running(&self) -> bool {
        self.state == IntervalState::Running
    }
    pub fn current_bpi(&self) -> u32 {
        self.bpi
    }
    pub fn current_bpm(&self) -> u32 {
        self.bpm
    }
    pub fn position(&self) -> u64 {
        self.position
    }
    pub fn samples_per_beat(&self) -> u64 {
        self.samples_per_beat
    }
    pub fn samples_in_interval(&self) -> u64 {
        self.samples_in_interval
    }
    pub fn interval_index(&self) -> u64 {
        self.interval
    }
    pub fn current_beat(&self) -> u32 {
        (self.position / self.samples_per_beat) as u32
    }
    /// 0.0 .. 1.0 through the current interval
    pub fn progress(&self) -> f64 {
        self.position as f64 / self.samples_in_interval as f64
    }
}
