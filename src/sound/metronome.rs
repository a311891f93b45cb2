//!
//! click track driven by the interval grid
//!
//! Every beat event from the interval controller restarts a short click.  Accented beats get
//! the higher, louder click.
use std::f32::consts::PI;

use super::{
    audio_node::{AudioNode, RenderContext},
    track::NodeKind,
};
use crate::{common::box_error::BoxError, session::interval::IntervalEvent};

pub struct MetronomeNode {
    tic: Vec<f32>,
    toc: Vec<f32>,
    idx: usize,
    accent: bool,
    playing: bool,
}

/// decaying sine burst
fn make_click(freq: f32, amplitude: f32, len: usize, sample_rate: f32) -> Vec<f32> {
    let decay = 5.0 / len as f32;
    (0..len)
        .map(|i| {
            let t = i as f32;
            amplitude * (-decay * t).exp() * (2.0 * PI * freq * t / sample_rate).sin()
        })
        .collect()
}

impl MetronomeNode {
    pub fn new(sample_rate: u32) -> MetronomeNode {
        // 100 msec clicks
        let len = (sample_rate as usize / 10).max(1);
        let rate = sample_rate.max(1) as f32;
        MetronomeNode {
            tic: make_click(880.0, 1.0, len, rate),
            toc: make_click(440.0, 0.6, len, rate),
            idx: 0,
            accent: false,
            playing: false,
        }
    }

    pub fn click_len(&self) -> usize {
        self.tic.len()
    }

    fn play(&mut self, from: usize, to: usize, left: &mut [f32], right: &mut [f32]) -> () {
        let table = if self.accent { &self.tic } else { &self.toc };
        let mut i = from;
        while self.playing && i < to {
            if self.idx >= table.len() {
                self.playing = false;
                break;
            }
            left[i] = table[self.idx];
            right[i] = table[self.idx];
            self.idx += 1;
            i += 1;
        }
    }
}

impl AudioNode for MetronomeNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Metronome
    }
    fn render(
        &mut self,
        ctx: &RenderContext,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), BoxError> {
        let frames = left.len().min(right.len());
        let mut pos = 0;
        for ev in ctx.interval {
            if let IntervalEvent::Beat { offset, accent, .. } = ev {
                let at = (*offset).min(frames);
                self.play(pos, at, left, right);
                self.idx = 0;
                self.accent = *accent;
                self.playing = true;
                pos = at;
            }
        }
        self.play(pos, frames, left, right);
        Ok(())
    }
}

#[cfg(test)]
mod test_metronome {
    use super::*;
    use crate::sound::events::EventSink;

    fn render(node: &mut MetronomeNode, events: &[IntervalEvent], frames: usize) -> Vec<f32> {
        let sink = EventSink::silent();
        let ctx = RenderContext {
            input_left: &[],
            input_right: &[],
            interval: events,
            events: &sink,
        };
        let mut l = vec![0.0; frames];
        let mut r = vec![0.0; frames];
        node.render(&ctx, &mut l, &mut r).unwrap();
        assert_eq!(l, r);
        l
    }

    #[test]
    fn silent_without_beats() {
        let mut node = MetronomeNode::new(48000);
        assert!(render(&mut node, &[], 128).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn click_starts_at_beat_offset() {
        let mut node = MetronomeNode::new(48000);
        let beat = IntervalEvent::Beat {
            offset: 64,
            beat: 1,
            accent: false,
        };
        let out = render(&mut node, &[beat], 128);
        assert!(out[..64].iter().all(|s| *s == 0.0));
        assert!(out[64..].iter().any(|s| *s != 0.0));
        // keeps ringing into the next block, then stops
        let out = render(&mut node, &[], 128);
        assert!(out.iter().any(|s| *s != 0.0));
        for _ in 0..(node.click_len() / 128 + 1) {
            render(&mut node, &[], 128);
        }
        assert!(render(&mut node, &[], 128).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn accent_is_louder() {
        let peak = |accent: bool| {
            let mut node = MetronomeNode::new(48000);
            let beat = IntervalEvent::Beat {
                offset: 0,
                beat: 0,
                accent,
            };
            let out = render(&mut node, &[beat], 512);
            out.iter().fold(0.0f32, |m, s| m.max(s.abs()))
        };
        assert!(peak(true) > peak(false));
    }
}
