//!
//! mixer used to combine all the tracks into a stereo pair
//!
//! Each track is a node plus its processor chain, fader and the shared atomic parameters the
//! control side writes.  Tracks render in the order they were added.
use log::{info, warn};
use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use super::{
    audio_node::{BoxedNode, RenderContext},
    events::SessionEvent,
    processor_chain::{BoxedProcessor, ProcessorChain, ProcessorId},
    track::{NodeKind, TrackId, TrackParams},
};
use crate::dsp::{fader::Fader, peak_meter::Peaks};

/// room for this many tracks is reserved up front
pub const MIXER_CHANNELS: usize = 64;

pub struct MixerChannel {
    id: TrackId,
    node: BoxedNode,
    params: Arc<TrackParams>,
    chain: ProcessorChain,
    fader: Fader,
    left: Vec<f32>,
    right: Vec<f32>,
    faulted: bool,
}

impl MixerChannel {
    /// Allocates the scratch buffers, so build these off the audio thread.
    pub fn new(
        id: TrackId,
        node: BoxedNode,
        params: Arc<TrackParams>,
        max_frames: usize,
    ) -> MixerChannel {
        MixerChannel {
            id,
            node,
            params,
            chain: ProcessorChain::new(),
            fader: Fader::new(),
            left: vec![0.0; max_frames],
            right: vec![0.0; max_frames],
            faulted: false,
        }
    }
    pub fn id(&self) -> TrackId {
        self.id
    }
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }
    pub fn params(&self) -> &Arc<TrackParams> {
        &self.params
    }
    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }
    /// hand back the chain's processors so they can be dropped elsewhere
    pub fn take_processors(&mut self) -> Vec<BoxedProcessor> {
        self.chain.drain()
    }

    // node, chain, fader and meter.  Leaves the result in the scratch buffers.
    fn render(&mut self, ctx: &RenderContext, frames: usize) -> () {
        let frames = frames.min(self.left.len());
        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];
        left.fill(0.0);
        right.fill(0.0);

        let node = &mut self.node;
        let chain = &mut self.chain;
        let result = catch_unwind(AssertUnwindSafe(|| {
            node.render(ctx, left, right)?;
            chain.process(left, right)
        }));
        let failed = match result {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                if !self.faulted {
                    warn!("track {} render failed: {}", self.id, e);
                }
                true
            }
            Err(_) => {
                if !self.faulted {
                    warn!("track {} render panicked", self.id);
                }
                true
            }
        };
        if failed {
            if !self.faulted {
                ctx.events.emit(SessionEvent::NodeFault { track_id: self.id });
            }
            left.fill(0.0);
            right.fill(0.0);
        } else if self.faulted {
            info!("track {} is rendering again", self.id);
        }
        self.faulted = failed;

        self.fader.follow(self.params.pan());
        self.fader.apply(self.params.gain(), left, right);
        self.params.meter().measure(left, right);
    }
}

impl fmt::Display for MixerChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let p = self.params.snapshot();
        write!(
            f,
            "[{} {:?} gain: {:.2}, pan: {}, mute: {}, solo: {}, chain: {}]",
            self.id,
            self.kind(),
            p.gain,
            self.fader,
            p.mute,
            p.solo,
            self.chain.len()
        )
    }
}

pub struct AudioMixer {
    channels: Vec<MixerChannel>,
    index: HashMap<TrackId, usize>,
    master: Arc<TrackParams>,
}

impl AudioMixer {
    pub fn new(master: Arc<TrackParams>) -> AudioMixer {
        AudioMixer {
            channels: Vec::with_capacity(MIXER_CHANNELS),
            index: HashMap::with_capacity(MIXER_CHANNELS),
            master,
        }
    }
    pub fn len(&self) -> usize {
        self.channels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
    pub fn contains(&self, id: TrackId) -> bool {
        self.index.contains_key(&id)
    }
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.channels.iter().map(|c| c.id).collect()
    }
    pub fn master(&self) -> &Arc<TrackParams> {
        &self.master
    }
    pub fn master_peaks(&self) -> Peaks {
        self.master.peaks()
    }

    /// Add a track on the end of the render order.  A duplicate id gets the channel handed back.
    pub fn add_track(&mut self, channel: MixerChannel) -> Result<(), MixerChannel> {
        if self.index.contains_key(&channel.id) {
            return Err(channel);
        }
        self.index.insert(channel.id, self.channels.len());
        self.channels.push(channel);
        Ok(())
    }

    pub fn remove_track(&mut self, id: TrackId) -> Option<MixerChannel> {
        let idx = self.index.remove(&id)?;
        let channel = self.channels.remove(idx);
        for (i, c) in self.channels.iter().enumerate().skip(idx) {
            self.index.insert(c.id, i);
        }
        Some(channel)
    }

    fn channel(&self, id: TrackId) -> Option<&MixerChannel> {
        self.index.get(&id).map(|idx| &self.channels[*idx])
    }

    fn channel_mut(&mut self, id: TrackId) -> Option<&mut MixerChannel> {
        match self.index.get(&id) {
            Some(idx) => Some(&mut self.channels[*idx]),
            None => None,
        }
    }

    pub fn set_gain(&self, id: TrackId, gain: f32) -> () {
        if let Some(c) = self.channel(id) {
            c.params.set_gain(gain);
        }
    }
    pub fn set_level(&self, id: TrackId, level: f32) -> () {
        if let Some(c) = self.channel(id) {
            c.params.set_level(level);
        }
    }
    pub fn set_pan(&self, id: TrackId, pan: f32) -> () {
        if let Some(c) = self.channel(id) {
            c.params.set_pan(pan);
        }
    }
    pub fn set_mute(&self, id: TrackId, mute: bool) -> () {
        if let Some(c) = self.channel(id) {
            c.params.set_mute(mute);
        }
    }
    pub fn set_solo(&self, id: TrackId, solo: bool) -> () {
        if let Some(c) = self.channel(id) {
            c.params.set_solo(solo);
        }
    }
    pub fn peaks(&self, id: TrackId) -> Option<Peaks> {
        self.channel(id).map(|c| c.params.peaks())
    }

    /// An unknown track gets the processor handed back.
    pub fn insert_processor(
        &mut self,
        id: TrackId,
        processor_id: ProcessorId,
        processor: BoxedProcessor,
        idx: usize,
    ) -> Result<(), BoxedProcessor> {
        match self.channel_mut(id) {
            Some(c) => {
                c.chain.insert(processor_id, processor, idx);
                info!("track {} chain: {}", id, c.chain.as_json());
                Ok(())
            }
            None => Err(processor),
        }
    }

    pub fn remove_processor(
        &mut self,
        id: TrackId,
        processor_id: ProcessorId,
    ) -> Option<BoxedProcessor> {
        let c = self.channel_mut(id)?;
        let removed = c.chain.remove(processor_id);
        if removed.is_some() {
            info!("track {} chain: {}", id, c.chain.as_json());
        }
        removed
    }

    pub fn set_processor_bypass(&mut self, id: TrackId, processor_id: ProcessorId, bypass: bool) {
        if let Some(c) = self.channel_mut(id) {
            c.chain.set_bypass(processor_id, bypass);
        }
    }

    /// let a node drop whatever it has buffered
    pub fn flush_track(&mut self, id: TrackId) -> () {
        if let Some(c) = self.channel_mut(id) {
            c.node.flush();
        }
    }

    /// Render one block of every track and sum the audible ones into the outputs.
    pub fn render(&mut self, ctx: &RenderContext, out_l: &mut [f32], out_r: &mut [f32]) -> () {
        let frames = out_l.len().min(out_r.len());
        out_l.fill(0.0);
        out_r.fill(0.0);

        let any_solo = self.channels.iter().any(|c| c.params.is_soloed());
        for chan in &mut self.channels {
            chan.render(ctx, frames);
            let audible = if any_solo {
                chan.params.is_soloed()
            } else {
                !chan.params.is_muted()
            };
            if !audible {
                continue;
            }
            let n = frames.min(chan.left.len());
            for i in 0..n {
                out_l[i] += chan.left[i];
                out_r[i] += chan.right[i];
            }
        }
        let master_vol = self.master.gain();
        for s in out_l[..frames].iter_mut() {
            *s *= master_vol;
        }
        for s in out_r[..frames].iter_mut() {
            *s *= master_vol;
        }
        self.master.meter().measure(&out_l[..frames], &out_r[..frames]);
    }
}

impl fmt::Display for AudioMixer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "master: {:.2}\n", self.master.gain())?;
        for c in &self.channels {
            write!(f, " {}\n", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_mixer {
    use super::*;
    use crate::{
        common::box_error::BoxError,
        sound::{
            audio_node::AudioNode,
            events::{event_channel, EventSink},
            processor_chain::test_processor_chain::scale,
        },
    };
    use simple_error::bail;

    // constant output, so sums are easy to check
    struct Dc(f32);

    impl AudioNode for Dc {
        fn kind(&self) -> NodeKind {
            NodeKind::Remote
        }
        fn render(
            &mut self,
            _ctx: &RenderContext,
            left: &mut [f32],
            right: &mut [f32],
        ) -> Result<(), BoxError> {
            left.fill(self.0);
            right.fill(self.0);
            Ok(())
        }
    }

    struct Failing;

    impl AudioNode for Failing {
        fn kind(&self) -> NodeKind {
            NodeKind::Remote
        }
        fn render(
            &mut self,
            _ctx: &RenderContext,
            left: &mut [f32],
            _right: &mut [f32],
        ) -> Result<(), BoxError> {
            left.fill(0.9);
            bail!("decoder lost its mind")
        }
    }

    struct Panicky;

    impl AudioNode for Panicky {
        fn kind(&self) -> NodeKind {
            NodeKind::Remote
        }
        fn render(
            &mut self,
            _ctx: &RenderContext,
            _left: &mut [f32],
            _right: &mut [f32],
        ) -> Result<(), BoxError> {
            panic!("boom");
        }
    }

    fn channel(id: TrackId, node: BoxedNode) -> MixerChannel {
        MixerChannel::new(id, node, Arc::new(TrackParams::new()), 64)
    }

    fn mix(mixer: &mut AudioMixer, sink: &EventSink) -> (Vec<f32>, Vec<f32>) {
        let ctx = RenderContext {
            input_left: &[],
            input_right: &[],
            interval: &[],
            events: sink,
        };
        let mut l = vec![7.0; 16];
        let mut r = vec![7.0; 16];
        mixer.render(&ctx, &mut l, &mut r);
        (l, r)
    }

    fn mixer_abc() -> AudioMixer {
        let mut mixer = AudioMixer::new(Arc::new(TrackParams::new()));
        assert!(mixer.add_track(channel(10, Box::new(Dc(0.1)))).is_ok());
        assert!(mixer.add_track(channel(11, Box::new(Dc(0.2)))).is_ok());
        assert!(mixer.add_track(channel(12, Box::new(Dc(0.4)))).is_ok());
        mixer
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn sums_everything_by_default() {
        let mut mixer = mixer_abc();
        let (l, r) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.7));
        assert!(close(r[15], 0.7));
        assert!(close(mixer.master_peaks().left, 0.7));
        assert!(close(mixer.peaks(11).unwrap().right, 0.2));
    }

    #[test]
    fn solo_law() {
        let mut mixer = mixer_abc();
        // A soloed, B muted, C neither
        mixer.set_solo(10, true);
        mixer.set_mute(11, true);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[3], 0.1));

        // soloed wins over muted
        mixer.set_mute(10, true);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[3], 0.1));

        // nobody soloed, only the muted one drops out
        mixer.set_solo(10, false);
        mixer.set_mute(10, false);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[3], 0.5));
    }

    #[test]
    fn muted_tracks_still_meter() {
        let mut mixer = mixer_abc();
        mixer.set_mute(12, true);
        mix(&mut mixer, &EventSink::silent());
        assert!(close(mixer.peaks(12).unwrap().left, 0.4));
    }

    #[test]
    fn gain_and_pan() {
        let mut mixer = AudioMixer::new(Arc::new(TrackParams::new()));
        mixer.add_track(channel(10, Box::new(Dc(0.25)))).ok();
        mixer.set_gain(10, 2.0);
        mixer.set_pan(10, 1.0);
        let (l, r) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.0));
        assert!(close(r[0], 0.5 * f32::sqrt(2.0)));
        mixer.master().set_gain(0.5);
        let (_, r) = mix(&mut mixer, &EventSink::silent());
        assert!(close(r[0], 0.25 * f32::sqrt(2.0)));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut mixer = mixer_abc();
        mixer.set_gain(99, 0.0);
        mixer.set_mute(99, true);
        mixer.set_solo(99, true);
        mixer.set_pan(99, -1.0);
        mixer.set_level(99, 0.0);
        assert!(mixer.peaks(99).is_none());
        assert!(mixer.remove_track(99).is_none());
        assert!(mixer.remove_processor(99, 1).is_none());
        assert!(mixer.insert_processor(99, 1, scale(0.5), 0).is_err());
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.7));
    }

    #[test]
    fn duplicate_id_refused() {
        let mut mixer = mixer_abc();
        let dup = mixer.add_track(channel(11, Box::new(Dc(1.0))));
        assert!(dup.is_err());
        assert_eq!(mixer.len(), 3);
    }

    #[test]
    fn failing_nodes_go_silent() {
        let (sink, rx) = event_channel();
        let mut mixer = mixer_abc();
        mixer.add_track(channel(20, Box::new(Failing))).ok();
        mixer.add_track(channel(21, Box::new(Panicky))).ok();
        let (l, r) = mix(&mut mixer, &sink);
        assert!(close(l[0], 0.7));
        assert!(close(r[0], 0.7));
        let (l, _) = mix(&mut mixer, &sink);
        assert!(close(l[0], 0.7));
        // one fault event per track, at onset only
        let faults: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(
            faults,
            vec![
                SessionEvent::NodeFault { track_id: 20 },
                SessionEvent::NodeFault { track_id: 21 }
            ]
        );
        assert!(mixer.channels[3].is_faulted());
        assert_eq!(mixer.peaks(20).unwrap().max(), 0.0);
    }

    #[test]
    fn chain_runs_before_fader() {
        let mut mixer = mixer_abc();
        assert!(mixer.insert_processor(12, 1, scale(0.5), 0).is_ok());
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.5));
        mixer.set_processor_bypass(12, 1, true);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.7));
        assert!(mixer.remove_processor(12, 1).is_some());
        assert!(mixer.remove_processor(12, 1).is_none());
    }

    #[test]
    fn removal_stops_contribution() {
        let mut mixer = mixer_abc();
        let removed = mixer.remove_track(11).unwrap();
        assert_eq!(removed.id(), 11);
        assert_eq!(mixer.track_ids(), vec![10, 12]);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.5));
        // the index still finds the track that moved down
        mixer.set_mute(12, true);
        let (l, _) = mix(&mut mixer, &EventSink::silent());
        assert!(close(l[0], 0.1));
    }

    #[test]
    fn show_mixer() {
        let mixer = mixer_abc();
        let text = format!("{}", mixer);
        assert!(text.starts_with("master: 1.00"));
        assert!(text.contains("[11 Remote"));
    }
}
