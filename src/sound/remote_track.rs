//! A remote participant's channel.
//!
//! The network side owns the [`RemoteTrackFeeder`]: it decodes each chunk as it arrives and
//! pushes the samples into a ring that holds two intervals.  The last chunk of an interval also
//! leaves a mark with the stream position where that interval ends.  The audio side owns the
//! [`RemoteTrackNode`], which only starts an interval at a boundary so everybody's audio lands
//! on the same grid.  Running dry is not an error, the rest of the block is silence.  Whatever
//! is left of an interval that was still playing when the next boundary came is thrown away, so
//! a late sender never drags the track off the grid.
//!
//! When the tempo makes intervals longer the feeder builds a bigger ring and hands its reader
//! over a lane queue.  The node drains the old ring first, then moves over and sends the old
//! reader back so it is freed off the audio thread.
use log::{debug, trace, warn};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc, Arc,
};

use super::{
    audio_node::{AudioNode, RenderContext},
    chunk_codec::ChunkDecoder,
    events::SessionEvent,
    sample_ring::{sample_ring, RingReader, RingWriter},
    track::{NodeKind, TrackId},
};
use crate::common::box_error::BoxError;

/// intervals of audio a remote ring holds
pub const RING_INTERVALS: usize = 2;
const MARK_QUEUE_DEPTH: usize = 64;
const LANE_QUEUE_DEPTH: usize = 2;

/// What the control side can see about a remote track.
#[derive(Debug, Default)]
pub struct RemoteTrackStatus {
    playing: AtomicBool,
    chunks_waiting: AtomicU32,
    underruns: AtomicU32,
}

impl RemoteTrackStatus {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
    /// chunks that came in since the track last went quiet
    pub fn chunks_waiting(&self) -> u32 {
        self.chunks_waiting.load(Ordering::Relaxed)
    }
    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }
}

pub struct RemoteTrackNode {
    track_id: TrackId,
    reader: RingReader,
    next: Option<RingReader>,
    lanes: mpsc::Receiver<RingReader>,
    spent: mpsc::SyncSender<RingReader>,
    marks: rtrb::Consumer<u64>,
    // stream positions in frames, counted from the first frame ever written
    read_pos: u64,
    head_start: u64,
    head_end: Option<u64>,
    // the head interval missed its boundary, drop it as it comes in
    stale: bool,
    starved: bool,
    status: Arc<RemoteTrackStatus>,
}

pub struct RemoteTrackFeeder {
    track_id: TrackId,
    writer: RingWriter,
    marks: rtrb::Producer<u64>,
    lanes: mpsc::SyncSender<RingReader>,
    spent: mpsc::Receiver<RingReader>,
    written: u64,
    decoder: Box<dyn ChunkDecoder>,
    status: Arc<RemoteTrackStatus>,
    decoded: Vec<f32>,
}

/// Build both halves of a remote track for intervals of `interval_frames` frames.
pub fn remote_track(
    track_id: TrackId,
    interval_frames: usize,
    decoder: Box<dyn ChunkDecoder>,
) -> (RemoteTrackNode, RemoteTrackFeeder, Arc<RemoteTrackStatus>) {
    let (writer, reader) = sample_ring(interval_frames.saturating_mul(RING_INTERVALS));
    let (mark_tx, mark_rx) = rtrb::RingBuffer::new(MARK_QUEUE_DEPTH);
    let (lane_tx, lane_rx) = mpsc::sync_channel(LANE_QUEUE_DEPTH);
    let (spent_tx, spent_rx) = mpsc::sync_channel(LANE_QUEUE_DEPTH);
    let status = Arc::new(RemoteTrackStatus::default());
    (
        RemoteTrackNode {
            track_id,
            reader,
            next: None,
            lanes: lane_rx,
            spent: spent_tx,
            marks: mark_rx,
            read_pos: 0,
            head_start: 0,
            head_end: None,
            stale: false,
            starved: false,
            status: status.clone(),
        },
        RemoteTrackFeeder {
            track_id,
            writer,
            marks: mark_tx,
            lanes: lane_tx,
            spent: spent_rx,
            written: 0,
            decoder,
            status: status.clone(),
            decoded: Vec::with_capacity(interval_frames.min(8192) * 2),
        },
        status,
    )
}

impl RemoteTrackFeeder {
    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Decode one chunk into the ring.  `is_final` says this chunk ends the sender's interval;
    /// the interval is closed even when the chunk itself won't decode.  Returns how many
    /// frames made it in.
    pub fn push_chunk(&mut self, bytes: &[u8], is_final: bool) -> Result<usize, BoxError> {
        self.decoded.clear();
        let decoded = self.decoder.decode(bytes, &mut self.decoded);
        let frames = match decoded {
            Ok(()) => self.writer.write_interleaved(&self.decoded),
            Err(_) => 0,
        };
        self.written += frames as u64;
        if is_final {
            self.end_interval();
        }
        decoded?;
        if !self.status.is_playing() {
            self.status.chunks_waiting.fetch_add(1, Ordering::Relaxed);
        }
        trace!(
            "track {} chunk: {} frames, {} free",
            self.track_id,
            frames,
            self.writer.free_frames()
        );
        Ok(frames)
    }

    fn end_interval(&mut self) -> () {
        if self.marks.push(self.written).is_err() {
            warn!(
                "track {} interval mark at {} lost, mark queue full",
                self.track_id, self.written
            );
        }
    }

    /// Make sure the ring holds `RING_INTERVALS` intervals of `interval_frames`.  Returns true
    /// when a bigger ring was handed to the audio side.
    pub fn reserve(&mut self, interval_frames: usize) -> bool {
        // rings the audio side is done with
        while self.spent.try_recv().is_ok() {}
        let wanted = interval_frames.saturating_mul(RING_INTERVALS);
        if wanted <= self.writer.capacity() {
            return false;
        }
        let (writer, reader) = sample_ring(wanted);
        match self.lanes.try_send(reader) {
            Ok(()) => {
                debug!(
                    "track {} ring grows from {} to {} frames",
                    self.track_id,
                    self.writer.capacity(),
                    wanted
                );
                self.writer = writer;
                true
            }
            Err(_) => {
                warn!("track {} ring can't grow yet, audio side is behind", self.track_id);
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.writer.capacity()
    }

    pub fn overruns(&self) -> usize {
        self.writer.overruns()
    }
}

impl RemoteTrackNode {
    pub fn status(&self) -> &Arc<RemoteTrackStatus> {
        &self.status
    }

    /// Move to the newer ring once the old one is written out and read out.
    fn follow_lane(&mut self) -> () {
        if self.next.is_none() {
            self.next = self.lanes.try_recv().ok();
        }
        if self.next.is_some() && self.reader.is_abandoned() && self.reader.available_frames() == 0
        {
            if let Some(next) = self.next.take() {
                let old = std::mem::replace(&mut self.reader, next);
                if self.spent.try_send(old).is_err() {
                    trace!("track {} old ring freed on the audio thread", self.track_id);
                }
            }
        }
    }

    fn read(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let mut got = self.reader.read_planar(left, right);
        if got < left.len() {
            self.follow_lane();
            got += self.reader.read_planar(&mut left[got..], &mut right[got..]);
        }
        self.read_pos += got as u64;
        got
    }

    fn skip(&mut self, frames: usize) -> usize {
        let mut done = self.reader.skip(frames);
        if done < frames {
            self.follow_lane();
            done += self.reader.skip(frames - done);
        }
        self.read_pos += done as u64;
        done
    }

    /// Frames of the head interval that are ready to read.
    fn head_available(&mut self) -> usize {
        self.follow_lane();
        let avail = self.reader.available_frames()
            + self.next.as_ref().map_or(0, |r| r.available_frames());
        if self.head_end.is_none() {
            self.head_end = self.marks.pop().ok();
        }
        match self.head_end {
            Some(end) => avail.min(end.saturating_sub(self.read_pos) as usize),
            None => avail,
        }
    }

    /// the head interval has been read to its mark
    fn head_complete(&self) -> bool {
        self.head_end.map_or(false, |end| end <= self.read_pos)
    }

    fn retire_head(&mut self) -> () {
        if let Some(end) = self.head_end.take() {
            self.head_start = end;
        }
    }

    /// Throw away what has come in of a late interval, up to its mark.
    fn drop_stale(&mut self) -> () {
        while self.stale {
            let n = self.head_available();
            if n > 0 {
                self.skip(n);
            }
            if self.head_complete() {
                trace!(
                    "track {} dropped the rest of a late interval at {}",
                    self.track_id,
                    self.read_pos
                );
                self.retire_head();
                self.stale = false;
            } else {
                break;
            }
        }
    }

    fn pull(&mut self, ctx: &RenderContext, left: &mut [f32], right: &mut [f32]) -> () {
        let wanted = left.len();
        let n = self.head_available().min(wanted);
        let got = self.read(&mut left[..n], &mut right[..n]);
        if got < wanted && !self.head_complete() {
            if !self.starved {
                self.starved = true;
                self.status.underruns.fetch_add(1, Ordering::Relaxed);
                ctx.events.emit(SessionEvent::TrackUnderrun {
                    track_id: self.track_id,
                });
            }
        } else {
            self.starved = false;
        }
    }

    /// Close out the head interval at a boundary and say whether another one is ready.
    fn turn_over(&mut self, was_playing: bool) -> bool {
        if was_playing {
            self.head_available();
            if self.head_complete() {
                self.retire_head();
            } else {
                debug!(
                    "track {} interval ran past the boundary at {}",
                    self.track_id, self.read_pos
                );
                self.stale = true;
                self.drop_stale();
            }
        }
        if self.stale {
            return false;
        }
        // intervals that came in empty
        loop {
            let ready = self.head_available();
            if ready > 0 {
                return true;
            }
            if !self.head_complete() {
                return false;
            }
            self.retire_head();
        }
    }

    fn set_playing(&mut self, ctx: &RenderContext, playing: bool) -> () {
        self.status.playing.store(playing, Ordering::Relaxed);
        self.starved = false;
        if playing {
            self.status.chunks_waiting.store(0, Ordering::Relaxed);
            ctx.events.emit(SessionEvent::TrackPlaybackStarted {
                track_id: self.track_id,
            });
        } else {
            ctx.events.emit(SessionEvent::TrackPlaybackStopped {
                track_id: self.track_id,
            });
        }
    }
}

impl AudioNode for RemoteTrackNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Remote
    }

    fn render(
        &mut self,
        ctx: &RenderContext,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), BoxError> {
        let frames = left.len().min(right.len());
        let boundary = ctx.interval_start().map(|b| b.min(frames));
        self.drop_stale();
        let playing = self.status.is_playing();
        if playing {
            let end = boundary.unwrap_or(frames);
            self.pull(ctx, &mut left[..end], &mut right[..end]);
        }
        if let Some(at) = boundary {
            let ready = self.turn_over(playing);
            if ready && !playing {
                debug!("track {} starts playing at offset {}", self.track_id, at);
                self.set_playing(ctx, true);
            } else if !ready && playing {
                // nothing for the new interval, they stopped sending or are late
                self.set_playing(ctx, false);
            }
            if ready {
                self.pull(ctx, &mut left[at..frames], &mut right[at..frames]);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> () {
        self.follow_lane();
        let mut dropped = self.reader.clear();
        if let Some(next) = self.next.as_mut() {
            dropped += next.clear();
        }
        self.read_pos += dropped as u64;
        self.follow_lane();
        // marks the dropped audio already went past
        loop {
            self.head_available();
            if self.head_complete() {
                self.retire_head();
            } else {
                break;
            }
        }
        self.stale = self.read_pos > self.head_start;
        debug!("track {} flushed {} frames", self.track_id, dropped);
    }
}

#[cfg(test)]
mod test_remote_track {
    use super::*;
    use crate::{
        session::interval::IntervalEvent,
        sound::{
            chunk_codec::{encode_pcm_chunk, PcmChunkDecoder},
            events::{event_channel, EventSink},
        },
    };

    fn render(node: &mut RemoteTrackNode, events: &[IntervalEvent], sink: &EventSink) -> Vec<f32> {
        let ctx = RenderContext {
            input_left: &[],
            input_right: &[],
            interval: events,
            events: sink,
        };
        let mut l = vec![0.0; 8];
        let mut r = vec![0.0; 8];
        node.render(&ctx, &mut l, &mut r).unwrap();
        l
    }

    fn boundary(offset: usize) -> IntervalEvent {
        IntervalEvent::Boundary { offset, interval: 1 }
    }

    fn chunk(frames: usize, v: f32) -> Vec<u8> {
        encode_pcm_chunk(&vec![v; frames], &vec![v; frames])
    }

    fn near(out: &[f32], v: f32) -> bool {
        out.iter().all(|s| (*s - v).abs() < 0.001)
    }

    fn track(id: TrackId, frames: usize) -> (RemoteTrackNode, RemoteTrackFeeder, Arc<RemoteTrackStatus>) {
        remote_track(id, frames, Box::new(PcmChunkDecoder::new()))
    }

    #[test]
    fn waits_for_the_boundary() {
        let (sink, rx) = event_channel();
        let (mut node, mut feeder, status) = track(10, 32);
        assert_eq!(feeder.push_chunk(&chunk(12, 0.5), false).unwrap(), 12);
        assert_eq!(status.chunks_waiting(), 1);

        // data is there but the interval hasn't turned over
        let out = render(&mut node, &[], &sink);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(!status.is_playing());

        let out = render(&mut node, &[boundary(4)], &sink);
        assert!(out[..4].iter().all(|s| *s == 0.0));
        assert!(near(&out[4..], 0.5));
        assert!(status.is_playing());
        assert_eq!(status.chunks_waiting(), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::TrackPlaybackStarted { track_id: 10 }
        );
    }

    #[test]
    fn underrun_is_silence_and_counted_once() {
        let (sink, rx) = event_channel();
        let (mut node, mut feeder, status) = track(11, 32);
        feeder.push_chunk(&chunk(10, 0.25), false).unwrap();
        render(&mut node, &[boundary(0)], &sink);
        let out = render(&mut node, &[], &sink);
        assert!(near(&out[..2], 0.25));
        assert!(out[2..].iter().all(|s| *s == 0.0));
        render(&mut node, &[], &sink);
        assert_eq!(status.underruns(), 1);
        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::TrackPlaybackStarted { track_id: 11 },
                SessionEvent::TrackUnderrun { track_id: 11 }
            ]
        );
        // an empty boundary means they went quiet
        render(&mut node, &[boundary(3)], &sink);
        assert!(!status.is_playing());
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::TrackPlaybackStopped { track_id: 11 }
        );
    }

    #[test]
    fn keeps_playing_across_boundaries() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(12, 32);
        feeder.push_chunk(&chunk(13, 0.1), true).unwrap();
        feeder.push_chunk(&chunk(16, 0.2), true).unwrap();
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.1));
        let out = render(&mut node, &[boundary(5)], &sink);
        assert!(near(&out[..5], 0.1));
        assert!(near(&out[5..], 0.2));
        assert!(status.is_playing());
        assert_eq!(status.underruns(), 0);
    }

    #[test]
    fn short_interval_is_padded_not_an_underrun() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(16, 32);
        feeder.push_chunk(&chunk(4, 0.6), true).unwrap();
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out[..4], 0.6));
        assert!(out[4..].iter().all(|s| *s == 0.0));
        assert_eq!(status.underruns(), 0);
    }

    #[test]
    fn late_interval_realigns_on_the_next_boundary() {
        let (sink, rx) = event_channel();
        let (mut node, mut feeder, status) = track(17, 16);
        // three quarters of the first interval shows up in time
        feeder.push_chunk(&chunk(12, 0.5), false).unwrap();
        render(&mut node, &[boundary(0)], &sink);
        let out = render(&mut node, &[], &sink);
        assert!(near(&out[..4], 0.5));
        assert!(out[4..].iter().all(|s| *s == 0.0));
        assert_eq!(status.underruns(), 1);

        // the rest comes in late together with the whole next interval
        feeder.push_chunk(&chunk(4, 0.5), true).unwrap();
        feeder.push_chunk(&chunk(16, 0.9), true).unwrap();
        let out = render(&mut node, &[boundary(2)], &sink);
        assert!(near(&out[..2], 0.5));
        // the second interval starts right on the boundary, the leftover is gone
        assert!(near(&out[2..], 0.9));
        let out = render(&mut node, &[], &sink);
        assert!(near(&out, 0.9));
        assert_eq!(status.underruns(), 1);
        assert!(status.is_playing());
        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert!(!events.contains(&SessionEvent::TrackPlaybackStopped { track_id: 17 }));
    }

    #[test]
    fn unfinished_interval_at_the_boundary_is_skipped() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(18, 16);
        feeder.push_chunk(&chunk(4, 0.5), false).unwrap();
        render(&mut node, &[boundary(0)], &sink);
        render(&mut node, &[], &sink);
        // boundary with the first interval still open, nothing lined up after it
        render(&mut node, &[boundary(0)], &sink);
        assert!(!status.is_playing());

        // its tail and the next interval arrive, the tail never plays
        feeder.push_chunk(&chunk(12, 0.5), true).unwrap();
        feeder.push_chunk(&chunk(16, 0.8), true).unwrap();
        let out = render(&mut node, &[], &sink);
        assert!(out.iter().all(|s| *s == 0.0));
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.8));
        assert!(status.is_playing());
    }

    #[test]
    fn ring_grows_for_longer_intervals() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(15, 8);
        assert_eq!(feeder.capacity(), 16);
        feeder.push_chunk(&chunk(8, 0.4), true).unwrap();
        assert!(feeder.reserve(32));
        assert_eq!(feeder.capacity(), 64);
        assert!(!feeder.reserve(32));
        // four times the old interval, more than the first ring ever held
        assert_eq!(feeder.push_chunk(&chunk(32, 0.7), true).unwrap(), 32);

        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.4));
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.7));
        for _ in 0..3 {
            let out = render(&mut node, &[], &sink);
            assert!(near(&out, 0.7));
        }
        assert_eq!(feeder.overruns(), 0);
        assert_eq!(status.underruns(), 0);
        // the old ring came back to be freed here
        assert!(!feeder.reserve(8));
    }

    #[test]
    fn bad_chunk_is_refused() {
        let (_node, mut feeder, _status) = track(13, 32);
        assert!(feeder.push_chunk(&[1, 2, 3], false).is_err());
    }

    #[test]
    fn bad_final_chunk_still_ends_the_interval() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(19, 16);
        feeder.push_chunk(&chunk(8, 0.3), false).unwrap();
        assert!(feeder.push_chunk(&[1, 2, 3], true).is_err());
        feeder.push_chunk(&chunk(8, 0.6), true).unwrap();
        render(&mut node, &[boundary(0)], &sink);
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.6));
        assert_eq!(status.underruns(), 0);
    }

    #[test]
    fn flush_drops_buffered_audio() {
        let sink = EventSink::silent();
        let (mut node, mut feeder, status) = track(14, 32);
        feeder.push_chunk(&chunk(16, 0.3), true).unwrap();
        node.flush();
        render(&mut node, &[boundary(0)], &sink);
        assert!(!status.is_playing());
        // the next interval still starts on the grid
        feeder.push_chunk(&chunk(16, 0.2), true).unwrap();
        let out = render(&mut node, &[boundary(0)], &sink);
        assert!(near(&out, 0.2));
    }
}
