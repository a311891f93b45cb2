//! Events the session emits for whoever is watching (view, logger, tests).
//!
//! Both the audio thread and the control side emit through an [`EventSink`].  The sink sits on
//! a bounded channel and never blocks: if nobody drains the receiver the newest events are
//! dropped.
use log::trace;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc, Arc,
};

use super::track::{NodeKind, TrackId};
use crate::session::vote::VoteProposal;

/// how many events can sit in the queue before we start dropping
pub const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    IntervalStarted { interval: u64 },
    IntervalBeatChanged { beat: u32, accent: bool },
    TempoChanged { bpi: u32, bpm: u32 },
    TrackAdded { track_id: TrackId, kind: NodeKind },
    TrackRemoved { track_id: TrackId },
    TrackPlaybackStarted { track_id: TrackId },
    TrackPlaybackStopped { track_id: TrackId },
    TrackUnderrun { track_id: TrackId },
    ChunkDownloaded { track_id: TrackId },
    IntervalDownloaded { track_id: TrackId },
    ChannelXmitChanged { track_id: TrackId, transmitting: bool },
    NodeFault { track_id: TrackId },
    VoteProposed(VoteProposal),
}

impl SessionEvent {
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::SyncSender<SessionEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl EventSink {
    pub fn new(tx: mpsc::SyncSender<SessionEvent>) -> EventSink {
        EventSink {
            tx: Some(tx),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }
    /// a sink that throws everything away
    pub fn silent() -> EventSink {
        EventSink {
            tx: None,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }
    pub fn emit(&self, event: SessionEvent) -> () {
        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("event queue full or closed, event dropped");
            }
        }
    }
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// bounded event channel
pub fn event_channel() -> (EventSink, mpsc::Receiver<SessionEvent>) {
    let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
    (EventSink::new(tx), rx)
}
