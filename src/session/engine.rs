//! The SessionEngine is everything the audio thread owns.
//!
//! The engine drives off [`SoundCallback::process`].  To keep locks out of the process loop
//! the control side never touches the engine directly.  Track and chain changes come in as
//! [`EngineCommand`]s on an mpsc channel that is polled at the top of every period, so a render
//! always sees a complete old or a complete new mixer.  Anything taken out of the mixer goes back
//! over the retire channel so it gets dropped on the control side, not here.
//!
//! Per track parameters (gain, pan, mute, solo) and the pending tempo don't need commands at all,
//! they are atomics shared with the [`SessionHandle`](super::handle::SessionHandle).
use log::{debug, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use super::interval::{IntervalController, IntervalEvent};
use crate::{
    common::box_error::BoxError,
    sound::{
        audio_node::RenderContext,
        events::{EventSink, SessionEvent},
        mixer::{AudioMixer, MixerChannel},
        processor_chain::{BoxedProcessor, ProcessorId},
        track::TrackId,
        SoundCallback,
    },
};

/// Depth of the command and retire channels
pub const COMMAND_QUEUE_DEPTH: usize = 256;

pub enum EngineCommand {
    AddTrack(MixerChannel),
    RemoveTrack(TrackId),
    InsertProcessor {
        track_id: TrackId,
        processor_id: ProcessorId,
        processor: BoxedProcessor,
        idx: usize,
    },
    RemoveProcessor {
        track_id: TrackId,
        processor_id: ProcessorId,
    },
    SetProcessorBypass {
        track_id: TrackId,
        processor_id: ProcessorId,
        bypass: bool,
    },
    StartInterval {
        bpi: u32,
        bpm: u32,
    },
    StopInterval,
    /// drop whatever the track's node has buffered
    FlushTrack(TrackId),
}

/// Things the audio thread is done with.
pub enum Retired {
    /// removed from the mixer, or refused because the id was taken
    Track(MixerChannel),
    /// `processor` is `None` when there was nothing to remove
    Processor {
        track_id: TrackId,
        processor_id: ProcessorId,
        processor: Option<BoxedProcessor>,
    },
}

impl Retired {
    pub fn track_id(&self) -> TrackId {
        match self {
            Retired::Track(channel) => channel.id(),
            Retired::Processor { track_id, .. } => *track_id,
        }
    }
}

pub struct SessionEngine {
    block_size: usize,
    mixer: AudioMixer,
    interval: IntervalController,
    command_rx: mpsc::Receiver<EngineCommand>,
    retire_tx: mpsc::SyncSender<Retired>,
    events: EventSink,
    running: Arc<AtomicBool>,
}

impl SessionEngine {
    pub fn new(
        block_size: usize,
        mixer: AudioMixer,
        mut interval: IntervalController,
        command_rx: mpsc::Receiver<EngineCommand>,
        retire_tx: mpsc::SyncSender<Retired>,
        events: EventSink,
        running: Arc<AtomicBool>,
    ) -> SessionEngine {
        let block_size = block_size.max(1);
        interval.set_max_block(block_size);
        SessionEngine {
            block_size,
            mixer,
            interval,
            command_rx,
            retire_tx,
            events,
            running,
        }
    }

    /// This will let you know if the engine is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }
    pub fn interval(&self) -> &IntervalController {
        &self.interval
    }

    // This is where we check for any commands we need to process
    fn check_commands(&mut self) -> () {
        while let Ok(cmd) = self.command_rx.try_recv() {
            self.process_command(cmd);
        }
    }

    fn retire(&self, item: Retired) -> () {
        if let Err(e) = self.retire_tx.try_send(item) {
            // nobody is collecting, so it gets dropped right here
            let item = match e {
                mpsc::TrySendError::Full(item) | mpsc::TrySendError::Disconnected(item) => item,
            };
            warn!(
                "retire queue full, track {} dropped on the audio thread",
                item.track_id()
            );
        }
    }

    fn process_command(&mut self, cmd: EngineCommand) -> () {
        match cmd {
            EngineCommand::AddTrack(channel) => {
                let id = channel.id();
                let kind = channel.kind();
                match self.mixer.add_track(channel) {
                    Ok(()) => {
                        debug!("track {} added", id);
                        self.events
                            .emit(SessionEvent::TrackAdded { track_id: id, kind });
                    }
                    Err(channel) => {
                        warn!("track {} already in the mixer", id);
                        self.retire(Retired::Track(channel));
                    }
                }
            }
            EngineCommand::RemoveTrack(id) => {
                if let Some(channel) = self.mixer.remove_track(id) {
                    debug!("track {} removed", id);
                    self.events
                        .emit(SessionEvent::TrackRemoved { track_id: id });
                    self.retire(Retired::Track(channel));
                }
            }
            EngineCommand::InsertProcessor {
                track_id,
                processor_id,
                processor,
                idx,
            } => {
                if let Err(processor) =
                    self.mixer
                        .insert_processor(track_id, processor_id, processor, idx)
                {
                    self.retire(Retired::Processor {
                        track_id,
                        processor_id,
                        processor: Some(processor),
                    });
                }
            }
            EngineCommand::RemoveProcessor {
                track_id,
                processor_id,
            } => {
                let processor = self.mixer.remove_processor(track_id, processor_id);
                self.retire(Retired::Processor {
                    track_id,
                    processor_id,
                    processor,
                });
            }
            EngineCommand::SetProcessorBypass {
                track_id,
                processor_id,
                bypass,
            } => {
                self.mixer
                    .set_processor_bypass(track_id, processor_id, bypass);
            }
            EngineCommand::StartInterval { bpi, bpm } => match self.interval.start(bpi, bpm) {
                Ok(()) => {
                    self.events.emit(SessionEvent::TempoChanged { bpi, bpm });
                    self.events.emit(SessionEvent::IntervalStarted { interval: 0 });
                }
                Err(e) => warn!("interval not started: {}", e),
            },
            EngineCommand::StopInterval => self.interval.stop(),
            EngineCommand::FlushTrack(id) => self.mixer.flush_track(id),
        }
    }
}

/// turn grid events into something the view can use
fn publish_interval_events(events: &EventSink, interval: &[IntervalEvent]) -> () {
    for ev in interval {
        match ev {
            IntervalEvent::Beat { beat, accent, .. } => {
                events.emit(SessionEvent::IntervalBeatChanged {
                    beat: *beat,
                    accent: *accent,
                });
            }
            IntervalEvent::Boundary { interval, .. } => {
                events.emit(SessionEvent::IntervalStarted {
                    interval: *interval,
                });
            }
            IntervalEvent::TempoChanged { bpi, bpm, .. } => {
                info!("tempo now bpi {} bpm {}", bpi, bpm);
                events.emit(SessionEvent::TempoChanged {
                    bpi: *bpi,
                    bpm: *bpm,
                });
            }
        }
    }
}

impl SoundCallback for SessionEngine {
    /// Called by the driver with a period of audio.  Periods longer than the block size are
    /// rendered as several blocks.  Never fails, a broken node is just silent.
    fn process(
        &mut self,
        in_a: &[f32],
        in_b: &[f32],
        out_a: &mut [f32],
        out_b: &mut [f32],
    ) -> Result<(), BoxError> {
        let frames = out_a.len().min(out_b.len());
        if !self.is_running() {
            out_a.fill(0.0);
            out_b.fill(0.0);
            return Ok(());
        }
        self.check_commands();

        let mut pos = 0;
        while pos < frames {
            let n = self.block_size.min(frames - pos);
            let input_left = in_a.get(pos..pos + n).unwrap_or(&[]);
            let input_right = in_b.get(pos..pos + n).unwrap_or(&[]);
            let interval = self.interval.advance(n);
            publish_interval_events(&self.events, interval);
            let ctx = RenderContext {
                input_left,
                input_right,
                interval,
                events: &self.events,
            };
            self.mixer
                .render(&ctx, &mut out_a[pos..pos + n], &mut out_b[pos..pos + n]);
            pos += n;
        }
        Ok(())
    }
}
