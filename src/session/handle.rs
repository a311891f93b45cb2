//! The control and network side of a session.
//!
//! A [`SessionHandle`] is what the network layer and the UI talk to.  It owns the track
//! registry, the feeders that put decoded audio into remote tracks, the vote interpreter and
//! the transport back to the server.  Nothing here ever blocks the audio thread: parameters
//! are atomics, structural changes are [`EngineCommand`]s and whatever the engine is done
//! with comes back through [`SessionHandle::collect_retired`].
use log::{debug, info, trace, warn};
use simple_error::bail;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};

use super::{
    engine::{EngineCommand, Retired, SessionEngine, COMMAND_QUEUE_DEPTH},
    interval::{samples_per_beat, IntervalController, TempoSlots},
    transport::SessionTransport,
    vote::{VoteField, VoteInterpreter, VoteProposal},
};
use crate::{
    common::{box_error::BoxError, config::SessionConfig, get_milli_time},
    dsp::peak_meter::Peaks,
    sound::{
        audio_node::BoxedNode,
        chunk_codec::PcmChunkDecoder,
        events::{event_channel, EventSink, SessionEvent},
        local_input::LocalInputNode,
        metronome::MetronomeNode,
        mixer::{AudioMixer, MixerChannel},
        processor_chain::{BoxedProcessor, Processor, ProcessorId},
        remote_track::{remote_track, RemoteTrackFeeder, RemoteTrackStatus},
        room_stream::room_stream,
        sample_ring::RingWriter,
        track::{
            NodeKind, ParamSnapshot, TrackId, TrackParams, FIRST_REMOTE_TRACK_ID,
            LOCAL_INPUT_TRACK_ID, METRONOME_TRACK_ID, ROOM_STREAM_TRACK_ID,
        },
    },
};

/// What the server told us about a remote channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    pub name: String,
    /// the channel's index within its user
    pub index: u32,
}

impl ChannelDescriptor {
    pub fn new(name: &str, index: u32) -> ChannelDescriptor {
        ChannelDescriptor {
            name: String::from(name),
            index,
        }
    }
}

struct TrackEntry {
    kind: NodeKind,
    identity: String,
    params: Arc<TrackParams>,
    feeder: Option<RemoteTrackFeeder>,
    status: Option<Arc<RemoteTrackStatus>>,
    processors: Vec<ProcessorId>,
    transmitting: bool,
}

impl TrackEntry {
    fn new(kind: NodeKind, identity: &str, params: Arc<TrackParams>) -> TrackEntry {
        TrackEntry {
            kind,
            identity: String::from(identity),
            params,
            feeder: None,
            status: None,
            processors: vec![],
            transmitting: false,
        }
    }
}

pub struct SessionHandle {
    config: SessionConfig,
    tracks: HashMap<TrackId, TrackEntry>,
    next_remote_id: TrackId,
    free_ids: BTreeSet<TrackId>,
    // removed tracks the engine may still hold, by the params they share with it
    retiring: HashMap<TrackId, Arc<TrackParams>>,
    next_processor_id: ProcessorId,
    master: Arc<TrackParams>,
    slots: Arc<TempoSlots>,
    command_tx: mpsc::Sender<EngineCommand>,
    retire_rx: mpsc::Receiver<Retired>,
    events: EventSink,
    votes: VoteInterpreter,
    transport: Box<dyn SessionTransport>,
    room_stream: RingWriter,
    running: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Build both halves of a session.  The engine goes to whatever drives the audio, the
    /// receiver to whatever shows the events.
    pub fn build(
        config: SessionConfig,
        transport: Box<dyn SessionTransport>,
    ) -> Result<(SessionHandle, SessionEngine, mpsc::Receiver<SessionEvent>), BoxError> {
        config.validate()?;
        let block = config.block_size as usize;
        let (events, event_rx) = event_channel();
        let (command_tx, command_rx) = mpsc::channel();
        let (retire_tx, retire_rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
        let slots = Arc::new(TempoSlots::new(
            config.bpi,
            config.bpm,
            config.beats_per_accent,
        ));
        let master = Arc::new(TrackParams::new());
        let running = Arc::new(AtomicBool::new(true));

        // the reserved tracks go straight into the mixer
        let mut mixer = AudioMixer::new(master.clone());
        let mut tracks = HashMap::new();

        let local = Arc::new(TrackParams::new());
        // no_loopback = true will disable the local monitoring
        local.set_mute(config.no_loopback);
        let metronome = Arc::new(TrackParams::new());
        metronome.set_gain(config.metronome_gain);
        metronome.set_pan(config.metronome_pan);
        metronome.set_mute(config.metronome_mute);
        let room = Arc::new(TrackParams::new());
        let (room_node, room_writer) = room_stream(config.frames_per_interval());

        let reserved: [(TrackId, BoxedNode, &Arc<TrackParams>); 3] = [
            (LOCAL_INPUT_TRACK_ID, Box::new(LocalInputNode::new()) as BoxedNode, &local),
            (
                METRONOME_TRACK_ID,
                Box::new(MetronomeNode::new(config.sample_rate)) as BoxedNode,
                &metronome,
            ),
            (ROOM_STREAM_TRACK_ID, Box::new(room_node) as BoxedNode, &room),
        ];
        for (id, node, params) in reserved {
            let kind = node.kind();
            if mixer
                .add_track(MixerChannel::new(id, node, params.clone(), block))
                .is_err()
            {
                bail!("reserved track {} added twice", id);
            }
            tracks.insert(id, TrackEntry::new(kind, &config.local_identity, params.clone()));
        }

        let engine = SessionEngine::new(
            block,
            mixer,
            IntervalController::new(config.sample_rate, slots.clone()),
            command_rx,
            retire_tx,
            events.clone(),
            running.clone(),
        );
        let handle = SessionHandle {
            votes: VoteInterpreter::new(&config.local_identity),
            config,
            tracks,
            next_remote_id: FIRST_REMOTE_TRACK_ID,
            free_ids: BTreeSet::new(),
            retiring: HashMap::new(),
            next_processor_id: 1,
            master,
            slots,
            command_tx,
            retire_rx,
            events,
            transport,
            room_stream: room_writer,
            running,
        };
        info!("session built: {:?}", handle.config);
        Ok((handle, engine, event_rx))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
    pub fn local_identity(&self) -> &str {
        self.votes.local_identity()
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
    /// the flag a driver watches to know when to let go of the engine
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
    /// events the audio thread had to throw away because nobody was reading
    pub fn dropped_events(&self) -> usize {
        self.events.dropped()
    }

    fn send(&self, cmd: EngineCommand) -> Result<(), BoxError> {
        if self.command_tx.send(cmd).is_err() {
            bail!("session engine is gone");
        }
        Ok(())
    }

    fn allocate_track_id(&mut self) -> TrackId {
        match self.free_ids.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next_remote_id;
                self.next_remote_id += 1;
                id
            }
        }
    }

    fn frames_per_interval(&self, bpi: u32, bpm: u32) -> usize {
        (samples_per_beat(self.config.sample_rate, bpm) * bpi.max(1) as u64) as usize
    }

    /// Frames in one interval at the tempo running now or the one waiting for the next
    /// boundary, whichever is longer.
    fn longest_interval_frames(&self) -> usize {
        let bpi = self.slots.current_bpi();
        let bpm = self.slots.current_bpm();
        let next_bpi = match self.slots.pending_bpi() {
            0 => bpi,
            v => v,
        };
        let next_bpm = match self.slots.pending_bpm() {
            0 => bpm,
            v => v,
        };
        self.frames_per_interval(bpi, bpm)
            .max(self.frames_per_interval(next_bpi, next_bpm))
    }

    // ------------------------------------------------------------------------------------
    // from the network

    /// A remote channel showed up.  Returns the track it plays on.
    pub fn on_channel_added(
        &mut self,
        identity: &str,
        descriptor: &ChannelDescriptor,
    ) -> Result<TrackId, BoxError> {
        let id = self.allocate_track_id();
        let (node, feeder, status) = remote_track(
            id,
            self.longest_interval_frames(),
            Box::new(PcmChunkDecoder::new()),
        );
        let params = Arc::new(TrackParams::new());
        let channel = MixerChannel::new(
            id,
            Box::new(node),
            params.clone(),
            self.config.block_size as usize,
        );
        if let Err(e) = self.send(EngineCommand::AddTrack(channel)) {
            self.free_ids.insert(id);
            return Err(e);
        }
        let mut entry = TrackEntry::new(NodeKind::Remote, identity, params);
        entry.feeder = Some(feeder);
        entry.status = Some(status);
        self.tracks.insert(id, entry);
        info!(
            "channel {} ({}) of {} on track {}",
            descriptor.index, descriptor.name, identity, id
        );
        Ok(id)
    }

    /// The id only becomes free again once the engine has let go of the track, see
    /// [`SessionHandle::collect_retired`].
    pub fn on_channel_removed(&mut self, id: TrackId) -> () {
        match self.tracks.get(&id) {
            Some(entry) if entry.kind == NodeKind::Remote => (),
            _ => {
                debug!("remove of unknown track {}", id);
                return;
            }
        }
        let params = match self.tracks.remove(&id) {
            Some(entry) => {
                info!("track {} of {} removed", id, entry.identity);
                entry.params
            }
            None => return,
        };
        if self.send(EngineCommand::RemoveTrack(id)).is_ok() {
            self.retiring.insert(id, params);
        } else {
            // no engine to wait for
            self.free_ids.insert(id);
        }
    }

    /// Decoded audio for a remote track.  A chunk that fails to decode is dropped, the
    /// track just plays silence where it would have gone.
    pub fn on_audio_chunk_available(&mut self, id: TrackId, bytes: &[u8], is_final: bool) -> () {
        let longest = self.longest_interval_frames();
        let feeder = match self.tracks.get_mut(&id).and_then(|e| e.feeder.as_mut()) {
            Some(feeder) => feeder,
            None => {
                trace!("chunk for unknown track {}", id);
                return;
            }
        };
        feeder.reserve(longest);
        match feeder.push_chunk(bytes, is_final) {
            Ok(frames) => trace!("track {}: {} frames queued", id, frames),
            Err(e) => warn!("track {}: bad chunk dropped: {}", id, e),
        }
        self.events
            .emit(SessionEvent::ChunkDownloaded { track_id: id });
        if is_final {
            self.events
                .emit(SessionEvent::IntervalDownloaded { track_id: id });
        }
    }

    /// A chat line from the relay.  Returns a proposal when it was a vote the user might want
    /// to go along with.
    pub fn on_chat_message(&mut self, sender: &str, text: &str) -> Option<VoteProposal> {
        let proposal = self.votes.interpret(text, sender, get_milli_time())?;
        info!("vote proposed: {} {}", proposal.field, proposal.value);
        self.events.emit(SessionEvent::VoteProposed(proposal));
        Some(proposal)
    }

    pub fn on_channel_xmit_changed(&mut self, id: TrackId, transmitting: bool) -> () {
        if let Some(entry) = self.tracks.get_mut(&id) {
            if entry.transmitting != transmitting {
                entry.transmitting = transmitting;
                self.events.emit(SessionEvent::ChannelXmitChanged {
                    track_id: id,
                    transmitting,
                });
            }
        }
    }

    /// The server says the tempo is changing.  Takes effect at the next interval boundary.
    pub fn schedule_tempo_change(&mut self, field: VoteField, value: u32) -> Result<(), BoxError> {
        if value == 0 {
            bail!("{} must be positive", field);
        }
        match field {
            VoteField::Bpi => self.slots.schedule_bpi(value),
            VoteField::Bpm => self.slots.schedule_bpm(value),
        }
        info!("{} {} scheduled for the next interval", field, value);
        Ok(())
    }

    pub fn has_scheduled_changes(&self) -> bool {
        self.slots.has_scheduled_changes()
    }

    // ------------------------------------------------------------------------------------
    // to the network

    /// Vote for a tempo.  No candidate line is proposed to the user for a second after this,
    /// so our own vote echoing back stays quiet.
    pub fn propose_vote(&mut self, field: VoteField, value: u32) -> Result<(), BoxError> {
        if value == 0 {
            bail!("can't vote for {} 0", field);
        }
        self.transport.send_vote_command(field, value)?;
        self.votes.note_vote_command(get_milli_time());
        Ok(())
    }

    pub fn send_chat_message(&mut self, text: &str) -> Result<(), BoxError> {
        self.transport.send_chat_message(text)
    }

    // ------------------------------------------------------------------------------------
    // track controls, all ignore unknown ids

    fn params(&self, id: TrackId) -> Option<&Arc<TrackParams>> {
        self.tracks.get(&id).map(|e| &e.params)
    }

    pub fn set_track_gain(&self, id: TrackId, gain: f32) -> () {
        if let Some(p) = self.params(id) {
            p.set_gain(gain);
        }
    }
    pub fn set_track_level(&self, id: TrackId, level: f32) -> () {
        if let Some(p) = self.params(id) {
            p.set_level(level);
        }
    }
    pub fn set_track_pan(&self, id: TrackId, pan: f32) -> () {
        if let Some(p) = self.params(id) {
            p.set_pan(pan);
        }
    }
    pub fn set_track_mute(&self, id: TrackId, mute: bool) -> () {
        if let Some(p) = self.params(id) {
            p.set_mute(mute);
        }
    }
    pub fn set_track_solo(&self, id: TrackId, solo: bool) -> () {
        if let Some(p) = self.params(id) {
            p.set_solo(solo);
        }
    }
    pub fn track_params(&self, id: TrackId) -> Option<ParamSnapshot> {
        self.params(id).map(|p| p.snapshot())
    }
    pub fn track_peaks(&self, id: TrackId) -> Option<Peaks> {
        self.params(id).map(|p| p.peaks())
    }
    pub fn track_kind(&self, id: TrackId) -> Option<NodeKind> {
        self.tracks.get(&id).map(|e| e.kind)
    }
    pub fn track_is_playing(&self, id: TrackId) -> bool {
        self.tracks
            .get(&id)
            .and_then(|e| e.status.as_ref())
            .map(|s| s.is_playing())
            .unwrap_or(false)
    }
    pub fn track_underruns(&self, id: TrackId) -> u32 {
        self.tracks
            .get(&id)
            .and_then(|e| e.status.as_ref())
            .map(|s| s.underruns())
            .unwrap_or(0)
    }
    /// remote tracks in id order
    pub fn remote_tracks(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|(_, e)| e.kind == NodeKind::Remote)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn set_master_volume(&self, gain: f32) -> () {
        self.master.set_gain(gain);
    }
    pub fn master_volume(&self) -> f32 {
        self.master.gain()
    }
    pub fn master_peaks(&self) -> Peaks {
        self.master.peaks()
    }

    // ------------------------------------------------------------------------------------
    // processing chains

    /// Put a processor into a track's chain at `idx`.  `None` for an unknown track.
    pub fn add_processor(
        &mut self,
        id: TrackId,
        processor: BoxedProcessor,
        idx: usize,
    ) -> Option<ProcessorId> {
        if !self.tracks.contains_key(&id) {
            return None;
        }
        let processor_id = self.next_processor_id;
        let name = processor.name().to_string();
        let cmd = EngineCommand::InsertProcessor {
            track_id: id,
            processor_id,
            processor,
            idx,
        };
        if self.send(cmd).is_err() {
            return None;
        }
        self.next_processor_id += 1;
        if let Some(entry) = self.tracks.get_mut(&id) {
            entry.processors.push(processor_id);
        }
        debug!("processor {} ({}) on track {}", processor_id, name, id);
        Some(processor_id)
    }

    pub fn remove_processor(&mut self, id: TrackId, processor_id: ProcessorId) -> bool {
        let entry = match self.tracks.get_mut(&id) {
            Some(entry) => entry,
            None => return false,
        };
        let before = entry.processors.len();
        entry.processors.retain(|p| *p != processor_id);
        if entry.processors.len() == before {
            return false;
        }
        self.send(EngineCommand::RemoveProcessor {
            track_id: id,
            processor_id,
        })
        .is_ok()
    }

    pub fn set_processor_bypass(&self, id: TrackId, processor_id: ProcessorId, bypass: bool) {
        let known = self
            .tracks
            .get(&id)
            .map(|e| e.processors.contains(&processor_id))
            .unwrap_or(false);
        if known {
            let _res = self.send(EngineCommand::SetProcessorBypass {
                track_id: id,
                processor_id,
                bypass,
            });
        }
    }

    pub fn processors(&self, id: TrackId) -> Vec<ProcessorId> {
        self.tracks
            .get(&id)
            .map(|e| e.processors.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------------------
    // interval and tempo

    /// Start the grid at the configured tempo, or whatever tempo the last run ended on.
    /// Changes left over from before are dropped here; anything scheduled after this call
    /// lands on the first boundary.
    pub fn start_session(&mut self) -> Result<(), BoxError> {
        self.slots.clear_pending();
        let bpi = self.slots.current_bpi();
        let bpm = self.slots.current_bpm();
        self.send(EngineCommand::StartInterval { bpi, bpm })
    }
    pub fn stop_session(&mut self) -> Result<(), BoxError> {
        self.send(EngineCommand::StopInterval)
    }
    pub fn set_beats_per_accent(&self, beats: u32) -> () {
        self.slots.set_beats_per_accent(beats);
    }
    pub fn current_bpi(&self) -> u32 {
        self.slots.current_bpi()
    }
    pub fn current_bpm(&self) -> u32 {
        self.slots.current_bpm()
    }
    pub fn interval_position(&self) -> u64 {
        self.slots.position()
    }

    // ------------------------------------------------------------------------------------
    // room stream

    /// Queue interleaved stereo for the room stream.  Returns the frames that fit.
    pub fn play_room_stream(&mut self, samples: &[f32]) -> usize {
        self.room_stream.write_interleaved(samples)
    }
    pub fn stop_room_stream(&mut self) -> Result<(), BoxError> {
        self.send(EngineCommand::FlushTrack(ROOM_STREAM_TRACK_ID))
    }

    // ------------------------------------------------------------------------------------

    /// Drop what the engine handed back and free the ids of tracks that are now fully gone.
    /// Call it from the control loop every so often.
    pub fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(item) = self.retire_rx.try_recv() {
            count += 1;
            match item {
                Retired::Track(mut channel) => {
                    let id = channel.id();
                    let processors = channel.take_processors().len();
                    drop(channel);
                    if self.retiring.remove(&id).is_some() {
                        self.free_ids.insert(id);
                    }
                    debug!("track {} retired with {} processors", id, processors);
                }
                Retired::Processor {
                    track_id,
                    processor_id,
                    processor,
                } => {
                    if let Some(p) = processor {
                        debug!(
                            "processor {} ({}) of track {} retired",
                            processor_id,
                            p.name(),
                            track_id
                        );
                    }
                    if let Some(entry) = self.tracks.get_mut(&track_id) {
                        entry.processors.retain(|p| *p != processor_id);
                    }
                }
            }
        }
        // the engine drops a track itself when the retire queue is full
        let gone: Vec<TrackId> = self
            .retiring
            .iter()
            .filter(|(_, params)| Arc::strong_count(params) == 1)
            .map(|(id, _)| *id)
            .collect();
        for id in gone {
            debug!("track {} was dropped by the engine", id);
            self.retiring.remove(&id);
            self.free_ids.insert(id);
        }
        count
    }

    /// ids still waiting on the engine
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    /// Stop the engine.  The block in flight finishes, after that the engine outputs silence.
    pub fn shutdown(&mut self) -> () {
        self.running.store(false, Ordering::Relaxed);
        info!("session shutting down");
    }
}
