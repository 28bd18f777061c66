//! # Streaming Playback Scheduler
//!
//! Moves decoded audio from the [`PullDecodeAdapter`] into the
//! [`PlaybackSink`] and derives what observers see (needle, duration,
//! availability, status).
//!
//! ## Modes
//!
//! ```text
//!            fills up                 completion + pull ok
//!  Polling ────────────────> Reactive ─────────────────┐
//!     ^  \                      │  ^───────────────────┘
//!     │   \ end of stream       │ starved
//!     │    v                    v
//!     │  Draining <──────── (end of stream)
//!     │    │ last completion
//!   seek   v
//!     └── Ended            Failed (fatal error, terminal)
//! ```
//!
//! - **Polling**: every tick pulls one buffer.
//! - **Reactive**: pulls only when a scheduled buffer completes, keeping the
//!   sink queue at a steady depth without ticking the decoder.
//! - **Draining**: the decoder reached the end; waits for in-flight buffers.
//!
//! The scheduler is a plain state machine. It is driven by the session actor
//! (ticks, completions, transport events and user commands all arrive on one
//! task), so no locking happens here. Sink completions are turned into
//! [`SessionCommand::BufferCompleted`] messages tagged with the scheduling
//! generation; a seek bumps the generation so completions of discarded
//! buffers are ignored.

use std::sync::Arc;

use bridge_traits::decoder::PcmBuffer;
use bridge_traits::sink::PlaybackSink;
use bridge_traits::transport::TransportEvent;
use core_runtime::observers::PlaybackUpdates;
use core_runtime::stream::{AvailabilityRange, Needle, PlayingStatus, StreamKey};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use crate::adapter::{PullDecodeAdapter, PullOutcome};
use crate::availability::AvailabilityModel;
use crate::config::{SchedulerStats, StreamingConfig};
use crate::error::{PlaybackError, Result};
use crate::session::SessionCommand;

/// Scheduling mode of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Polling,
    Reactive,
    Draining,
    Ended,
    Failed,
}

impl SchedulerMode {
    /// Returns `true` if the scheduler will not pull again without a seek.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullOrigin {
    Poll,
    Completion,
}

pub struct StreamingPlaybackScheduler {
    key: StreamKey,
    config: StreamingConfig,
    adapter: PullDecodeAdapter,
    sink: Arc<dyn PlaybackSink>,
    updates: Arc<PlaybackUpdates>,
    commands: UnboundedSender<SessionCommand>,

    mode: SchedulerMode,
    generation: u64,
    in_flight: u32,
    scheduled_from_poll: u32,
    starved: bool,
    resume_when_refilled: bool,

    seek_offset: Needle,
    needle: Needle,
    pending_seek: Option<Needle>,

    availability: AvailabilityModel,
    published_needle: Option<Needle>,
    published_duration_bucket: Option<i64>,
    published_status: Option<PlayingStatus>,
    stats: SchedulerStats,
}

impl StreamingPlaybackScheduler {
    pub fn new(
        key: StreamKey,
        config: StreamingConfig,
        adapter: PullDecodeAdapter,
        sink: Arc<dyn PlaybackSink>,
        updates: Arc<PlaybackUpdates>,
        commands: UnboundedSender<SessionCommand>,
    ) -> Self {
        let availability = AvailabilityModel::new(config.availability_min_increment);
        Self {
            key,
            config,
            adapter,
            sink,
            updates,
            commands,
            mode: SchedulerMode::Polling,
            generation: 0,
            in_flight: 0,
            scheduled_from_poll: 0,
            starved: false,
            resume_when_refilled: false,
            seek_offset: 0.0,
            needle: 0.0,
            pending_seek: None,
            availability,
            published_needle: None,
            published_duration_bucket: None,
            published_status: None,
            stats: SchedulerStats::default(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn needle(&self) -> Needle {
        self.needle
    }

    pub fn pending_seek(&self) -> Option<Needle> {
        self.pending_seek
    }

    pub fn is_starved(&self) -> bool {
        self.starved
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    pub fn adapter(&self) -> &PullDecodeAdapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut PullDecodeAdapter {
        &mut self.adapter
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Periodic tick: apply a parked seek, poll once, publish state.
    pub fn tick(&mut self) -> Result<()> {
        if self.mode == SchedulerMode::Failed {
            return Ok(());
        }

        if self.pending_seek.is_some() && self.can_seek() {
            if let Some(target) = self.pending_seek.take() {
                debug!(stream_key = %self.key, needle = target, "Applying parked seek");
                let result = self.apply_seek(target);
                self.guard(result)?;
            }
        }

        if self.mode == SchedulerMode::Polling {
            let result = self.pull_once(PullOrigin::Poll);
            self.guard(result)?;
        }

        self.publish_state();
        Ok(())
    }

    /// A scheduled buffer finished rendering or was discarded.
    pub fn on_buffer_completed(&mut self, generation: u64) -> Result<()> {
        if generation != self.generation {
            trace!(stream_key = %self.key, generation, current = self.generation, "Stale completion ignored");
            return Ok(());
        }

        self.in_flight = self.in_flight.saturating_sub(1);
        self.stats.buffers_completed += 1;

        match self.mode {
            SchedulerMode::Reactive => {
                let result = self.pull_once(PullOrigin::Completion);
                self.guard(result)?;
            }
            SchedulerMode::Draining if self.in_flight == 0 => self.finish(),
            _ => {}
        }

        let pulling = matches!(self.mode, SchedulerMode::Polling | SchedulerMode::Reactive);
        if pulling && self.in_flight == 0 && self.sink.is_playing() {
            warn!(stream_key = %self.key, "Playback underrun, pausing until refilled");
            self.sink.pause();
            self.resume_when_refilled = true;
            self.stats.underruns += 1;
        }
        Ok(())
    }

    /// Route a transport event into the adapter.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        if self.mode == SchedulerMode::Failed {
            return Ok(());
        }
        let result = match event {
            TransportEvent::Data {
                offset,
                bytes,
                total_bytes_expected,
                ..
            } => self.adapter.on_transport_data(offset, bytes, total_bytes_expected),
            TransportEvent::Finished { end_offset } => {
                self.adapter.on_transport_finished(end_offset);
                Ok(())
            }
            TransportEvent::Failed(message) => Err(PlaybackError::Transport(message)),
        };
        self.guard(result)
    }

    /// Seek to `needle` seconds.
    ///
    /// Before the format is known the seek is parked and applied on the
    /// first tick after; a later seek replaces a parked one.
    pub fn seek(&mut self, needle: Needle) -> Result<()> {
        if self.mode == SchedulerMode::Failed {
            return Err(PlaybackError::SessionClosed);
        }

        let target = self.clamp_needle(needle);
        if !self.can_seek() {
            debug!(stream_key = %self.key, needle = target, "Parking seek until stream is ready");
            self.pending_seek = Some(target);
            self.set_needle(target);
            return Ok(());
        }

        self.pending_seek = None;
        let result = self.apply_seek(target);
        self.guard(result)
    }

    pub fn skip_forward(&mut self) -> Result<()> {
        let target = self.current_target() + self.config.skip_forward.as_secs_f64();
        self.seek(target)
    }

    pub fn skip_backward(&mut self) -> Result<()> {
        let target = self.current_target() - self.config.skip_backward.as_secs_f64();
        self.seek(target)
    }

    /// Start playback, or arm it until enough audio is buffered.
    pub fn play(&mut self) -> Result<()> {
        match self.mode {
            SchedulerMode::Failed => return Err(PlaybackError::SessionClosed),
            SchedulerMode::Ended => {
                // Replay from the start.
                self.seek(0.0)?;
                self.resume_when_refilled = true;
                return Ok(());
            }
            _ => {}
        }

        if self.in_flight > 0 {
            self.resume_when_refilled = false;
            let result = self.start_sink();
            self.guard(result)
        } else {
            self.resume_when_refilled = true;
            Ok(())
        }
    }

    pub fn pause(&mut self) {
        self.resume_when_refilled = false;
        self.sink.pause();
    }

    /// Pause when playing (or about to), play otherwise.
    pub fn toggle(&mut self) -> Result<()> {
        if self.sink.is_playing() || self.resume_when_refilled {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    pub fn set_rate(&mut self, rate: f32) -> Result<()> {
        if !self.config.accepts_rate(rate) {
            return Err(PlaybackError::InvalidRate(rate));
        }
        self.sink
            .set_rate(rate)
            .map_err(|e| PlaybackError::Sink(e.to_string()))
    }

    /// Tear down: drop received bytes, cancel the transport, stop the sink.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.adapter.invalidate();
        self.sink.stop();
        self.in_flight = 0;
        self.resume_when_refilled = false;
        debug!(stream_key = %self.key, "Scheduler invalidated");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn guard(&mut self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(stream_key = %self.key, error = %err, "Stream failed");
                self.mode = SchedulerMode::Failed;
            }
        }
        result
    }

    fn can_seek(&self) -> bool {
        self.adapter.is_ready() && self.adapter.predicted_duration().is_some()
    }

    fn current_target(&self) -> Needle {
        self.pending_seek.unwrap_or(self.needle)
    }

    fn clamp_needle(&self, needle: Needle) -> Needle {
        let needle = if needle.is_finite() { needle.max(0.0) } else { 0.0 };
        match self.adapter.predicted_duration() {
            Some(duration) => needle.min(duration),
            None => needle,
        }
    }

    fn apply_seek(&mut self, target: Needle) -> Result<()> {
        let was_playing = self.sink.is_playing() || self.resume_when_refilled;
        self.set_needle(target);

        // Reposition the decoder before discarding what the sink holds.
        let applied = self.adapter.seek(target)?;
        self.generation += 1;
        self.sink.stop();
        self.in_flight = 0;
        self.scheduled_from_poll = 0;
        self.starved = false;
        self.mode = SchedulerMode::Polling;
        self.seek_offset = applied;
        self.set_needle(applied);
        self.stats.seeks += 1;
        if was_playing {
            self.resume_when_refilled = true;
        }

        info!(stream_key = %self.key, needle = applied, generation = self.generation, "Seek applied");
        self.pull_once(PullOrigin::Poll)
    }

    fn pull_once(&mut self, origin: PullOrigin) -> Result<()> {
        match self.adapter.pull_frames(self.config.pcm_buffer_frames) {
            PullOutcome::Frames(buffer) => {
                self.starved = false;
                self.schedule(buffer, origin)
            }
            PullOutcome::NeedMoreData => {
                self.starved = true;
                self.stats.starved_pulls += 1;
                if self.mode == SchedulerMode::Reactive {
                    debug!(stream_key = %self.key, "Starved, falling back to polling");
                    self.mode = SchedulerMode::Polling;
                    self.scheduled_from_poll = 0;
                }
                Ok(())
            }
            PullOutcome::EndOfStream => {
                debug!(stream_key = %self.key, in_flight = self.in_flight, "End of stream, draining");
                self.mode = SchedulerMode::Draining;
                if self.in_flight == 0 {
                    self.finish();
                } else {
                    self.resume_if_refilled()?;
                }
                Ok(())
            }
            PullOutcome::Fatal(err) => Err(err),
        }
    }

    fn schedule(&mut self, buffer: PcmBuffer, origin: PullOrigin) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let frames = buffer.frames as u64;
        let generation = self.generation;
        let commands = self.commands.clone();
        self.sink
            .schedule(
                buffer,
                Box::new(move || {
                    // The session may be gone already.
                    let _ = commands.send(SessionCommand::BufferCompleted { generation });
                }),
            )
            .map_err(|e| PlaybackError::Sink(e.to_string()))?;

        self.in_flight += 1;
        self.stats.buffers_scheduled += 1;
        self.stats.frames_scheduled += frames;
        if origin == PullOrigin::Poll {
            self.scheduled_from_poll += 1;
        }

        let filled = self.in_flight > self.config.min_buffers_to_be_playable;
        let poll_cap = self.scheduled_from_poll > self.config.max_poll_buffer_count;
        if self.mode == SchedulerMode::Polling && (filled || poll_cap) {
            debug!(
                stream_key = %self.key,
                in_flight = self.in_flight,
                scheduled_from_poll = self.scheduled_from_poll,
                "Switching to reactive scheduling"
            );
            self.mode = SchedulerMode::Reactive;
        }

        self.resume_if_refilled()
    }

    fn resume_if_refilled(&mut self) -> Result<()> {
        if !self.resume_when_refilled || self.in_flight == 0 {
            return Ok(());
        }
        let threshold = self.config.min_buffers_to_be_playable;
        let refilled = self.scheduled_from_poll > threshold
            || self.in_flight > threshold
            || self.mode == SchedulerMode::Draining;
        if refilled {
            self.resume_when_refilled = false;
            debug!(stream_key = %self.key, "Buffer refilled, resuming");
            self.start_sink()?;
        }
        Ok(())
    }

    fn start_sink(&self) -> Result<()> {
        self.sink
            .start()
            .map_err(|e| PlaybackError::Sink(e.to_string()))
    }

    fn finish(&mut self) {
        info!(stream_key = %self.key, "Playback ended");
        self.mode = SchedulerMode::Ended;
        self.resume_when_refilled = false;
        self.sink.pause();
        self.publish_status(PlayingStatus::Ended);
    }

    fn set_needle(&mut self, needle: Needle) {
        self.needle = needle;
        if self.published_needle != Some(needle) {
            self.published_needle = Some(needle);
            self.updates.publish_needle(&self.key, needle);
        }
    }

    fn publish_status(&mut self, status: PlayingStatus) {
        if self.published_status != Some(status) {
            debug!(stream_key = %self.key, ?status, "Status changed");
            self.published_status = Some(status);
            self.updates.publish_status(&self.key, status);
        }
    }

    fn publish_state(&mut self) {
        if self.pending_seek.is_none() {
            let rendered = self.sink.render_position().unwrap_or(0.0).max(0.0);
            self.set_needle(rendered + self.seek_offset);
        }

        let duration = self.adapter.predicted_duration().unwrap_or(0.0);
        if duration > 0.0 {
            let bucket = (duration / self.config.duration_debounce).floor() as i64;
            if self.published_duration_bucket != Some(bucket) {
                self.published_duration_bucket = Some(bucket);
                self.updates.publish_duration(&self.key, duration);
            }
        }

        let (starting_needle, loaded) = self.adapter.availability();
        let is_playable = self.in_flight >= 1 && loaded > 0.0 && duration > 0.0;
        let candidate = AvailabilityRange::new(starting_needle, loaded, duration, is_playable);
        if let Some(range) = self.availability.offer(candidate) {
            self.updates.publish_availability(&self.key, range);
        }

        let status = if self.mode == SchedulerMode::Ended {
            PlayingStatus::Ended
        } else if !is_playable {
            if duration > 0.0 && self.needle >= duration {
                PlayingStatus::Ended
            } else {
                PlayingStatus::Buffering
            }
        } else if self.sink.is_playing() {
            PlayingStatus::Playing
        } else {
            PlayingStatus::Paused
        };
        self.publish_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::decoder::{DecodeStep, DecoderFormat, DecoderSignal, StreamDecoder};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::sink::BufferCompletion;
    use bridge_traits::transport::{Transport, TransportListener};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Decoder whose decodable packets are controlled by the test.
    #[derive(Default)]
    struct Script {
        ready_packets: u64,
        end_after: Option<u64>,
        fail: bool,
    }

    struct ScriptDecoder {
        script: Arc<Mutex<Script>>,
        identified: bool,
        signals: Vec<DecoderSignal>,
    }

    impl StreamDecoder for ScriptDecoder {
        fn feed(&mut self, _offset: u64, _data: &[u8]) -> BridgeResult<()> {
            if !self.identified {
                self.identified = true;
                self.signals
                    .push(DecoderSignal::FormatIdentified(DecoderFormat::new(100.0, 10, 1)));
            }
            Ok(())
        }

        fn take_signals(&mut self) -> Vec<DecoderSignal> {
            std::mem::take(&mut self.signals)
        }

        fn decode(&mut self, packet_index: u64, _max_frames: usize) -> BridgeResult<DecodeStep> {
            let script = self.script.lock();
            if script.fail {
                return Err(bridge_traits::BridgeError::Decoder("corrupt frame".into()));
            }
            if packet_index < script.ready_packets {
                return Ok(DecodeStep::Frames {
                    buffer: PcmBuffer::silence(10, 1),
                    packets_consumed: 1,
                });
            }
            if script.end_after.is_some_and(|end| packet_index >= end) {
                return Ok(DecodeStep::EndOfStream);
            }
            Ok(DecodeStep::NeedData { wanted_offset: None })
        }

        fn byte_offset_for_packet(&self, packet_index: u64) -> Option<u64> {
            Some(packet_index * 100)
        }

        fn predicted_duration(&self) -> Option<f64> {
            self.identified.then_some(60.0)
        }

        fn total_predicted_frames(&self) -> Option<u64> {
            Some(6000)
        }

        fn availability(&self, loaded: (u64, u64)) -> (f64, f64) {
            (loaded.0 as f64 / 1000.0, (loaded.1 + 1 - loaded.0) as f64 / 1000.0)
        }
    }

    #[derive(Default)]
    struct FakeSink {
        completions: Mutex<Vec<BufferCompletion>>,
        playing: AtomicBool,
        position: Mutex<Option<f64>>,
        stops: Mutex<u32>,
    }

    impl FakeSink {
        fn complete_one(&self) {
            let completion = {
                let mut completions = self.completions.lock();
                (!completions.is_empty()).then(|| completions.remove(0))
            };
            if let Some(completion) = completion {
                completion();
            }
        }

        fn queued(&self) -> usize {
            self.completions.lock().len()
        }
    }

    impl PlaybackSink for FakeSink {
        fn schedule(&self, _buffer: PcmBuffer, on_complete: BufferCompletion) -> BridgeResult<()> {
            self.completions.lock().push(on_complete);
            Ok(())
        }

        fn render_position(&self) -> Option<f64> {
            *self.position.lock()
        }

        fn start(&self) -> BridgeResult<()> {
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn pause(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
            *self.position.lock() = Some(0.0);
            *self.stops.lock() += 1;
            // Discarded buffers complete synchronously.
            let drained: Vec<_> = self.completions.lock().drain(..).collect();
            for completion in drained {
                completion();
            }
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn set_rate(&self, _rate: f32) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        seeks: Mutex<Vec<u64>>,
    }

    impl Transport for RecordingTransport {
        fn start(&self, _listener: Arc<dyn TransportListener>) -> BridgeResult<()> {
            Ok(())
        }

        fn seek_to(&self, byte_offset: u64) {
            self.seeks.lock().push(byte_offset);
        }

        fn cancel(&self) {}
    }

    struct Harness {
        scheduler: StreamingPlaybackScheduler,
        script: Arc<Mutex<Script>>,
        sink: Arc<FakeSink>,
        updates: Arc<PlaybackUpdates>,
        rx: UnboundedReceiver<SessionCommand>,
    }

    impl Harness {
        fn new(config: StreamingConfig) -> Self {
            let key = StreamKey::new("audio_sched");
            let script = Arc::new(Mutex::new(Script::default()));
            let decoder = ScriptDecoder {
                script: script.clone(),
                identified: false,
                signals: Vec::new(),
            };
            let adapter = PullDecodeAdapter::new(
                key.clone(),
                Box::new(decoder),
                Arc::new(RecordingTransport::default()),
                config.redelivery_floor_bytes,
            );
            let sink = Arc::new(FakeSink::default());
            let updates = Arc::new(PlaybackUpdates::new());
            let (tx, rx) = mpsc::unbounded_channel();
            let scheduler =
                StreamingPlaybackScheduler::new(key, config, adapter, sink.clone(), updates.clone(), tx);
            Self {
                scheduler,
                script,
                sink,
                updates,
                rx,
            }
        }

        fn ready(config: StreamingConfig, packets: u64) -> Self {
            let mut harness = Self::new(config);
            harness.script.lock().ready_packets = packets;
            harness
                .scheduler
                .on_transport_event(TransportEvent::data(0, vec![0u8; 2000]))
                .unwrap();
            harness
        }

        /// Fire one sink completion and route it back like the session does.
        fn complete(&mut self) {
            self.sink.complete_one();
            self.route_completions();
        }

        fn route_completions(&mut self) {
            while let Ok(command) = self.rx.try_recv() {
                if let SessionCommand::BufferCompleted { generation } = command {
                    self.scheduler.on_buffer_completed(generation).unwrap();
                }
            }
        }

        fn status(&self) -> Option<PlayingStatus> {
            self.updates.latest_status(self.scheduler.key())
        }
    }

    #[test]
    fn test_polling_until_ready() {
        let mut h = Harness::new(StreamingConfig::default());
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);
        assert!(h.scheduler.is_starved());
        assert_eq!(h.status(), Some(PlayingStatus::Buffering));
    }

    #[test]
    fn test_two_polled_buffers_switch_to_reactive() {
        let mut h = Harness::ready(StreamingConfig::default(), 100);

        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Reactive);
        assert_eq!(h.sink.queued(), 2);

        // Ticks no longer pull.
        h.scheduler.tick().unwrap();
        h.scheduler.tick().unwrap();
        assert_eq!(h.sink.queued(), 2);

        // A completion pulls exactly one replacement.
        h.complete();
        assert_eq!(h.sink.queued(), 2);
        assert_eq!(h.scheduler.in_flight(), 2);
        assert_eq!(h.scheduler.adapter().current_packet(), 3);
    }

    #[test]
    fn test_poll_cap_forces_reactive() {
        let config = StreamingConfig {
            min_buffers_to_be_playable: 10,
            max_poll_buffer_count: 10,
            ..Default::default()
        };
        let mut h = Harness::ready(config, 100);
        for _ in 0..10 {
            h.scheduler.tick().unwrap();
        }
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Reactive);
    }

    #[test]
    fn test_starved_reactive_falls_back_to_polling() {
        let mut h = Harness::ready(StreamingConfig::default(), 2);
        h.scheduler.tick().unwrap();
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Reactive);

        h.complete();
        assert!(h.scheduler.is_starved());
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);

        h.script.lock().ready_packets = 10;
        h.scheduler.tick().unwrap();
        assert!(!h.scheduler.is_starved());
    }

    #[test]
    fn test_end_of_stream_waits_for_in_flight_buffers() {
        let config = StreamingConfig {
            min_buffers_to_be_playable: 3,
            ..Default::default()
        };
        let mut h = Harness::ready(config, 3);
        h.script.lock().end_after = Some(3);

        for _ in 0..3 {
            h.scheduler.tick().unwrap();
        }
        assert_eq!(h.scheduler.in_flight(), 3);
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);

        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Draining);
        assert_ne!(h.status(), Some(PlayingStatus::Ended));

        h.complete();
        h.complete();
        h.scheduler.tick().unwrap();
        assert_ne!(h.status(), Some(PlayingStatus::Ended));

        h.complete();
        assert_eq!(h.scheduler.mode(), SchedulerMode::Ended);
        assert_eq!(h.status(), Some(PlayingStatus::Ended));
    }

    #[test]
    fn test_seek_discards_old_generation() {
        let mut h = Harness::ready(StreamingConfig::default(), 1000);
        h.scheduler.tick().unwrap();
        h.scheduler.tick().unwrap();
        let before = h.scheduler.generation();

        h.scheduler.seek(30.0).unwrap();
        assert_eq!(h.scheduler.generation(), before + 1);
        // Stop fired the two discarded completions; they must not count.
        h.route_completions();
        assert_eq!(h.scheduler.in_flight(), 1);
        assert_eq!(h.scheduler.mode(), SchedulerMode::Polling);
        assert_eq!(*h.sink.stops.lock(), 1);

        // 30s of 60s = 3000 frames = packet 300, plus the immediate re-poll.
        assert_eq!(h.scheduler.adapter().current_packet(), 301);
        assert_eq!(h.updates.latest_needle(h.scheduler.key()), Some(30.0));
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut h = Harness::ready(StreamingConfig::default(), 10_000);
        h.scheduler.seek(-4.0).unwrap();
        assert_eq!(h.scheduler.needle(), 0.0);
        h.scheduler.seek(600.0).unwrap();
        assert_eq!(h.scheduler.needle(), 60.0);
    }

    #[test]
    fn test_seek_before_ready_is_parked_and_latest_wins() {
        let mut h = Harness::new(StreamingConfig::default());
        h.scheduler.seek(10.0).unwrap();
        h.scheduler.seek(15.0).unwrap();
        assert_eq!(h.scheduler.pending_seek(), Some(15.0));
        assert_eq!(h.updates.latest_needle(h.scheduler.key()), Some(15.0));

        h.script.lock().ready_packets = 10_000;
        h.scheduler
            .on_transport_event(TransportEvent::data(0, vec![0u8; 100]))
            .unwrap();
        h.scheduler.tick().unwrap();

        assert_eq!(h.scheduler.pending_seek(), None);
        assert_eq!(h.scheduler.stats().seeks, 1);
        // 15s of 60s = 1500 frames = packet 150, then one pull from the
        // seek and one from the tick.
        assert_eq!(h.scheduler.adapter().current_packet(), 152);
    }

    #[test]
    fn test_play_waits_for_refill_and_resumes_after_underrun() {
        let mut h = Harness::ready(StreamingConfig::default(), 2);
        h.scheduler.play().unwrap();
        assert!(!h.sink.is_playing());

        h.scheduler.tick().unwrap();
        assert!(!h.sink.is_playing());
        h.scheduler.tick().unwrap();
        assert!(h.sink.is_playing());
        assert_eq!(h.status(), Some(PlayingStatus::Playing));

        // Decoder runs dry: both buffers complete with nothing to follow.
        h.complete();
        h.complete();
        assert!(!h.sink.is_playing());
        assert_eq!(h.scheduler.stats().underruns, 1);
        h.scheduler.tick().unwrap();
        assert_eq!(h.status(), Some(PlayingStatus::Buffering));

        h.script.lock().ready_packets = 10;
        h.scheduler.tick().unwrap();
        h.scheduler.tick().unwrap();
        assert!(h.sink.is_playing());
    }

    #[test]
    fn test_toggle_and_rate() {
        let mut h = Harness::ready(StreamingConfig::default(), 100);
        h.scheduler.tick().unwrap();
        h.scheduler.toggle().unwrap();
        assert!(h.sink.is_playing());
        h.scheduler.toggle().unwrap();
        assert!(!h.sink.is_playing());

        assert!(h.scheduler.set_rate(2.0).is_ok());
        assert!(matches!(
            h.scheduler.set_rate(100.0),
            Err(PlaybackError::InvalidRate(_))
        ));
    }

    #[test]
    fn test_skip_moves_relative_to_needle() {
        let mut h = Harness::ready(StreamingConfig::default(), 10_000);
        h.scheduler.seek(20.0).unwrap();
        h.scheduler.skip_forward().unwrap();
        assert_eq!(h.scheduler.needle(), 50.0);
        h.scheduler.skip_backward().unwrap();
        assert_eq!(h.scheduler.needle(), 35.0);
        h.scheduler.skip_forward().unwrap();
        assert_eq!(h.scheduler.needle(), 60.0);
    }

    #[test]
    fn test_decoder_failure_is_terminal() {
        let mut h = Harness::ready(StreamingConfig::default(), 10);
        h.script.lock().fail = true;

        let err = h.scheduler.tick().unwrap_err();
        assert!(err.is_format_error());
        assert_eq!(h.scheduler.mode(), SchedulerMode::Failed);
        assert!(h.scheduler.tick().is_ok());
        assert!(matches!(h.scheduler.seek(1.0), Err(PlaybackError::SessionClosed)));
    }

    #[test]
    fn test_transport_failure_is_terminal() {
        let mut h = Harness::ready(StreamingConfig::default(), 10);
        let err = h
            .scheduler
            .on_transport_event(TransportEvent::Failed("reset by peer".into()))
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Transport(_)));
        assert!(h.scheduler.mode().is_terminal());
    }

    #[test]
    fn test_availability_and_duration_are_published() {
        let mut h = Harness::ready(StreamingConfig::default(), 100);
        h.scheduler.tick().unwrap();

        let key = h.scheduler.key().clone();
        assert_eq!(h.updates.latest_duration(&key), Some(60.0));
        let range = h.updates.latest_availability(&key).unwrap();
        assert!(range.is_playable);
        assert_eq!(range.duration_loaded_by_network, 2.0);
        assert_eq!(h.status(), Some(PlayingStatus::Paused));
    }

    #[test]
    fn test_needle_follows_render_clock() {
        let mut h = Harness::ready(StreamingConfig::default(), 10_000);
        h.scheduler.seek(10.0).unwrap();
        *h.sink.position.lock() = Some(1.5);
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.needle(), 11.5);

        // Render clocks may run negative around restarts.
        *h.sink.position.lock() = Some(-0.2);
        h.scheduler.tick().unwrap();
        assert_eq!(h.scheduler.needle(), 10.0);
    }
}
