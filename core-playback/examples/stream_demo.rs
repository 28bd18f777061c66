//! # Streaming Pipeline Demo
//!
//! Streams a synthetic tone through the full pipeline: an in-memory
//! transport pushing raw PCM bytes at network-like pace, a trivial PCM
//! decoder and a sink that "renders" in real time.
//!
//! Run with: `cargo run --example stream_demo --package core-playback`

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridge_traits::decoder::{DecodeStep, DecoderFormat, DecoderSignal, PcmBuffer, StreamDecoder};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::sink::{BufferCompletion, PlaybackSink};
use bridge_traits::transport::{Transport, TransportEvent, TransportListener};
use bridge_traits::LogLevel;
use bytes::Bytes;
use core_playback::{StreamRegistry, StreamingConfig};
use core_runtime::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::stream::{PlayingStatus, StreamKey};
use core_runtime::PlaybackUpdates;
use parking_lot::Mutex;

const SAMPLE_RATE: u32 = 8000;
const BYTES_PER_FRAME: u64 = 2;
const FRAMES_PER_PACKET: u32 = 400;
const PACKET_BYTES: u64 = FRAMES_PER_PACKET as u64 * BYTES_PER_FRAME;
const TONE_SECONDS: u64 = 6;

// ============================================================================
// Decoder: raw 16-bit little-endian mono PCM
// ============================================================================

#[derive(Default)]
struct RawPcmDecoder {
    window_start: u64,
    window: Vec<u8>,
    expected_length: Option<u64>,
    finished: bool,
    identified: bool,
    signals: Vec<DecoderSignal>,
}

impl StreamDecoder for RawPcmDecoder {
    fn feed(&mut self, offset: u64, data: &[u8]) -> BridgeResult<()> {
        if offset != self.window_start + self.window.len() as u64 {
            self.window_start = offset;
            self.window.clear();
        }
        self.window.extend_from_slice(data);
        self.finished = false;
        if !self.identified {
            self.identified = true;
            self.signals.push(DecoderSignal::FormatIdentified(DecoderFormat::new(
                f64::from(SAMPLE_RATE),
                FRAMES_PER_PACKET,
                1,
            )));
            self.signals.push(DecoderSignal::PacketStride(PACKET_BYTES));
        }
        Ok(())
    }

    fn set_expected_length(&mut self, total_bytes: u64) {
        self.expected_length = Some(total_bytes);
    }

    fn finish_input(&mut self) {
        self.finished = true;
    }

    fn take_signals(&mut self) -> Vec<DecoderSignal> {
        std::mem::take(&mut self.signals)
    }

    fn decode(&mut self, packet_index: u64, _max_frames: usize) -> BridgeResult<DecodeStep> {
        let start = packet_index * PACKET_BYTES;
        if self.expected_length.is_some_and(|total| start >= total) {
            return Ok(DecodeStep::EndOfStream);
        }

        let window_end = self.window_start + self.window.len() as u64;
        let end = start + PACKET_BYTES;
        if start < self.window_start || end > window_end {
            if self.finished && start >= window_end {
                return Ok(DecodeStep::EndOfStream);
            }
            let wanted = if start >= self.window_start && start < window_end {
                window_end
            } else {
                start
            };
            return Ok(DecodeStep::NeedData {
                wanted_offset: Some(wanted),
            });
        }

        let from = (start - self.window_start) as usize;
        let to = (end - self.window_start) as usize;
        let samples: Vec<f32> = self.window[from..to]
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / f32::from(i16::MAX))
            .collect();
        let frames = samples.len();
        Ok(DecodeStep::Frames {
            buffer: PcmBuffer::new(samples, frames, 1),
            packets_consumed: 1,
        })
    }

    fn byte_offset_for_packet(&self, packet_index: u64) -> Option<u64> {
        Some(packet_index * PACKET_BYTES)
    }

    fn predicted_duration(&self) -> Option<f64> {
        self.expected_length
            .map(|total| (total / BYTES_PER_FRAME) as f64 / f64::from(SAMPLE_RATE))
    }

    fn total_predicted_frames(&self) -> Option<u64> {
        self.expected_length.map(|total| total / BYTES_PER_FRAME)
    }

    fn availability(&self, loaded_bytes: (u64, u64)) -> (f64, f64) {
        let seconds = |bytes: u64| (bytes / BYTES_PER_FRAME) as f64 / f64::from(SAMPLE_RATE);
        (
            seconds(loaded_bytes.0),
            seconds(loaded_bytes.1 + 1 - loaded_bytes.0),
        )
    }
}

// ============================================================================
// Transport: pushes a generated tone in 4 KB chunks
// ============================================================================

struct ToneTransport {
    data: Bytes,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    generation: Arc<Mutex<u64>>,
}

impl ToneTransport {
    fn new(seconds: u64) -> Arc<Self> {
        let frames = seconds * u64::from(SAMPLE_RATE);
        let pcm: Vec<u8> = (0..frames)
            .flat_map(|i| {
                let t = i as f64 / f64::from(SAMPLE_RATE);
                let sample = ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 8000.0) as i16;
                sample.to_le_bytes()
            })
            .collect();
        Arc::new(Self {
            data: Bytes::from(pcm),
            listener: Mutex::new(None),
            generation: Arc::new(Mutex::new(0)),
        })
    }

    fn pump_from(&self, offset: u64) {
        let Some(listener) = self.listener.lock().clone() else {
            return;
        };
        let generation = {
            let mut current = self.generation.lock();
            *current += 1;
            *current
        };
        let current = self.generation.clone();
        let data = self.data.clone();

        tokio::spawn(async move {
            let total = data.len() as u64;
            let mut cursor = offset.min(total);
            while cursor < total {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let end = (cursor + 4096).min(total);
                // Sent under the lock so nothing stale follows a seek_to.
                let delivered = {
                    let guard = current.lock();
                    if *guard == generation {
                        listener.on_transport_event(TransportEvent::Data {
                            offset: cursor,
                            bytes: data.slice(cursor as usize..end as usize),
                            progress: Some(end as f64 / total as f64),
                            total_bytes_expected: Some(total),
                        });
                    }
                    *guard == generation
                };
                if !delivered {
                    return;
                }
                cursor = end;
            }
            if *current.lock() == generation {
                listener.on_transport_event(TransportEvent::finished(total));
            }
        });
    }
}

impl Transport for ToneTransport {
    fn start(&self, listener: Arc<dyn TransportListener>) -> BridgeResult<()> {
        *self.listener.lock() = Some(listener);
        self.pump_from(0);
        Ok(())
    }

    fn seek_to(&self, byte_offset: u64) {
        self.pump_from(byte_offset);
    }

    fn cancel(&self) {
        *self.generation.lock() += 1;
        self.listener.lock().take();
    }
}

// ============================================================================
// Sink: consumes scheduled frames in real time
// ============================================================================

struct RealtimeSink {
    queue: Mutex<VecDeque<(u64, BufferCompletion)>>,
    playing: AtomicBool,
    rendered_frames: AtomicU64,
}

impl RealtimeSink {
    fn new() -> Arc<Self> {
        let sink = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            playing: AtomicBool::new(false),
            rendered_frames: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&sink);
        tokio::spawn(async move {
            let step = u64::from(SAMPLE_RATE) / 100;
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                ticker.tick().await;
                let Some(sink) = weak.upgrade() else {
                    return;
                };
                if sink.is_playing() {
                    sink.render(step);
                }
            }
        });
        sink
    }

    fn render(&self, mut frames: u64) {
        while frames > 0 {
            let finished = {
                let mut queue = self.queue.lock();
                let Some((remaining, _)) = queue.front_mut() else {
                    return;
                };
                let consumed = frames.min(*remaining);
                *remaining -= consumed;
                frames -= consumed;
                self.rendered_frames.fetch_add(consumed, Ordering::SeqCst);
                if *remaining == 0 {
                    queue.pop_front()
                } else {
                    None
                }
            };
            if let Some((_, completion)) = finished {
                completion();
            }
        }
    }
}

impl PlaybackSink for RealtimeSink {
    fn schedule(&self, buffer: PcmBuffer, on_complete: BufferCompletion) -> BridgeResult<()> {
        self.queue
            .lock()
            .push_back((buffer.frames as u64, on_complete));
        Ok(())
    }

    fn render_position(&self) -> Option<f64> {
        Some(self.rendered_frames.load(Ordering::SeqCst) as f64 / f64::from(SAMPLE_RATE))
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
        self.rendered_frames.store(0, Ordering::SeqCst);
        let drained: Vec<_> = self.queue.lock().drain(..).collect();
        for (_, completion) in drained {
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

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Debug),
    )
    .context("failed to initialize logging")?;

    println!("=== Streaming Pipeline Demo ===\n");

    let updates = Arc::new(PlaybackUpdates::with_event_bus(EventBus::new(
        DEFAULT_EVENT_BUFFER_SIZE,
    )));
    updates.attach_status(|key, status| {
        println!("[{key}] status: {status:?}");
        ControlFlow::Continue(())
    });
    updates.attach_availability(|key, range| {
        println!(
            "[{key}] loaded {:.1}s from {:.1}s (playable: {})",
            range.duration_loaded_by_network, range.starting_needle, range.is_playable
        );
        ControlFlow::Continue(())
    });

    let registry = StreamRegistry::new(StreamingConfig::low_latency(), updates.clone());
    let locator = "memory://tone-440hz.pcm";
    let key = StreamKey::from_locator(locator);

    let session = registry.open(
        locator,
        Box::new(RawPcmDecoder::default()),
        ToneTransport::new(TONE_SECONDS),
        RealtimeSink::new(),
    )?;
    session.play()?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("\n--- Seeking to 3.0s ---\n");
    session.seek(3.0).await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("\n--- Skipping back ---\n");
    session.skip_backward()?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while updates.latest_status(&key) != Some(PlayingStatus::Ended)
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let stats = session.stats().await?;
    println!("\n=== Session Statistics ===");
    println!("Buffers scheduled: {}", stats.buffers_scheduled);
    println!("Buffers completed: {}", stats.buffers_completed);
    println!("Frames scheduled:  {}", stats.frames_scheduled);
    println!("Underruns:         {}", stats.underruns);
    println!("Seeks:             {}", stats.seeks);

    registry.shutdown_all().await;
    println!("\n=== Demo Complete ===");
    Ok(())
}
