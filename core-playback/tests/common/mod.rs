//! Shared fakes for the integration suites.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::decoder::{DecodeStep, DecoderFormat, DecoderSignal, PcmBuffer, StreamDecoder};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::sink::{BufferCompletion, PlaybackSink};
use bridge_traits::transport::{Transport, TransportEvent, TransportListener};
use bridge_traits::BridgeError;
use bytes::Bytes;
use parking_lot::Mutex;

pub const PACKET_BYTES: u64 = 100;
pub const FRAMES_PER_PACKET: u32 = 10;
pub const FRAME_RATE: f64 = 100.0;

/// Ordered record of teardown calls shared by fakes.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

// ============================================================================
// Decoder
// ============================================================================

/// Constant-bitrate decoder: packet `n` lives at bytes
/// `[n * 100, (n + 1) * 100)` and decodes to 10 frames at 100 fps.
pub struct CbrDecoder {
    total_packets: u64,
    available_from: u64,
    available_to: u64,
    identified: bool,
    finished: bool,
    signals: Vec<DecoderSignal>,
    corrupt: bool,
}

impl CbrDecoder {
    pub fn new(total_packets: u64) -> Self {
        Self {
            total_packets,
            available_from: 0,
            available_to: 0,
            identified: false,
            finished: false,
            signals: Vec::new(),
            corrupt: false,
        }
    }

    /// Decoder that rejects the stream once it sees the first bytes.
    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::new(0)
        }
    }

    pub fn total_bytes(total_packets: u64) -> u64 {
        total_packets * PACKET_BYTES
    }
}

impl StreamDecoder for CbrDecoder {
    fn feed(&mut self, offset: u64, data: &[u8]) -> BridgeResult<()> {
        if self.corrupt {
            return Err(BridgeError::UnsupportedFormat("not an audio stream".into()));
        }
        if offset != self.available_to {
            self.available_from = offset;
        }
        self.available_to = offset + data.len() as u64;
        if !self.identified {
            self.identified = true;
            self.signals.push(DecoderSignal::FormatIdentified(DecoderFormat::new(
                FRAME_RATE,
                FRAMES_PER_PACKET,
                1,
            )));
            self.signals.push(DecoderSignal::PacketStride(PACKET_BYTES));
        }
        Ok(())
    }

    fn finish_input(&mut self) {
        self.finished = true;
    }

    fn take_signals(&mut self) -> Vec<DecoderSignal> {
        std::mem::take(&mut self.signals)
    }

    fn decode(&mut self, packet_index: u64, _max_frames: usize) -> BridgeResult<DecodeStep> {
        if packet_index >= self.total_packets {
            return Ok(DecodeStep::EndOfStream);
        }
        let start = packet_index * PACKET_BYTES;
        let end = start + PACKET_BYTES;
        if start >= self.available_from && end <= self.available_to {
            return Ok(DecodeStep::Frames {
                buffer: PcmBuffer::silence(FRAMES_PER_PACKET as usize, 1),
                packets_consumed: 1,
            });
        }
        if self.finished {
            return Ok(DecodeStep::EndOfStream);
        }
        Ok(DecodeStep::NeedData {
            wanted_offset: Some(self.available_to.max(start)),
        })
    }

    fn byte_offset_for_packet(&self, packet_index: u64) -> Option<u64> {
        Some(packet_index * PACKET_BYTES)
    }

    fn predicted_duration(&self) -> Option<f64> {
        self.identified
            .then(|| (self.total_packets * FRAMES_PER_PACKET as u64) as f64 / FRAME_RATE)
    }

    fn total_predicted_frames(&self) -> Option<u64> {
        Some(self.total_packets * FRAMES_PER_PACKET as u64)
    }

    fn availability(&self, loaded_bytes: (u64, u64)) -> (f64, f64) {
        let seconds_per_byte = (FRAMES_PER_PACKET as f64 / FRAME_RATE) / PACKET_BYTES as f64;
        let start = loaded_bytes.0 as f64 * seconds_per_byte;
        let loaded = (loaded_bytes.1 + 1 - loaded_bytes.0) as f64 * seconds_per_byte;
        (start, loaded)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// In-memory transport driven by the test: nothing is delivered until
/// [`push`](Self::push) is called.
pub struct ScriptedTransport {
    data: Bytes,
    cursor: Mutex<u64>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    seeks: Mutex<Vec<u64>>,
    cancelled: AtomicBool,
    calls: CallLog,
}

impl ScriptedTransport {
    pub fn new(len: u64, calls: CallLog) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::from(vec![0u8; len as usize]),
            cursor: Mutex::new(0),
            listener: Mutex::new(None),
            seeks: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            calls,
        })
    }

    /// Deliver the next `len` bytes from the cursor.
    pub fn push(&self, len: u64) {
        let (start, end) = {
            let mut cursor = self.cursor.lock();
            let start = *cursor;
            let end = (start + len).min(self.data.len() as u64);
            *cursor = end;
            (start, end)
        };
        if start == end {
            return;
        }
        let event = TransportEvent::Data {
            offset: start,
            bytes: self.data.slice(start as usize..end as usize),
            progress: Some(end as f64 / self.data.len() as f64),
            total_bytes_expected: Some(self.data.len() as u64),
        };
        self.emit(event);
    }

    /// Deliver everything left and report the end.
    pub fn push_all(&self) {
        self.push(self.data.len() as u64);
        self.finish();
    }

    /// Report the end of the current read at the cursor.
    pub fn finish(&self) {
        let end_offset = *self.cursor.lock();
        self.emit(TransportEvent::Finished { end_offset });
    }

    pub fn fail(&self, message: &str) {
        self.emit(TransportEvent::Failed(message.to_string()));
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.seeks.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_transport_event(event);
        }
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, listener: Arc<dyn TransportListener>) -> BridgeResult<()> {
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn seek_to(&self, byte_offset: u64) {
        self.seeks.lock().push(byte_offset);
        *self.cursor.lock() = byte_offset;
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.calls.lock().push("transport.cancel");
        self.listener.lock().take();
    }
}

/// Transport that refuses to start.
pub struct UnreachableTransport;

impl Transport for UnreachableTransport {
    fn start(&self, _listener: Arc<dyn TransportListener>) -> BridgeResult<()> {
        Err(BridgeError::NotAvailable("connection refused".into()))
    }

    fn seek_to(&self, _byte_offset: u64) {}

    fn cancel(&self) {}
}

// ============================================================================
// Sink
// ============================================================================

/// Sink that captures completions until the test fires them.
pub struct ManualSink {
    completions: Mutex<Vec<BufferCompletion>>,
    scheduled: Mutex<u64>,
    playing: AtomicBool,
    rate: Mutex<f32>,
    calls: CallLog,
}

impl ManualSink {
    pub fn new(calls: CallLog) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(Vec::new()),
            scheduled: Mutex::new(0),
            playing: AtomicBool::new(false),
            rate: Mutex::new(1.0),
            calls,
        })
    }

    /// Total buffers ever scheduled.
    pub fn scheduled(&self) -> u64 {
        *self.scheduled.lock()
    }

    pub fn queued(&self) -> usize {
        self.completions.lock().len()
    }

    pub fn rate(&self) -> f32 {
        *self.rate.lock()
    }

    /// Fire every captured completion, as if the sink rendered them.
    pub fn complete_all(&self) {
        let drained: Vec<_> = self.completions.lock().drain(..).collect();
        for completion in drained {
            completion();
        }
    }
}

impl PlaybackSink for ManualSink {
    fn schedule(&self, _buffer: PcmBuffer, on_complete: BufferCompletion) -> BridgeResult<()> {
        self.completions.lock().push(on_complete);
        *self.scheduled.lock() += 1;
        Ok(())
    }

    fn render_position(&self) -> Option<f64> {
        None
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
        self.calls.lock().push("sink.stop");
        self.complete_all();
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn set_rate(&self, rate: f32) -> BridgeResult<()> {
        *self.rate.lock() = rate;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Await `future`, failing the test after two seconds.
pub async fn within<F: Future>(future: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(2), future).await {
        Ok(output) => output,
        Err(_) => panic!("future did not complete within 2s"),
    }
}
