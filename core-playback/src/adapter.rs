//! # Pull Decode Adapter
//!
//! Bridges the push-driven transport and the pull-driven scheduler around a
//! [`StreamDecoder`].
//!
//! Bytes arrive through [`on_transport_data`](PullDecodeAdapter::on_transport_data)
//! and pass through the [`ThrottledDeliveryController`]. The scheduler pulls
//! decoded frames with [`pull_frames`](PullDecodeAdapter::pull_frames), keyed by
//! the adapter's current packet index. A seek maps a needle to a packet and
//! byte offset and repositions delivery, refetching from the transport when
//! the bytes were never received.
//!
//! The adapter is owned by one session actor and never shared.

use std::sync::Arc;

use bridge_traits::decoder::{DecodeStep, DecoderFormat, DecoderSignal, PcmBuffer, StreamDecoder};
use bridge_traits::transport::{Transport, TransportListener};
use bridge_traits::BridgeError;
use bytes::Bytes;
use core_runtime::stream::StreamKey;
use tracing::{debug, info, trace};

use crate::error::{PlaybackError, Result};
use crate::throttle::{Delivery, SeekDelivery, ThrottledDeliveryController};

/// Decode attempts per pull while the throttle still has bytes to hand over.
const MAX_FEED_ROUNDS: usize = 4;

/// Result of one pull.
#[derive(Debug)]
pub enum PullOutcome {
    /// Decoded audio for the sink.
    Frames(PcmBuffer),
    /// Not enough bytes yet. Transient.
    NeedMoreData,
    /// The last packet was decoded.
    EndOfStream,
    /// The stream cannot continue.
    Fatal(PlaybackError),
}

pub struct PullDecodeAdapter {
    key: StreamKey,
    decoder: Box<dyn StreamDecoder>,
    throttle: ThrottledDeliveryController,
    transport: Arc<dyn Transport>,
    format: Option<DecoderFormat>,
    current_packet: u64,
    expected_length: Option<u64>,
    input_finished: bool,
    finish_signaled: bool,
    invalidated: bool,
}

impl PullDecodeAdapter {
    pub fn new(
        key: StreamKey,
        decoder: Box<dyn StreamDecoder>,
        transport: Arc<dyn Transport>,
        redelivery_floor: u64,
    ) -> Self {
        Self {
            key,
            decoder,
            throttle: ThrottledDeliveryController::new(redelivery_floor),
            transport,
            format: None,
            current_packet: 0,
            expected_length: None,
            input_finished: false,
            finish_signaled: false,
            invalidated: false,
        }
    }

    /// Start the transport, delivering its events to `listener`.
    pub fn start(&self, listener: Arc<dyn TransportListener>) -> Result<()> {
        self.transport
            .start(listener)
            .map_err(|e| PlaybackError::SourceUnavailable(e.to_string()))
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// `true` once the decoder identified the format.
    pub fn is_ready(&self) -> bool {
        self.format.is_some()
    }

    pub fn format(&self) -> Option<DecoderFormat> {
        self.format
    }

    pub fn current_packet(&self) -> u64 {
        self.current_packet
    }

    pub fn throttle(&self) -> &ThrottledDeliveryController {
        &self.throttle
    }

    pub fn predicted_duration(&self) -> Option<f64> {
        self.decoder
            .predicted_duration()
            .filter(|duration| duration.is_finite() && *duration > 0.0)
    }

    /// `(start_needle, loaded_duration)` of the received byte window.
    pub fn availability(&self) -> (f64, f64) {
        let store = self.throttle.store();
        if store.total_bytes() == 0 {
            return (0.0, 0.0);
        }
        self.decoder.availability(store.range())
    }

    // ------------------------------------------------------------------
    // Network side
    // ------------------------------------------------------------------

    /// Accept bytes the transport read at `offset`.
    ///
    /// Only bytes continuing the received window are kept: after a refetch,
    /// data still queued from the abandoned read lands elsewhere and is
    /// dropped. A chunk overlapping the window end keeps only its new tail.
    /// Only the first reported total length is forwarded to the decoder.
    pub fn on_transport_data(
        &mut self,
        offset: u64,
        bytes: Bytes,
        total_bytes_expected: Option<u64>,
    ) -> Result<()> {
        if self.invalidated {
            return Ok(());
        }

        let Some(bytes) = self.contiguous(offset, bytes) else {
            return Ok(());
        };

        if let (None, Some(total)) = (self.expected_length, total_bytes_expected) {
            self.expected_length = Some(total);
            self.decoder.set_expected_length(total);
            debug!(stream_key = %self.key, total_bytes = total, "Expected length known");
        }

        trace!(stream_key = %self.key, offset, len = bytes.len(), "Bytes received");
        match self.throttle.append(bytes) {
            Some(delivery) => self.feed(delivery),
            None => Ok(()),
        }
    }

    /// The transport read the resource to `end_offset`. Ignored unless the
    /// received window ends there.
    pub fn on_transport_finished(&mut self, end_offset: u64) {
        let window_end = self.throttle.store().next_offset();
        if end_offset != window_end {
            debug!(
                stream_key = %self.key,
                end_offset,
                window_end,
                "Ignoring end of an abandoned read"
            );
            return;
        }
        debug!(stream_key = %self.key, end_offset, "Transport finished");
        self.input_finished = true;
        self.signal_finish_if_drained();
    }

    /// The part of `bytes` (read at `offset`) that extends the window.
    fn contiguous(&self, offset: u64, bytes: Bytes) -> Option<Bytes> {
        let next = self.throttle.store().next_offset();
        let end = offset + bytes.len() as u64;
        if offset > next || end <= next {
            debug!(
                stream_key = %self.key,
                offset,
                len = bytes.len(),
                expected = next,
                "Dropping bytes outside the received window"
            );
            return None;
        }
        Some(bytes.slice((next - offset) as usize..))
    }

    // ------------------------------------------------------------------
    // Decode side
    // ------------------------------------------------------------------

    /// Decode up to `max_frames` frames at the current packet.
    pub fn pull_frames(&mut self, max_frames: usize) -> PullOutcome {
        if self.invalidated {
            return PullOutcome::Fatal(PlaybackError::SessionClosed);
        }
        if self.format.is_none() {
            return PullOutcome::NeedMoreData;
        }

        for _ in 0..MAX_FEED_ROUNDS {
            self.signal_finish_if_drained();

            let step = match self.decoder.decode(self.current_packet, max_frames) {
                Ok(step) => step,
                Err(err) => return PullOutcome::Fatal(map_decoder_error(err)),
            };
            self.drain_signals();

            match step {
                DecodeStep::Frames {
                    buffer,
                    packets_consumed,
                } => {
                    self.current_packet += packets_consumed;
                    return PullOutcome::Frames(buffer);
                }
                DecodeStep::EndOfStream => return PullOutcome::EndOfStream,
                DecodeStep::NeedData { wanted_offset } => {
                    let offset = wanted_offset.unwrap_or_else(|| self.throttle.resume_offset());
                    let deliveries = self.throttle.on_decoder_wants_offset(offset);
                    if deliveries.is_empty() {
                        trace!(stream_key = %self.key, offset, "Decoder waiting for bytes");
                        return PullOutcome::NeedMoreData;
                    }
                    for delivery in deliveries {
                        if let Err(err) = self.feed(delivery) {
                            return PullOutcome::Fatal(err);
                        }
                    }
                }
            }
        }

        PullOutcome::NeedMoreData
    }

    /// Move decoding to `needle` seconds and return the needle actually
    /// applied (clamped to `[0, duration]`).
    pub fn seek(&mut self, needle: f64) -> Result<f64> {
        let format = self.format.ok_or(PlaybackError::NotReady)?;
        let duration = self.predicted_duration().ok_or(PlaybackError::NotReady)?;

        let clamped = needle.clamp(0.0, duration);
        if clamped != needle {
            let out_of_range = PlaybackError::SeekOutOfRange {
                requested: needle,
                duration,
            };
            debug!(stream_key = %self.key, error = %out_of_range, "Seek clamped");
        }

        let total_frames = self
            .decoder
            .total_predicted_frames()
            .map(|frames| frames as f64)
            .unwrap_or(duration * format.frame_rate);
        let frames = total_frames * (clamped / duration);
        let packet = (frames / f64::from(format.frames_per_packet.max(1))).floor() as u64;
        self.current_packet = packet;

        let Some(offset) = self.decoder.byte_offset_for_packet(packet) else {
            debug!(stream_key = %self.key, packet, "No byte offset for packet yet");
            return Ok(clamped);
        };

        match self.throttle.on_seek(offset) {
            SeekDelivery::Refetch { offset } => {
                info!(stream_key = %self.key, offset, "Refetching from transport");
                self.input_finished = false;
                self.finish_signaled = false;
                self.transport.seek_to(offset);
            }
            SeekDelivery::Deliver(delivery) => self.feed(delivery)?,
            SeekDelivery::Pending => {}
        }

        debug!(stream_key = %self.key, needle = clamped, packet, offset, "Seek applied");
        Ok(clamped)
    }

    /// Cancel the transport and drop every received byte. Idempotent.
    pub fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        self.invalidated = true;
        self.transport.cancel();
        self.throttle.clear();
        debug!(stream_key = %self.key, "Adapter invalidated");
    }

    fn feed(&mut self, delivery: Delivery) -> Result<()> {
        let result = self.decoder.feed(delivery.offset, &delivery.data);
        self.drain_signals();
        result.map_err(map_decoder_error)
    }

    fn signal_finish_if_drained(&mut self) {
        if self.input_finished && !self.finish_signaled && !self.throttle.has_pending_delivery() {
            self.finish_signaled = true;
            self.decoder.finish_input();
        }
    }

    fn drain_signals(&mut self) {
        for signal in self.decoder.take_signals() {
            match signal {
                DecoderSignal::FormatIdentified(format) => {
                    if self.format.is_none() {
                        info!(
                            stream_key = %self.key,
                            frame_rate = format.frame_rate,
                            frames_per_packet = format.frames_per_packet,
                            "Format identified"
                        );
                        self.format = Some(format);
                        self.throttle.on_format_identified();
                    }
                }
                DecoderSignal::PacketStride(stride) => self.throttle.on_packet_stride(stride),
            }
        }
    }
}

fn map_decoder_error(err: BridgeError) -> PlaybackError {
    match err {
        BridgeError::UnsupportedFormat(message) => PlaybackError::FormatUnsupported(message),
        other => PlaybackError::DecoderFatal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use mockall::predicate::eq;
    use parking_lot::Mutex;

    mock! {
        Transport {}

        impl Transport for Transport {
            fn start(&self, listener: Arc<dyn TransportListener>) -> BridgeResult<()>;
            fn seek_to(&self, byte_offset: u64);
            fn cancel(&self);
        }
    }

    const PACKET_BYTES: u64 = 100;
    const FRAMES_PER_PACKET: u32 = 10;

    /// Constant-bitrate decoder: packet `n` occupies bytes
    /// `[n * 100, (n + 1) * 100)` and decodes to 10 frames at 100 fps.
    struct CbrDecoder {
        total_packets: u64,
        fed: Arc<Mutex<Vec<(u64, usize)>>>,
        available_from: u64,
        available_to: u64,
        signals: Vec<DecoderSignal>,
        identified: bool,
        finished: bool,
        fail_with: Option<BridgeError>,
    }

    impl CbrDecoder {
        fn new(total_packets: u64) -> (Self, Arc<Mutex<Vec<(u64, usize)>>>) {
            let fed = Arc::new(Mutex::new(Vec::new()));
            let decoder = Self {
                total_packets,
                fed: fed.clone(),
                available_from: 0,
                available_to: 0,
                signals: Vec::new(),
                identified: false,
                finished: false,
                fail_with: None,
            };
            (decoder, fed)
        }
    }

    impl StreamDecoder for CbrDecoder {
        fn feed(&mut self, offset: u64, data: &[u8]) -> BridgeResult<()> {
            self.fed.lock().push((offset, data.len()));
            if offset != self.available_to {
                self.available_from = offset;
            }
            self.available_to = offset + data.len() as u64;
            self.finished = false;
            if !self.identified {
                self.identified = true;
                self.signals.push(DecoderSignal::FormatIdentified(DecoderFormat::new(
                    100.0,
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
            if let Some(err) = self.fail_with.take() {
                return Err(err);
            }
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
                .then(|| (self.total_packets * FRAMES_PER_PACKET as u64) as f64 / 100.0)
        }

        fn total_predicted_frames(&self) -> Option<u64> {
            Some(self.total_packets * FRAMES_PER_PACKET as u64)
        }

        fn availability(&self, loaded_bytes: (u64, u64)) -> (f64, f64) {
            let seconds_per_byte = 0.1 / PACKET_BYTES as f64;
            let start = loaded_bytes.0 as f64 * seconds_per_byte;
            let loaded = (loaded_bytes.1 + 1 - loaded_bytes.0) as f64 * seconds_per_byte;
            (start, loaded)
        }
    }

    fn adapter_with(
        decoder: CbrDecoder,
        transport: MockTransport,
    ) -> PullDecodeAdapter {
        PullDecodeAdapter::new(
            StreamKey::new("audio_test"),
            Box::new(decoder),
            Arc::new(transport),
            0,
        )
    }

    fn bytes(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[test]
    fn test_not_ready_until_format_identified() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut adapter = adapter_with(decoder, MockTransport::new());

        assert!(!adapter.is_ready());
        assert!(matches!(adapter.pull_frames(10), PullOutcome::NeedMoreData));
        assert!(matches!(adapter.seek(1.0), Err(PlaybackError::NotReady)));

        adapter.on_transport_data(0, bytes(300), Some(1000)).unwrap();
        assert!(adapter.is_ready());
        assert_eq!(adapter.throttle().state().largest_packet_stride, PACKET_BYTES);
    }

    #[test]
    fn test_pull_advances_packet_index() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(300), None).unwrap();

        for expected in 1..=3 {
            assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
            assert_eq!(adapter.current_packet(), expected);
        }
        assert!(matches!(adapter.pull_frames(10), PullOutcome::NeedMoreData));
        assert_eq!(adapter.current_packet(), 3);
    }

    #[test]
    fn test_throttled_bytes_are_delivered_on_demand() {
        let (decoder, fed) = CbrDecoder::new(10);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(100), None).unwrap();
        adapter.on_transport_data(100, bytes(100), None).unwrap();
        assert_eq!(fed.lock().len(), 1);

        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
        assert_eq!(*fed.lock(), vec![(0, 100), (100, 100)]);
    }

    #[test]
    fn test_end_of_stream_after_last_packet() {
        let (decoder, _) = CbrDecoder::new(2);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(200), Some(200)).unwrap();
        adapter.on_transport_finished(200);

        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
        assert!(matches!(adapter.pull_frames(10), PullOutcome::EndOfStream));
    }

    #[test]
    fn test_seek_inside_window_feeds_from_packet_offset() {
        let (decoder, fed) = CbrDecoder::new(100);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(1000), None).unwrap();

        // 10s total, 0.35s lands in packet 3.
        let applied = adapter.seek(0.35).unwrap();
        assert_eq!(applied, 0.35);
        assert_eq!(adapter.current_packet(), 3);
        assert_eq!(fed.lock().last(), Some(&(300, 700)));
        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
    }

    #[test]
    fn test_seek_outside_window_asks_transport_to_refetch() {
        let (decoder, _) = CbrDecoder::new(100);
        let mut transport = MockTransport::new();
        transport.expect_seek_to().with(eq(5000)).times(1).return_const(());
        let mut adapter = adapter_with(decoder, transport);
        adapter.on_transport_data(0, bytes(1000), None).unwrap();

        adapter.seek(5.0).unwrap();
        assert_eq!(adapter.current_packet(), 50);
        assert!(adapter.throttle().store().is_empty());
        assert!(matches!(adapter.pull_frames(10), PullOutcome::NeedMoreData));

        adapter.on_transport_data(5000, bytes(200), None).unwrap();
        assert_eq!(adapter.throttle().store().range(), (5000, 5199));
        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
    }

    #[test]
    fn test_abandoned_read_is_ignored_after_refetch() {
        let (decoder, fed) = CbrDecoder::new(100);
        let mut transport = MockTransport::new();
        transport.expect_seek_to().with(eq(5000)).times(1).return_const(());
        let mut adapter = adapter_with(decoder, transport);
        adapter.on_transport_data(0, bytes(1000), Some(10_000)).unwrap();
        adapter.seek(5.0).unwrap();
        let fed_before = fed.lock().len();

        // Still queued from the read that started at zero.
        adapter.on_transport_data(1000, bytes(100), None).unwrap();
        adapter.on_transport_finished(1100);
        assert!(adapter.throttle().store().is_empty());
        assert!(!adapter.input_finished);
        assert!(matches!(adapter.pull_frames(10), PullOutcome::NeedMoreData));
        assert_eq!(fed.lock().len(), fed_before);

        adapter.on_transport_data(5000, bytes(100), None).unwrap();
        assert!(matches!(adapter.pull_frames(10), PullOutcome::Frames(_)));
        assert_eq!(fed.lock().last(), Some(&(5000, 100)));
        // The new read has not reached the end of the resource.
        assert!(matches!(adapter.pull_frames(10), PullOutcome::NeedMoreData));
    }

    #[test]
    fn test_overlapping_bytes_keep_only_new_tail() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(300), None).unwrap();

        adapter.on_transport_data(250, bytes(100), None).unwrap();
        assert_eq!(adapter.throttle().store().range(), (0, 349));

        // Entirely old, and a gap past the window end.
        adapter.on_transport_data(100, bytes(100), None).unwrap();
        adapter.on_transport_data(500, bytes(100), None).unwrap();
        assert_eq!(adapter.throttle().store().range(), (0, 349));
    }

    #[test]
    fn test_finish_counts_only_at_window_end() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(300), None).unwrap();

        adapter.on_transport_finished(1000);
        assert!(!adapter.input_finished);
        adapter.on_transport_finished(300);
        assert!(adapter.input_finished);
    }

    #[test]
    fn test_seek_is_clamped_to_duration() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut transport = MockTransport::new();
        // Packet 10 starts at byte 1000, one past the received window.
        transport.expect_seek_to().with(eq(1000)).times(1).return_const(());
        let mut adapter = adapter_with(decoder, transport);
        adapter.on_transport_data(0, bytes(1000), None).unwrap();

        assert_eq!(adapter.seek(-3.0).unwrap(), 0.0);
        assert_eq!(adapter.seek(99.0).unwrap(), 1.0);
        assert_eq!(adapter.current_packet(), 10);
    }

    #[test]
    fn test_expected_length_is_honored_once() {
        struct LengthProbe(Arc<Mutex<Vec<u64>>>);
        impl StreamDecoder for LengthProbe {
            fn feed(&mut self, _: u64, _: &[u8]) -> BridgeResult<()> {
                Ok(())
            }
            fn set_expected_length(&mut self, total_bytes: u64) {
                self.0.lock().push(total_bytes);
            }
            fn take_signals(&mut self) -> Vec<DecoderSignal> {
                Vec::new()
            }
            fn decode(&mut self, _: u64, _: usize) -> BridgeResult<DecodeStep> {
                Ok(DecodeStep::NeedData { wanted_offset: None })
            }
            fn byte_offset_for_packet(&self, _: u64) -> Option<u64> {
                None
            }
            fn predicted_duration(&self) -> Option<f64> {
                None
            }
            fn total_predicted_frames(&self) -> Option<u64> {
                None
            }
            fn availability(&self, _: (u64, u64)) -> (f64, f64) {
                (0.0, 0.0)
            }
        }

        let lengths = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = PullDecodeAdapter::new(
            StreamKey::new("audio_len"),
            Box::new(LengthProbe(lengths.clone())),
            Arc::new(MockTransport::new()),
            0,
        );
        adapter.on_transport_data(0, bytes(10), Some(1000)).unwrap();
        adapter.on_transport_data(10, bytes(10), Some(2000)).unwrap();
        assert_eq!(*lengths.lock(), vec![1000]);
    }

    #[test]
    fn test_decoder_errors_are_fatal() {
        let (mut decoder, _) = CbrDecoder::new(10);
        decoder.fail_with = Some(BridgeError::UnsupportedFormat("xm".into()));
        let mut adapter = adapter_with(decoder, MockTransport::new());
        adapter.on_transport_data(0, bytes(100), None).unwrap();

        match adapter.pull_frames(10) {
            PullOutcome::Fatal(err) => assert!(err.is_format_error()),
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn test_invalidate_cancels_transport_once() {
        let (decoder, _) = CbrDecoder::new(10);
        let mut transport = MockTransport::new();
        transport.expect_cancel().times(1).return_const(());
        let mut adapter = adapter_with(decoder, transport);
        adapter.on_transport_data(0, bytes(100), None).unwrap();

        adapter.invalidate();
        adapter.invalidate();
        assert!(adapter.throttle().store().is_empty());
        assert!(matches!(
            adapter.pull_frames(10),
            PullOutcome::Fatal(PlaybackError::SessionClosed)
        ));
    }

    #[test]
    fn test_availability_maps_loaded_window() {
        let (decoder, _) = CbrDecoder::new(100);
        let mut adapter = adapter_with(decoder, MockTransport::new());
        assert_eq!(adapter.availability(), (0.0, 0.0));

        adapter.on_transport_data(0, bytes(1000), None).unwrap();
        let (start, loaded) = adapter.availability();
        assert_eq!(start, 0.0);
        assert!((loaded - 1.0).abs() < 1e-9);
    }
}
