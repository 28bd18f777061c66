//! Decoder bridge trait and supporting audio types.
//!
//! The decoder is a black box that parses container/codec bytes and produces
//! PCM frames. The core feeds it bytes through [`StreamDecoder::feed`] and
//! pulls frames by packet index through [`StreamDecoder::decode`]; everything
//! format-specific (packet tables, byte offsets, duration prediction) stays
//! behind this trait.

use std::time::Duration;

use crate::error::Result;

/// Format facts a decoder reports once it has parsed enough of the stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderFormat {
    /// Output frames per second (sample rate).
    pub frame_rate: f64,
    /// Decoded frames contained in one codec packet.
    pub frames_per_packet: u32,
    /// Number of interleaved channels in decoded buffers.
    pub channels: u16,
}

impl DecoderFormat {
    /// Create a new format description.
    pub fn new(frame_rate: f64, frames_per_packet: u32, channels: u16) -> Self {
        Self {
            frame_rate,
            frames_per_packet,
            channels,
        }
    }

    /// Playback length of `frames` decoded frames in seconds.
    pub fn seconds_for_frames(&self, frames: u64) -> f64 {
        if self.frame_rate <= 0.0 {
            return 0.0;
        }
        frames as f64 / self.frame_rate
    }
}

/// Block of decoded PCM frames handed to the playback sink.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples in the range `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Number of frames represented by `samples` (frame = sample per channel).
    pub frames: usize,
    /// Channel count of the interleaved samples.
    pub channels: u16,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, frames: usize, channels: u16) -> Self {
        Self {
            samples,
            frames,
            channels,
        }
    }

    /// Silent buffer of `frames` frames.
    pub fn silence(frames: usize, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels as usize], frames, channels)
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.samples.is_empty()
    }

    /// Playback length at the given frame rate.
    pub fn duration(&self, frame_rate: f64) -> Duration {
        if frame_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / frame_rate)
    }
}

/// Out-of-band facts the decoder learned while parsing fed bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecoderSignal {
    /// The container format was identified; sent once.
    FormatIdentified(DecoderFormat),
    /// Byte length of the most recently parsed codec packet.
    PacketStride(u64),
}

/// Outcome of one decode request.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStep {
    /// Frames starting at the requested packet.
    Frames {
        buffer: PcmBuffer,
        /// Packets consumed to produce `buffer`.
        packets_consumed: u64,
    },
    /// The requested packet has not been parsed yet.
    ///
    /// `wanted_offset` is the byte offset the decoder needs next, when it can
    /// tell.
    NeedData { wanted_offset: Option<u64> },
    /// The requested packet lies past the last packet of a finished input.
    EndOfStream,
}

/// Stateful decoder driven by the streaming pipeline.
///
/// All methods are called from a single serial context; implementations need
/// not be `Sync`.
pub trait StreamDecoder: Send {
    /// Parse `data`, which starts at absolute byte `offset` of the resource.
    fn feed(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Total resource length, reported once by the transport.
    fn set_expected_length(&mut self, _total_bytes: u64) {}

    /// Every byte up to the end of the resource has been fed.
    ///
    /// Bytes fed after this call (following a seek that restarted the
    /// transport) reopen the input.
    fn finish_input(&mut self) {}

    /// Drain signals produced by the last `feed`/`decode` calls.
    fn take_signals(&mut self) -> Vec<DecoderSignal>;

    /// Decode up to `max_frames` frames starting at `packet_index`.
    fn decode(&mut self, packet_index: u64, max_frames: usize) -> Result<DecodeStep>;

    /// Byte offset where `packet_index` begins, when the decoder can map it.
    fn byte_offset_for_packet(&self, packet_index: u64) -> Option<u64>;

    /// Predicted total playback length in seconds.
    fn predicted_duration(&self) -> Option<f64>;

    /// Predicted total number of decoded frames.
    fn total_predicted_frames(&self) -> Option<u64>;

    /// Convert the loaded byte range into `(start_needle, loaded_duration)`
    /// seconds.
    fn availability(&self, loaded_bytes: (u64, u64)) -> (f64, f64);
}
