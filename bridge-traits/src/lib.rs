//! # Host Bridge Traits
//!
//! Contracts between the streaming core and the collaborators it drives but
//! does not implement.
//!
//! ## Overview
//!
//! The core owns buffering, throttling and scheduling. Everything that touches
//! a platform API or a codec lives behind one of these traits:
//!
//! - [`Transport`](transport::Transport) - pushes encoded bytes (HTTP, file)
//!   and restarts at a byte offset on request
//! - [`StreamDecoder`](decoder::StreamDecoder) - turns fed bytes into PCM
//!   frames addressed by packet index
//! - [`PlaybackSink`](sink::PlaybackSink) - renders scheduled buffers and
//!   reports a render clock
//! - [`LoggerSink`](log::LoggerSink) - mirrors structured logs to the host
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map platform failures onto the closest variant; the core treats
//! [`BridgeError::UnsupportedFormat`] and [`BridgeError::Decoder`] coming
//! out of a decoder as fatal for the stream.
//!
//! ## Thread Safety
//!
//! Transports, sinks and logger sinks are shared across tasks and must be
//! `Send + Sync`. Decoders are owned by a single stream executor and only need
//! `Send`.

pub mod decoder;
pub mod error;
pub mod log;
pub mod sink;
pub mod transport;

pub use error::BridgeError;

// Re-export commonly used types
pub use decoder::{DecodeStep, DecoderFormat, DecoderSignal, PcmBuffer, StreamDecoder};
pub use log::{LogEntry, LogLevel, LoggerSink, MemoryLogger};
pub use sink::{BufferCompletion, PlaybackSink};
pub use transport::{Transport, TransportEvent, TransportListener};
