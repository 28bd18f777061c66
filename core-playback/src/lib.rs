//! # Streaming Playback Core
//!
//! Turns bytes pushed by a transport into decoded audio pulled by a playback
//! sink, and publishes where playback stands.
//!
//! ## Overview
//!
//! Per stream, bottom-up:
//! - [`byte_window`] - contiguous window of received bytes
//! - [`throttle`] - decides which bytes reach the decoder and when
//! - [`adapter`] - bridges push-driven bytes and pull-driven decoding
//! - [`scheduler`] - keeps the sink fed and derives needle/status
//! - [`availability`] - debounces availability updates
//!
//! A [`StreamSession`] runs one scheduler on its own tokio task; the
//! [`StreamRegistry`] keeps one session per [`StreamKey`](core_runtime::stream::StreamKey).
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use core_playback::{StreamRegistry, StreamingConfig};
//! use core_runtime::PlaybackUpdates;
//!
//! let updates = Arc::new(PlaybackUpdates::new());
//! updates.attach_status(|key, status| {
//!     println!("{key}: {status:?}");
//!     std::ops::ControlFlow::Continue(())
//! });
//!
//! let registry = StreamRegistry::new(StreamingConfig::default(), updates);
//! let session = registry.open(url, decoder, transport, sink)?;
//! session.play()?;
//! session.seek(42.0).await?;
//! ```

pub mod adapter;
pub mod availability;
pub mod byte_window;
pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod throttle;

pub use adapter::{PullDecodeAdapter, PullOutcome};
pub use availability::{debounce, AvailabilityModel};
pub use byte_window::{ByteChunk, ByteWindowStore};
pub use config::{SchedulerStats, StreamingConfig};
pub use error::{PlaybackError, Result};
pub use registry::StreamRegistry;
pub use scheduler::{SchedulerMode, StreamingPlaybackScheduler};
pub use session::{SessionCommand, SessionId, StreamSession};
pub use throttle::{Delivery, DeliveryState, SeekDelivery, ThrottledDeliveryController};
