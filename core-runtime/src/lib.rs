//! # Core Runtime Module
//!
//! Foundational infrastructure shared by the streaming pipeline:
//! - Stream identity and the values published about a stream
//! - The typed update hub sessions publish through
//! - Event bus system
//! - Logging and tracing infrastructure
//!
//! ## Overview
//!
//! Nothing in this crate knows how audio is fetched or decoded. It defines
//! what a stream *is* from the outside ([`stream::StreamKey`] and its
//! published state) and how that state reaches observers, either as
//! callbacks ([`observers::PlaybackUpdates`]) or as an async broadcast
//! stream ([`events::EventBus`]).

pub mod error;
pub mod events;
pub mod logging;
pub mod observers;
pub mod stream;

pub use error::{Error, Result};
pub use observers::{PlaybackUpdates, SubscriptionId};
pub use stream::{AvailabilityRange, Needle, PlayingStatus, StreamKey};
