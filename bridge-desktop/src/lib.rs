//! # Desktop Bridge Implementations
//!
//! Byte transports for desktop hosts (macOS, Windows, Linux) built on Tokio.
//!
//! ## Overview
//!
//! - [`FileTransport`] streams a local file with `tokio::fs`
//! - [`HttpTransport`] streams an `http(s)` resource with `reqwest`, using
//!   `Range` requests for seeks and exponential backoff on interruptions
//!
//! Both restart at an arbitrary byte offset on `seek_to`, and neither delivers
//! events of an abandoned read once `seek_to` or `cancel` has returned.
//!
//! ## Feature Flags
//!
//! - `http`: Enable [`HttpTransport`] (pulls in `reqwest`)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::FileTransport;
//! use core_playback::StreamRegistry;
//!
//! let transport = Arc::new(FileTransport::new("/music/song.flac"));
//! registry.open("/music/song.flac", decoder, transport, sink)?;
//! ```

mod file;
#[cfg(feature = "http")]
mod http;
mod pump;

pub use file::{FileTransport, FileTransportConfig};
#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportConfig};
