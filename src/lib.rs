//! Umbrella crate for the streaming pipeline workspace.
//!
//! Re-exports the workspace crates so host applications can depend on a
//! single package and pick transports through features:
//!
//! - `desktop-transports` (default): [`bridge_desktop::FileTransport`]
//! - `http-transport`: additionally [`bridge_desktop::HttpTransport`]

pub use bridge_traits;
pub use core_playback;
pub use core_runtime;

#[cfg(feature = "desktop-transports")]
pub use bridge_desktop;
