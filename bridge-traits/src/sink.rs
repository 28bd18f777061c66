//! Playback sink bridge trait.
//!
//! The sink is the platform audio engine (player node, output stream, ...).
//! It accepts decoded buffers with a per-buffer completion callback and
//! exposes a render clock. Completion callbacks may fire on any thread,
//! including synchronously from inside [`PlaybackSink::stop`].

use crate::decoder::PcmBuffer;
use crate::error::Result;

/// Invoked once when a scheduled buffer finished rendering or was discarded.
pub type BufferCompletion = Box<dyn FnOnce() + Send + 'static>;

pub trait PlaybackSink: Send + Sync {
    /// Queue `buffer` after every previously scheduled buffer.
    fn schedule(&self, buffer: PcmBuffer, on_complete: BufferCompletion) -> Result<()>;

    /// Seconds rendered since the sink was last started after a stop.
    ///
    /// May be negative around start/stop transitions; `None` when the sink
    /// has no running clock.
    fn render_position(&self) -> Option<f64>;

    /// Start or resume rendering.
    fn start(&self) -> Result<()>;

    /// Pause rendering, keeping scheduled buffers.
    fn pause(&self);

    /// Stop rendering and discard every scheduled buffer.
    fn stop(&self);

    /// Whether the sink is currently rendering.
    fn is_playing(&self) -> bool;

    /// Change the playback rate (1.0 = normal speed).
    fn set_rate(&self, rate: f32) -> Result<()>;
}
