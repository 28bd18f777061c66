//! # Stream Identity & Published State
//!
//! Value types shared by the playback core and its observers: the key that
//! isolates one audio source from every other concurrently playing source,
//! and the state the core publishes about it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed of the locator hash.
const LOCATOR_HASH_SEED: u64 = 8742;

/// Low 56 bits of the running value kept before each fold.
const LOCATOR_HASH_MASK: u64 = 0x00ff_ffff_ffff_ffff;

/// Stable identifier of one logical audio source.
///
/// Derived from the source locator (URL or path), so the same locator always
/// maps to the same key across sessions and restarts.
///
/// # Example
///
/// ```rust
/// use core_runtime::stream::StreamKey;
///
/// let a = StreamKey::from_locator("https://example.com/episode.mp3");
/// let b = StreamKey::from_locator("https://example.com/episode.mp3");
/// assert_eq!(a, b);
/// assert!(a.as_str().starts_with("audio_"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Derive the key for a locator.
    pub fn from_locator(locator: &str) -> Self {
        Self(format!("audio_{}", locator_hash(locator)))
    }

    /// Wrap an already derived key (e.g. one read back from storage).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn locator_hash(locator: &str) -> u64 {
    locator.bytes().fold(LOCATOR_HASH_SEED, |acc, byte| {
        127u64
            .wrapping_mul(acc & LOCATOR_HASH_MASK)
            .wrapping_add(u64::from(byte))
    })
}

/// Playback position in seconds.
pub type Needle = f64;

/// Sentinel for "no valid position yet".
pub const INVALID_NEEDLE: Needle = -1.0;

/// Returns `true` if `needle` is a usable position.
pub fn is_valid_needle(needle: Needle) -> bool {
    needle.is_finite() && needle >= 0.0
}

// ============================================================================
// Playing Status
// ============================================================================

/// User-facing playback status of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayingStatus {
    /// Not enough decoded audio to render.
    Buffering,
    Playing,
    Paused,
    /// The needle reached the end of the audio.
    Ended,
}

impl PlayingStatus {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Returns `true` if a play/pause toggle should resume playback.
    pub fn should_resume_on_toggle(&self) -> bool {
        matches!(self, Self::Paused | Self::Ended)
    }
}

// ============================================================================
// Availability Range
// ============================================================================

/// Currently known playable window of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AvailabilityRange {
    /// Needle at which the loaded bytes begin (non-zero after a far seek).
    pub starting_needle: Needle,
    /// Seconds of audio the network has delivered from `starting_needle`.
    pub duration_loaded_by_network: f64,
    /// Predicted total seconds of the stream.
    pub predicted_duration_to_load: f64,
    /// Whether decoded audio is in flight and the stream can render.
    pub is_playable: bool,
}

impl AvailabilityRange {
    pub fn new(
        starting_needle: Needle,
        duration_loaded_by_network: f64,
        predicted_duration_to_load: f64,
        is_playable: bool,
    ) -> Self {
        Self {
            starting_needle,
            duration_loaded_by_network,
            predicted_duration_to_load,
            is_playable,
        }
    }

    /// The initial "nothing known" range.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns `true` for the initial state (no start, nothing loaded).
    pub fn is_zero(&self) -> bool {
        self.starting_needle == 0.0 && self.duration_loaded_by_network == 0.0
    }

    /// Needle up to which audio has been loaded.
    pub fn loaded_until(&self) -> Needle {
        self.starting_needle + self.duration_loaded_by_network
    }

    /// Returns `true` if `needle` lies inside the loaded window.
    pub fn contains(&self, needle: Needle) -> bool {
        needle >= self.starting_needle && needle <= self.loaded_until()
    }

    /// Returns `true` once everything that is predicted has been loaded.
    pub fn is_completely_loaded(&self) -> bool {
        self.predicted_duration_to_load > 0.0
            && self.loaded_until() >= self.predicted_duration_to_load
    }
}
