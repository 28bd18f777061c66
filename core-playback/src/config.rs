//! # Streaming Configuration
//!
//! Tunables of the scheduling and delivery pipeline, plus the statistics a
//! session exposes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Streaming pipeline configuration.
///
/// Controls when the scheduler stops polling, how large pulled buffers are,
/// how often the session ticks and how eagerly availability is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Buffers scheduled from polling after which the scheduler switches to
    /// reacting on completions, even if the in-flight threshold was not met.
    ///
    /// Default: 300.
    #[serde(default = "default_max_poll_buffer_count")]
    pub max_poll_buffer_count: u32,

    /// In-flight buffers above which the stream is considered filled.
    ///
    /// Also the refill level at which a stalled or seeked stream that was
    /// playing resumes.
    ///
    /// Default: 1.
    #[serde(default = "default_min_buffers_to_be_playable")]
    pub min_buffers_to_be_playable: u32,

    /// Frames requested per pull.
    ///
    /// Default: 8192 frames (~186ms at 44.1kHz).
    #[serde(default = "default_pcm_buffer_frames")]
    pub pcm_buffer_frames: usize,

    /// Period of the session tick (polling, needle and status updates).
    ///
    /// Default: one 32nd of a default buffer at 44.1kHz (~5.8ms).
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Seconds the loaded duration must grow before availability is
    /// republished.
    ///
    /// Default: 1.0.
    #[serde(default = "default_availability_min_increment")]
    pub availability_min_increment: f64,

    /// Granularity in seconds at which duration changes are published.
    ///
    /// Default: 1.0.
    #[serde(default = "default_duration_debounce")]
    pub duration_debounce: f64,

    /// Minimum bytes re-delivered when the decoder asks again for an offset
    /// it already received.
    ///
    /// The effective amount is the larger of this and the largest packet
    /// stride the decoder reported.
    ///
    /// Default: 4 KB.
    #[serde(default = "default_redelivery_floor_bytes")]
    pub redelivery_floor_bytes: u64,

    /// Default: 30 seconds.
    #[serde(default = "default_skip_forward")]
    pub skip_forward: Duration,

    /// Default: 15 seconds.
    #[serde(default = "default_skip_backward")]
    pub skip_backward: Duration,

    /// Default: 1/32.
    #[serde(default = "default_min_rate")]
    pub min_rate: f32,

    /// Default: 32.
    #[serde(default = "default_max_rate")]
    pub max_rate: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_poll_buffer_count: default_max_poll_buffer_count(),
            min_buffers_to_be_playable: default_min_buffers_to_be_playable(),
            pcm_buffer_frames: default_pcm_buffer_frames(),
            tick_interval: default_tick_interval(),
            availability_min_increment: default_availability_min_increment(),
            duration_debounce: default_duration_debounce(),
            redelivery_floor_bytes: default_redelivery_floor_bytes(),
            skip_forward: default_skip_forward(),
            skip_backward: default_skip_backward(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
        }
    }
}

impl StreamingConfig {
    /// Create a configuration optimized for low latency.
    ///
    /// - Smaller pulls
    /// - Earlier switch to reactive scheduling
    pub fn low_latency() -> Self {
        Self {
            max_poll_buffer_count: 64,
            pcm_buffer_frames: 2048, // ~46ms
            tick_interval: Duration::from_micros(1451),
            availability_min_increment: 0.5,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for stability on slow links.
    ///
    /// - Larger pulls
    /// - More buffers before a stalled stream resumes
    pub fn high_quality() -> Self {
        Self {
            min_buffers_to_be_playable: 4,
            pcm_buffer_frames: 16384, // ~372ms
            redelivery_floor_bytes: 16 * 1024,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.pcm_buffer_frames == 0 {
            return Err("pcm_buffer_frames must be > 0".to_string());
        }

        if self.min_buffers_to_be_playable == 0 {
            return Err("min_buffers_to_be_playable must be > 0".to_string());
        }

        if self.max_poll_buffer_count < self.min_buffers_to_be_playable {
            return Err(
                "max_poll_buffer_count cannot be below min_buffers_to_be_playable".to_string(),
            );
        }

        if self.tick_interval.is_zero() {
            return Err("tick_interval must be > 0".to_string());
        }

        if self.availability_min_increment.is_nan() || self.availability_min_increment < 0.0 {
            return Err("availability_min_increment must be >= 0".to_string());
        }

        if self.duration_debounce.is_nan() || self.duration_debounce <= 0.0 {
            return Err("duration_debounce must be > 0".to_string());
        }

        if !(self.min_rate > 0.0 && self.min_rate <= 1.0 && self.max_rate >= 1.0) {
            return Err("rate bounds must satisfy 0 < min_rate <= 1 <= max_rate".to_string());
        }

        Ok(())
    }

    /// Returns `true` if `rate` lies inside `[min_rate, max_rate]`.
    pub fn accepts_rate(&self, rate: f32) -> bool {
        rate.is_finite() && rate >= self.min_rate && rate <= self.max_rate
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_poll_buffer_count() -> u32 {
    300
}

fn default_min_buffers_to_be_playable() -> u32 {
    1
}

fn default_pcm_buffer_frames() -> usize {
    8192
}

fn default_tick_interval() -> Duration {
    Duration::from_secs_f64((8192.0 / 44100.0) / 32.0)
}

fn default_availability_min_increment() -> f64 {
    1.0
}

fn default_duration_debounce() -> f64 {
    1.0
}

fn default_redelivery_floor_bytes() -> u64 {
    4 * 1024
}

fn default_skip_forward() -> Duration {
    Duration::from_secs(30)
}

fn default_skip_backward() -> Duration {
    Duration::from_secs(15)
}

fn default_min_rate() -> f32 {
    1.0 / 32.0
}

fn default_max_rate() -> f32 {
    32.0
}

// ============================================================================
// Scheduler Statistics
// ============================================================================

/// Counters describing what a stream's scheduler has done so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Buffers handed to the sink.
    pub buffers_scheduled: u64,
    /// Completions of the current generation received back.
    pub buffers_completed: u64,
    /// Frames handed to the sink.
    pub frames_scheduled: u64,
    /// Times the last in-flight buffer completed while more audio was due.
    pub underruns: u32,
    /// Seeks applied (pending seeks count once applied).
    pub seeks: u32,
    /// Pulls that returned no frames because data was missing.
    pub starved_pulls: u64,
}

impl SchedulerStats {
    /// Buffers still owned by the sink, as far as the counters can tell.
    pub fn outstanding(&self) -> u64 {
        self.buffers_scheduled.saturating_sub(self.buffers_completed)
    }
}
