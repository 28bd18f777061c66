//! # Availability Model
//!
//! Decode progress changes the loaded window many times per second, while
//! observers only need coarse updates. [`debounce`] decides which
//! measurements are worth publishing.

use core_runtime::stream::AvailabilityRange;

/// Return the range that should become the new "last published" value.
///
/// `candidate` replaces `previous` when:
/// - it is the first non-zero measurement,
/// - it returns to the all-zero state (hard reset),
/// - the loaded duration grew by at least `min_increment`,
/// - the playability flag flipped, or
/// - the window moved to a different starting needle (far seek).
///
/// The last two go beyond the plain increment rule: a stall or a far seek
/// changes what observers can do even when the loaded duration did not
/// grow, so those are published immediately rather than waiting for the
/// next increment.
///
/// Otherwise `previous` is returned unchanged.
pub fn debounce(
    previous: AvailabilityRange,
    candidate: AvailabilityRange,
    min_increment: f64,
) -> AvailabilityRange {
    if candidate == previous {
        return previous;
    }

    let publish = (previous.is_zero() && !candidate.is_zero())
        || candidate.is_zero()
        || candidate.is_playable != previous.is_playable
        || candidate.starting_needle != previous.starting_needle
        || candidate.duration_loaded_by_network - min_increment
            >= previous.duration_loaded_by_network;

    if publish {
        candidate
    } else {
        previous
    }
}

/// Debounce state of one stream.
#[derive(Debug, Clone)]
pub struct AvailabilityModel {
    published: AvailabilityRange,
    min_increment: f64,
    has_published: bool,
}

impl AvailabilityModel {
    pub fn new(min_increment: f64) -> Self {
        Self {
            published: AvailabilityRange::zero(),
            min_increment,
            has_published: false,
        }
    }

    /// Offer a fresh measurement; returns it if it should be published.
    pub fn offer(&mut self, candidate: AvailabilityRange) -> Option<AvailabilityRange> {
        let next = debounce(self.published, candidate, self.min_increment);
        // The very first zero range is published too so observers get a value.
        let changed = next != self.published || !self.has_published;
        if !changed || next != candidate {
            return None;
        }
        self.published = next;
        self.has_published = true;
        Some(next)
    }

    pub fn published(&self) -> AvailabilityRange {
        self.published
    }
}
