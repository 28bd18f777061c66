//! # Throttled Delivery
//!
//! Decides which received bytes reach the decoder and when.
//!
//! Until the decoder identifies the format, every appended chunk is handed
//! over immediately so it can parse headers. Afterwards the controller is
//! *throttled*: bytes stay in the [`ByteWindowStore`] until the decoder asks
//! for an offset, which lets a seek re-deliver exactly the bytes after the
//! seek point instead of everything that arrived in between.
//!
//! The controller performs no I/O. Every operation returns what should be
//! fed to the decoder ([`Delivery`]) or what the transport must do
//! ([`SeekDelivery::Refetch`]); the adapter carries it out.

use bytes::Bytes;

use crate::byte_window::ByteWindowStore;

/// Bytes to feed to the decoder, starting at an absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub offset: u64,
    pub data: Bytes,
}

/// Result of repositioning delivery for a seek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekDelivery {
    /// The offset is outside the received window. The store was reset and
    /// the transport must restart at `offset`.
    Refetch { offset: u64 },
    /// The offset was already received; feed these bytes.
    Deliver(Delivery),
    /// The offset is inside the window but no bytes start there yet.
    Pending,
}

/// Observable delivery state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryState {
    /// `true` once the decoder identified the format.
    pub throttling: bool,
    /// Offset delivery was last repositioned to.
    pub base_offset_after_seek: u64,
    /// Largest packet stride in bytes the decoder reported.
    pub largest_packet_stride: u64,
}

#[derive(Debug)]
pub struct ThrottledDeliveryController {
    store: ByteWindowStore,
    state: DeliveryState,
    redelivery_floor: u64,
}

impl ThrottledDeliveryController {
    pub fn new(redelivery_floor: u64) -> Self {
        Self {
            store: ByteWindowStore::new(),
            state: DeliveryState::default(),
            redelivery_floor,
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn store(&self) -> &ByteWindowStore {
        &self.store
    }

    /// Store freshly received bytes. Returns them for immediate delivery
    /// while the format is still unknown.
    pub fn append(&mut self, data: Bytes) -> Option<Delivery> {
        let forward = !self.state.throttling;
        self.store.append(data);
        if !forward {
            return None;
        }

        let index = self.store.len().checked_sub(1)?;
        let chunk = self.store.chunk_mut(index)?;
        chunk.set_delivered(true);
        Some(Delivery {
            offset: chunk.start_offset(),
            data: chunk.data().clone(),
        })
    }

    pub fn on_format_identified(&mut self) {
        self.state.throttling = true;
    }

    pub fn on_packet_stride(&mut self, stride: u64) {
        self.state.largest_packet_stride = self.state.largest_packet_stride.max(stride);
    }

    /// Bytes re-delivered in one forward walk.
    pub fn redelivery_threshold(&self) -> u64 {
        self.state.largest_packet_stride.max(self.redelivery_floor)
    }

    /// Offset to serve when the decoder needs data but cannot say where:
    /// the first undelivered chunk at or after the last seek position.
    pub fn resume_offset(&self) -> u64 {
        let base = self.state.base_offset_after_seek;
        self.store
            .iter()
            .filter(|chunk| !chunk.is_empty() && !chunk.is_delivered())
            .map(|chunk| chunk.start_offset())
            .find(|start| *start >= base)
            .unwrap_or(base)
    }

    /// Returns `true` while received bytes at or after the last seek
    /// position have not been handed to the decoder.
    pub fn has_pending_delivery(&self) -> bool {
        let base = self.state.base_offset_after_seek;
        self.store
            .iter()
            .any(|chunk| !chunk.is_empty() && !chunk.is_delivered() && chunk.next_offset() > base)
    }

    /// The decoder needs the byte at `offset`.
    ///
    /// An undelivered chunk holding `offset` is delivered whole. If it was
    /// already delivered, the undelivered chunks right after it are
    /// delivered until the redelivery threshold is reached; the walk stops
    /// at the first delivered chunk, so asking twice delivers nothing new.
    /// Offsets that were never received yield nothing.
    pub fn on_decoder_wants_offset(&mut self, offset: u64) -> Vec<Delivery> {
        if !self.state.throttling {
            return Vec::new();
        }
        let Some(index) = self.store.position(offset) else {
            return Vec::new();
        };

        if let Some(chunk) = self.store.chunk_mut(index) {
            if !chunk.is_delivered() {
                chunk.set_delivered(true);
                return vec![Delivery {
                    offset: chunk.start_offset(),
                    data: chunk.data().clone(),
                }];
            }
        }

        let threshold = self.redelivery_threshold();
        let mut walked = 0u64;
        let mut deliveries = Vec::new();
        let mut next = index + 1;
        while walked < threshold {
            let Some(chunk) = self.store.chunk_mut(next) else {
                break;
            };
            if chunk.is_delivered() || chunk.is_empty() {
                break;
            }
            chunk.set_delivered(true);
            walked += chunk.len() as u64;
            deliveries.push(Delivery {
                offset: chunk.start_offset(),
                data: chunk.data().clone(),
            });
            next += 1;
        }
        deliveries
    }

    /// Reposition delivery so the decoder next receives the byte at `offset`.
    pub fn on_seek(&mut self, offset: u64) -> SeekDelivery {
        self.state.base_offset_after_seek = offset;

        if !self.store.in_range(offset) {
            self.store.reset(offset);
            return SeekDelivery::Refetch { offset };
        }

        for chunk in self.store.iter_mut() {
            chunk.set_delivered(false);
        }

        let Some(index) = self.store.position(offset) else {
            return SeekDelivery::Pending;
        };
        let Some(right) = self.store.split_at(index, offset) else {
            return SeekDelivery::Pending;
        };
        match self.store.chunk_mut(right) {
            Some(chunk) if !chunk.is_empty() => {
                chunk.set_delivered(true);
                SeekDelivery::Deliver(Delivery {
                    offset: chunk.start_offset(),
                    data: chunk.data().clone(),
                })
            }
            _ => SeekDelivery::Pending,
        }
    }

    /// Forget every received byte.
    pub fn clear(&mut self) {
        self.store.reset(0);
        self.state.base_offset_after_seek = 0;
    }
}
