//! # Byte Window Store
//!
//! Ordered, contiguous window of the encoded bytes received for one stream.
//!
//! Chunks are kept in a `Vec` ordered by start offset; the chunk after
//! `chunks[i]` is simply `chunks[i + 1]`. Every chunk starts exactly where
//! its predecessor ends, so the window is always one gap-free byte range
//! beginning at the base offset. A seek outside the window resets the store
//! to a new base instead of opening a gap.
//!
//! No operation fails: asking for bytes that were never received yields
//! `None`.

use bytes::Bytes;

/// A run of received bytes at a fixed absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteChunk {
    start_offset: u64,
    data: Bytes,
    delivered: bool,
}

impl ByteChunk {
    fn new(start_offset: u64, data: Bytes) -> Self {
        Self {
            start_offset,
            data,
            delivered: false,
        }
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Offset of the last byte, inclusive.
    ///
    /// For an empty placeholder this is the byte just before it.
    pub fn end_offset(&self) -> u64 {
        (self.start_offset + self.len() as u64).saturating_sub(1)
    }

    /// Offset one past the last byte.
    pub fn next_offset(&self) -> u64 {
        self.start_offset + self.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if the chunk holds the byte at `offset`.
    pub fn contains(&self, offset: u64) -> bool {
        !self.is_empty() && offset >= self.start_offset && offset < self.next_offset()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the chunk has been handed to the decoder since it was last
    /// marked undelivered.
    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    pub fn set_delivered(&mut self, delivered: bool) {
        self.delivered = delivered;
    }
}

/// Contiguous window of received bytes.
#[derive(Debug, Clone, Default)]
pub struct ByteWindowStore {
    chunks: Vec<ByteChunk>,
    base_offset: u64,
}

impl ByteWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose first append lands at `base_offset`.
    pub fn with_base(base_offset: u64) -> Self {
        Self {
            chunks: Vec::new(),
            base_offset,
        }
    }

    /// Append `data` right after the last chunk (or at the base offset when
    /// the store is empty). New chunks start undelivered.
    pub fn append(&mut self, data: Bytes) -> &ByteChunk {
        // A trailing placeholder is superseded by real bytes at its offset.
        if self.chunks.last().is_some_and(ByteChunk::is_empty) {
            self.chunks.pop();
        }
        let start = self.next_offset();
        self.chunks.push(ByteChunk::new(start, data));
        let index = self.chunks.len() - 1;
        &self.chunks[index]
    }

    /// Chunk holding the byte at `offset`.
    pub fn lookup(&self, offset: u64) -> Option<&ByteChunk> {
        self.chunks.iter().find(|chunk| chunk.contains(offset))
    }

    /// Index of the chunk holding the byte at `offset`.
    pub fn position(&self, offset: u64) -> Option<usize> {
        self.chunks.iter().position(|chunk| chunk.contains(offset))
    }

    /// Split chunk `index` so that a chunk begins exactly at `offset`, and
    /// return the index of that chunk.
    ///
    /// - `offset` strictly inside the chunk: the left half keeps `index`, the
    ///   right half is inserted at `index + 1` and inherits the delivered flag.
    /// - `offset` equal to the chunk's start: nothing to split, returns `index`.
    /// - `offset` one past the chunk's end: returns the following chunk, or
    ///   appends an empty placeholder there when the chunk is the last one.
    /// - anything else (or a bad index): `None`.
    pub fn split_at(&mut self, index: usize, offset: u64) -> Option<usize> {
        let chunk = self.chunks.get_mut(index)?;

        if offset == chunk.start_offset {
            return Some(index);
        }

        if offset == chunk.next_offset() {
            if index + 1 == self.chunks.len() {
                self.chunks.push(ByteChunk::new(offset, Bytes::new()));
            }
            return Some(index + 1);
        }

        if !chunk.contains(offset) {
            return None;
        }

        let relative = (offset - chunk.start_offset) as usize;
        let right = ByteChunk {
            start_offset: offset,
            data: chunk.data.split_off(relative),
            delivered: chunk.delivered,
        };
        self.chunks.insert(index + 1, right);
        Some(index + 1)
    }

    /// Drop every chunk; the next append lands at `base_offset`.
    pub fn reset(&mut self, base_offset: u64) {
        self.chunks.clear();
        self.base_offset = base_offset;
    }

    /// `(first start, last end)` inclusive, or `(0, 0)` when empty.
    pub fn range(&self) -> (u64, u64) {
        match (self.chunks.first(), self.chunks.last()) {
            (Some(first), Some(last)) => (first.start_offset, last.end_offset()),
            _ => (0, 0),
        }
    }

    /// Returns `true` if `offset` lies within [`range`](Self::range) of a
    /// non-empty store.
    pub fn in_range(&self, offset: u64) -> bool {
        if self.total_bytes() == 0 {
            return false;
        }
        let (start, end) = self.range();
        offset >= start && offset <= end
    }

    /// Offset the next appended byte will have.
    pub fn next_offset(&self) -> u64 {
        self.chunks
            .last()
            .map_or(self.base_offset, ByteChunk::next_offset)
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn chunk(&self, index: usize) -> Option<&ByteChunk> {
        self.chunks.get(index)
    }

    pub fn chunk_mut(&mut self, index: usize) -> Option<&mut ByteChunk> {
        self.chunks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ByteChunk> {
        self.chunks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ByteChunk> {
        self.chunks.iter_mut()
    }

    /// Number of chunks, placeholders included.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.len() as u64).sum()
    }
}
