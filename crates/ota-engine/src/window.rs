//! Capacity-bounded rolling byte windows
//!
//! A [`RollingWindow`] keeps the most recent `capacity` bytes written to it.
//! The scanner uses one as its chunk carryover and the block decompressor uses
//! one as its dictionary, so both share the exact "evict oldest first" policy.

/// Bytes of history the block codec may reference, shared with the packer
pub const DEFAULT_DICTIONARY_SIZE: usize = 16 * 1024;

/// Owned byte buffer that never holds more than `capacity` bytes.
///
/// Appending past capacity evicts the oldest bytes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingWindow {
    buf: Vec<u8>,
    capacity: usize,
}

/// History window handed to the block decoder before every block
pub type DictionaryWindow = RollingWindow;

impl RollingWindow {
    /// Create an empty window
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `data`, dropping the oldest bytes beyond capacity
    pub fn extend(&mut self, data: &[u8]) {
        if data.len() >= self.capacity {
            let tail = data.get(data.len() - self.capacity..).unwrap_or_default();
            self.buf.clear();
            self.buf.extend_from_slice(tail);
        } else {
            let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
            self.buf.drain(..overflow);
            self.buf.extend_from_slice(data);
        }
        debug_assert!(self.buf.len() <= self.capacity);
    }

    /// Current contents, oldest byte first
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of retained bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum number of retained bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all retained bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DICTIONARY_SIZE)
    }
}
