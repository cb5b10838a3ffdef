//! Per-file map from decoded byte offsets to segments
//!
//! NZB metadata declares *encoded* sizes, which overstate the decoded payload
//! by roughly 1.4%. Offsets computed from them drift within a few MiB and
//! corrupt range responses, so the layout only ever records sizes learned by
//! materializing segments and stat'ing the decoded files. Sizes are filled in
//! lazily as reads touch segments and live as long as the open handle.

use crate::catalog::SegmentRecord;

/// Ordered segment list plus the decoded sizes discovered so far.
#[derive(Debug)]
pub struct FileLayout {
    segments: Vec<SegmentRecord>,
    decoded_sizes: Vec<Option<u64>>,
}

impl FileLayout {
    /// Wrap a catalog segment list (already sorted by segment number).
    pub fn new(segments: Vec<SegmentRecord>) -> Self {
        let decoded_sizes = vec![None; segments.len()];
        Self {
            segments,
            decoded_sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, idx: usize) -> &SegmentRecord {
        &self.segments[idx]
    }

    /// Decoded size of segment `idx`, if that segment has been materialized
    /// at least once during the life of this layout.
    pub fn decoded_size(&self, idx: usize) -> Option<u64> {
        self.decoded_sizes.get(idx).copied().flatten()
    }

    /// Record a decoded size learned from the cache. Sizes are a pure
    /// function of the article content, so re-recording is idempotent.
    pub fn record_size(&mut self, idx: usize, len: u64) {
        if let Some(slot) = self.decoded_sizes.get_mut(idx) {
            *slot = Some(len);
        }
    }

    /// Decoded start offset of segment `idx`, known only once every prior
    /// segment's size is known.
    pub fn offset_of(&self, idx: usize) -> Option<u64> {
        let mut off = 0u64;
        for size in self.decoded_sizes.iter().take(idx) {
            off += (*size)?;
        }
        Some(off)
    }

    /// Total decoded size, known only once every segment has been seen.
    pub fn total_decoded(&self) -> Option<u64> {
        self.offset_of(self.segments.len())
    }
}
