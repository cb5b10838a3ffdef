//! Maps logical byte ranges to decoded segment slices
//!
//! The read path: walk the segment list in order, materializing segments
//! through the cache to learn their decoded sizes, and copy exactly the
//! overlapping slice of each into the caller's writer. After serving, a
//! bounded number of follow-on segments is prefetched in the background.

use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Duration;

use crate::cache::{CachedSegment, SegmentAddress, SegmentCache};
use crate::catalog::CatalogReader;
use crate::error::{CacheError, EdrError};
use crate::metrics::{self, Metrics};
use crate::stream::layout::FileLayout;

type Result<T> = std::result::Result<T, EdrError>;

/// Background prefetches get their own generous deadline, detached from the
/// read that scheduled them; the bytes benefit the next read.
const PREFETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct RangeEngine {
    catalog: Arc<CatalogReader>,
    cache: Arc<SegmentCache>,
    /// How many segments past the served range to warm, per read
    prefetch: usize,
    metrics: Arc<Metrics>,
}

impl RangeEngine {
    pub fn new(
        catalog: Arc<CatalogReader>,
        cache: Arc<SegmentCache>,
        prefetch: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            catalog,
            cache,
            prefetch,
            metrics,
        }
    }

    /// Build the layout for one logical file from the catalog.
    pub fn layout_for(&self, import_id: &str, file_idx: u32) -> Result<FileLayout> {
        Ok(FileLayout::new(self.catalog.segments(import_id, file_idx)?))
    }

    /// Stream the inclusive byte range `[start, end]` of one logical file
    /// into `out`, returning the number of bytes written.
    ///
    /// A `start` at or past the file's decoded size writes nothing and
    /// succeeds: that is EOF, not an error. An `end` past the decoded size is
    /// clipped. A segment failing inside the requested range surfaces as an
    /// error after any earlier slices have already been written; streamed
    /// bytes are never rolled back.
    pub async fn read_range<W>(
        &self,
        import_id: &str,
        file_idx: u32,
        start: u64,
        end: u64,
        layout: &mut FileLayout,
        out: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        if start > end {
            return Err(EdrError::InvalidRange { start, end });
        }

        let mut written = 0u64;
        let mut off = 0u64;
        let mut last_touched = None;

        for idx in 0..layout.len() {
            // Learn the decoded size, materializing the segment on first contact
            let mut materialized: Option<CachedSegment> = None;
            let size = match layout.decoded_size(idx) {
                Some(size) => size,
                None => {
                    let cached = self.ensure(import_id, file_idx, layout, idx).await?;
                    layout.record_size(idx, cached.len);
                    let size = cached.len;
                    materialized = Some(cached);
                    size
                }
            };

            let seg_start = off;
            off += size;
            if size == 0 {
                continue;
            }
            let seg_end = seg_start + size - 1;

            if seg_end < start {
                continue; // entirely before the range
            }
            if seg_start > end {
                break; // entirely after; every later segment is too
            }

            let lo = start.max(seg_start);
            let hi = end.min(seg_end);

            let cached = match materialized {
                Some(cached) => cached,
                // Sizes can outlive the file (eviction); re-materialize
                None => self.ensure(import_id, file_idx, layout, idx).await?,
            };

            self.copy_slice(&cached, import_id, file_idx, layout, idx, lo - seg_start, hi - lo + 1, out)
                .await?;
            written += hi - lo + 1;
            last_touched = Some(idx);
        }

        out.flush().await?;

        if let Some(last) = last_touched {
            self.spawn_prefetch(import_id, file_idx, layout, last + 1);
        }

        metrics::inc(&self.metrics.reads_served);
        metrics::add(&self.metrics.bytes_served, written);
        Ok(written)
    }

    /// Convenience wrapper for one-shot reads (no handle to keep a layout on).
    pub async fn read_to_vec(
        &self,
        import_id: &str,
        file_idx: u32,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>> {
        let mut layout = self.layout_for(import_id, file_idx)?;
        let mut out = std::io::Cursor::new(Vec::new());
        self.read_range(import_id, file_idx, start, end, &mut layout, &mut out)
            .await?;
        Ok(out.into_inner())
    }

    async fn ensure(
        &self,
        import_id: &str,
        file_idx: u32,
        layout: &FileLayout,
        idx: usize,
    ) -> Result<CachedSegment> {
        let addr = SegmentAddress::new(import_id, file_idx, layout.segment(idx));
        self.cache.ensure_segment(&addr).await
    }

    /// Copy `count` bytes starting at `seek` within a cached segment file.
    ///
    /// The file can vanish between materialization and open if eviction races
    /// us; one re-ensure covers that window.
    #[allow(clippy::too_many_arguments)]
    async fn copy_slice<W>(
        &self,
        cached: &CachedSegment,
        import_id: &str,
        file_idx: u32,
        layout: &FileLayout,
        idx: usize,
        seek: u64,
        count: u64,
        out: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut path = cached.path.clone();
        for attempt in 0..2 {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt == 0 => {
                    path = self.ensure(import_id, file_idx, layout, idx).await?.path;
                    continue;
                }
                Err(e) => {
                    return Err(CacheError::Read {
                        path: path.clone(),
                        source: e,
                    }
                    .into())
                }
            };

            let mut file = file;
            file.seek(SeekFrom::Start(seek))
                .await
                .map_err(|e| CacheError::Read {
                    path: path.clone(),
                    source: e,
                })?;
            let mut limited = file.take(count);
            let copied = tokio::io::copy(&mut limited, out)
                .await
                .map_err(|e| CacheError::Read {
                    path: path.clone(),
                    source: e,
                })?;
            if copied != count {
                return Err(CacheError::Read {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("segment slice truncated: {} of {} bytes", copied, count),
                    ),
                }
                .into());
            }
            return Ok(());
        }
        unreachable!("slice copy loop always returns");
    }

    /// Warm up to `prefetch` segments starting at `from`, detached from the
    /// caller. Failures are logged and forgotten.
    fn spawn_prefetch(&self, import_id: &str, file_idx: u32, layout: &FileLayout, from: usize) {
        if self.prefetch == 0 {
            return;
        }
        let until = (from + self.prefetch).min(layout.len());
        for idx in from..until {
            let addr = SegmentAddress::new(import_id, file_idx, layout.segment(idx));
            let cache = self.cache.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(PREFETCH_TIMEOUT, cache.ensure_segment(&addr)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(message_id = %addr.message_id, "prefetch failed: {}", e);
                    }
                    Err(_) => {
                        tracing::debug!(message_id = %addr.message_id, "prefetch timed out");
                    }
                }
            });
        }
    }
}
