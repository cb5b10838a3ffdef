//! On-disk, content-addressed cache of decoded segment bytes
//!
//! Layout: `<cache_dir>/rawseg/<import_id>/<file_idx>/<NNNNNN>_<hash8>.bin`
//! where `hash8` is a short hex prefix of the MD5 of the message-id, so a
//! re-import landing different articles in the same slot can never collide
//! with stale bytes.
//!
//! Writes are atomic (`.part` + rename); a reader sees either nothing or a
//! complete decoded payload. A zero-length file counts as absent. Fetches are
//! deduplicated per cache path: concurrent demand for one segment issues one
//! NNTP BODY, everyone else waits for the leader and then reads the file.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;

use crate::catalog::SegmentRecord;
use crate::error::{CacheError, EdrError};
use crate::metrics::{self, Metrics};
use crate::nntp::{NntpPool, NntpPoolExt};
use crate::yenc;

type Result<T> = std::result::Result<T, EdrError>;

/// Where one segment's decoded bytes live in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentAddress {
    pub import_id: String,
    pub file_idx: u32,
    pub number: u32,
    pub message_id: String,
}

impl SegmentAddress {
    pub fn new(import_id: &str, file_idx: u32, record: &SegmentRecord) -> Self {
        Self {
            import_id: import_id.to_string(),
            file_idx,
            number: record.number,
            message_id: record.message_id.clone(),
        }
    }
}

/// A materialized segment: the cache file path and its decoded length
#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub path: PathBuf,
    pub len: u64,
}

pub struct SegmentCache {
    /// `<cache_dir>/rawseg`
    root: PathBuf,
    max_bytes: u64,
    pool: NntpPool,
    metrics: Arc<Metrics>,
    /// Single-flight gates keyed by cache path; entries are pruned once the
    /// last interested task releases its clone.
    inflight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    eviction_running: Arc<AtomicBool>,
}

impl SegmentCache {
    pub fn new(cache_dir: &Path, max_bytes: u64, pool: NntpPool, metrics: Arc<Metrics>) -> Self {
        Self {
            root: cache_dir.join("rawseg"),
            max_bytes,
            pool,
            metrics,
            inflight: Mutex::new(HashMap::new()),
            eviction_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Content-addressed path for one segment.
    pub fn segment_path(&self, seg: &SegmentAddress) -> PathBuf {
        self.root
            .join(&seg.import_id)
            .join(seg.file_idx.to_string())
            .join(format!(
                "{:06}_{}.bin",
                seg.number,
                message_id_hash(&seg.message_id)
            ))
    }

    /// Materialize one segment, fetching and decoding it if needed.
    ///
    /// Idempotent: a present, non-empty cache file short-circuits. At most
    /// one task fetches a given path at a time; concurrent callers share the
    /// leader's result by re-checking the file once the leader finishes.
    pub async fn ensure_segment(&self, seg: &SegmentAddress) -> Result<CachedSegment> {
        let path = self.segment_path(seg);

        if let Some(len) = stat_positive(&path) {
            metrics::inc(&self.metrics.cache_hits);
            return Ok(CachedSegment { path, len });
        }

        let gate = {
            let mut map = self.inflight.lock().unwrap();
            map.entry(path.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let result = {
            let _leader = gate.lock().await;

            // The previous leader may have filled the file while we waited
            if let Some(len) = stat_positive(&path) {
                metrics::inc(&self.metrics.cache_hits);
                Ok(CachedSegment { path: path.clone(), len })
            } else {
                metrics::inc(&self.metrics.cache_misses);
                self.fetch_and_store(seg, &path).await
            }
        };

        // Prune the gate once nobody else holds a clone
        {
            let mut map = self.inflight.lock().unwrap();
            if Arc::strong_count(&gate) <= 2 {
                map.remove(&path);
            }
        }

        result
    }

    /// Fetch over NNTP, decode, and atomically publish the cache file.
    async fn fetch_and_store(&self, seg: &SegmentAddress, path: &Path) -> Result<CachedSegment> {
        let body = self.fetch_body_with_retry(seg).await?;

        let decoded = match yenc::decode(&body) {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics::inc(&self.metrics.fetch_failures);
                tracing::warn!(
                    message_id = %seg.message_id,
                    segment = seg.number,
                    "yEnc decode failed: {}",
                    e
                );
                return Err(e.into());
            }
        };

        metrics::inc(&self.metrics.articles_fetched);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::Write {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }

        // Write to a sibling temp file, then rename: readers never observe a
        // partial segment.
        let part_path = path.with_extension("bin.part");
        let write = async {
            let mut file = tokio::fs::File::create(&part_path).await?;
            file.write_all(&decoded.data).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&part_path, path).await
        };
        write.await.map_err(|e| CacheError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(
            path = %path.display(),
            bytes = decoded.data.len(),
            segment = seg.number,
            "cached segment"
        );

        self.schedule_eviction();

        Ok(CachedSegment {
            path: path.to_path_buf(),
            len: decoded.data.len() as u64,
        })
    }

    /// One retry on transient faults, on a fresh connection. Faulted
    /// connections never go back to the pool.
    async fn fetch_body_with_retry(&self, seg: &SegmentAddress) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            let mut lease = self.pool.acquire().await?;
            match lease.fetch_body(&seg.message_id).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let transient = e.is_transient();
                    if transient {
                        lease.detach();
                    }
                    if transient && attempt == 0 {
                        attempt += 1;
                        tracing::debug!(
                            message_id = %seg.message_id,
                            "transient fetch fault, retrying once: {}",
                            e
                        );
                        continue;
                    }
                    metrics::inc(&self.metrics.fetch_failures);
                    return Err(e);
                }
            }
        }
    }

    /// Kick off a background eviction pass unless one is already running.
    /// The fetch path never waits on the scan.
    fn schedule_eviction(&self) {
        if self.max_bytes == 0 {
            return;
        }
        if self
            .eviction_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let root = self.root.clone();
        let max_bytes = self.max_bytes;
        let metrics = self.metrics.clone();
        let running = self.eviction_running.clone();
        tokio::task::spawn_blocking(move || {
            let evicted = evict_to_limit(&root, max_bytes);
            metrics::add(&metrics.cache_evictions, evicted);
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Synchronous eviction pass; also used at startup to settle the cache
    /// after a crash or a config change.
    pub async fn enforce_limit(&self) -> u64 {
        if self.max_bytes == 0 {
            return 0;
        }
        let root = self.root.clone();
        let max_bytes = self.max_bytes;
        let evicted = tokio::task::spawn_blocking(move || evict_to_limit(&root, max_bytes))
            .await
            .unwrap_or(0);
        metrics::add(&self.metrics.cache_evictions, evicted);
        evicted
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// A cache hit is a file with size > 0; zero-byte files are absent.
fn stat_positive(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

/// Short stable hex prefix of the message-id hash
fn message_id_hash(message_id: &str) -> String {
    let digest = Md5::digest(message_id.as_bytes());
    hex::encode(&digest[..4])
}

/// Delete files in ascending mtime order until the tree is under `max_bytes`
/// or a single file remains. Errors are ignored; eviction is best-effort.
fn evict_to_limit(root: &Path, max_bytes: u64) -> u64 {
    let mut files = Vec::new();
    collect_files(root, &mut files);

    // Abandoned .part files from a crashed writer are garbage after an hour
    files.retain(|(path, _, mtime)| {
        if path.extension().is_some_and(|e| e == "part") {
            let stale = mtime
                .elapsed()
                .map(|age| age.as_secs() > 3600)
                .unwrap_or(false);
            if stale {
                let _ = std::fs::remove_file(path);
            }
            false
        } else {
            true
        }
    });

    let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
    if total <= max_bytes {
        return 0;
    }

    files.sort_by_key(|(_, _, mtime)| *mtime);

    let mut evicted = 0;
    let mut remaining = files.len();
    for (path, len, _) in files {
        if total <= max_bytes || remaining <= 1 {
            break;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = len, "evicted cached segment");
                total -= len;
                evicted += 1;
                remaining -= 1;
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), "eviction skipped: {}", e);
                remaining -= 1;
            }
        }
    }
    evicted
}

fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, u64, SystemTime)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect_files(&path, out);
        } else if meta.is_file() {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, meta.len(), mtime));
        }
    }
}
