//! edrmount - stream NZB-indexed Usenet content as a filesystem
//!
//! This library exposes catalogued Usenet imports as a read-only FUSE mount.
//! Reading a byte range triggers on-demand NNTP article downloads, yEnc
//! decoding, content-addressed caching and assembly, so players can seek
//! through terabyte-scale libraries without downloading files up front.
//!
//! # Pieces
//!
//! - [`catalog`]: read-only view of the importer's database
//! - [`nntp`]: async NNTP client and connection pool
//! - [`yenc`]: article body decoding
//! - [`cache`]: on-disk segment cache with single-flight fetches and
//!   LRU-by-mtime eviction
//! - [`stream`]: range-to-segment mapping and prefetch
//! - [`fuse`]: the mountable tree (raw and library views)
//!
//! # Example
//!
//! ```no_run
//! use edrmount::{config::Config, nntp::NntpPoolBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let pool = NntpPoolBuilder::new(config.download.clone()).build()?;
//!     // Wire the pool into a SegmentCache and RangeEngine...
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod metrics;

// Feature modules organized by functionality
pub mod cache;
pub mod catalog;
pub mod fuse;
pub mod nntp;
pub mod stream;
pub mod yenc;

// Re-export commonly used types
pub use cache::{SegmentAddress, SegmentCache};
pub use catalog::CatalogReader;
pub use config::Config;
pub use error::{EdrError, Result};
pub use fuse::{EdrFs, MountGuard};
pub use nntp::{NntpPool, NntpPoolBuilder, NntpPoolExt};
pub use stream::{FileLayout, RangeEngine};
