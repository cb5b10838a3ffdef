//! Domain-specific error types for edrmount
//!
//! This module provides structured error handling with proper error chains
//! and context preservation.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the edrmount application
#[derive(Error, Debug)]
pub enum EdrError {
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    #[error("yEnc error: {0}")]
    Yenc(#[from] YencError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    NativeTls(#[from] native_tls::Error),
}

impl EdrError {
    /// Whether this failure makes a single segment unavailable without
    /// poisoning the logical file (missing article, undecodable body).
    pub fn is_segment_unavailable(&self) -> bool {
        matches!(
            self,
            EdrError::Nntp(NntpError::ArticleNotFound { .. }) | EdrError::Yenc(_)
        )
    }

    /// Whether retrying on a fresh connection could plausibly succeed.
    /// Auth failures and missing articles are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            EdrError::Nntp(e) => matches!(
                e,
                NntpError::ConnectionFailed { .. }
                    | NntpError::Timeout { .. }
                    | NntpError::Tls(_)
                    | NntpError::Protocol(_)
                    | NntpError::UnhealthyConnection
            ),
            EdrError::Io(_) => true,
            _ => false,
        }
    }
}

/// NNTP protocol and connection errors
#[derive(Error, Debug)]
pub enum NntpError {
    #[error("connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("article not found: {message_id}")]
    ArticleNotFound { message_id: String },

    #[error("connection unhealthy")]
    UnhealthyConnection,
}

/// yEnc stream decoding errors
#[derive(Error, Debug)]
pub enum YencError {
    #[error("no =ybegin header in article body")]
    MissingBegin,

    #[error("article body ended before =yend")]
    MissingEnd,

    #[error("malformed {keyword} line: {reason}")]
    MalformedHeader {
        keyword: &'static str,
        reason: String,
    },
}

/// Segment cache errors (local disk)
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to write cached segment {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read cached segment {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Catalog lookup errors; the store itself is owned by the importer
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to open catalog at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("catalog query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("import not found: {import_id}")]
    ImportNotFound { import_id: String },

    #[error("no file {file_idx} in import {import_id}")]
    FileNotFound { import_id: String, file_idx: u32 },

    #[error("no segments for file {file_idx} in import {import_id}")]
    NoSegments { import_id: String, file_idx: u32 },
}

/// FUSE mount lifecycle errors
#[derive(Error, Debug)]
pub enum MountError {
    #[error("mountpoint {path} is not usable: {reason}")]
    BadMountpoint { path: PathBuf, reason: String },

    #[error("failed to mount at {path}: {source}")]
    MountFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Usenet server not configured")]
    NoServer,

    #[error("Usenet credentials not configured")]
    NoCredentials,

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

/// Result type alias using EdrError
pub type Result<T> = std::result::Result<T, EdrError>;
