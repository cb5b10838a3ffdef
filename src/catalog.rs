//! Read-only access to the importer's catalog database
//!
//! The catalog is owned by the external NZB importer; this module only ever
//! issues SELECTs. The store may gain rows at any time (new imports, health
//! repair); queries always read current state so additions appear without a
//! restart. Row deletions under an open FUSE handle surface as I/O errors on
//! the next read, which is acceptable.

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CatalogError, EdrError};

type Result<T> = std::result::Result<T, EdrError>;

/// One parsed NZB, immutable once imported
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub id: String,
    pub path: String,
    pub imported_at: i64,
    pub files_count: u32,
    pub total_bytes: u64,
}

/// One logical payload inside an import.
///
/// `total_bytes` is the sum of declared *encoded* segment sizes from the NZB,
/// an overestimate of the decoded payload by a percent or two. It is good
/// enough for stat() but never for offset math.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub import_id: String,
    pub idx: u32,
    pub subject: String,
    pub filename: String,
    pub total_bytes: u64,
}

/// One Usenet article backing part of a logical file
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    /// 1-based position in concatenation order
    pub number: u32,
    /// Declared encoded size, advisory only
    pub bytes: u64,
    pub message_id: String,
}

/// Shared read-only handle to the catalog.
///
/// rusqlite connections are not Sync, so the connection lives behind a mutex;
/// every query is a point lookup or a small scan, so contention is negligible
/// next to the network fetches they gate.
pub struct CatalogReader {
    conn: Mutex<Connection>,
}

impl CatalogReader {
    /// Open the catalog database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CatalogError::Open {
            path: PathBuf::from(path),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Enumerate imports for directory listings, newest first.
    pub fn imports(&self) -> Result<Vec<ImportRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, path, imported_at, files_count, total_bytes \
                 FROM nzb_imports ORDER BY imported_at DESC",
            )
            .map_err(CatalogError::Query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ImportRecord {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    imported_at: row.get(2)?,
                    files_count: row.get(3)?,
                    total_bytes: row.get(4)?,
                })
            })
            .map_err(CatalogError::Query)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CatalogError::Query)?;
        Ok(rows)
    }

    /// Fetch one import row.
    pub fn import(&self, import_id: &str) -> Result<ImportRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, path, imported_at, files_count, total_bytes \
                 FROM nzb_imports WHERE id = ?1",
            )
            .map_err(CatalogError::Query)?;
        stmt.query_row([import_id], |row| {
            Ok(ImportRecord {
                id: row.get(0)?,
                path: row.get(1)?,
                imported_at: row.get(2)?,
                files_count: row.get(3)?,
                total_bytes: row.get(4)?,
            })
        })
        .optional()
        .map_err(CatalogError::Query)?
        .ok_or_else(|| {
            CatalogError::ImportNotFound {
                import_id: import_id.to_string(),
            }
            .into()
        })
    }

    /// List the logical files of one import, ordered by index.
    pub fn files(&self, import_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT import_id, idx, subject, filename, total_bytes \
                 FROM nzb_files WHERE import_id = ?1 ORDER BY idx ASC",
            )
            .map_err(CatalogError::Query)?;
        let rows = stmt
            .query_map([import_id], |row| {
                Ok(FileRecord {
                    import_id: row.get(0)?,
                    idx: row.get(1)?,
                    subject: row.get(2)?,
                    filename: row.get(3)?,
                    total_bytes: row.get(4)?,
                })
            })
            .map_err(CatalogError::Query)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CatalogError::Query)?;
        Ok(rows)
    }

    /// Fetch one logical file row.
    pub fn file(&self, import_id: &str, file_idx: u32) -> Result<FileRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT import_id, idx, subject, filename, total_bytes \
                 FROM nzb_files WHERE import_id = ?1 AND idx = ?2",
            )
            .map_err(CatalogError::Query)?;
        stmt.query_row(rusqlite::params![import_id, file_idx], |row| {
            Ok(FileRecord {
                import_id: row.get(0)?,
                idx: row.get(1)?,
                subject: row.get(2)?,
                filename: row.get(3)?,
                total_bytes: row.get(4)?,
            })
        })
        .optional()
        .map_err(CatalogError::Query)?
        .ok_or_else(|| {
            CatalogError::FileNotFound {
                import_id: import_id.to_string(),
                file_idx,
            }
            .into()
        })
    }

    /// Ordered segment list for one logical file. Concatenating the decoded
    /// payloads in `number` order reconstructs the file.
    pub fn segments(&self, import_id: &str, file_idx: u32) -> Result<Vec<SegmentRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached(
                "SELECT number, bytes, message_id \
                 FROM nzb_segments WHERE import_id = ?1 AND file_idx = ?2 \
                 ORDER BY number ASC",
            )
            .map_err(CatalogError::Query)?;
        let rows = stmt
            .query_map(rusqlite::params![import_id, file_idx], |row| {
                Ok(SegmentRecord {
                    number: row.get(0)?,
                    bytes: row.get(1)?,
                    message_id: row.get(2)?,
                })
            })
            .map_err(CatalogError::Query)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CatalogError::Query)?;

        if rows.is_empty() {
            return Err(CatalogError::NoSegments {
                import_id: import_id.to_string(),
                file_idx,
            }
            .into());
        }
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory catalog fixtures for the streaming-path tests.

    use super::*;

    /// The importer's schema, reduced to the columns the core reads.
    const SCHEMA: &str = "
        CREATE TABLE nzb_imports (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            imported_at INTEGER NOT NULL,
            files_count INTEGER NOT NULL,
            total_bytes INTEGER NOT NULL
        );
        CREATE TABLE nzb_files (
            import_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            subject TEXT NOT NULL,
            filename TEXT NOT NULL,
            total_bytes INTEGER NOT NULL,
            PRIMARY KEY (import_id, idx)
        );
        CREATE TABLE nzb_segments (
            import_id TEXT NOT NULL,
            file_idx INTEGER NOT NULL,
            number INTEGER NOT NULL,
            bytes INTEGER NOT NULL,
            message_id TEXT NOT NULL,
            PRIMARY KEY (import_id, file_idx, number)
        );
    ";

    /// Build an in-memory catalog and hand it to a writer closure before
    /// wrapping it in the read-only-by-convention reader.
    pub(crate) fn catalog_with(fill: impl FnOnce(&Connection)) -> CatalogReader {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        fill(&conn);
        CatalogReader {
            conn: Mutex::new(conn),
        }
    }

    pub(crate) fn insert_import(conn: &Connection, id: &str, files: u32, total: u64) {
        conn.execute(
            "INSERT INTO nzb_imports (id, path, imported_at, files_count, total_bytes) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, format!("/inbox/{id}.nzb"), 1_700_000_000_i64, files, total],
        )
        .unwrap();
    }

    pub(crate) fn insert_file(
        conn: &Connection,
        import_id: &str,
        idx: u32,
        subject: &str,
        filename: &str,
        total_bytes: u64,
    ) {
        conn.execute(
            "INSERT INTO nzb_files (import_id, idx, subject, filename, total_bytes) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![import_id, idx, subject, filename, total_bytes],
        )
        .unwrap();
    }

    pub(crate) fn insert_segment(
        conn: &Connection,
        import_id: &str,
        file_idx: u32,
        number: u32,
        bytes: u64,
        message_id: &str,
    ) {
        conn.execute(
            "INSERT INTO nzb_segments (import_id, file_idx, number, bytes, message_id) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![import_id, file_idx, number, bytes, message_id],
        )
        .unwrap();
    }
}
