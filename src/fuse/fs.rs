//! Read-only FUSE tree over the catalog
//!
//! ```text
//! /            root
//!   by-id/     one directory per import, named by import id
//!     <file>   logical files, mode 0444, size = declared catalog bytes
//!   library/   virtual view at paths from the LibraryLayout builder
//! ```
//!
//! The declared file size is the NZB's encoded sum, a slight overestimate of
//! the decoded payload. Players tolerate this because reads return EOF once
//! the decoded bytes run out.
//!
//! fuser drives this filesystem from its own session thread, so callbacks are
//! synchronous; the async streaming stack is reached through a runtime handle.
//! Reads on one mount are therefore serialized with each other.

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, Request,
};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use bytes::Bytes;
use std::time::{Duration, UNIX_EPOCH};

use crate::catalog::{CatalogReader, FileRecord};
use crate::error::EdrError;
use crate::fuse::library::{display_name, LibraryLayout};
use crate::stream::{FileLayout, RangeEngine};

const TTL: Duration = Duration::from_secs(1);

const ROOT_INO: u64 = 1;
const BY_ID_INO: u64 = 2;
const LIBRARY_INO: u64 = 3;
const FIRST_DYNAMIC_INO: u64 = 4;

/// Reads smaller than this are expanded so one engine pass can feed the next
/// several kernel-sized requests from the hot cache.
const READ_WINDOW: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    ImportDir(String),
    File { import_id: String, file_idx: u32 },
    LibraryDir(String),
}

/// Stable ino <-> node mapping, grown on demand as the catalog is explored.
/// Inodes are never reused within a mount's lifetime.
struct InodeTable {
    by_ino: HashMap<u64, NodeKey>,
    by_key: HashMap<NodeKey, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        Self {
            by_ino: HashMap::new(),
            by_key: HashMap::new(),
            next: FIRST_DYNAMIC_INO,
        }
    }

    fn get_or_insert(&mut self, key: NodeKey) -> u64 {
        if let Some(&ino) = self.by_key.get(&key) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_key.insert(key.clone(), ino);
        self.by_ino.insert(ino, key);
        ino
    }

    fn key(&self, ino: u64) -> Option<&NodeKey> {
        self.by_ino.get(&ino)
    }
}

/// One open file: the layout it is discovering plus the hot-read buffer.
struct OpenFile {
    import_id: String,
    file_idx: u32,
    declared_size: u64,
    layout: FileLayout,
    hot: Option<HotRead>,
}

/// The most recently served contiguous range, short-circuiting the small
/// sequential reads media players issue.
struct HotRead {
    start: u64,
    data: Bytes,
}

impl HotRead {
    fn covers(&self, offset: u64, len: u64) -> bool {
        offset >= self.start && offset + len <= self.start + self.data.len() as u64
    }

    fn slice(&self, offset: u64, len: u64) -> &[u8] {
        let from = (offset - self.start) as usize;
        &self.data[from..from + len as usize]
    }
}

pub struct EdrFs {
    catalog: Arc<CatalogReader>,
    engine: Arc<RangeEngine>,
    library: Arc<dyn LibraryLayout>,
    runtime: tokio::runtime::Handle,
    inodes: InodeTable,
    handles: HashMap<u64, OpenFile>,
    next_fh: u64,
    uid: u32,
    gid: u32,
}

impl EdrFs {
    pub fn new(
        catalog: Arc<CatalogReader>,
        engine: Arc<RangeEngine>,
        library: Arc<dyn LibraryLayout>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            catalog,
            engine,
            library,
            runtime,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_fh: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn dir_attr(&self, ino: u64, mtime_secs: i64) -> FileAttr {
        let mtime = UNIX_EPOCH + Duration::from_secs(mtime_secs.max(0) as u64);
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: FileType::Directory,
            perm: 0o555,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, size: u64, mtime_secs: i64) -> FileAttr {
        let mtime = UNIX_EPOCH + Duration::from_secs(mtime_secs.max(0) as u64);
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Library view grouped as collection dir -> entries; the "" key holds
    /// files the builder placed at the library root.
    fn library_index(&self) -> BTreeMap<String, Vec<(String, FileRecord)>> {
        let mut index: BTreeMap<String, Vec<(String, FileRecord)>> = BTreeMap::new();
        let Ok(imports) = self.catalog.imports() else {
            return index;
        };
        for import in imports {
            let Ok(files) = self.catalog.files(&import.id) else {
                continue;
            };
            for file in files {
                let rel = self.library.library_path(&file);
                let name = rel
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| display_name(&file));
                let dir = rel
                    .parent()
                    .filter(|p| *p != Path::new(""))
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                index.entry(dir).or_default().push((name, file));
            }
        }
        index
    }

    fn file_node(&mut self, file: &FileRecord, mtime: i64) -> (u64, FileAttr) {
        let ino = self.inodes.get_or_insert(NodeKey::File {
            import_id: file.import_id.clone(),
            file_idx: file.idx,
        });
        (ino, self.file_attr(ino, file.total_bytes, mtime))
    }

    fn attr_of(&mut self, ino: u64) -> Option<FileAttr> {
        match ino {
            ROOT_INO | BY_ID_INO | LIBRARY_INO => Some(self.dir_attr(ino, 0)),
            _ => match self.inodes.key(ino)?.clone() {
                NodeKey::ImportDir(import_id) => {
                    let import = self.catalog.import(&import_id).ok()?;
                    Some(self.dir_attr(ino, import.imported_at))
                }
                NodeKey::LibraryDir(_) => Some(self.dir_attr(ino, 0)),
                NodeKey::File {
                    import_id,
                    file_idx,
                } => {
                    let file = self.catalog.file(&import_id, file_idx).ok()?;
                    let mtime = self.catalog.import(&import_id).map(|i| i.imported_at).unwrap_or(0);
                    Some(self.file_attr(ino, file.total_bytes, mtime))
                }
            },
        }
    }

    fn resolve_child(&mut self, parent: u64, name: &str) -> Option<FileAttr> {
        match parent {
            ROOT_INO => match name {
                "by-id" => Some(self.dir_attr(BY_ID_INO, 0)),
                "library" => Some(self.dir_attr(LIBRARY_INO, 0)),
                _ => None,
            },
            BY_ID_INO => {
                let import = self.catalog.import(name).ok()?;
                let ino = self.inodes.get_or_insert(NodeKey::ImportDir(import.id));
                Some(self.dir_attr(ino, import.imported_at))
            }
            LIBRARY_INO => {
                let index = self.library_index();
                if index.contains_key(name) && !name.is_empty() {
                    let ino = self
                        .inodes
                        .get_or_insert(NodeKey::LibraryDir(name.to_string()));
                    return Some(self.dir_attr(ino, 0));
                }
                // Bare files at the library root
                let (_, file) = index
                    .get("")?
                    .iter()
                    .find(|(entry_name, _)| entry_name == name)?
                    .clone();
                let mtime = self.catalog.import(&file.import_id).map(|i| i.imported_at).unwrap_or(0);
                Some(self.file_node(&file, mtime).1)
            }
            _ => match self.inodes.key(parent)?.clone() {
                NodeKey::ImportDir(import_id) => {
                    let import = self.catalog.import(&import_id).ok()?;
                    let files = self.catalog.files(&import_id).ok()?;
                    let file = files.into_iter().find(|f| display_name(f) == name)?;
                    Some(self.file_node(&file, import.imported_at).1)
                }
                NodeKey::LibraryDir(dir) => {
                    let index = self.library_index();
                    let (_, file) = index
                        .get(&dir)?
                        .iter()
                        .find(|(entry_name, _)| entry_name == name)?
                        .clone();
                    let mtime = self.catalog.import(&file.import_id).map(|i| i.imported_at).unwrap_or(0);
                    Some(self.file_node(&file, mtime).1)
                }
                NodeKey::File { .. } => None,
            },
        }
    }

    /// Full listing for one directory: (ino, kind, name), "." and ".." first.
    fn dir_entries(&mut self, ino: u64) -> Option<Vec<(u64, FileType, String)>> {
        let parent = match ino {
            ROOT_INO | BY_ID_INO | LIBRARY_INO => ROOT_INO,
            _ => match self.inodes.key(ino)? {
                NodeKey::ImportDir(_) => BY_ID_INO,
                NodeKey::LibraryDir(_) => LIBRARY_INO,
                NodeKey::File { .. } => return None,
            },
        };
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];

        match ino {
            ROOT_INO => {
                entries.push((BY_ID_INO, FileType::Directory, "by-id".to_string()));
                entries.push((LIBRARY_INO, FileType::Directory, "library".to_string()));
            }
            BY_ID_INO => {
                for import in self.catalog.imports().ok()? {
                    let ino = self
                        .inodes
                        .get_or_insert(NodeKey::ImportDir(import.id.clone()));
                    entries.push((ino, FileType::Directory, import.id));
                }
            }
            LIBRARY_INO => {
                let index = self.library_index();
                for (dir, files) in index {
                    if dir.is_empty() {
                        for (name, file) in files {
                            let (file_ino, _) = self.file_node(&file, 0);
                            entries.push((file_ino, FileType::RegularFile, name));
                        }
                    } else {
                        let dir_ino = self.inodes.get_or_insert(NodeKey::LibraryDir(dir.clone()));
                        entries.push((dir_ino, FileType::Directory, dir));
                    }
                }
            }
            _ => match self.inodes.key(ino)?.clone() {
                NodeKey::ImportDir(import_id) => {
                    let import = self.catalog.import(&import_id).ok()?;
                    for file in self.catalog.files(&import_id).ok()? {
                        let name = display_name(&file);
                        let (file_ino, _) = self.file_node(&file, import.imported_at);
                        entries.push((file_ino, FileType::RegularFile, name));
                    }
                }
                NodeKey::LibraryDir(dir) => {
                    let index = self.library_index();
                    for (name, file) in index.get(&dir)?.clone() {
                        let (file_ino, _) = self.file_node(&file, 0);
                        entries.push((file_ino, FileType::RegularFile, name));
                    }
                }
                NodeKey::File { .. } => return None,
            },
        }

        Some(entries)
    }

    fn open_file(&mut self, ino: u64) -> Result<u64, libc::c_int> {
        let Some(NodeKey::File {
            import_id,
            file_idx,
        }) = self.inodes.key(ino).cloned()
        else {
            return Err(libc::ENOENT);
        };

        let file = self
            .catalog
            .file(&import_id, file_idx)
            .map_err(|_| libc::ENOENT)?;
        let layout = self
            .engine
            .layout_for(&import_id, file_idx)
            .map_err(|_| libc::ENOENT)?;

        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(
            fh,
            OpenFile {
                import_id,
                file_idx,
                declared_size: file.total_bytes,
                layout,
                hot: None,
            },
        );
        Ok(fh)
    }

    /// EOF short-circuit, hot-cache hit, or one expanded engine pass that
    /// refills the hot cache.
    fn read_at(&mut self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, libc::c_int> {
        let engine = self.engine.clone();
        let runtime = self.runtime.clone();
        let handle = self.handles.get_mut(&fh).ok_or(libc::EBADF)?;

        // Reads at or past the declared size are EOF, not errors
        if offset >= handle.declared_size || size == 0 {
            return Ok(Vec::new());
        }

        let len = size as u64;
        if let Some(hot) = &handle.hot {
            if hot.covers(offset, len) {
                return Ok(hot.slice(offset, len).to_vec());
            }
        }

        // Expand the request so the next sequential reads hit the hot cache
        let window_end = (offset + len.max(READ_WINDOW)).min(handle.declared_size) - 1;

        let mut out = std::io::Cursor::new(Vec::new());
        let result = runtime.block_on(engine.read_range(
            &handle.import_id,
            handle.file_idx,
            offset,
            window_end,
            &mut handle.layout,
            &mut out,
        ));
        let data = out.into_inner();

        match result {
            Ok(_written) => {
                // data may stop short of the window: decoded EOF
                let data = Bytes::from(data);
                let served = data.len().min(size as usize);
                let response = data[..served].to_vec();
                handle.hot = Some(HotRead {
                    start: offset,
                    data,
                });
                Ok(response)
            }
            Err(e) => Err(errno_for(&e)),
        }
    }
}

fn errno_for(err: &EdrError) -> libc::c_int {
    match err {
        EdrError::Catalog(_) => libc::ENOENT,
        EdrError::InvalidRange { .. } => libc::EINVAL,
        _ => libc::EIO,
    }
}

impl Filesystem for EdrFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.resolve_child(parent, name) {
            Some(attr) => reply.entry(&TTL, &attr, 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr_of(ino) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(entries) = self.dir_entries(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        for (i, (child_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.open_file(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.read_at(fh, offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(&fh);
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SegmentCache;
    use crate::catalog::testing as catalog_testing;
    use crate::fuse::library::DefaultLibraryLayout;
    use crate::metrics::Metrics;
    use crate::nntp::testing::MockNntpServer;
    use crate::nntp::NntpPoolBuilder;
    use crate::yenc;
    use tempfile::TempDir;

    const DECLARED: u64 = 1_230_000; // encoded sum, larger than decoded
    const DECODED: [usize; 2] = [600_000, 600_000];
    const DECODED_TOTAL: u64 = 1_200_000;

    struct Fixture {
        fs: EdrFs,
        payloads: Vec<Vec<u8>>,
        metrics: Arc<Metrics>,
        _rt: tokio::runtime::Runtime,
        _cache_dir: TempDir,
    }

    /// Two imports: one two-segment movie, one root-level loose file.
    fn fixture() -> Fixture {
        let rt = tokio::runtime::Runtime::new().unwrap();

        let (server, payloads) = rt.block_on(async {
            let server = MockNntpServer::start().await;
            let payloads: Vec<Vec<u8>> = DECODED
                .iter()
                .enumerate()
                .map(|(i, &len)| yenc::testing::payload(len, 40 + i as u8))
                .collect();
            for (i, payload) in payloads.iter().enumerate() {
                server.add_article(
                    &format!("m{}@t", i + 1),
                    yenc::testing::encode(payload, "movie.mkv", None),
                );
            }
            (server, payloads)
        });

        let catalog = Arc::new(catalog_testing::catalog_with(|conn| {
            catalog_testing::insert_import(conn, "imp-1", 1, DECLARED);
            catalog_testing::insert_file(
                conn,
                "imp-1",
                0,
                "[1/1] \"Show.S01E01.mkv\" yEnc",
                "Show.S01E01.mkv",
                DECLARED,
            );
            catalog_testing::insert_segment(conn, "imp-1", 0, 1, 615_000, "m1@t");
            catalog_testing::insert_segment(conn, "imp-1", 0, 2, 615_000, "m2@t");
        }));

        let cache_dir = TempDir::new().unwrap();
        let pool = {
            let _guard = rt.enter();
            NntpPoolBuilder::new(server.config())
                .max_size(2)
                .build()
                .unwrap()
        };
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(SegmentCache::new(
            cache_dir.path(),
            0,
            pool,
            metrics.clone(),
        ));
        let engine = Arc::new(RangeEngine::new(catalog.clone(), cache, 0, metrics.clone()));

        let fs = EdrFs::new(
            catalog,
            engine,
            Arc::new(DefaultLibraryLayout),
            rt.handle().clone(),
        );

        Fixture {
            fs,
            payloads,
            metrics,
            _rt: rt,
            _cache_dir: cache_dir,
        }
    }

    fn names(entries: &[(u64, FileType, String)]) -> Vec<&str> {
        entries.iter().map(|(_, _, name)| name.as_str()).collect()
    }

    #[test]
    fn test_root_layout() {
        let mut fx = fixture();
        let entries = fx.fs.dir_entries(ROOT_INO).unwrap();
        assert_eq!(names(&entries), vec![".", "..", "by-id", "library"]);

        let by_id = fx.fs.resolve_child(ROOT_INO, "by-id").unwrap();
        assert_eq!(by_id.kind, FileType::Directory);
        assert_eq!(by_id.perm, 0o555);
    }

    #[test]
    fn test_import_dir_lists_files_with_declared_size() {
        let mut fx = fixture();
        let import_attr = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let entries = fx.fs.dir_entries(import_attr.ino).unwrap();
        assert_eq!(names(&entries), vec![".", "..", "Show.S01E01.mkv"]);

        let file_attr = fx
            .fs
            .resolve_child(import_attr.ino, "Show.S01E01.mkv")
            .unwrap();
        assert_eq!(file_attr.kind, FileType::RegularFile);
        assert_eq!(file_attr.perm, 0o444);
        assert_eq!(file_attr.size, DECLARED);
    }

    #[test]
    fn test_inodes_are_stable_across_lookups() {
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let first = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let second = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        assert_eq!(first.ino, second.ino);
    }

    #[test]
    fn test_library_view_reaches_same_file() {
        let mut fx = fixture();
        let lib_dir = fx.fs.resolve_child(LIBRARY_INO, "Show.S01E01").unwrap();
        assert_eq!(lib_dir.kind, FileType::Directory);

        let via_library = fx
            .fs
            .resolve_child(lib_dir.ino, "Show.S01E01.mkv")
            .unwrap();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let via_raw = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        assert_eq!(via_library.ino, via_raw.ino, "both views share the node");
    }

    #[test]
    fn test_unknown_names_are_enoent() {
        let mut fx = fixture();
        assert!(fx.fs.resolve_child(ROOT_INO, "nope").is_none());
        assert!(fx.fs.resolve_child(BY_ID_INO, "imp-404").is_none());
    }

    #[test]
    fn test_read_through_handle() {
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let file = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let fh = fx.fs.open_file(file.ino).unwrap();

        let data = fx.fs.read_at(fh, 0, 65_536).unwrap();
        assert_eq!(data, &fx.payloads[0][..65_536]);

        // Cross-segment read
        let data = fx.fs.read_at(fh, 599_990, 20).unwrap();
        assert_eq!(&data[..10], &fx.payloads[0][599_990..]);
        assert_eq!(&data[10..], &fx.payloads[1][..10]);
    }

    #[test]
    fn test_sequential_reads_hit_hot_cache() {
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let file = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let fh = fx.fs.open_file(file.ino).unwrap();

        let first = fx.fs.read_at(fh, 0, 65_536).unwrap();
        let engine_passes = fx.metrics.snapshot().reads_served;
        assert_eq!(engine_passes, 1);

        // Identical repeat and the follow-on window read both come from the
        // hot buffer: no further engine passes, no NNTP traffic
        let again = fx.fs.read_at(fh, 0, 65_536).unwrap();
        assert_eq!(first, again);

        let next = fx.fs.read_at(fh, 65_536, 65_536).unwrap();
        assert_eq!(next, &fx.payloads[0][65_536..131_072]);

        assert_eq!(fx.metrics.snapshot().reads_served, engine_passes);
    }

    #[test]
    fn test_read_past_declared_size_is_empty() {
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let file = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let fh = fx.fs.open_file(file.ino).unwrap();

        assert!(fx.fs.read_at(fh, DECLARED, 4096).unwrap().is_empty());
        assert!(fx.fs.read_at(fh, DECLARED + 10, 4096).unwrap().is_empty());
    }

    #[test]
    fn test_read_between_decoded_and_declared_size_is_empty() {
        // The declared size overstates the decoded payload; the gap reads as EOF
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let file = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let fh = fx.fs.open_file(file.ino).unwrap();

        let data = fx.fs.read_at(fh, DECODED_TOTAL, 4096).unwrap();
        assert!(data.is_empty(), "past decoded EOF must be empty, not an error");

        // A read straddling the decoded end returns only the real bytes
        let data = fx.fs.read_at(fh, DECODED_TOTAL - 100, 4096).unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(data, &fx.payloads[1][DECODED[1] - 100..]);
    }

    #[test]
    fn test_release_drops_handle() {
        let mut fx = fixture();
        let import = fx.fs.resolve_child(BY_ID_INO, "imp-1").unwrap();
        let file = fx.fs.resolve_child(import.ino, "Show.S01E01.mkv").unwrap();
        let fh = fx.fs.open_file(file.ino).unwrap();
        assert!(fx.fs.handles.contains_key(&fh));
        fx.fs.handles.remove(&fh);
        assert!(fx.fs.read_at(fh, 0, 16).is_err());
    }
}
