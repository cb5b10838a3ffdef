//! Library-view path building
//!
//! The virtual-library tree presents each logical file at a friendlier path
//! than `by-id/<import>/<file>`. Only the path derivation is pluggable; the
//! nodes underneath are the same file nodes backed by the same range engine.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

use crate::catalog::FileRecord;

/// Derives the library-relative path for one catalog row.
///
/// Implementations must be pure and deterministic: same row, same path, no
/// I/O. Paths are `<collection>/<filename>` or a bare filename for files that
/// belong at the library root.
pub trait LibraryLayout: Send + Sync + 'static {
    fn library_path(&self, file: &FileRecord) -> PathBuf;
}

/// Default layout: `<clean title>/<filename>`, where the title is the
/// filename stripped of media extensions, part numbering and path-hostile
/// characters.
pub struct DefaultLibraryLayout;

impl LibraryLayout for DefaultLibraryLayout {
    fn library_path(&self, file: &FileRecord) -> PathBuf {
        let filename = display_name(file);
        let title = clean_title(&filename);
        if title.is_empty() {
            PathBuf::from(filename)
        } else {
            PathBuf::from(title).join(filename)
        }
    }
}

/// Filename for a catalog row: the importer's derived name when present,
/// else whatever is quoted in the subject, else a positional fallback.
pub fn display_name(file: &FileRecord) -> String {
    if !file.filename.is_empty() {
        return sanitize(&file.filename);
    }
    filename_from_subject(&file.subject)
        .map(|name| sanitize(&name))
        .unwrap_or_else(|| format!("file-{:03}", file.idx))
}

/// Extract a filename from a subject line like:
/// `[1/9] - "filename.ext" yEnc (1/5202)`
/// Handles both regular quotes and HTML entities (&quot;).
pub fn filename_from_subject(subject: &str) -> Option<String> {
    static QUOTED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?:&quot;|")([^"]+)(?:&quot;|")"#).unwrap());
    QUOTED
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reduce a filename to a collection title
pub fn clean_title(filename: &str) -> String {
    let name = filename
        .trim_end_matches(".mkv")
        .trim_end_matches(".mp4")
        .trim_end_matches(".avi")
        .trim_end_matches(".mov")
        .trim_end_matches(".wmv")
        .trim_end_matches(".flv")
        .trim_end_matches(".webm")
        .trim_end_matches(".m4v")
        .trim_end_matches(".nfo")
        .trim_end_matches(".srt")
        .trim_end_matches(".zip")
        .trim_end_matches(".rar")
        .trim_end_matches(".7z");

    // Strip .part01 / .part001 style suffixes left after the extension
    static PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.part\d+$").unwrap());
    let name = PART.replace(name, "");

    sanitize(name.trim())
}

/// Replace characters that would break path components
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str, subject: &str) -> FileRecord {
        FileRecord {
            import_id: "imp-1".to_string(),
            idx: 0,
            subject: subject.to_string(),
            filename: filename.to_string(),
            total_bytes: 1_000,
        }
    }

    #[test]
    fn test_default_layout_shape() {
        let layout = DefaultLibraryLayout;
        let path = layout.library_path(&record("Show.S01E01.mkv", ""));
        assert_eq!(path, PathBuf::from("Show.S01E01/Show.S01E01.mkv"));
    }

    #[test]
    fn test_layout_is_deterministic() {
        let layout = DefaultLibraryLayout;
        let row = record("Movie.2024.mkv", "");
        assert_eq!(layout.library_path(&row), layout.library_path(&row));
    }

    #[test]
    fn test_filename_from_subject() {
        assert_eq!(
            filename_from_subject(r#"[1/9] - "archive.part01.rar" yEnc (1/5202)"#).as_deref(),
            Some("archive.part01.rar")
        );
        assert_eq!(
            filename_from_subject("&quot;entity.mkv&quot; yEnc").as_deref(),
            Some("entity.mkv")
        );
        assert_eq!(filename_from_subject("no quotes here"), None);
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(display_name(&record("named.mkv", "junk")), "named.mkv");
        assert_eq!(
            display_name(&record("", r#""from-subject.mkv" yEnc"#)),
            "from-subject.mkv"
        );
        assert_eq!(display_name(&record("", "nothing usable")), "file-000");
    }

    #[test]
    fn test_clean_title_strips_parts_and_extensions() {
        assert_eq!(clean_title("archive.part01.rar"), "archive");
        assert_eq!(clean_title("Movie.2024.mkv"), "Movie.2024");
        assert_eq!(clean_title("weird/name:here.mkv"), "weird_name_here");
    }
}
