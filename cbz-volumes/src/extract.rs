//! Metadata extraction for a directory of chapter archives.

use crate::chapter::ChapterMetadata;
use crate::comicinfo;
use crate::error::ExtractError;
use crate::title;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Outcome of extracting one archive.
pub type ParseResult = std::result::Result<ChapterMetadata, ExtractError>;

/// Per-archive outcomes keyed by file name.
pub type ParseResults = HashMap<String, ParseResult>;

/// Chapter metadata for archives that parsed, keyed by file name.
pub type ChapterMap = HashMap<String, ChapterMetadata>;

/// Find all chapter archives directly inside `dir`.
pub fn find_cbz_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        if path.is_file() && is_cbz(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Check if a path is a cbz file (case-insensitive)
fn is_cbz(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.eq_ignore_ascii_case("cbz"))
        .unwrap_or(false)
}

/// Map key for an archive path.
pub fn archive_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Extract chapter metadata from a single archive.
///
/// Every failure is returned as a value; nothing here panics or aborts the
/// surrounding batch.
pub fn extract_archive(path: &Path) -> ParseResult {
    let title = comicinfo::read_title(path)?;
    title::parse_title(&title).ok_or(ExtractError::UnrecognizedTitle(title))
}

/// Extract metadata from `files` concurrently.
///
/// One blocking task is spawned per archive. The returned map always holds
/// exactly one entry per archive; `on_complete` is called as each entry is
/// recorded.
pub async fn extract_archives<F>(files: Vec<PathBuf>, mut on_complete: F) -> ParseResults
where
    F: FnMut(&str, &ParseResult),
{
    let handles: Vec<(String, tokio::task::JoinHandle<ParseResult>)> = files
        .into_iter()
        .map(|path| {
            let key = archive_key(&path);
            let handle = tokio::task::spawn_blocking(move || extract_archive(&path));
            (key, handle)
        })
        .collect();

    let mut results = ParseResults::with_capacity(handles.len());

    for (key, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ExtractError::Task(e.to_string())),
        };

        match &result {
            Ok(meta) => log::debug!(
                "{}: volume {} chapter {} {:?}",
                key,
                meta.volume,
                meta.chapter_number,
                meta.chapter_title
            ),
            Err(e) => log::debug!("{}: {}", key, e),
        }

        on_complete(&key, &result);
        results.insert(key, result);
    }

    results
}

/// Split results into parsed chapters, or the sorted list of failures.
pub fn into_chapters(
    results: ParseResults,
) -> std::result::Result<ChapterMap, Vec<(String, ExtractError)>> {
    let mut chapters = ChapterMap::with_capacity(results.len());
    let mut failures = Vec::new();

    for (key, result) in results {
        match result {
            Ok(meta) => {
                chapters.insert(key, meta);
            }
            Err(e) => failures.push((key, e)),
        }
    }

    if failures.is_empty() {
        Ok(chapters)
    } else {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::ChapterNumber;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_chapter(dir: &Path, name: &str, title: Option<&str>) -> PathBuf {
        let path = dir.join(name);
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("001.jpg", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"page").unwrap();
        if let Some(title) = title {
            zip.start_file("ComicInfo.xml", SimpleFileOptions::default()).unwrap();
            write!(zip, "<ComicInfo><Title>{}</Title></ComicInfo>", title).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_is_cbz() {
        assert!(is_cbz(Path::new("a.cbz")));
        assert!(is_cbz(Path::new("a.CBZ")));
        assert!(!is_cbz(Path::new("a.zip")));
        assert!(!is_cbz(Path::new("cbz")));
    }

    #[test]
    fn test_find_cbz_files_skips_others() {
        let temp_dir = TempDir::new().unwrap();
        write_chapter(temp_dir.path(), "b.cbz", Some("1 - 2"));
        write_chapter(temp_dir.path(), "a.cbz", Some("1 - 1"));
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(temp_dir.path().join("dir.cbz")).unwrap();

        let files = find_cbz_files(temp_dir.path()).unwrap();
        let names: Vec<String> = files.iter().map(|p| archive_key(p)).collect();
        assert_eq!(names, vec!["a.cbz", "b.cbz"]);
    }

    #[test]
    fn test_extract_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_chapter(temp_dir.path(), "c.cbz", Some("Том 2. Глава 7.5 - Финал"));

        let meta = extract_archive(&path).unwrap();
        assert_eq!(meta.volume, 2);
        assert_eq!(meta.chapter_number, "7.5".parse::<ChapterNumber>().unwrap());
        assert_eq!(meta.chapter_title, "Финал");
    }

    #[test]
    fn test_extract_archive_unrecognized_title() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_chapter(temp_dir.path(), "c.cbz", Some("Oneshot"));

        match extract_archive(&path) {
            Err(ExtractError::UnrecognizedTitle(title)) => assert_eq!(title, "Oneshot"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_extract_archives_isolates_failures() {
        let temp_dir = TempDir::new().unwrap();
        write_chapter(temp_dir.path(), "ch1.cbz", Some("1 - 1 One"));
        write_chapter(temp_dir.path(), "ch2.cbz", None);
        write_chapter(temp_dir.path(), "ch3.cbz", Some("1 - 3 Three"));
        std::fs::write(temp_dir.path().join("ch4.cbz"), b"garbage").unwrap();

        let mut seen = Vec::new();
        let files = find_cbz_files(temp_dir.path()).unwrap();
        let results = extract_archives(files, |key, _| seen.push(key.to_string())).await;

        assert_eq!(results.len(), 4);
        assert_eq!(seen.len(), 4);
        assert!(results["ch1.cbz"].is_ok());
        assert!(matches!(results["ch2.cbz"], Err(ExtractError::MissingComicInfo)));
        assert!(results["ch3.cbz"].is_ok());
        assert!(matches!(results["ch4.cbz"], Err(ExtractError::Archive(_))));

        let failures = into_chapters(results).unwrap_err();
        let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["ch2.cbz", "ch4.cbz"]);
    }

    #[tokio::test]
    async fn test_extract_archives_all_parsed() {
        let temp_dir = TempDir::new().unwrap();
        write_chapter(temp_dir.path(), "ch1.cbz", Some("Том 1. Глава 1 - Начало"));
        write_chapter(temp_dir.path(), "ch2.cbz", Some("Том 1. Глава 2 - Продолжение"));

        let files = find_cbz_files(temp_dir.path()).unwrap();
        let results = extract_archives(files, |_, _| {}).await;
        let chapters = into_chapters(results).unwrap();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters["ch2.cbz"].chapter_title, "Продолжение");
    }

    #[test]
    fn test_find_cbz_files_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_cbz_files(&temp_dir.path().join("nope")).is_err());
    }
}
