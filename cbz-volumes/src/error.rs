use crate::chapter::ChapterNumber;
use std::path::PathBuf;
use thiserror::Error;

/// Why a chapter archive could not be turned into chapter metadata.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("No ComicInfo.xml entry in archive")]
    MissingComicInfo,

    #[error("Malformed ComicInfo.xml: {0}")]
    Markup(String),

    #[error("ComicInfo.xml has no Title")]
    MissingTitle,

    #[error("Unrecognized title format: {0:?}")]
    UnrecognizedTitle(String),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// Errors from the packing stage that callers may want to tell apart.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Source directory has no usable name: {}", .0.display())]
    UnnamedSource(PathBuf),

    #[error("Volume {volume} has chapter {chapter} more than once: {}", .files.join(", "))]
    DuplicateChapter {
        volume: u32,
        chapter: ChapterNumber,
        files: Vec<String>,
    },
}
