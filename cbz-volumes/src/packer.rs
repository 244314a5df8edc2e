//! Volume packing: group chapters by volume and stream them into volume
//! archives, splitting oversized volumes into size-bounded parts.

use crate::chapter::{ChapterMetadata, digit_width};
use crate::config::{DEFAULT_MAX_VOLUME_SIZE, DEFAULT_SPLIT_MARGIN, PackerConfig};
use crate::error::PackError;
use crate::extract::ChapterMap;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::ZipWriter;

/// Size limits applied while packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackOptions {
    /// Target upper bound for one volume archive in bytes. 0 disables splitting.
    pub max_volume_size: u64,
    /// Volumes split only past `max_volume_size * split_margin`.
    pub split_margin: f64,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_volume_size: DEFAULT_MAX_VOLUME_SIZE,
            split_margin: DEFAULT_SPLIT_MARGIN,
        }
    }
}

impl From<&PackerConfig> for PackOptions {
    fn from(config: &PackerConfig) -> Self {
        Self {
            max_volume_size: config.max_volume_size,
            split_margin: config.split_margin,
        }
    }
}

/// Whether and where a volume is cut into sub-volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    /// Splitting is active; sub-volumes are numbered from 1.
    pub split: bool,
    /// Bytes written to one part before the next chapter starts a new part.
    pub recommended_size: u64,
}

impl SplitPolicy {
    /// Decide the split policy for a volume of `original_size` bytes.
    pub fn for_volume(original_size: u64, options: &PackOptions) -> Self {
        let max = options.max_volume_size;
        let threshold = max as f64 * options.split_margin;

        if max == 0 || original_size as f64 <= threshold {
            return Self {
                split: false,
                recommended_size: u64::MAX,
            };
        }

        // Splitting only starts past the margin, so never fewer than two parts
        let parts = ((original_size as f64 / max as f64).round() as u64).max(2);
        Self {
            split: true,
            recommended_size: original_size / parts,
        }
    }

    /// Index of the first sub-volume: 0 (unsuffixed) unless splitting.
    pub fn first_sub_volume(&self) -> u32 {
        if self.split { 1 } else { 0 }
    }
}

/// One chapter archive scheduled into a volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeChapter<'a> {
    /// Source archive file name
    pub file_name: &'a str,
    pub meta: &'a ChapterMetadata,
}

/// Group chapters by volume, each volume's chapters in ascending chapter order.
pub fn group_by_volume(chapters: &ChapterMap) -> BTreeMap<u32, Vec<VolumeChapter<'_>>> {
    let mut groups: BTreeMap<u32, Vec<VolumeChapter<'_>>> = BTreeMap::new();

    for (file_name, meta) in chapters {
        groups.entry(meta.volume).or_default().push(VolumeChapter {
            file_name: file_name.as_str(),
            meta,
        });
    }

    for group in groups.values_mut() {
        group.sort_by(|a, b| {
            a.meta
                .chapter_number
                .cmp(&b.meta.chapter_number)
                .then_with(|| a.file_name.cmp(b.file_name))
        });
    }

    groups
}

/// First chapter number that occurs more than once within a volume.
///
/// Such chapters would share a folder name inside the volume archive.
fn find_duplicate_chapter(groups: &BTreeMap<u32, Vec<VolumeChapter<'_>>>) -> Option<PackError> {
    for (volume, chapters) in groups {
        // Chapters are sorted, so equal numbers are adjacent
        for (i, window) in chapters.windows(2).enumerate() {
            let number = &window[0].meta.chapter_number;
            if *number != window[1].meta.chapter_number {
                continue;
            }

            let files = chapters[i..]
                .iter()
                .take_while(|c| c.meta.chapter_number == *number)
                .map(|c| c.file_name.to_string())
                .collect();
            return Some(PackError::DuplicateChapter {
                volume: *volume,
                chapter: number.clone(),
                files,
            });
        }
    }
    None
}

/// File name of a volume archive, e.g. `Name - Vol 03.cbz` or `Name - Vol 03.2.cbz`.
pub fn volume_file_name(manga_name: &str, volume: u32, padding: usize, sub_volume: u32) -> String {
    if sub_volume == 0 {
        format!("{} - Vol {:0width$}.cbz", manga_name, volume, width = padding)
    } else {
        format!(
            "{} - Vol {:0width$}.{}.cbz",
            manga_name,
            volume,
            sub_volume,
            width = padding
        )
    }
}

/// An archive written by the packer.
#[derive(Debug, Clone)]
pub struct PackedArchive {
    pub path: PathBuf,
    pub volume: u32,
    /// 0 for an unsplit volume, otherwise the part number from 1
    pub sub_volume: u32,
    pub chapters: usize,
    /// Compressed bytes copied into the archive
    pub bytes: u64,
}

/// Result of a packing run.
#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Directory holding the volume archives
    pub output_dir: PathBuf,
    pub archives: Vec<PackedArchive>,
}

/// Pack every chapter in `chapters` into volume archives.
///
/// Archives are written to `{output_root}/{source leaf name}/`, which must
/// not exist yet. Two chapters sharing a number within a volume are refused
/// before anything is written. A later failure aborts the whole run;
/// archives already written stay on disk.
pub fn pack_volumes(
    source_dir: &Path,
    output_root: &Path,
    chapters: &ChapterMap,
    options: &PackOptions,
) -> Result<PackSummary> {
    let manga_name = source_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PackError::UnnamedSource(source_dir.to_path_buf()))?;

    let output_dir = output_root.join(&manga_name);
    if output_dir.exists() {
        return Err(PackError::DestinationExists(output_dir).into());
    }

    let groups = group_by_volume(chapters);
    if let Some(duplicate) = find_duplicate_chapter(&groups) {
        return Err(duplicate.into());
    }

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut summary = PackSummary {
        output_dir,
        archives: Vec::new(),
    };

    let Some(max_volume) = groups.keys().next_back().copied() else {
        log::info!("No chapters to pack");
        return Ok(summary);
    };
    let volume_padding = digit_width(u64::from(max_volume));

    for (volume, volume_chapters) in &groups {
        let target = VolumeTarget {
            output_dir: &summary.output_dir,
            manga_name: &manga_name,
            volume: *volume,
            padding: volume_padding,
        };
        let archives = pack_volume(source_dir, &target, volume_chapters, options)
            .with_context(|| format!("Failed to pack volume {}", volume))?;
        summary.archives.extend(archives);
    }

    Ok(summary)
}

/// Where and under which name a volume's archives go.
struct VolumeTarget<'a> {
    output_dir: &'a Path,
    manga_name: &'a str,
    volume: u32,
    padding: usize,
}

impl VolumeTarget<'_> {
    fn archive_path(&self, sub_volume: u32) -> PathBuf {
        self.output_dir.join(volume_file_name(
            self.manga_name,
            self.volume,
            self.padding,
            sub_volume,
        ))
    }
}

/// Stream one volume's chapters into one or more archives.
fn pack_volume(
    source_dir: &Path,
    target: &VolumeTarget<'_>,
    chapters: &[VolumeChapter<'_>],
    options: &PackOptions,
) -> Result<Vec<PackedArchive>> {
    let mut original_size = 0u64;
    for chapter in chapters {
        let path = source_dir.join(chapter.file_name);
        let metadata =
            fs::metadata(&path).with_context(|| format!("Failed to stat {}", path.display()))?;
        original_size += metadata.len();
    }

    let policy = SplitPolicy::for_volume(original_size, options);
    let max_chapter = chapters
        .iter()
        .map(|c| c.meta.chapter_number.whole_part())
        .max()
        .unwrap_or(0);
    let chapter_padding = digit_width(max_chapter);

    log::debug!(
        "Volume {}: {} chapter(s), {} bytes, split: {}",
        target.volume,
        chapters.len(),
        original_size,
        if policy.split {
            format!("every {} bytes", policy.recommended_size)
        } else {
            "no".to_string()
        }
    );

    let mut written = Vec::new();
    let mut current: Option<VolumeWriter> = None;
    let mut sub_volume = policy.first_sub_volume();
    let mut volume_size = 0u64;

    for chapter in chapters {
        if policy.split && volume_size > policy.recommended_size {
            if let Some(writer) = current.take() {
                written.push(writer.finish()?);
            }
            volume_size = 0;
            sub_volume += 1;
        }

        let mut writer = match current.take() {
            Some(writer) => writer,
            None => VolumeWriter::create(target.archive_path(sub_volume), target.volume, sub_volume)?,
        };

        let folder = chapter.meta.chapter_number.folder_name(chapter_padding);
        let source = source_dir.join(chapter.file_name);
        volume_size += writer
            .append_chapter(&source, &folder)
            .with_context(|| format!("Failed to copy {}", source.display()))?;

        current = Some(writer);
    }

    if let Some(writer) = current.take() {
        written.push(writer.finish()?);
    }

    Ok(written)
}

/// The single open destination archive of a volume.
///
/// `finish` writes the central directory and flushes. Dropping an unfinished
/// writer on an error path still finalises the archive through `ZipWriter`'s
/// own drop, so no handle outlives the volume being packed.
struct VolumeWriter {
    path: PathBuf,
    zip: ZipWriter<BufWriter<File>>,
    volume: u32,
    sub_volume: u32,
    chapters: usize,
    bytes: u64,
}

impl VolumeWriter {
    fn create(path: PathBuf, volume: u32, sub_volume: u32) -> Result<Self> {
        let file = File::create_new(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        log::info!("Writing {}", path.display());

        Ok(Self {
            path,
            zip: ZipWriter::new(BufWriter::new(file)),
            volume,
            sub_volume,
            chapters: 0,
            bytes: 0,
        })
    }

    /// Copy every file entry of `source` under `folder/` without recompressing.
    ///
    /// Returns the compressed bytes copied.
    fn append_chapter(&mut self, source: &Path, folder: &str) -> Result<u64> {
        let file = File::open(source)?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
        let mut copied = 0u64;

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() || entry.name().is_empty() {
                continue;
            }

            let name = format!("{}/{}", folder, entry.name());
            let size = entry.compressed_size();
            self.zip.raw_copy_file_rename(entry, name)?;
            copied += size;
        }

        self.chapters += 1;
        self.bytes += copied;
        Ok(copied)
    }

    fn finish(self) -> Result<PackedArchive> {
        let mut file = self
            .zip
            .finish()
            .with_context(|| format!("Failed to finalize {}", self.path.display()))?;
        file.flush()?;

        Ok(PackedArchive {
            path: self.path,
            volume: self.volume,
            sub_volume: self.sub_volume,
            chapters: self.chapters,
            bytes: self.bytes,
        })
    }
}
