//! Chapter metadata and the number formatting used for output names.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A non-negative decimal chapter number such as `10` or `10.5`.
///
/// Stored exactly: the whole part plus the fractional digits with trailing
/// zeros removed, so `10.50` and `10.5` compare and render identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterNumber {
    whole: u64,
    fraction: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid chapter number: {0:?}")]
pub struct InvalidChapterNumber(pub String);

impl ChapterNumber {
    /// Create an integral chapter number.
    pub fn whole(whole: u64) -> Self {
        Self {
            whole,
            fraction: String::new(),
        }
    }

    /// Integer part of the number.
    pub fn whole_part(&self) -> u64 {
        self.whole
    }

    pub fn is_integral(&self) -> bool {
        self.fraction.is_empty()
    }

    /// Folder name for this chapter inside a volume archive.
    ///
    /// The integer part is zero-padded to `width` digits; a fractional part
    /// is appended unpadded after a period (`005`, `005.5`).
    pub fn folder_name(&self, width: usize) -> String {
        if self.is_integral() {
            format!("{:0width$}", self.whole, width = width)
        } else {
            format!("{:0width$}.{}", self.whole, self.fraction, width = width)
        }
    }
}

impl FromStr for ChapterNumber {
    type Err = InvalidChapterNumber;

    /// Parse `digits[.digits]`. The period is the only decimal separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidChapterNumber(s.to_string());

        let (whole, fraction) = match s.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (s, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if s.contains('.') && (fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            return Ok(Self::whole(whole));
        }

        Ok(Self {
            whole,
            fraction: fraction.to_string(),
        })
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        // Fractions carry no trailing zeros, so digit strings compare like the
        // values they represent.
        self.whole
            .cmp(&other.whole)
            .then_with(|| self.fraction.cmp(&other.fraction))
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integral() {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{}.{}", self.whole, self.fraction)
        }
    }
}

/// Volume, chapter and title parsed from a chapter archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMetadata {
    /// Volume the chapter belongs to
    pub volume: u32,
    /// Chapter number within the series (may be fractional)
    pub chapter_number: ChapterNumber,
    /// Chapter title, empty when the source has none
    pub chapter_title: String,
}

impl ChapterMetadata {
    pub fn new(volume: u32, chapter_number: ChapterNumber, chapter_title: impl Into<String>) -> Self {
        Self {
            volume,
            chapter_number,
            chapter_title: chapter_title.into(),
        }
    }
}

/// Number of decimal digits needed to print `value`.
pub fn digit_width(value: u64) -> usize {
    value.to_string().len()
}
