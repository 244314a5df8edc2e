//! Chapter title parsing.
//!
//! Two naming conventions show up in ComicInfo titles:
//!
//! - Tom: `Том 3. Глава 12.5 - Title`, whitespace separated tokens where the
//!   second token is the volume and the fourth carries the chapter number.
//! - Dash: `3 - 12.5 Title`, a volume, a dash and the chapter number,
//!   followed by an optional title.
//!
//! Everything else is rejected.

use crate::chapter::{ChapterMetadata, ChapterNumber};
use once_cell::sync::Lazy;
use regex::Regex;

/// Literal that starts every Tom-convention title.
const TOM_PREFIX: &str = "Том";

/// Separator between the number part and the chapter title.
const TITLE_SEPARATOR: &str = " - ";

/// Minimum token count for a Tom title: prefix, volume, marker, number.
const TOM_MIN_TOKENS: usize = 4;

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

static DASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(\d+)\s*-\s*(\d+(?:\.\d+)?)(.*)$").expect("dash pattern is valid")
});

/// Which convention a title follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleFormat {
    Tom,
    Dash,
    Unrecognized,
}

impl TitleFormat {
    /// Classify a title with cheap prefix and substring checks.
    pub fn classify(title: &str) -> Self {
        if title.starts_with(TOM_PREFIX) {
            TitleFormat::Tom
        } else if title.contains(TITLE_SEPARATOR) {
            TitleFormat::Dash
        } else {
            TitleFormat::Unrecognized
        }
    }
}

/// Parse a ComicInfo title into chapter metadata.
///
/// Returns `None` when the title follows neither convention or a required
/// number is missing.
pub fn parse_title(title: &str) -> Option<ChapterMetadata> {
    let title = title.trim();
    match TitleFormat::classify(title) {
        TitleFormat::Tom => parse_tom(title),
        TitleFormat::Dash => parse_dash(title),
        TitleFormat::Unrecognized => None,
    }
}

/// Parse `Том <volume>[.] <marker> <number> [- <title>]`.
///
/// The first token is skipped unchecked; `TitleFormat::classify` has
/// already matched the prefix.
pub fn parse_tom(title: &str) -> Option<ChapterMetadata> {
    let tokens: Vec<&str> = title.split_whitespace().collect();
    if tokens.len() < TOM_MIN_TOKENS {
        return None;
    }

    let volume_token = tokens[1].strip_suffix('.').unwrap_or(tokens[1]);
    let volume: u32 = volume_token.parse().ok()?;

    let number = NUMBER_RE.find(tokens[3])?;
    let chapter_number: ChapterNumber = number.as_str().parse().ok()?;

    let chapter_title = title
        .split_once(TITLE_SEPARATOR)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();

    Some(ChapterMetadata::new(volume, chapter_number, chapter_title))
}

/// Parse `<volume> - <number>[ <title>]`.
pub fn parse_dash(title: &str) -> Option<ChapterMetadata> {
    let caps = DASH_RE.captures(title)?;

    let volume: u32 = caps[1].parse().ok()?;
    let chapter_number: ChapterNumber = caps[2].parse().ok()?;
    let chapter_title = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();

    Some(ChapterMetadata::new(volume, chapter_number, chapter_title))
}
