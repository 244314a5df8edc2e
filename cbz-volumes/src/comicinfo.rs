//! ComicInfo.xml lookup and Title extraction.

use crate::error::ExtractError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xmlparser::{ElementEnd, Token, Tokenizer};

/// Entry name carrying the chapter metadata, matched case-insensitively.
pub const COMIC_INFO_NAME: &str = "ComicInfo.xml";

const TITLE_ELEMENT: &str = "Title";

/// Read the ComicInfo title from a chapter archive.
pub fn read_title(path: &Path) -> Result<String, ExtractError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !is_comic_info(entry.name()) {
            continue;
        }

        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        let xml = String::from_utf8(bytes)
            .map_err(|_| ExtractError::Markup("not valid UTF-8".to_string()))?;

        return extract_title(&xml);
    }

    Err(ExtractError::MissingComicInfo)
}

/// Check whether an entry path points at a ComicInfo.xml file.
pub fn is_comic_info(entry_name: &str) -> bool {
    let file_name = entry_name.rsplit(['/', '\\']).next().unwrap_or(entry_name);
    file_name.eq_ignore_ascii_case(COMIC_INFO_NAME)
}

/// Extract the text of the first `Title` element.
///
/// The whole document is tokenized, so a document that is not well formed
/// fails even when its Title came early.
pub fn extract_title(xml: &str) -> Result<String, ExtractError> {
    let xml = xml.trim_start_matches('\u{feff}');

    // Open elements as (prefix, local name)
    let mut open: Vec<(&str, &str)> = Vec::new();
    let mut title: Option<String> = None;
    // Depth of the first Title while its text is gathered
    let mut title_depth: Option<usize> = None;
    let mut text = String::new();
    let mut saw_root = false;

    for token in Tokenizer::from(xml) {
        let token = token.map_err(|e| ExtractError::Markup(e.to_string()))?;

        match token {
            Token::ElementStart { prefix, local, .. } => {
                if saw_root && open.is_empty() {
                    return Err(markup("content after the root element"));
                }
                open.push((prefix.as_str(), local.as_str()));
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {
                    if title.is_none() && title_depth.is_none() && is_title(open.last()) {
                        title_depth = Some(open.len());
                    }
                }
                ElementEnd::Empty => {
                    if title.is_none() && title_depth.is_none() && is_title(open.last()) {
                        title = Some(String::new());
                    }
                    open.pop();
                    saw_root |= open.is_empty();
                }
                ElementEnd::Close(prefix, local) => {
                    let name = (prefix.as_str(), local.as_str());
                    match open.pop() {
                        Some(expected) if expected == name => {}
                        Some(expected) => {
                            return Err(ExtractError::Markup(format!(
                                "expected </{}>, found </{}>",
                                qualified(expected),
                                qualified(name)
                            )));
                        }
                        None => {
                            return Err(ExtractError::Markup(format!(
                                "unexpected </{}>",
                                qualified(name)
                            )));
                        }
                    }

                    if title_depth == Some(open.len() + 1) {
                        title = Some(std::mem::take(&mut text));
                        title_depth = None;
                    }
                    saw_root |= open.is_empty();
                }
            },
            Token::Text { text: chunk } if title_depth.is_some() => {
                text.push_str(&decode_entities(chunk.as_str())?);
            }
            Token::Cdata { text: chunk, .. } if title_depth.is_some() => {
                text.push_str(chunk.as_str());
            }
            // Comments, processing instructions, declarations and text
            // outside the Title carry nothing we need
            _ => {}
        }
    }

    if let Some(&name) = open.last() {
        return Err(ExtractError::Markup(format!("unclosed <{}>", qualified(name))));
    }
    if !saw_root {
        return Err(markup("no root element"));
    }

    let title = title.ok_or(ExtractError::MissingTitle)?;
    let title = title.trim();
    if title.is_empty() {
        return Err(ExtractError::MissingTitle);
    }

    Ok(title.to_string())
}

fn is_title(name: Option<&(&str, &str)>) -> bool {
    matches!(name, Some(&("", TITLE_ELEMENT)))
}

fn qualified((prefix, local): (&str, &str)) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

fn markup(reason: &str) -> ExtractError {
    ExtractError::Markup(reason.to_string())
}

/// Decode the predefined XML entities and numeric character references.
fn decode_entities(text: &str) -> Result<String, ExtractError> {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| ExtractError::Markup("unterminated entity reference".to_string()))?;
        let name = &after[..semi];

        let decoded = match name {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => decode_char_ref(name)
                .ok_or_else(|| ExtractError::Markup(format!("unknown entity &{};", name)))?,
        };
        result.push(decoded);
        rest = &after[semi + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn decode_char_ref(name: &str) -> Option<char> {
    let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        name.strip_prefix('#')?.parse().ok()?
    };
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ComicInfo xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <Title>Том 1. Глава 1 - Начало</Title>
  <Series>Example</Series>
</ComicInfo>"#;

    fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_is_comic_info() {
        assert!(is_comic_info("ComicInfo.xml"));
        assert!(is_comic_info("comicinfo.XML"));
        assert!(is_comic_info("meta/ComicInfo.xml"));
        assert!(!is_comic_info("ComicInfo.xml.bak"));
        assert!(!is_comic_info("001.jpg"));
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title(SAMPLE).unwrap(), "Том 1. Глава 1 - Начало");
    }

    #[test]
    fn test_extract_title_first_element_wins() {
        let xml = "<ComicInfo><Title>1 - 1 First</Title><Title>2 - 2 Second</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 1 First");
    }

    #[test]
    fn test_extract_title_ignores_similar_tags() {
        let xml = "<ComicInfo><TitleSort>zzz</TitleSort><Title lang=\"ru\">1 - 2</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 2");
    }

    #[test]
    fn test_extract_title_decodes_entities() {
        let xml = "<ComicInfo><Title>1 - 2 Tom &amp; Jerry &#8212; &#x41;</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 2 Tom & Jerry \u{2014} A");
    }

    #[test]
    fn test_extract_title_cdata() {
        let xml = "<ComicInfo><Title><![CDATA[1 - 2 <Raw> & Co]]></Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 2 <Raw> & Co");
    }

    #[test]
    fn test_extract_title_missing() {
        let xml = "<ComicInfo><Series>Example</Series></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::MissingTitle)));

        let xml = "<ComicInfo><Title/></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::MissingTitle)));

        let xml = "<ComicInfo><Title>   </Title></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::MissingTitle)));

        let xml = "<ComicInfo><Title lang=\"ru\"/><Series>1 - 2</Series></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::MissingTitle)));
    }

    #[test]
    fn test_extract_title_malformed() {
        let xml = "<ComicInfo><Title>1 - 2";
        assert!(matches!(extract_title(xml), Err(ExtractError::Markup(_))));

        let xml = "<ComicInfo><Title>1 - 2 &bogus;</Title></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::Markup(_))));

        assert!(matches!(extract_title("plain text"), Err(ExtractError::Markup(_))));
    }

    #[test]
    fn test_extract_title_skips_comments_and_instructions() {
        let xml = "<ComicInfo><!-- <Title>Oneshot</Title> --><Title>1 - 2 Real</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 2 Real");

        let xml = "<?xml version=\"1.0\"?><?meta <Title>x</Title>?><ComicInfo><Title>3 - 4</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "3 - 4");
    }

    #[test]
    fn test_extract_title_rejects_broken_document_after_title() {
        let xml = "<ComicInfo><Title>1 - 2</Title><Series>";
        assert!(matches!(extract_title(xml), Err(ExtractError::Markup(_))));

        let xml = "<ComicInfo><Title>1 - 2</Title></Series></ComicInfo>";
        assert!(matches!(extract_title(xml), Err(ExtractError::Markup(_))));

        let xml = "<ComicInfo><Title>1 - 2</Title></ComicInfo><Extra/>";
        assert!(matches!(extract_title(xml), Err(ExtractError::Markup(_))));
    }

    #[test]
    fn test_extract_title_ignores_prefixed_title() {
        let xml = "<ComicInfo xmlns:x=\"urn:x\"><x:Title>9 - 9</x:Title><Title>1 - 2</Title></ComicInfo>";
        assert_eq!(extract_title(xml).unwrap(), "1 - 2");
    }

    #[test]
    fn test_read_title_from_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ch1.cbz");
        write_archive(
            &path,
            &[("001.jpg", &b"image"[..]), ("COMICINFO.XML", SAMPLE.as_bytes())],
        );

        assert_eq!(read_title(&path).unwrap(), "Том 1. Глава 1 - Начало");
    }

    #[test]
    fn test_read_title_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ch1.cbz");
        write_archive(&path, &[("001.jpg", &b"image"[..])]);

        assert!(matches!(read_title(&path), Err(ExtractError::MissingComicInfo)));
    }

    #[test]
    fn test_read_title_not_an_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.cbz");
        std::fs::write(&path, b"definitely not a zip file").unwrap();

        assert!(matches!(read_title(&path), Err(ExtractError::Archive(_))));
    }
}
