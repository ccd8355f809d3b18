//! Last-resort extractors, one per format family.
//!
//! These run only after the enhanced and basic strategies have both
//! failed. Quality is deliberately lower: the goal is to salvage *some*
//! text rather than structure.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::loader::configs::PartitionConfig;
use crate::loader::{Element, ElementKind};
use crate::normalize::normalize;
use crate::types::{Result, StashError};

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script pattern"));
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("style pattern"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

/// Dispatch to the format's last-resort extractor.
pub fn extract_fallback(
    _path: &Path,
    extension: &str,
    bytes: &[u8],
    _config: &PartitionConfig,
) -> Result<Vec<Element>> {
    match extension {
        ".pdf" => pdf_plain_text(bytes),
        ".html" | ".htm" | ".xml" => Ok(html_tag_strip(&String::from_utf8_lossy(bytes))),
        ".png" | ".jpg" | ".jpeg" | ".tiff" | ".bmp" => Err(StashError::Loader(
            format!("cannot extract text from {extension} without an OCR backend"),
        )),
        ".msg" => Err(StashError::Loader(
            "binary Outlook .msg files are not readable without a converter; export as .eml".into(),
        )),
        _ => Ok(lossy_paragraphs(bytes)),
    }
}

/// Flat PDF text with no page or structure awareness.
fn pdf_plain_text(bytes: &[u8]) -> Result<Vec<Element>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| StashError::Loader(format!("plain pdf extraction failed: {err}")))?;
    Ok(lossy_paragraphs(text.as_bytes()))
}

/// Strip tags with regexes; good enough when real parsing failed.
fn html_tag_strip(html: &str) -> Vec<Element> {
    let no_scripts = SCRIPT_RE.replace_all(html, " ");
    let no_styles = STYLE_RE.replace_all(&no_scripts, " ");
    let stripped = TAG_RE.replace_all(&no_styles, " ");
    lossy_paragraphs(stripped.as_bytes())
}

fn lossy_paragraphs(bytes: &[u8]) -> Vec<Element> {
    let text = String::from_utf8_lossy(bytes);
    // A high replacement-character ratio means binary input; emitting the
    // mojibake would poison retrieval.
    let replacements = text.chars().filter(|c| *c == '\u{FFFD}').count();
    if replacements * 5 > text.chars().count().max(1) {
        return Vec::new();
    }
    normalize(&text)
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| Element::new(ElementKind::NarrativeText, p.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_strip_keeps_the_text() {
        let html = "<html><head><style>p{color:red}</style></head>\
                    <body><p>visible text</p><script>alert(1)</script></body></html>";
        let elements = html_tag_strip(html);
        assert_eq!(elements.len(), 1);
        assert!(elements[0].text.contains("visible text"));
        assert!(!elements[0].text.contains("alert"));
        assert!(!elements[0].text.contains("color"));
    }

    #[test]
    fn images_fail_with_an_ocr_hint() {
        let err = extract_fallback(
            Path::new("scan.png"),
            ".png",
            &[0u8; 4],
            &PartitionConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("OCR"));
    }

    #[test]
    fn lossy_read_survives_invalid_utf8() {
        let mut bytes = b"good text ".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b" more text");
        let elements = lossy_paragraphs(&bytes);
        assert_eq!(elements.len(), 1);
        assert!(elements[0].text.contains("good text"));
    }
}
