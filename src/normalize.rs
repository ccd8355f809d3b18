//! Text normalization applied to every piece of text entering the system.
//!
//! Extracted document text, manual notes, scraped web pages, and queries all
//! pass through [`normalize`] before chunking, embedding, or retrieval. The
//! function is pure and idempotent: `normalize(normalize(x)) == normalize(x)`.
//!
//! Transformations, in order:
//!
//! 1. repair floating acute accents left behind by broken PDF encoders
//!    (`M´etodo` becomes `Método`)
//! 2. expand typographic ligatures (ﬁ ﬂ ﬀ ﬃ ﬄ œ æ)
//! 3. map curly quotes, dashes, and ellipses to ASCII
//! 4. strip control characters
//! 5. Unicode NFC composition
//! 6. collapse whitespace runs while keeping `\n\n` as paragraph separator
//! 7. tighten spacing around `.,!?;:` and trim

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static FLOATING_ACUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([aeiouAEIOU])´").expect("floating acute pattern"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,!?;:])").expect("space-before-punct pattern"));
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n+").expect("paragraph break pattern"));

/// Normalize a piece of text for ingestion or querying.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let repaired = repair_accents(text);
    let mapped = map_characters(&repaired);
    let composed: String = mapped.nfc().collect();

    let paragraphs: Vec<String> = PARAGRAPH_BREAK
        .split(&composed)
        .map(normalize_paragraph)
        .filter(|p| !p.is_empty())
        .collect();

    paragraphs.join("\n\n")
}

/// Merge a floating acute accent into the preceding vowel, then downgrade
/// any remaining stray accents to apostrophes.
fn repair_accents(text: &str) -> String {
    let merged = FLOATING_ACUTE.replace_all(text, |caps: &regex::Captures<'_>| {
        let vowel = &caps[1];
        match vowel {
            "a" => "á",
            "e" => "é",
            "i" => "í",
            "o" => "ó",
            "u" => "ú",
            "A" => "Á",
            "E" => "É",
            "I" => "Í",
            "O" => "Ó",
            "U" => "Ú",
            other => other,
        }
        .to_string()
    });
    merged.replace('´', "'").replace('`', "'")
}

/// Expand ligatures, flatten typographic punctuation, drop control chars.
fn map_characters(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'ﬁ' => out.push_str("fi"),
            'ﬂ' => out.push_str("fl"),
            'ﬀ' => out.push_str("ff"),
            'ﬃ' => out.push_str("ffi"),
            'ﬄ' => out.push_str("ffl"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("Oe"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("Ae"),
            '…' => out.push_str("..."),
            '–' | '—' => out.push('-'),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{00A0}' => out.push(' '),
            '\r' => {}
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

/// Collapse intra-paragraph whitespace and fix punctuation spacing.
fn normalize_paragraph(paragraph: &str) -> String {
    let collapsed = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
    let tightened = SPACE_BEFORE_PUNCT.replace_all(&collapsed, "$1");
    space_after_punct(&tightened)
}

/// Insert a single space after `.,!?;:` when a letter follows directly.
/// Digits are left alone so decimal numbers and times survive.
fn space_after_punct(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if matches!(c, '.' | ',' | '!' | '?' | ';' | ':') {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_alphabetic() {
                    out.push(' ');
                }
            }
        }
    }
    out
}
