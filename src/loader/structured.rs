//! Enhanced and basic extraction strategies.
//!
//! The enhanced strategy knows the structure of each format: Markdown
//! headings and lists, HTML element trees, CSV tables, JSON/YAML trees,
//! email headers, PDF pages. The basic strategy is a fast UTF-8 read with
//! paragraph splitting and no structural awareness.

use std::path::Path;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::loader::configs::{PartitionConfig, IMAGE};
use crate::loader::{Element, ElementKind};
use crate::normalize::normalize;
use crate::types::{Result, StashError};

/// Structure-aware extraction with the per-format configuration applied.
pub fn extract_enhanced(
    path: &Path,
    extension: &str,
    bytes: &[u8],
    config: &PartitionConfig,
) -> Result<Vec<Element>> {
    let elements = match extension {
        ".md" => elements_from_markdown(&utf8(bytes)?),
        ".html" | ".htm" | ".xml" => elements_from_html(&utf8(bytes)?),
        ".csv" => elements_from_delimited(bytes, b',')?,
        ".tsv" => elements_from_delimited(bytes, b'\t')?,
        ".json" => elements_from_json(&serde_json::from_slice(bytes).map_err(|err| {
            StashError::Loader(format!("invalid JSON in {}: {err}", path.display()))
        })?),
        ".yaml" | ".yml" => {
            let value: serde_yaml::Value = serde_yaml::from_slice(bytes).map_err(|err| {
                StashError::Loader(format!("invalid YAML in {}: {err}", path.display()))
            })?;
            let json = serde_json::to_value(value)
                .map_err(|err| StashError::Loader(format!("YAML conversion failed: {err}")))?;
            elements_from_json(&json)
        }
        ".txt" => paragraph_elements(&utf8(bytes)?),
        ".eml" => elements_from_email(&utf8(bytes)?),
        ".pdf" => elements_from_pdf(bytes, config)?,
        e if IMAGE.contains(&e) => {
            return Err(StashError::Loader(format!(
                "no OCR backend linked for image format {e}"
            )))
        }
        other => {
            return Err(StashError::Loader(format!(
                "no structure-aware extractor for {other}"
            )))
        }
    };

    Ok(split_oversized(elements, config))
}

/// Fast plain-text read. Only works for formats that are valid UTF-8.
pub fn extract_basic(
    _path: &Path,
    extension: &str,
    bytes: &[u8],
    _config: &PartitionConfig,
) -> Result<Vec<Element>> {
    match extension {
        ".pdf" | ".png" | ".jpg" | ".jpeg" | ".tiff" | ".bmp" | ".msg" => Err(StashError::Loader(
            format!("basic strategy cannot read binary format {extension}"),
        )),
        _ => Ok(paragraph_elements(&utf8(bytes)?)),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| StashError::Loader(format!("not valid UTF-8: {err}")))
}

/// Split plain text into narrative paragraphs.
pub fn paragraph_elements(text: &str) -> Vec<Element> {
    normalize(text)
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| Element::new(ElementKind::NarrativeText, p.trim()))
        .collect()
}

// ── Markdown ───────────────────────────────────────────────────────────

pub fn elements_from_markdown(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table_rows: Vec<Vec<String>> = Vec::new();

    let flush_paragraph = |buf: &mut Vec<&str>, out: &mut Vec<Element>| {
        if !buf.is_empty() {
            let text = normalize(&buf.join(" "));
            if !text.is_empty() {
                out.push(Element::new(ElementKind::NarrativeText, text));
            }
            buf.clear();
        }
    };
    let flush_table = |rows: &mut Vec<Vec<String>>, out: &mut Vec<Element>| {
        if !rows.is_empty() {
            out.push(table_element(std::mem::take(rows)));
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
            flush_table(&mut table_rows, &mut elements);
            continue;
        }

        if let Some(heading) = markdown_heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            flush_table(&mut table_rows, &mut elements);
            elements.push(Element::new(ElementKind::Title, normalize(heading)));
            continue;
        }

        if let Some(cells) = markdown_table_row(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            if !is_table_separator(&cells) {
                table_rows.push(cells);
            }
            continue;
        }
        flush_table(&mut table_rows, &mut elements);

        if let Some(item) = markdown_list_item(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(Element::new(ElementKind::ListItem, normalize(item)));
            continue;
        }

        paragraph.push(trimmed);
    }
    flush_paragraph(&mut paragraph, &mut elements);
    flush_table(&mut table_rows, &mut elements);

    elements
}

fn markdown_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    rest.strip_prefix(' ').map(str::trim)
}

fn markdown_list_item(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    // Numbered lists: "1. item", "12) item"
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

fn markdown_table_row(line: &str) -> Option<Vec<String>> {
    if !line.starts_with('|') || !line.contains('|') {
        return None;
    }
    let cells: Vec<String> = line
        .trim_matches('|')
        .split('|')
        .map(|c| normalize(c.trim()))
        .collect();
    (cells.len() >= 2).then_some(cells)
}

fn is_table_separator(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
        && cells.iter().any(|c| c.contains('-'))
}

// ── HTML ───────────────────────────────────────────────────────────────

/// Walk an HTML document and emit typed elements in document order.
pub fn elements_from_html(html: &str) -> Vec<Element> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, table, pre, blockquote")
        .expect("static html selector");

    let mut elements = Vec::new();
    let mut seen_tables: Vec<ElementRef<'_>> = Vec::new();
    for node in document.select(&selector) {
        let tag = node.value().name();

        // Skip nodes nested inside a table we already emitted whole.
        if seen_tables.iter().any(|t| is_descendant(&node, t)) {
            continue;
        }

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let text = normalize(&inner_text(&node));
                if !text.is_empty() {
                    elements.push(Element::new(ElementKind::Title, text));
                }
            }
            "li" => {
                let text = normalize(&inner_text(&node));
                if !text.is_empty() {
                    elements.push(Element::new(ElementKind::ListItem, text));
                }
            }
            "table" => {
                let rows = html_table_cells(&node);
                if !rows.is_empty() {
                    elements.push(table_element(rows));
                }
                seen_tables.push(node);
            }
            _ => {
                let text = normalize(&inner_text(&node));
                if !text.is_empty() {
                    elements.push(Element::new(ElementKind::NarrativeText, text));
                }
            }
        }
    }

    if elements.is_empty() {
        // Markup without recognized structure: fall back to body text.
        let body = Selector::parse("body").expect("static body selector");
        let text = document
            .select(&body)
            .next()
            .map(|b| inner_text(&b))
            .unwrap_or_else(|| document.root_element().text().collect());
        return paragraph_elements(&text);
    }

    elements
}

fn inner_text(node: &ElementRef<'_>) -> String {
    node.text().collect::<Vec<_>>().join(" ")
}

fn is_descendant(node: &ElementRef<'_>, ancestor: &ElementRef<'_>) -> bool {
    node.ancestors().any(|a| a.id() == ancestor.id())
}

fn html_table_cells(table: &ElementRef<'_>) -> Vec<Vec<String>> {
    let row_selector = Selector::parse("tr").expect("static tr selector");
    let cell_selector = Selector::parse("td, th").expect("static cell selector");

    table
        .select(&row_selector)
        .map(|row| {
            row.select(&cell_selector)
                .map(|cell| normalize(&inner_text(&cell)))
                .collect::<Vec<_>>()
        })
        .filter(|cells: &Vec<String>| cells.iter().any(|c| !c.is_empty()))
        .collect()
}

/// Build a Table element with its plain-text rendering: one line per row,
/// cells joined by a single separator.
pub fn table_element(cells: Vec<Vec<String>>) -> Element {
    let text = cells
        .iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n");
    Element::new(ElementKind::Table { cells }, text)
}

// ── Delimited (CSV/TSV) ────────────────────────────────────────────────

fn elements_from_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Element>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| StashError::Loader(format!("csv parse: {err}")))?;
        let cells: Vec<String> = record.iter().map(|c| normalize(c.trim())).collect();
        if cells.iter().any(|c| !c.is_empty()) {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![table_element(rows)])
}

// ── JSON / YAML ────────────────────────────────────────────────────────

/// Flatten a JSON document: top-level object keys become titles, values
/// become narrative text or list items.
pub fn elements_from_json(value: &serde_json::Value) -> Vec<Element> {
    let mut elements = Vec::new();
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                elements.push(Element::new(ElementKind::Title, normalize(key)));
                push_json_value(val, &mut elements);
            }
        }
        other => push_json_value(other, &mut elements),
    }
    elements
}

fn push_json_value(value: &serde_json::Value, out: &mut Vec<Element>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::String(s) => {
                        out.push(Element::new(ElementKind::ListItem, normalize(s)))
                    }
                    scalar @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => out
                        .push(Element::new(
                            ElementKind::ListItem,
                            normalize(&scalar.to_string()),
                        )),
                    nested => push_json_value(nested, out),
                }
            }
        }
        serde_json::Value::Object(map) => {
            let mut lines: Vec<String> = Vec::new();
            for (key, val) in map {
                match val {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        if !lines.is_empty() {
                            out.push(Element::new(
                                ElementKind::NarrativeText,
                                normalize(&lines.join("\n")),
                            ));
                            lines.clear();
                        }
                        out.push(Element::new(ElementKind::Title, normalize(key)));
                        push_json_value(val, out);
                    }
                    scalar => lines.push(format!("{key}: {}", scalar_text(scalar))),
                }
            }
            if !lines.is_empty() {
                out.push(Element::new(
                    ElementKind::NarrativeText,
                    normalize(&lines.join("\n")),
                ));
            }
        }
        serde_json::Value::Null => {}
        scalar => {
            let text = normalize(&scalar_text(scalar));
            if !text.is_empty() {
                out.push(Element::new(ElementKind::NarrativeText, text));
            }
        }
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Email ──────────────────────────────────────────────────────────────

/// RFC 5322-ish split: headers up to the first blank line, then the body.
/// The subject becomes the document title.
fn elements_from_email(text: &str) -> Vec<Element> {
    let mut elements = Vec::new();
    let (headers, body) = match text.split_once("\n\n") {
        Some((h, b)) => (h, b),
        None => ("", text),
    };

    for line in headers.lines() {
        if let Some(subject) = line
            .strip_prefix("Subject:")
            .or_else(|| line.strip_prefix("subject:"))
        {
            let subject = normalize(subject.trim());
            if !subject.is_empty() {
                elements.push(Element::new(ElementKind::Title, subject));
            }
        }
    }

    elements.extend(paragraph_elements(body));
    elements
}

// ── PDF ────────────────────────────────────────────────────────────────

/// Page-aware PDF extraction. Pages are separated by form feeds in the
/// extracted text; each page's paragraphs become narrative blocks.
fn elements_from_pdf(bytes: &[u8], config: &PartitionConfig) -> Result<Vec<Element>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| StashError::Loader(format!("pdf extraction failed: {err}")))?;

    if text.trim().is_empty() {
        debug!("pdf produced no text; likely a scanned document");
        return Ok(Vec::new());
    }

    let pages: Vec<&str> = text
        .split('\x0c')
        .filter(|p| !p.trim().is_empty())
        .collect();

    let mut elements = Vec::new();
    let page_count = pages.len().max(1);
    for (page_idx, page) in pages.iter().enumerate() {
        for paragraph in normalize(page).split("\n\n") {
            let trimmed = paragraph.trim();
            if trimmed.is_empty() {
                continue;
            }
            elements.push(
                Element::new(ElementKind::NarrativeText, trimmed).with_page(page_idx + 1),
            );
        }
        if config.include_page_breaks && page_idx + 1 < page_count {
            elements.push(Element::new(ElementKind::PageBreak, "").with_page(page_idx + 1));
        }
    }

    Ok(elements)
}

// ── Oversized element splitting ────────────────────────────────────────

/// Enforce `max_partition`: elements longer than the hard bound are split
/// at the `new_after_n_chars` soft boundary. Tables are exempt; they are
/// handled downstream as indivisible units.
fn split_oversized(elements: Vec<Element>, config: &PartitionConfig) -> Vec<Element> {
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        if element.is_table() || element.text.len() <= config.max_partition {
            out.push(element);
            continue;
        }
        let kind = element.kind.clone();
        let page = element.page;
        for piece in split_text(&element.text, config.new_after_n_chars, config.max_partition) {
            let mut split = Element::new(kind.clone(), piece);
            split.page = page;
            out.push(split);
        }
    }
    out
}

/// Split on sentence/space boundaries near `soft`, never exceeding `hard`.
fn split_text(text: &str, soft: usize, hard: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > hard {
        let window_end = floor_char_boundary(rest, hard);
        let window = &rest[..window_end];
        let soft_floor = floor_char_boundary(window, soft.min(window.len()));
        let cut = window[..window_end]
            .rfind(". ")
            .filter(|&i| i >= soft_floor.saturating_sub(soft / 2))
            .map(|i| i + 2)
            .or_else(|| window.rfind(' ').filter(|&i| i > 0))
            .unwrap_or(window_end);
        let mut cut = floor_char_boundary(rest, cut.max(1));
        if cut == 0 {
            cut = rest
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
        }
        pieces.push(rest[..cut].trim().to_string());
        rest = &rest[cut..];
    }
    let tail = rest.trim();
    if !tail.is_empty() {
        pieces.push(tail.to_string());
    }
    pieces
}

pub(crate) fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
