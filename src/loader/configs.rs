//! Per-extension partition configuration and the supported-format registry.
//!
//! Every recognized extension maps to a [`PartitionConfig`] describing how
//! the enhanced strategy should slice the document. Unknown extensions are
//! rejected up front by [`is_supported`].

use serde::{Deserialize, Serialize};

/// Extraction strategy requested from the enhanced loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Highest quality: page-aware extraction, used for PDFs and scans.
    HiRes,
    /// Fast path for formats that are cheap to parse.
    Fast,
    /// Whatever the format's extractor considers reasonable.
    Default,
}

/// Tuning knobs for a single extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub strategy: Strategy,
    pub include_metadata: bool,
    pub include_page_breaks: bool,
    /// Hard upper bound on a single element's length; longer elements are
    /// split.
    pub max_partition: usize,
    /// Soft boundary used when splitting oversized elements.
    pub new_after_n_chars: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fast,
            include_metadata: true,
            include_page_breaks: false,
            max_partition: 2000,
            new_after_n_chars: 1500,
        }
    }
}

/// Office document formats.
pub const OFFICE: &[&str] = &[
    ".pdf", ".docx", ".doc", ".pptx", ".ppt", ".xlsx", ".xls", ".rtf",
];
/// OpenDocument formats.
pub const OPEN_DOCUMENT: &[&str] = &[".odt", ".odp", ".ods"];
/// Web and markup formats.
pub const MARKUP: &[&str] = &[".html", ".htm", ".xml", ".md"];
/// Plain text and tabular formats.
pub const PLAIN: &[&str] = &[".txt", ".csv", ".tsv"];
/// Structured data formats.
pub const DATA: &[&str] = &[".json", ".yaml", ".yml"];
/// Image formats (OCR required).
pub const IMAGE: &[&str] = &[".png", ".jpg", ".jpeg", ".tiff", ".bmp"];
/// Email formats.
pub const EMAIL: &[&str] = &[".eml", ".msg"];

/// All extensions the loader will accept.
pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    OFFICE
        .iter()
        .chain(OPEN_DOCUMENT)
        .chain(MARKUP)
        .chain(PLAIN)
        .chain(DATA)
        .chain(IMAGE)
        .chain(EMAIL)
        .copied()
}

pub fn is_supported(extension: &str) -> bool {
    supported_extensions().any(|e| e == extension)
}

/// Extensions that make a URL a direct document download rather than a page
/// to scrape. Images are excluded: an image fetched over HTTP cannot be
/// OCR'd here.
pub fn is_downloadable(extension: &str) -> bool {
    is_supported(extension) && !IMAGE.contains(&extension)
}

/// Look up the partition configuration for an extension.
pub fn partition_config_for(extension: &str) -> PartitionConfig {
    match extension {
        ".pdf" => PartitionConfig {
            strategy: Strategy::HiRes,
            include_page_breaks: true,
            ..PartitionConfig::default()
        },
        e if IMAGE.contains(&e) => PartitionConfig {
            strategy: Strategy::HiRes,
            ..PartitionConfig::default()
        },
        _ => PartitionConfig::default(),
    }
}
