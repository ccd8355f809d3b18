//! Document loading: turn a file into an ordered sequence of typed
//! structural elements plus aggregate structure statistics.
//!
//! ```text
//! path ──► DocumentLoader::load
//!            │ 1. enhanced   (structure-aware, per-format config)
//!            │ 2. basic      (fast plain-text read, paragraph split)
//!            │ 3. fallback   (per-extension last-resort extractor)
//!            ▼
//!          LoadedDocument { elements, structural_info, method }
//! ```
//!
//! Strategies are attempted in order; the first one that yields text wins
//! and its name travels with the document as the processing method.

pub mod configs;
mod fallback;
pub(crate) mod structured;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Result, StashError};

pub use configs::{PartitionConfig, Strategy};

/// One structural unit extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub kind: ElementKind,
    /// Normalized text content. Empty for page breaks.
    pub text: String,
    /// Monotonically increasing index within the document.
    pub order: usize,
    /// Page number when the source format knows about pages.
    pub page: Option<usize>,
}

/// The recognized element kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementKind {
    Title,
    NarrativeText,
    ListItem,
    Table { cells: Vec<Vec<String>> },
    PageBreak,
    Other,
}

impl Element {
    pub fn new(kind: ElementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            order: 0,
            page: None,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    /// Text as it appears when elements are joined back into a document:
    /// titles become section headings, list items get their bullet.
    pub fn rendered(&self) -> String {
        match &self.kind {
            ElementKind::Title => format!("## {}", self.text),
            ElementKind::ListItem => format!("• {}", self.text),
            ElementKind::PageBreak => String::new(),
            _ => self.text.clone(),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, ElementKind::Table { .. })
    }
}

/// Aggregate structure statistics for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralInfo {
    pub total_elements: usize,
    pub titles_count: usize,
    pub tables_count: usize,
    pub lists_count: usize,
    pub narrative_blocks: usize,
    pub total_text_length: usize,
    pub avg_element_length: f64,
}

impl StructuralInfo {
    pub fn from_elements(elements: &[Element]) -> Self {
        let mut info = StructuralInfo {
            total_elements: elements.len(),
            ..Default::default()
        };
        for element in elements {
            match element.kind {
                ElementKind::Title => info.titles_count += 1,
                ElementKind::Table { .. } => info.tables_count += 1,
                ElementKind::ListItem => info.lists_count += 1,
                ElementKind::NarrativeText => info.narrative_blocks += 1,
                _ => {}
            }
            info.total_text_length += element.text.len();
        }
        if !elements.is_empty() {
            info.avg_element_length = info.total_text_length as f64 / elements.len() as f64;
        }
        info
    }
}

/// Which extraction strategy produced a document (or how it entered the
/// system when no file was involved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Enhanced,
    Basic,
    Fallback,
    ManualText,
    Web,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Enhanced => "enhanced",
            ProcessingMethod::Basic => "basic",
            ProcessingMethod::Fallback => "fallback",
            ProcessingMethod::ManualText => "manual_text",
            ProcessingMethod::Web => "web",
        }
    }
}

impl fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMethod {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enhanced" => Ok(ProcessingMethod::Enhanced),
            "basic" => Ok(ProcessingMethod::Basic),
            "fallback" => Ok(ProcessingMethod::Fallback),
            "manual_text" => Ok(ProcessingMethod::ManualText),
            "web" => Ok(ProcessingMethod::Web),
            other => Err(StashError::Input(format!(
                "unknown processing method '{other}'"
            ))),
        }
    }
}

/// A fully loaded document ready for chunking.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub elements: Vec<Element>,
    pub structural_info: StructuralInfo,
    pub method: ProcessingMethod,
}

/// Format-aware loader with a cascade of extraction strategies.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load `path` into typed elements.
    ///
    /// Fails with [`StashError::UnsupportedFormat`] for unknown extensions,
    /// [`StashError::Io`] when the file cannot be read, and
    /// [`StashError::EmptyDocument`] when every strategy runs out of text.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<LoadedDocument> {
        let path = path.as_ref();
        let extension = file_extension(path);
        if !configs::is_supported(&extension) {
            return Err(StashError::UnsupportedFormat {
                extension,
                path: path.to_path_buf(),
            });
        }

        let bytes = tokio::fs::read(path).await?;
        let config = configs::partition_config_for(&extension);

        // CPU-bound extraction happens off the async path.
        let owned_path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            run_cascade(&owned_path, &extension, &bytes, &config)
        })
        .await
        .map_err(|err| StashError::Loader(format!("extraction task panicked: {err}")))?;

        result
    }
}

/// Extract an element stream from already-fetched web page text.
///
/// Used by URL ingestion, where the document never touches disk. HTML is
/// walked structurally; anything else becomes narrative paragraphs.
pub fn elements_from_web_text(text: &str) -> Vec<Element> {
    let elements = if text.trim_start().starts_with('<') {
        structured::elements_from_html(text)
    } else {
        structured::paragraph_elements(text)
    };
    finalize(elements)
}

fn run_cascade(
    path: &Path,
    extension: &str,
    bytes: &[u8],
    config: &PartitionConfig,
) -> Result<LoadedDocument> {
    type StrategyFn = fn(&Path, &str, &[u8], &PartitionConfig) -> Result<Vec<Element>>;
    let strategies: [(ProcessingMethod, StrategyFn); 3] = [
        (ProcessingMethod::Enhanced, structured::extract_enhanced),
        (ProcessingMethod::Basic, structured::extract_basic),
        (ProcessingMethod::Fallback, fallback::extract_fallback),
    ];

    let mut failures: Vec<String> = Vec::new();
    for (method, strategy) in strategies {
        match strategy(path, extension, bytes, config) {
            Ok(elements) if has_text(&elements) => {
                let elements = finalize(elements);
                let structural_info = StructuralInfo::from_elements(&elements);
                debug!(
                    path = %path.display(),
                    method = %method,
                    elements = elements.len(),
                    "document extracted"
                );
                return Ok(LoadedDocument {
                    elements,
                    structural_info,
                    method,
                });
            }
            Ok(_) => {
                debug!(path = %path.display(), method = %method, "strategy produced no text");
                failures.push(format!("{method}: no text"));
            }
            Err(err) => {
                warn!(path = %path.display(), method = %method, error = %err, "strategy failed");
                failures.push(format!("{method}: {err}"));
            }
        }
    }

    if failures.iter().all(|f| f.ends_with("no text")) {
        Err(StashError::EmptyDocument {
            path: path.to_path_buf(),
        })
    } else {
        Err(StashError::Loader(format!(
            "all strategies failed for {}: {}",
            path.display(),
            failures.join("; ")
        )))
    }
}

fn has_text(elements: &[Element]) -> bool {
    elements.iter().any(|e| !e.text.trim().is_empty())
}

/// Renumber elements and drop whitespace-only non-break entries.
fn finalize(elements: Vec<Element>) -> Vec<Element> {
    elements
        .into_iter()
        .filter(|e| matches!(e.kind, ElementKind::PageBreak) || !e.text.trim().is_empty())
        .enumerate()
        .map(|(order, mut element)| {
            element.order = order;
            element
        })
        .collect()
}

/// Render the element stream as Markdown, used for converted-document
/// copies.
pub fn render_markdown(elements: &[Element]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(elements.len());
    for element in elements {
        match &element.kind {
            ElementKind::PageBreak => continue,
            ElementKind::Table { .. } => parts.push(format!("\n{}\n", element.text)),
            _ => parts.push(element.rendered()),
        }
    }
    parts.join("\n\n")
}

/// Lowercased extension with a leading dot, or empty string.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}
