//! Semantic chunking: group a document's element stream into retrieval
//! units that respect structure, size bounds, and overlap.
//!
//! Titles start a fresh chunk (section coherence beats packing density),
//! page breaks are soft cut points, tables are indivisible. Size-driven
//! cuts happen at the highest-priority separator found in the trailing
//! half of the window; the next chunk re-reads the last `chunk_overlap`
//! characters for context.

use serde::{Deserialize, Serialize};

use crate::loader::structured::floor_char_boundary;
use crate::loader::{Element, ElementKind};
use crate::types::{Result, StashError};

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters re-read at the start of the next chunk. Must be smaller
    /// than `chunk_size`.
    pub chunk_overlap: usize,
    /// Cut-point candidates, highest priority first. The empty string is
    /// the hard-cut sentinel.
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", ". ", "! ", "? ", " ", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// One chunk of text before embedding and metadata attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub text: String,
    /// Set when a table larger than `chunk_size` was emitted whole.
    pub oversized: bool,
}

/// Stateless chunker over element streams.
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    config: ChunkerConfig,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_overlap >= config.chunk_size {
            return Err(StashError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.chunk_size == 0 {
            return Err(StashError::Config("chunk_size must be positive".into()));
        }
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk an element stream. Empty and whitespace-only chunks are
    /// discarded; indices are assigned densely by the caller.
    pub fn chunk(&self, elements: &[Element]) -> Vec<ChunkDraft> {
        let mut chunks: Vec<ChunkDraft> = Vec::new();
        let mut buf = String::new();

        for element in elements {
            match &element.kind {
                ElementKind::PageBreak => {
                    // Weak boundary: a paragraph break makes this the
                    // preferred cut point if the window fills up here.
                    if !buf.is_empty() && !buf.ends_with("\n\n") {
                        buf.push_str("\n\n");
                    }
                    continue;
                }
                ElementKind::Title => {
                    // Hard boundary: close out the running section.
                    self.flush(&mut buf, &mut chunks);
                    self.append(&mut buf, &element.rendered());
                    self.drain(&mut buf, &mut chunks);
                    continue;
                }
                ElementKind::Table { .. } => {
                    if element.text.len() > self.config.chunk_size {
                        // Never split a table: emit it whole and flagged.
                        self.flush(&mut buf, &mut chunks);
                        push_chunk(&mut chunks, element.text.clone(), true);
                        continue;
                    }
                    if buf.len() + element.text.len() + 2 > self.config.chunk_size {
                        self.flush_with_overlap(&mut buf, &mut chunks);
                    }
                    self.append(&mut buf, &element.text);
                    self.drain(&mut buf, &mut chunks);
                    continue;
                }
                _ => {
                    self.append(&mut buf, &element.rendered());
                    self.drain(&mut buf, &mut chunks);
                }
            }
        }

        self.flush(&mut buf, &mut chunks);
        chunks
    }

    fn append(&self, buf: &mut String, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if !buf.is_empty() && !buf.ends_with("\n\n") {
            buf.push_str("\n\n");
        }
        buf.push_str(trimmed);
    }

    /// Emit size-limited chunks while the buffer overflows, carrying the
    /// overlap tail forward each time.
    fn drain(&self, buf: &mut String, chunks: &mut Vec<ChunkDraft>) {
        while buf.len() > self.config.chunk_size {
            let prev_len = buf.len();
            let cut = self.find_cut(buf);
            let emitted = buf[..cut].trim().to_string();
            let tail = self.overlap_tail(&emitted);
            let rest = buf[cut..].trim_start().to_string();

            let carried = if tail.is_empty() {
                rest.clone()
            } else if rest.is_empty() {
                tail
            } else {
                format!("{tail} {rest}")
            };
            // The overlap carry must shrink the buffer; otherwise drop it
            // so the loop always makes progress.
            *buf = if carried.len() < prev_len { carried } else { rest };

            push_chunk(chunks, emitted, false);
        }
    }

    /// Emit whatever remains, without overlap carry. Used at hard
    /// boundaries and at end of input.
    fn flush(&self, buf: &mut String, chunks: &mut Vec<ChunkDraft>) {
        let text = std::mem::take(buf);
        let text = text.trim();
        if !text.is_empty() {
            push_chunk(chunks, text.to_string(), false);
        }
    }

    /// Emit the buffer and seed the next chunk with the overlap tail.
    fn flush_with_overlap(&self, buf: &mut String, chunks: &mut Vec<ChunkDraft>) {
        let text = std::mem::take(buf);
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        *buf = self.overlap_tail(&text);
        push_chunk(chunks, text, false);
    }

    /// Best cut position within the first `chunk_size` characters: the
    /// rightmost occurrence of the highest-priority separator inside the
    /// trailing half of the window, else a hard cut at the limit.
    fn find_cut(&self, buf: &str) -> usize {
        let limit = floor_char_boundary(buf, self.config.chunk_size);
        let window_start = floor_char_boundary(buf, self.config.chunk_size / 2);
        let window = &buf[window_start..limit];

        for separator in &self.config.separators {
            if separator.is_empty() {
                break;
            }
            if let Some(pos) = window.rfind(separator.as_str()) {
                return window_start + pos + separator.len();
            }
        }
        limit.max(1)
    }

    /// The last `chunk_overlap` characters of an emitted chunk, re-aligned
    /// to the first separator inside the tail when one exists.
    fn overlap_tail(&self, emitted: &str) -> String {
        if self.config.chunk_overlap == 0 || emitted.len() <= self.config.chunk_overlap {
            return String::new();
        }
        let start = floor_char_boundary(emitted, emitted.len() - self.config.chunk_overlap);
        let mut tail = &emitted[start..];
        for separator in &self.config.separators {
            if separator.is_empty() {
                break;
            }
            if let Some(pos) = tail.find(separator.as_str()) {
                let aligned = pos + separator.len();
                if aligned < tail.len() {
                    tail = &tail[aligned..];
                }
                break;
            }
        }
        tail.trim().to_string()
    }
}

fn push_chunk(chunks: &mut Vec<ChunkDraft>, text: String, oversized: bool) {
    if !text.trim().is_empty() {
        chunks.push(ChunkDraft { text, oversized });
    }
}
