//! Document Chunker
//!
//! Defines the `Chunker` trait and the `ParagraphChunker` used for the
//! policy/KPI/calendar corpus. Chunk identifiers are stable across runs
//! (`<document_id>::chunk<index>`) because they are what answers cite.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let chunker = ParagraphChunker;
//! let doc = Document::new("kpi_definitions", "# KPIs\n\nAOV = revenue / orders.");
//! let chunks = chunker.chunk(&doc);
//! assert_eq!(chunks[1].chunk_id, "kpi_definitions::chunk1");
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// Document & Chunk data structures
// ---------------------------------------------------------------------------

/// A document to be chunked, typically one markdown file of the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier (file stem).
    pub id: String,
    /// Full text content of the document.
    pub content: String,
    /// Original file path, if available.
    pub source_path: Option<String>,
}

impl Document {
    /// Create a new document with minimal fields.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_path: None,
        }
    }

    /// Read a markdown file; the id is the file name without extension.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AppError::validation(format!("bad document name: {}", path.display())))?
            .to_string();
        let content = std::fs::read_to_string(path)?;
        Ok(Self {
            id,
            content,
            source_path: Some(path.display().to_string()),
        })
    }
}

/// A chunk produced by splitting a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Citation identifier: `<document_id>::chunk<index>`.
    pub chunk_id: String,
    /// ID of the source document.
    pub document_id: String,
    /// Text content of this chunk.
    pub content: String,
    /// Zero-based index of this chunk within the document.
    pub index: usize,
}

/// Build the citation identifier for chunk `index` of `document_id`.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}::chunk{}", document_id, index)
}

// ---------------------------------------------------------------------------
// Chunker trait
// ---------------------------------------------------------------------------

/// Trait for document chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

// ---------------------------------------------------------------------------
// ParagraphChunker
// ---------------------------------------------------------------------------

/// Splits documents on blank lines.
///
/// Each non-empty paragraph (including a lone heading line) becomes one
/// chunk, numbered in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in document.content.lines() {
            if line.trim().is_empty() {
                // Blank line = paragraph boundary
                if !current.is_empty() {
                    paragraphs.push(current.join("\n").trim().to_string());
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            paragraphs.push(current.join("\n").trim().to_string());
        }

        paragraphs
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                chunk_id: chunk_id(&document.id, index),
                document_id: document.id.clone(),
                content,
                index,
            })
            .collect()
    }
}
