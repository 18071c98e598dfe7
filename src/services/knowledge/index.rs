//! Document Index
//!
//! Lexical BM25 retrieval over the markdown corpus.
//!
//! `search` returns a [`RankedChunks`] iterator: results are produced on
//! demand from a max-heap, the sequence ends after `top_k` items, and it
//! cannot be rewound. Callers that need the results twice collect them.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::Path;
use std::sync::Arc;

use retail_copilot_core::RetrievedChunk;

use super::chunker::{Chunk, Chunker, Document, ParagraphChunker};
use crate::utils::error::{AppError, AppResult};

/// Term-frequency saturation.
const K1: f64 = 1.5;
/// Document-length normalization.
const B: f64 = 0.75;

/// Ranked retrieval over a fixed corpus.
pub trait DocumentIndex: Send + Sync {
    /// Rank chunks against `query`, yielding at most `top_k` of them.
    fn search(&self, query: &str, top_k: usize) -> RankedChunks;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ============================================================================
// RankedChunks
// ============================================================================

#[derive(Debug)]
struct Scored {
    score: f64,
    /// Position in the index; chunks are stored in (document, chunk index) order.
    position: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    /// Higher score first; on ties the earlier chunk wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Lazy, finite, non-restartable sequence of ranked chunks.
#[derive(Debug)]
pub struct RankedChunks {
    chunks: Arc<Vec<Chunk>>,
    heap: BinaryHeap<Scored>,
    remaining: usize,
}

impl RankedChunks {
    fn empty() -> Self {
        Self {
            chunks: Arc::new(Vec::new()),
            heap: BinaryHeap::new(),
            remaining: 0,
        }
    }
}

impl Iterator for RankedChunks {
    type Item = RetrievedChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let scored = self.heap.pop()?;
        self.remaining -= 1;
        let chunk = self.chunks.get(scored.position)?;
        Some(RetrievedChunk {
            document_id: chunk.document_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            text: chunk.content.clone(),
            score: scored.score,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.min(self.heap.len());
        (n, Some(n))
    }
}

// ============================================================================
// Bm25Index
// ============================================================================

/// In-memory Okapi BM25 index.
#[derive(Debug)]
pub struct Bm25Index {
    chunks: Arc<Vec<Chunk>>,
    /// Per chunk: term -> frequency
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    /// term -> number of chunks containing it
    doc_freqs: HashMap<String, usize>,
}

impl Bm25Index {
    /// Chunk and index `documents`. Chunks keep document order.
    pub fn from_documents(documents: &[Document], chunker: &dyn Chunker) -> Self {
        let chunks: Vec<Chunk> = documents.iter().flat_map(|d| chunker.chunk(d)).collect();

        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            let tokens = tokenize(&chunk.content);
            doc_lengths.push(tokens.len());
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / doc_lengths.len() as f64
        };

        Self {
            chunks: Arc::new(chunks),
            term_freqs,
            doc_lengths,
            avg_doc_length,
            doc_freqs,
        }
    }

    /// Index every `*.md` file in `dir`, in file-name order.
    pub fn from_dir(dir: &Path) -> AppResult<Self> {
        if !dir.is_dir() {
            return Err(AppError::not_found(format!("docs directory {}", dir.display())));
        }
        let pattern = dir.join("*.md");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| AppError::validation(format!("non UTF-8 path: {}", dir.display())))?;

        let mut paths: Vec<_> = glob::glob(pattern)
            .map_err(|e| AppError::internal(format!("bad glob pattern: {}", e)))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();

        let documents = paths
            .iter()
            .map(|p| Document::from_file(p))
            .collect::<AppResult<Vec<_>>>()?;

        if documents.is_empty() {
            tracing::warn!(dir = %dir.display(), "no markdown documents found");
        }

        let index = Self::from_documents(&documents, &ParagraphChunker);
        tracing::info!(
            documents = documents.len(),
            chunks = index.chunks.len(),
            "built document index"
        );
        Ok(index)
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.chunks.len() as f64;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, position: usize, query_terms: &[String]) -> f64 {
        let freqs = &self.term_freqs[position];
        let length_ratio = if self.avg_doc_length > 0.0 {
            self.doc_lengths[position] as f64 / self.avg_doc_length
        } else {
            0.0
        };
        query_terms
            .iter()
            .filter_map(|term| freqs.get(term).map(|tf| (term, *tf as f64)))
            .map(|(term, tf)| {
                self.idf(term) * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * length_ratio))
            })
            .sum()
    }
}

impl DocumentIndex for Bm25Index {
    fn search(&self, query: &str, top_k: usize) -> RankedChunks {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || top_k == 0 {
            return RankedChunks::empty();
        }

        let heap: BinaryHeap<Scored> = (0..self.chunks.len())
            .map(|position| Scored {
                score: self.score(position, &query_terms),
                position,
            })
            .filter(|s| s.score > 0.0)
            .collect();

        RankedChunks {
            chunks: Arc::clone(&self.chunks),
            heap,
            remaining: top_k,
        }
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Bm25Index {
        let docs = vec![
            Document::new(
                "kpi_definitions",
                "# KPI Definitions\n\nAverage Order Value (AOV) = SUM(UnitPrice * Quantity * (1 - Discount)) / COUNT(DISTINCT OrderID)\n\nGross Margin = SUM((UnitPrice - CostOfGoods) * Quantity * (1 - Discount))",
            ),
            Document::new(
                "product_policy",
                "# Returns\n\nBeverages unopened: 14 days return window.\n\nPerishables: 3-7 days.",
            ),
        ];
        Bm25Index::from_documents(&docs, &ParagraphChunker)
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Return window for unopened Beverages?"),
            vec!["return", "window", "for", "unopened", "beverages"]
        );
        assert_eq!(tokenize("AOV=SUM(x)"), vec!["aov", "sum", "x"]);
    }

    #[test]
    fn test_search_ranks_relevant_chunk_first() {
        let index = corpus();
        assert_eq!(index.len(), 6);
        let results: Vec<_> = index
            .search("return window unopened beverages", 3)
            .collect();
        assert_eq!(results[0].chunk_id, "product_policy::chunk1");
        assert_eq!(results[0].document_id, "product_policy");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_top_k_and_zero_scores() {
        let index = corpus();
        let results: Vec<_> = index.search("aov", 3).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "kpi_definitions::chunk1");

        assert_eq!(index.search("quantity discount unitprice", 1).count(), 1);
        assert_eq!(index.search("zebra", 3).count(), 0);
        assert_eq!(index.search("", 3).count(), 0);
        assert_eq!(index.search("aov", 0).count(), 0);
    }

    #[test]
    fn test_ranked_sequence_is_not_restartable() {
        let index = corpus();
        let mut ranked = index.search("days", 5);
        assert_eq!(ranked.size_hint(), (2, Some(2)));
        assert!(ranked.next().is_some());
        assert!(ranked.next().is_some());
        assert!(ranked.next().is_none());
        assert!(ranked.next().is_none());
    }

    #[test]
    fn test_ties_break_by_position() {
        let docs = vec![
            Document::new("a", "beverages"),
            Document::new("b", "beverages"),
        ];
        let index = Bm25Index::from_documents(&docs, &ParagraphChunker);
        let ids: Vec<_> = index.search("beverages", 2).map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec!["a::chunk0", "b::chunk0"]);
    }

    #[test]
    fn test_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_calendar.md"), "Winter Classics 1997\n\nDecember").unwrap();
        std::fs::write(dir.path().join("a_policy.md"), "Returns").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let index = Bm25Index::from_dir(dir.path()).unwrap();
        assert_eq!(index.len(), 3);
        let top: Vec<_> = index.search("winter classics", 1).collect();
        assert_eq!(top[0].chunk_id, "b_calendar::chunk0");

        assert!(Bm25Index::from_dir(&dir.path().join("missing")).is_err());
    }
}
