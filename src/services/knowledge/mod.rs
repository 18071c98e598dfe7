//! Knowledge System
//!
//! Document retrieval for the RAG and hybrid paths:
//! - `chunker`: paragraph chunking with stable citation ids
//! - `index`: BM25 document index and its lazy ranked results

pub mod chunker;
pub mod index;

pub use chunker::{chunk_id, Chunk, Chunker, Document, ParagraphChunker};
pub use index::{tokenize, Bm25Index, DocumentIndex, RankedChunks};
