//! Core data model: `Page`, `Chunk`, `StageState`.
//!
//! `Checkpoint` lives in [`crate::checkpoint`] since it is owned exclusively
//! by the Checkpoint Manager; everything shared across stage boundaries
//! lives here.

use serde::{Deserialize, Serialize};

/// Raw input record materialized by the XML stream parser.
///
/// Never persisted in full inside the core — only `page_id`/`title`
/// survive downstream, as chunk metadata. Serialized to the StreamParse
/// stage's intermediate `articles.jsonl` output so the Chunk/Filter stage
/// can consume it from disk rather than in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u64,
    pub title: String,
    pub text: String,
    pub is_redirect: bool,
}

/// The atomic indexable unit. `chunk_id` is dense (`0..N-1`) and
/// uniquely keys both the dense vector row and all posting-list references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: u64,
    pub page_id: u64,
    pub page_title: String,
    pub text: String,
    pub token_count: u32,
}

/// A chunk resolved back to its page context for citation via
/// `ChunkStore::get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub page_id: u64,
    pub page_title: String,
    pub text: String,
}

/// A retrieved chunk returned by the Retrieval Assembler, with its fused
/// score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: u64,
    pub page_id: u64,
    pub page_title: String,
    pub text: String,
    pub fused_score: f64,
}

/// Per-stage completion record written atomically by the stage framework
/// on success and consulted on every subsequent run to decide skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage_name: String,
    pub input_hash: String,
    pub completed: bool,
    pub output_file_list: Vec<String>,
}
