//! Crate-wide error type.
//!
//! Every fallible operation that crosses a module boundary returns
//! [`PocketWikiResult`]. Error kinds mirror the failure taxonomy enumerated
//! in the design: retryable network conditions, fatal index corruption,
//! and the various checkpoint/stage invalidation signals.

use std::path::PathBuf;

use thiserror::Error;

pub type PocketWikiResult<T> = Result<T, PocketWikiError>;

#[derive(Debug, Error)]
pub enum PocketWikiError {
    /// Timeout, connection reset, or 5xx — retried with backoff before surfacing.
    #[error("transient network error fetching {url} at offset {offset}: {source}")]
    NetworkTransient {
        url: String,
        offset: u64,
        #[source]
        source: anyhow::Error,
    },

    /// 4xx other than the 206/200 resume-downgrade case.
    #[error("fatal network error fetching {url}: {source}")]
    NetworkFatal {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed bzip2 block. Fatal for the current run; checkpoint is preserved.
    #[error("bzip2 decompression error after {compressed_bytes_read} compressed bytes: {message}")]
    DecompressionError {
        compressed_bytes_read: u64,
        message: String,
    },

    /// Stream ended in the middle of a `<page>` element. Treated as retriable.
    #[error("truncated input: stream ended mid-page at byte {offset}")]
    TruncatedInput { offset: u64 },

    /// Single-page XML parse failure. Logged and skipped by the caller.
    #[error("malformed page at approximate byte {offset}: {message}")]
    MalformedPage { offset: u64, message: String },

    /// Varint stream ended mid-sequence or encodes a value wider than 64 bits.
    #[error("malformed varint at byte {offset}")]
    MalformedVarint { offset: usize },

    /// The index file failed magic/version/structural validation at open time.
    #[error("corrupt index at {path}: {message}")]
    CorruptIndex { path: PathBuf, message: String },

    /// Checkpoint's source/config no longer matches; caller must discard and restart.
    #[error("checkpoint mismatch for {path}: {reason}")]
    CheckpointMismatch { path: PathBuf, reason: String },

    /// A stage's computed input hash differs from the one recorded in its state file.
    #[error("stage '{stage}' input changed, re-running")]
    StageInputChanged { stage: String },

    /// The embedder, dense ANN index, or language model raised.
    #[error("external collaborator '{collaborator}' failed: {source}")]
    ExternalFailure {
        collaborator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl PocketWikiError {
    /// Whether the caller should treat this as a retriable condition for
    /// the purposes of byte-source resume (`TruncatedInput` is handled
    /// identically to `NetworkTransient`).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PocketWikiError::NetworkTransient { .. } | PocketWikiError::TruncatedInput { .. }
        )
    }
}
