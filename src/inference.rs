//! External collaborator traits: the embedding model, dense ANN index, and
//! language model live outside this crate's core, but the retrieval
//! assembler and pipeline driver need a seam to hold them behind. Each
//! collaborator is kept behind a trait object rather than a concrete
//! provider type.

use async_trait::async_trait;

use crate::exceptions::PocketWikiResult;

/// Deterministic, stateless-after-load text embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, batch: &[String]) -> PocketWikiResult<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Opaque dense nearest-neighbor index (FAISS or equivalent).
#[async_trait]
pub trait DenseIndex: Send + Sync {
    async fn search(&self, query: &[f32], k: usize) -> PocketWikiResult<Vec<(u64, f32)>>;
}

/// Cancellable autoregressive language model used by the chat surface,
/// not by retrieval itself — kept here as the third external seam.
pub trait LanguageModel: Send + Sync {
    fn generate_stream(
        &self,
        prompt: &str,
    ) -> PocketWikiResult<Box<dyn Iterator<Item = PocketWikiResult<String>> + Send>>;
}
