//! Retrieval assembler.
//!
//! Fans out a query to the BM25 reader (sparse) and the external
//! embedder + dense ANN index (dense) in parallel, fuses the two ranked
//! lists with RRF, resolves the survivors to their page context via the
//! chunk store, and truncates to a context-window character budget
//! without splitting a chunk.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::bm25_reader::Bm25Reader;
use crate::chunk_store::ChunkStore;
use crate::config::{RetrievalConfig, RrfConfig};
use crate::data::RetrievedChunk;
use crate::exceptions::PocketWikiResult;
use crate::inference::{DenseIndex, Embedder};
use crate::logging::{report_progress, ProgressEvent};
use crate::rrf;
use crate::tokenizer::tokenize;

pub struct RetrievalAssembler {
    bm25: Arc<Bm25Reader>,
    embedder: Arc<dyn Embedder>,
    dense_index: Arc<dyn DenseIndex>,
    chunk_store: Arc<dyn ChunkStore>,
    retrieval: RetrievalConfig,
    rrf: RrfConfig,
}

impl RetrievalAssembler {
    pub fn new(
        bm25: Arc<Bm25Reader>,
        embedder: Arc<dyn Embedder>,
        dense_index: Arc<dyn DenseIndex>,
        chunk_store: Arc<dyn ChunkStore>,
        retrieval: RetrievalConfig,
        rrf: RrfConfig,
    ) -> Self {
        Self {
            bm25,
            embedder,
            dense_index,
            chunk_store,
            retrieval,
            rrf,
        }
    }

    #[tracing::instrument(skip(self, q), fields(query_len = q.len()))]
    pub async fn query(&self, q: &str) -> PocketWikiResult<Vec<RetrievedChunk>> {
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();

        let terms = tokenize(q);
        let bm25 = self.bm25.clone();
        let sparse_k = self.retrieval.sparse_k;
        let sparse_terms = terms.clone();
        let sparse_task =
            tokio::task::spawn_blocking(move || bm25.search(&sparse_terms, sparse_k));

        let dense_task = async {
            let embeddings = self.embedder.embed(&[q.to_string()]).await?;
            let vector = embeddings.into_iter().next().unwrap_or_default();
            self.dense_index.search(&vector, self.retrieval.dense_k).await
        };

        let (sparse_result, dense_result) = tokio::join!(sparse_task, dense_task);
        let sparse_hits = sparse_result
            .map_err(|e| crate::exceptions::PocketWikiError::ExternalFailure {
                collaborator: "bm25_reader".to_string(),
                source: anyhow::anyhow!(e),
            })??;
        let dense_hits = dense_result?;

        let sparse_ids: Vec<u64> = sparse_hits.iter().map(|(id, _)| *id).collect();
        let dense_ids: Vec<u64> = dense_hits.iter().map(|(id, _)| *id).collect();

        let fused = rrf::fuse(&dense_ids, &sparse_ids, &self.rrf, self.retrieval.fused_k);

        let mut results = Vec::with_capacity(fused.len());
        let mut seen_pages = std::collections::HashSet::new();
        let mut budget_remaining = self.retrieval.context_char_budget;

        for (chunk_id, fused_score) in fused {
            let record = self.chunk_store.get(chunk_id)?;

            if self.retrieval.dedup_by_page && !seen_pages.insert(record.page_id) {
                continue;
            }
            if record.text.len() > budget_remaining {
                // Preserve chunk boundaries: stop rather than truncate mid-chunk.
                break;
            }
            budget_remaining -= record.text.len();

            results.push(RetrievedChunk {
                chunk_id,
                page_id: record.page_id,
                page_title: record.page_title,
                text: record.text,
                fused_score,
            });
        }

        report_progress(ProgressEvent::QueryCompleted {
            query_id,
            dense_hits: dense_ids.len(),
            sparse_hits: sparse_ids.len(),
            fused_hits: results.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25_builder::Bm25Builder;
    use crate::chunk_store::{JsonlChunkStore, JsonlChunkWriter};
    use crate::data::Chunk;
    use crate::inference::fakes::{FakeDenseIndex, FakeEmbedder};
    use tempfile::tempdir;

    fn build_bundle(dir: &std::path::Path) -> (Arc<Bm25Reader>, Arc<dyn ChunkStore>) {
        let chunks = vec![
            Chunk {
                chunk_id: 0,
                page_id: 10,
                page_title: "Cats".to_string(),
                text: "the cat sat on the mat".to_string(),
                token_count: 6,
            },
            Chunk {
                chunk_id: 1,
                page_id: 11,
                page_title: "Dogs".to_string(),
                text: "the dog sat on the rug".to_string(),
                token_count: 6,
            },
        ];

        let chunks_path = dir.join("chunks.jsonl");
        let mut writer = JsonlChunkWriter::create_or_append(&chunks_path, false).unwrap();
        let mut builder = Bm25Builder::new();
        for chunk in &chunks {
            writer.write_chunk(chunk).unwrap();
            builder.add_document(chunk.chunk_id, &chunk.text);
        }
        writer.flush().unwrap();

        let index_path = dir.join("sparse.idx");
        builder.finish(&index_path).unwrap();

        let reader = Arc::new(Bm25Reader::open(&index_path).unwrap());
        let store: Arc<dyn ChunkStore> = Arc::new(JsonlChunkStore::open(&chunks_path).unwrap());
        (reader, store)
    }

    #[tokio::test]
    async fn query_fuses_dense_and_sparse_and_resolves_chunks() {
        let dir = tempdir().unwrap();
        let (bm25, chunk_store) = build_bundle(dir.path());
        let embedder = Arc::new(FakeEmbedder { dimension: 4 });
        let dense_index = Arc::new(FakeDenseIndex { ranked: vec![1, 0] });

        let assembler = RetrievalAssembler::new(
            bm25,
            embedder,
            dense_index,
            chunk_store,
            RetrievalConfig {
                dense_k: 5,
                sparse_k: 5,
                fused_k: 5,
                dedup_by_page: true,
                context_char_budget: 10_000,
            },
            RrfConfig { k: 60.0 },
        );

        let results = assembler.query("cat").await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].page_title, "Cats");
    }

    #[tokio::test]
    async fn dedup_by_page_keeps_only_first_chunk_per_page() {
        let dir = tempdir().unwrap();
        let (bm25, chunk_store) = build_bundle(dir.path());
        let embedder = Arc::new(FakeEmbedder { dimension: 4 });
        let dense_index = Arc::new(FakeDenseIndex { ranked: vec![0, 1] });

        let assembler = RetrievalAssembler::new(
            bm25,
            embedder,
            dense_index,
            chunk_store,
            RetrievalConfig {
                dense_k: 5,
                sparse_k: 5,
                fused_k: 5,
                dedup_by_page: true,
                context_char_budget: 10_000,
            },
            RrfConfig { k: 60.0 },
        );

        let results = assembler.query("cat dog").await.unwrap();
        let pages: std::collections::HashSet<u64> = results.iter().map(|r| r.page_id).collect();
        assert_eq!(pages.len(), results.len());
    }

    #[tokio::test]
    async fn context_budget_stops_before_splitting_a_chunk() {
        let dir = tempdir().unwrap();
        let (bm25, chunk_store) = build_bundle(dir.path());
        let embedder = Arc::new(FakeEmbedder { dimension: 4 });
        let dense_index = Arc::new(FakeDenseIndex { ranked: vec![0, 1] });

        let assembler = RetrievalAssembler::new(
            bm25,
            embedder,
            dense_index,
            chunk_store,
            RetrievalConfig {
                dense_k: 5,
                sparse_k: 5,
                fused_k: 5,
                dedup_by_page: false,
                context_char_budget: 5, // smaller than any chunk's text
            },
            RrfConfig { k: 60.0 },
        );

        let results = assembler.query("cat").await.unwrap();
        assert!(results.is_empty());
    }
}
