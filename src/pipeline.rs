//! Pipeline driver.
//!
//! Wires the ingest components into the ordered DAG `StreamParse → Chunk →
//! Filter → Embed (external) → DenseIndex (external) → BM25 Build →
//! Package`. Every stage implements [`crate::stage::Stage`] and is run
//! through [`crate::stage::run_stage`], so skip/resume is uniform across
//! the whole pipeline; the driver itself only fixes the order and halts on
//! the first failing stage, since inter-stage state lives on disk only.
//!
//! Embed and DenseIndex are external collaborators this crate does not
//! implement, but [`PipelineDriver::run`] accepts them as ordinary
//! `Stage` trait objects supplied by the caller, slotted between Chunk/
//! Filter and BM25 Build.

use std::io::{BufReader, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::bm25_builder::Bm25Builder;
use crate::bm25_reader::Bm25Reader;
use crate::byte_source::{BlockingByteReader, ByteSource};
use crate::checkpoint::{Checkpoint, CheckpointManager, ResumeDecision};
use crate::chunk_store::JsonlChunkWriter;
use crate::chunker::chunk_page;
use crate::config::{ByteSourceConfig, CheckpointConfig, ChunkingConfig, FilterConfig};
use crate::data::Page;
use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::filter::should_drop;
use crate::logging::{report_progress, ProgressEvent};
use crate::stage::{compute_input_hash, run_stage, Stage, TOOL_VERSION};
use crate::xml_parser::XmlPageParser;

/// Manifest statistics (`chunk_count`, `avgdl`) that the `Stage` trait's
/// `run() -> PocketWikiResult<()>` signature has no room to return.
/// Recomputed cheaply after BM25 Build completes by reopening the index's
/// header, rather than widening the Stage trait for one caller.
pub struct BundleStats {
    pub chunk_count: u64,
    pub avgdl: f64,
}

/// Streams a dump from `source_url` into `output_path` as newline-
/// delimited [`Page`] JSON, resuming from `checkpoint_path` when the five
/// resume checks all pass. Folds the XML parser, byte source, and
/// checkpoint manager into one stage, since the byte source,
/// decompressor, and XML parser run as a single pull-based pipeline in
/// one thread of execution.
pub struct StreamParseStage {
    pub source_url: Url,
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub byte_source: ByteSourceConfig,
    pub checkpoint: CheckpointConfig,
    pub config_hash: u64,
}

#[async_trait]
impl Stage for StreamParseStage {
    fn name(&self) -> &str {
        "stream_parse"
    }

    fn input_hash(&self) -> PocketWikiResult<String> {
        // The input is a remote URL, not a local file, so the digest folds
        // in the URL string directly rather than a file digest.
        let base = compute_input_hash(self.config_hash, &[], TOOL_VERSION)?;
        Ok(format!("{base}:{}", self.source_url))
    }

    fn declared_outputs(&self) -> Vec<PathBuf> {
        vec![self.output_path.clone()]
    }

    async fn run(&self) -> PocketWikiResult<()> {
        let decision = CheckpointManager::resume(
            &self.checkpoint_path,
            self.source_url.as_str(),
            None,
            self.byte_source.validate_source_unchanged,
            self.config_hash,
        );

        let (offset, last_page_id, manager, append) = match decision {
            ResumeDecision::Resume(checkpoint) => {
                report_progress(ProgressEvent::ResumeDecision {
                    resumed: true,
                    reason: "checkpoint valid".to_string(),
                });
                let offset = checkpoint.compressed_bytes_read;
                let last_page_id = checkpoint.last_page_id;
                let manager = CheckpointManager::new(self.checkpoint_path.clone(), checkpoint);
                (offset, last_page_id, manager, true)
            }
            ResumeDecision::FreshStart { reason } => {
                report_progress(ProgressEvent::ResumeDecision {
                    resumed: false,
                    reason,
                });
                let _ = std::fs::remove_file(&self.output_path);
                let checkpoint = Checkpoint::new(
                    self.source_url.to_string(),
                    self.output_path.to_string_lossy().to_string(),
                    self.config_hash,
                );
                let manager = CheckpointManager::new(self.checkpoint_path.clone(), checkpoint);
                (0, None, manager, false)
            }
        };

        let source = ByteSource::open(&self.source_url, offset, None, &self.byte_source).await?;
        let etag = source.outcome.etag.clone();
        let compressed_counter = source.compressed_bytes_counter();

        let output_path = self.output_path.clone();
        let every_pages = self.checkpoint.checkpoint_every_pages;
        let every_bytes = self.checkpoint.checkpoint_every_bytes;
        let every_seconds = self.checkpoint.checkpoint_every_seconds;

        tokio::task::spawn_blocking(move || -> PocketWikiResult<()> {
            let mut manager = manager;
            manager.set_etag(etag);

            let reader = BufReader::new(BlockingByteReader::new(source));
            let parser = XmlPageParser::new(reader);

            let mut out = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&output_path)?;
            let mut output_bytes_written = if append { out.metadata()?.len() } else { 0 };

            for page_result in parser {
                let page = match page_result {
                    Ok(page) => page,
                    Err(err @ PocketWikiError::TruncatedInput { .. }) => {
                        manager.flush()?;
                        return Err(err);
                    }
                    Err(PocketWikiError::MalformedPage { .. }) => continue,
                    Err(other) => return Err(other),
                };

                if let Some(last_id) = last_page_id {
                    if page.page_id <= last_id {
                        continue; // resume dedup: already emitted before termination
                    }
                }

                let mut line = serde_json::to_vec(&page)?;
                line.push(b'\n');
                out.write_all(&line)?;
                output_bytes_written += line.len() as u64;

                manager.record_progress(
                    1,
                    line.len() as u64,
                    page.page_id,
                    &page.title,
                    compressed_counter.load(std::sync::atomic::Ordering::Relaxed),
                    output_bytes_written,
                    every_pages,
                    every_bytes,
                    every_seconds,
                )?;
            }

            manager.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| PocketWikiError::ExternalFailure {
            collaborator: "stream_parse".to_string(),
            source: anyhow::anyhow!(e),
        })??;

        Ok(())
    }
}

/// Reads [`Page`] records from the StreamParse stage's output, drops
/// redirects per the filter, splits survivors into dense, monotonically
/// numbered [`crate::data::Chunk`]s per the chunker, and writes
/// `chunks.jsonl`. Combines filtering and chunking into one stage because
/// both operate page-by-page in one linear pass with no intervening I/O
/// the stage framework needs to checkpoint separately.
pub struct ChunkFilterStage {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub chunking: ChunkingConfig,
    pub filter: FilterConfig,
    pub config_hash: u64,
}

#[async_trait]
impl Stage for ChunkFilterStage {
    fn name(&self) -> &str {
        "chunk_filter"
    }

    fn input_hash(&self) -> PocketWikiResult<String> {
        compute_input_hash(self.config_hash, &[self.input_path.clone()], TOOL_VERSION)
    }

    fn declared_outputs(&self) -> Vec<PathBuf> {
        vec![self.output_path.clone()]
    }

    async fn run(&self) -> PocketWikiResult<()> {
        let input_path = self.input_path.clone();
        let output_path = self.output_path.clone();
        let chunking = self.chunking;
        let filter = self.filter;

        tokio::task::spawn_blocking(move || -> PocketWikiResult<()> {
            let file = std::fs::File::open(&input_path)?;
            let reader = std::io::BufReader::new(file);
            let mut writer = JsonlChunkWriter::create_or_append(&output_path, false)?;

            let mut next_chunk_id = 0u64;
            for line in std::io::BufRead::lines(reader) {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let page: Page = serde_json::from_str(&line)?;
                if should_drop(&page, &filter) {
                    continue;
                }
                let (chunks, next_id) = chunk_page(&page, &chunking, next_chunk_id);
                next_chunk_id = next_id;
                for chunk in &chunks {
                    writer.write_chunk(chunk)?;
                }
            }
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| PocketWikiError::ExternalFailure {
            collaborator: "chunk_filter".to_string(),
            source: anyhow::anyhow!(e),
        })??;

        Ok(())
    }
}

/// Streams `chunks.jsonl` through [`Bm25Builder`] in `chunk_id` order and
/// writes the compressed index (C3).
pub struct Bm25BuildStage {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub config_hash: u64,
}

#[async_trait]
impl Stage for Bm25BuildStage {
    fn name(&self) -> &str {
        "bm25_build"
    }

    fn input_hash(&self) -> PocketWikiResult<String> {
        compute_input_hash(self.config_hash, &[self.input_path.clone()], TOOL_VERSION)
    }

    fn declared_outputs(&self) -> Vec<PathBuf> {
        vec![self.output_path.clone()]
    }

    async fn run(&self) -> PocketWikiResult<()> {
        let input_path = self.input_path.clone();
        let output_path = self.output_path.clone();

        tokio::task::spawn_blocking(move || -> PocketWikiResult<()> {
            let file = std::fs::File::open(&input_path)?;
            let reader = std::io::BufReader::new(file);
            let mut builder = Bm25Builder::new();
            for line in std::io::BufRead::lines(reader) {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let chunk: crate::data::Chunk = serde_json::from_str(&line)?;
                builder.add_document(chunk.chunk_id, &chunk.text);
            }
            builder.finish(&output_path)
        })
        .await
        .map_err(|e| PocketWikiError::ExternalFailure {
            collaborator: "bm25_build".to_string(),
            source: anyhow::anyhow!(e),
        })??;

        Ok(())
    }
}

/// Runs the fixed-order stage DAG through the stage framework's
/// skip/resume harness, halting at the first stage that errors.
pub struct PipelineDriver {
    pub state_dir: PathBuf,
}

impl PipelineDriver {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    /// Run `stages` in the given order. `stages` is expected to already be
    /// `[StreamParse, ChunkFilter, Embed?, DenseIndex?, Bm25Build, Package]`
    /// — the order itself is the caller's responsibility, so this driver
    /// never has to hard-code the external stage types it does not
    /// implement.
    pub async fn run(&self, stages: &[&dyn Stage]) -> PocketWikiResult<()> {
        for stage in stages {
            run_stage(*stage, &self.state_dir).await?;
        }
        Ok(())
    }

    /// Convenience for the common case: no external Embed/DenseIndex
    /// stages supplied, so the driver only runs the in-core stages, then
    /// reopens the freshly built index to report [`BundleStats`] for the
    /// Packager.
    pub async fn run_core(
        &self,
        stream_parse: &StreamParseStage,
        chunk_filter: &ChunkFilterStage,
        bm25_build: &Bm25BuildStage,
    ) -> PocketWikiResult<BundleStats> {
        self.run(&[stream_parse, chunk_filter, bm25_build]).await?;

        let index_path = bm25_build.output_path.clone();
        let (chunk_count, avgdl) = tokio::task::spawn_blocking(move || -> PocketWikiResult<(u64, f64)> {
            let reader = Bm25Reader::open(&index_path)?;
            Ok((reader.document_count(), reader.avgdl()))
        })
        .await
        .map_err(|e| PocketWikiError::ExternalFailure {
            collaborator: "pipeline".to_string(),
            source: anyhow::anyhow!(e),
        })??;

        Ok(BundleStats { chunk_count, avgdl })
    }
}
