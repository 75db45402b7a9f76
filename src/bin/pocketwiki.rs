//! PocketWikiRAG CLI — build and query offline hybrid retrieval bundles
//! from the terminal. Gated behind the `cli` feature, with a
//! `clap` + `colored` + `indicatif` + `console` + `dirs` surface kept
//! separate from the library's `thiserror` error type.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use pocketwiki_rag::bm25_reader::Bm25Reader;
use pocketwiki_rag::chunk_store::{ChunkStore, JsonlChunkStore};
use pocketwiki_rag::checkpoint::CheckpointManager;
use pocketwiki_rag::config::PipelineConfig;
use pocketwiki_rag::logging::{init_progress_handler, ProgressEvent, ProgressHandler};
use pocketwiki_rag::packager::PackagerStage;
use pocketwiki_rag::pipeline::{Bm25BuildStage, ChunkFilterStage, PipelineDriver, StreamParseStage};
use pocketwiki_rag::tokenizer::tokenize;
use pocketwiki_rag::{PocketWikiError, PocketWikiResult};

#[derive(Parser)]
#[command(name = "pocketwiki", version, about = "Offline MediaWiki hybrid retrieval bundles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file overriding the pipeline defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a bundle from a MediaWiki dump URL (http(s):// or file://)
    Build {
        /// Dump source URL
        source_url: String,

        /// Output bundle directory
        bundle_dir: PathBuf,

        /// Discard any existing checkpoint and start over
        #[arg(long)]
        force_restart: bool,
    },
    /// Resume an in-progress build (checkpoint presence decides automatically)
    Resume {
        /// Dump source URL (must match the original build's source)
        source_url: String,

        /// Output bundle directory
        bundle_dir: PathBuf,
    },
    /// Run a lexical (BM25-only) query against an existing bundle
    Query {
        /// Bundle directory produced by `build`
        bundle_dir: PathBuf,

        /// Query text
        query: String,

        /// Number of results to return
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Print a bundle's manifest and index statistics
    Inspect {
        /// Bundle directory produced by `build`
        bundle_dir: PathBuf,
    },
}

struct CliProgressHandler {
    bar: ProgressBar,
}

impl ProgressHandler for CliProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => {
                self.bar.set_message(format!("{} {}", "running".green(), stage));
            }
            ProgressEvent::StageSkipped { stage } => {
                self.bar
                    .println(format!("{} {} (up to date)", "skip".yellow(), stage));
            }
            ProgressEvent::StageCompleted { stage, elapsed_ms } => {
                self.bar
                    .println(format!("{} {} in {}ms", "done".cyan(), stage, elapsed_ms));
            }
            ProgressEvent::BuilderProgress { documents_indexed } => {
                self.bar.set_message(format!("indexed {documents_indexed} documents"));
            }
            ProgressEvent::CheckpointWritten { pages_processed, .. } => {
                self.bar.set_message(format!("checkpoint: {pages_processed} pages"));
            }
            ProgressEvent::ResumeDecision { resumed, reason } => {
                let verb = if resumed { "resuming".green() } else { "fresh start".yellow() };
                self.bar.println(format!("{verb}: {reason}"));
            }
            ProgressEvent::RetryAttempt { operation, attempt, max_attempts, delay_ms } => {
                self.bar.println(format!(
                    "{} {operation} (attempt {attempt}/{max_attempts}, retrying in {delay_ms}ms)",
                    "retry".red()
                ));
            }
            ProgressEvent::PageMalformed { offset, message } => {
                self.bar
                    .println(format!("{} malformed page at byte {offset}: {message}", "warn".yellow()));
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let bar = ProgressBar::new_spinner();
    if !cli.quiet {
        bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
    } else {
        bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    init_progress_handler(Arc::new(CliProgressHandler { bar: bar.clone() }));

    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { source_url, bundle_dir, force_restart } => {
            run_build(&source_url, &bundle_dir, &config, force_restart).await?;
        }
        Commands::Resume { source_url, bundle_dir } => {
            run_build(&source_url, &bundle_dir, &config, false).await?;
        }
        Commands::Query { bundle_dir, query, top_k } => {
            run_query(&bundle_dir, &query, top_k, &config)?;
        }
        Commands::Inspect { bundle_dir } => {
            run_inspect(&bundle_dir)?;
        }
    }

    bar.finish_and_clear();
    Ok(())
}

async fn run_build(
    source_url: &str,
    bundle_dir: &std::path::Path,
    config: &PipelineConfig,
    force_restart: bool,
) -> PocketWikiResult<()> {
    std::fs::create_dir_all(bundle_dir)?;
    let url = url::Url::parse(source_url).map_err(|e| PocketWikiError::ExternalFailure {
        collaborator: "cli".to_string(),
        source: anyhow::anyhow!(e),
    })?;

    let articles_path = bundle_dir.join("articles.jsonl");
    let chunks_path = bundle_dir.join("chunks.jsonl");
    let index_path = bundle_dir.join("sparse.idx");
    let checkpoint_path = bundle_dir.join("stream.checkpoint.json");
    let state_dir = bundle_dir.join(".stage_state");

    if force_restart {
        CheckpointManager::delete(&checkpoint_path)?;
        let _ = std::fs::remove_file(&articles_path);
    }

    let config_hash = config.config_hash();
    let stream_parse = StreamParseStage {
        source_url: url,
        output_path: articles_path,
        checkpoint_path,
        byte_source: config.byte_source.clone(),
        checkpoint: config.checkpoint,
        config_hash,
    };
    let chunk_filter = ChunkFilterStage {
        input_path: stream_parse.output_path.clone(),
        output_path: chunks_path.clone(),
        chunking: config.chunking,
        filter: config.filter,
        config_hash,
    };
    let bm25_build = Bm25BuildStage {
        input_path: chunks_path,
        output_path: index_path,
        config_hash,
    };

    let driver = PipelineDriver::new(state_dir);
    let stats = driver.run_core(&stream_parse, &chunk_filter, &bm25_build).await?;

    let packager = PackagerStage {
        bundle_dir: bundle_dir.to_path_buf(),
        config: config.clone(),
        chunk_count: stats.chunk_count,
        avgdl: stats.avgdl,
    };
    pocketwiki_rag::stage::run_stage(&packager, &driver.state_dir).await?;

    println!(
        "{} {} chunks, avgdl {:.1}",
        "bundle ready:".green().bold(),
        stats.chunk_count,
        stats.avgdl
    );
    Ok(())
}

fn run_query(
    bundle_dir: &std::path::Path,
    query: &str,
    top_k: usize,
    config: &PipelineConfig,
) -> PocketWikiResult<()> {
    let reader = Bm25Reader::open_with_config(&bundle_dir.join("sparse.idx"), config.bm25)?;
    let store = JsonlChunkStore::open(&bundle_dir.join("chunks.jsonl"))?;

    let terms = tokenize(query);
    let hits = reader.search(&terms, top_k)?;

    if hits.is_empty() {
        println!("{}", "no results".yellow());
        return Ok(());
    }

    for (rank, (chunk_id, score)) in hits.iter().enumerate() {
        let record = store.get(*chunk_id)?;
        println!(
            "{}. {} {} ({:.4})",
            rank + 1,
            record.page_title.bold(),
            format!("[chunk {chunk_id}]").dimmed(),
            score
        );
        let preview: String = record.text.chars().take(160).collect();
        println!("   {preview}");
    }
    Ok(())
}

fn run_inspect(bundle_dir: &std::path::Path) -> PocketWikiResult<()> {
    let manifest_path = bundle_dir.join("manifest.json");
    let manifest_bytes = std::fs::read(&manifest_path)?;
    let manifest: serde_json::Value = serde_json::from_slice(&manifest_bytes)?;
    println!("{}", serde_json::to_string_pretty(&manifest).unwrap());

    let reader = Bm25Reader::open(&bundle_dir.join("sparse.idx"))?;
    println!(
        "{} documents, avgdl {:.2}",
        reader.document_count(),
        reader.avgdl()
    );
    Ok(())
}
