//! PocketWikiRAG: a portable, offline-queryable hybrid retrieval bundle
//! builder and query engine for MediaWiki XML dumps.
//!
//! Two subsystems carry the engineering load:
//!
//! - **Streaming ingest**: [`byte_source`] + [`xml_parser`] +
//!   [`checkpoint`] feed [`chunker`] and [`filter`]
//!   through the [`stage`] / [`pipeline`] skip-resume harness,
//!   ending at [`bm25_builder`] and [`packager`].
//! - **Hybrid retrieval**: [`tokenizer`] and [`bm25_reader`]
//!   provide lexical search; [`rrf`] fuses it with an external dense
//!   index behind the [`inference`] traits; [`assembler`] resolves
//!   the result through [`chunk_store`].

pub mod assembler;
pub mod bm25_builder;
pub mod bm25_reader;
pub mod byte_source;
pub mod checkpoint;
pub mod chunk_store;
pub mod chunker;
pub mod config;
pub mod data;
pub mod exceptions;
pub mod filter;
pub mod inference;
pub mod logging;
pub mod packager;
pub mod pipeline;
pub mod rrf;
pub mod stage;
pub mod tokenizer;
pub mod varint;
pub mod xml_parser;

pub use config::PipelineConfig;
pub use exceptions::{PocketWikiError, PocketWikiResult};
