//! BM25 index builder.
//!
//! Accumulates an in-memory `term -> {doc_id -> term_freq}` table from a
//! stream of `(chunk_id, text)` pairs, then emits the compressed on-disk
//! layout: header, document-length array, sorted dictionary, and a
//! delta+varint postings region.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::logging::{report_progress, ProgressEvent};
use crate::tokenizer::tokenize;
use crate::varint;

const MAGIC: &[u8; 4] = b"PWB1";
const VERSION: u32 = 1;

/// Accumulates postings in memory across one build pass, then writes the
/// compressed index atomically via a `.tmp` + rename.
pub struct Bm25Builder {
    /// term -> (doc_id -> term_freq), both levels naturally sorted by key.
    postings: BTreeMap<String, BTreeMap<u64, u32>>,
    document_length: Vec<u32>,
    sum_lengths: u64,
    last_chunk_id: Option<u64>,
}

impl Default for Bm25Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Builder {
    pub fn new() -> Self {
        Self {
            postings: BTreeMap::new(),
            document_length: Vec::new(),
            sum_lengths: 0,
            last_chunk_id: None,
        }
    }

    /// Add one document to the index. `chunk_id` must be strictly
    /// increasing across calls; a duplicate or out-of-order `chunk_id` is
    /// a programmer error and panics.
    pub fn add_document(&mut self, chunk_id: u64, text: &str) {
        if let Some(last) = self.last_chunk_id {
            assert!(
                chunk_id > last,
                "BM25 builder requires strictly increasing chunk_id: got {chunk_id} after {last}"
            );
        }
        self.last_chunk_id = Some(chunk_id);

        let terms = tokenize(text);
        let length = terms.len() as u32;
        debug_assert_eq!(self.document_length.len() as u64, chunk_id);
        self.document_length.push(length);
        self.sum_lengths += length as u64;

        for term in terms {
            let doc_freqs = self.postings.entry(term).or_default();
            *doc_freqs.entry(chunk_id).or_insert(0) += 1;
        }

        report_progress(ProgressEvent::BuilderProgress {
            documents_indexed: chunk_id + 1,
        });
    }

    /// Serialize the accumulated index to `path`, writing to `<path>.tmp`
    /// first and renaming on success so a reader never observes a partial
    /// file.
    pub fn finish(self, path: &Path) -> PocketWikiResult<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        let result = self.write_to(&tmp_path);
        match result {
            Ok(()) => {
                std::fs::rename(&tmp_path, path)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    fn write_to(&self, tmp_path: &Path) -> PocketWikiResult<()> {
        let n = self.document_length.len() as u64;

        // Serialize postings and dictionary into byte buffers first so the
        // header's region offsets are known before any bytes hit disk.
        let mut dict_buf = Vec::new();
        let mut postings_buf = Vec::new();

        for (term, doc_freqs) in &self.postings {
            let df = doc_freqs.len() as u64;
            let post_offset = postings_buf.len() as u64;

            let mut prev_doc_id: Option<u64> = None;
            for (&doc_id, &tf) in doc_freqs {
                match prev_doc_id {
                    None => varint::encode(doc_id, &mut postings_buf),
                    Some(prev) => varint::encode(doc_id - prev, &mut postings_buf),
                }
                varint::encode(tf as u64, &mut postings_buf);
                prev_doc_id = Some(doc_id);
            }
            let post_len = postings_buf.len() as u64 - post_offset;

            let term_bytes = term.as_bytes();
            varint::encode(term_bytes.len() as u64, &mut dict_buf);
            dict_buf.extend_from_slice(term_bytes);
            varint::encode(df, &mut dict_buf);
            varint::encode(post_offset, &mut dict_buf);
            varint::encode(post_len, &mut dict_buf);
        }

        let mut doc_lengths_buf = Vec::with_capacity(self.document_length.len() * 4);
        for &len in &self.document_length {
            doc_lengths_buf.extend_from_slice(&len.to_le_bytes());
        }

        // Header is a fixed-size preamble: magic, version, N, sum_lengths,
        // then four (offset, bytes) pairs for the three variable regions
        // (doc_lengths has no explicit byte count field; its length is N*4).
        let header_len = 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 8;
        let doc_lengths_off = header_len as u64;
        let dict_off = doc_lengths_off + doc_lengths_buf.len() as u64;
        let dict_bytes = dict_buf.len() as u64;
        let postings_off = dict_off + dict_bytes;
        let postings_bytes = postings_buf.len() as u64;

        let file = File::create(tmp_path)?;
        let mut w = BufWriter::new(file);

        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&n.to_le_bytes())?;
        w.write_all(&self.sum_lengths.to_le_bytes())?;
        w.write_all(&doc_lengths_off.to_le_bytes())?;
        w.write_all(&dict_off.to_le_bytes())?;
        w.write_all(&dict_bytes.to_le_bytes())?;
        w.write_all(&postings_off.to_le_bytes())?;
        w.write_all(&postings_bytes.to_le_bytes())?;
        w.write_all(&doc_lengths_buf)?;
        w.write_all(&dict_buf)?;
        w.write_all(&postings_buf)?;
        w.flush()?;
        w.get_ref().sync_all().map_err(PocketWikiError::Io)?;
        Ok(())
    }

    pub fn document_count(&self) -> u64 {
        self.document_length.len() as u64
    }
}
