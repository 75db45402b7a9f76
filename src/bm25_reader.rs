//! BM25 index reader and scorer.
//!
//! Opens the compressed index built by [`crate::bm25_builder::Bm25Builder`]
//! as a read-only memory map, and scores query terms against documents
//! using standard Okapi BM25.

use std::collections::HashSet;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::config::Bm25Config;
use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::varint;

const MAGIC: &[u8; 4] = b"PWB1";
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 8;

/// One entry scanned out of the on-disk dictionary at open time, kept
/// sorted so lookups are a binary search.
struct DictEntry {
    term: String,
    doc_frequency: u64,
    posting_offset: u64,
    posting_length: u64,
}

/// A read-only, memory-mapped BM25 index, safe for unsynchronized
/// concurrent query access once opened.
pub struct Bm25Reader {
    mmap: Mmap,
    document_count: u64,
    sum_lengths: u64,
    doc_lengths_off: u64,
    postings_off: u64,
    dictionary: Vec<DictEntry>,
    config: Bm25Config,
}

impl Bm25Reader {
    /// Memory-map `path`, validate its magic/version, and scan the
    /// dictionary into a sorted in-memory vector.
    pub fn open(path: &Path) -> PocketWikiResult<Self> {
        Self::open_with_config(path, Bm25Config::default())
    }

    pub fn open_with_config(path: &Path, config: Bm25Config) -> PocketWikiResult<Self> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let corrupt = |message: &str| PocketWikiError::CorruptIndex {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if mmap.len() < HEADER_LEN {
            return Err(corrupt("file shorter than header"));
        }
        if &mmap[0..4] != MAGIC {
            return Err(corrupt("bad magic number"));
        }
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if version != 1 {
            return Err(corrupt(&format!("unsupported version {version}")));
        }

        let read_u64 = |off: usize| u64::from_le_bytes(mmap[off..off + 8].try_into().unwrap());
        let document_count = read_u64(8);
        let sum_lengths = read_u64(16);
        let doc_lengths_off = read_u64(24);
        let dict_off = read_u64(32);
        let dict_bytes = read_u64(40);
        let postings_off = read_u64(48);
        let postings_bytes = read_u64(56);

        let dict_end = dict_off
            .checked_add(dict_bytes)
            .ok_or_else(|| corrupt("dictionary region overflow"))?;
        let postings_end = postings_off
            .checked_add(postings_bytes)
            .ok_or_else(|| corrupt("postings region overflow"))?;
        if dict_end as usize > mmap.len() || postings_end as usize > mmap.len() {
            return Err(corrupt("region extends past end of file"));
        }

        let dictionary = Self::scan_dictionary(&mmap, dict_off as usize, dict_end as usize)?;

        Ok(Self {
            mmap,
            document_count,
            sum_lengths,
            doc_lengths_off,
            postings_off,
            dictionary,
            config,
        })
    }

    fn scan_dictionary(mmap: &Mmap, start: usize, end: usize) -> PocketWikiResult<Vec<DictEntry>> {
        let mut entries = Vec::new();
        let mut pos = start;
        while pos < end {
            let (term_len, next) = varint::decode(mmap, pos)?;
            pos = next;
            let term_end = pos + term_len as usize;
            if term_end > end {
                return Err(PocketWikiError::MalformedVarint { offset: pos });
            }
            let term = std::str::from_utf8(&mmap[pos..term_end])
                .map_err(|_| PocketWikiError::MalformedVarint { offset: pos })?
                .to_string();
            pos = term_end;
            let (doc_frequency, next) = varint::decode(mmap, pos)?;
            pos = next;
            let (posting_offset, next) = varint::decode(mmap, pos)?;
            pos = next;
            let (posting_length, next) = varint::decode(mmap, pos)?;
            pos = next;
            entries.push(DictEntry {
                term,
                doc_frequency,
                posting_offset,
                posting_length,
            });
        }
        Ok(entries)
    }

    pub fn document_count(&self) -> u64 {
        self.document_count
    }

    pub fn avgdl(&self) -> f64 {
        if self.document_count == 0 {
            0.0
        } else {
            self.sum_lengths as f64 / self.document_count as f64
        }
    }

    fn document_length(&self, chunk_id: u64) -> u32 {
        let off = self.doc_lengths_off as usize + chunk_id as usize * 4;
        u32::from_le_bytes(self.mmap[off..off + 4].try_into().unwrap())
    }

    /// Binary search the in-memory dictionary for `term`.
    fn lookup(&self, term: &str) -> Option<&DictEntry> {
        self.dictionary
            .binary_search_by(|e| e.term.as_str().cmp(term))
            .ok()
            .map(|idx| &self.dictionary[idx])
    }

    /// Decode a posting list's `(doc_id, term_freq)` pairs, reading the raw
    /// varint stream linearly rather than materializing more than one list
    /// at a time.
    fn decode_postings(&self, entry: &DictEntry) -> Vec<(u64, u32)> {
        let start = (self.postings_off + entry.posting_offset) as usize;
        let end = start + entry.posting_length as usize;
        let bytes = &self.mmap[start..end];

        let mut pairs = Vec::with_capacity(entry.doc_frequency as usize);
        let mut pos = 0usize;
        let mut prev_doc_id: Option<u64> = None;
        while pos < bytes.len() {
            let (delta_or_abs, next) = varint::decode(bytes, pos).expect("validated at open");
            pos = next;
            let (tf, next) = varint::decode(bytes, pos).expect("validated at open");
            pos = next;
            let doc_id = match prev_doc_id {
                None => delta_or_abs,
                Some(prev) => prev + delta_or_abs,
            };
            pairs.push((doc_id, tf as u32));
            prev_doc_id = Some(doc_id);
        }
        pairs
    }

    /// Score `terms` (deduplicated) against every document in
    /// the union of their posting lists and return at most `top_k` ranked
    /// `(chunk_id, score)` pairs, descending by score, ties broken by
    /// ascending `chunk_id`.
    pub fn search(&self, terms: &[String], top_k: usize) -> PocketWikiResult<Vec<(u64, f64)>> {
        if top_k == 0 || self.document_count == 0 {
            return Ok(Vec::new());
        }

        let unique_terms: HashSet<&str> = terms.iter().map(String::as_str).collect();
        let avgdl = self.avgdl();
        let n = self.document_count as f64;
        let k1 = self.config.k1;
        let b = self.config.b;

        let mut scores: std::collections::HashMap<u64, f64> = std::collections::HashMap::new();
        for term in unique_terms {
            let Some(entry) = self.lookup(term) else {
                continue; // unknown terms contribute zero, not an error
            };
            let df = entry.doc_frequency as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, tf) in self.decode_postings(entry) {
                let tf = tf as f64;
                let doc_len = self.document_length(doc_id) as f64;
                let norm = k1 * (1.0 - b + b * doc_len / avgdl.max(f64::EPSILON));
                let contribution = idf * (tf * (k1 + 1.0)) / (tf + norm);
                *scores.entry(doc_id).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(u64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25_builder::Bm25Builder;
    use tempfile::tempdir;

    fn build_term_frequency_corpus(dir: &std::path::Path) -> std::path::PathBuf {
        // "cat" appears 3,1,0 times in three docs of length 10 each.
        let path = dir.join("sparse.idx");
        let mut builder = Bm25Builder::new();
        builder.add_document(0, "cat cat cat a b c d e f g");
        builder.add_document(1, "cat a b c d e f g h i");
        builder.add_document(2, "a b c d e f g h i j");
        builder.finish(&path).unwrap();
        path
    }

    #[test]
    fn bm25_single_term_score_matches_closed_form() {
        let dir = tempdir().unwrap();
        let path = build_term_frequency_corpus(dir.path());
        let reader = Bm25Reader::open(&path).unwrap();

        let results = reader.search(&["cat".to_string()], 3).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, 1);

        let k1 = 1.2f64;
        let b = 0.75f64;
        let avgdl = 10.0f64;
        let n = 3.0f64;
        let df = 2.0f64;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        let expected_doc0 = idf * (3.0 * (k1 + 1.0)) / (3.0 + k1 * (1.0 - b + b * 10.0 / avgdl));
        let expected_doc1 = idf * (1.0 * (k1 + 1.0)) / (1.0 + k1 * (1.0 - b + b * 10.0 / avgdl));

        assert!((results[0].1 - expected_doc0).abs() < 1e-6);
        assert!((results[1].1 - expected_doc1).abs() < 1e-6);
    }

    #[test]
    fn unknown_query_term_yields_empty_not_error() {
        let dir = tempdir().unwrap();
        let path = build_term_frequency_corpus(dir.path());
        let reader = Bm25Reader::open(&path).unwrap();
        let results = reader.search(&["zzzznotpresent".to_string()], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn top_k_zero_yields_empty() {
        let dir = tempdir().unwrap();
        let path = build_term_frequency_corpus(dir.path());
        let reader = Bm25Reader::open(&path).unwrap();
        let results = reader.search(&["cat".to_string()], 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn duplicate_query_terms_do_not_double_count() {
        let dir = tempdir().unwrap();
        let path = build_term_frequency_corpus(dir.path());
        let reader = Bm25Reader::open(&path).unwrap();
        let once = reader.search(&["cat".to_string()], 3).unwrap();
        let twice = reader
            .search(&["cat".to_string(), "cat".to_string()], 3)
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn single_document_score_reduces_to_idf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sparse.idx");
        let mut builder = Bm25Builder::new();
        builder.add_document(0, "cat");
        builder.finish(&path).unwrap();

        let reader = Bm25Reader::open(&path).unwrap();
        let results = reader.search(&["cat".to_string()], 1).unwrap();
        assert_eq!(results.len(), 1);

        let n = 1.0f64;
        let df = 1.0f64;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        assert!((results[0].1 - idf).abs() < 1e-9);
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, b"not an index").unwrap();
        assert!(Bm25Reader::open(&path).is_err());
    }
}
