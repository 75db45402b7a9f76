//! Deterministic text → term sequence.
//!
//! The same implementation is invoked at index time (by the BM25 Builder)
//! and at query time (by the Retrieval Assembler); any divergence between
//! the two call sites would silently corrupt retrieval, so this is the
//! single function both paths are required to call.

use unicode_segmentation::UnicodeSegmentation;

use crate::exceptions::{PocketWikiError, PocketWikiResult};

/// Tokenize `text` into a left-to-right sequence of lowercased, alphanumeric
/// word segments. The input is walked grapheme cluster by grapheme cluster
/// (so combining marks stay attached to their base letter); a maximal run
/// of alphanumeric clusters forms one term, anything else is a boundary.
/// No deduplication is performed.
///
/// Pure and side-effect free. Allocation is bounded by the size of the
/// output: one `String` per kept segment.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for grapheme in text.graphemes(true) {
        let starts_alphanumeric = grapheme
            .chars()
            .next()
            .map(|c| c.is_alphanumeric())
            .unwrap_or(false);
        if starts_alphanumeric {
            current.push_str(grapheme);
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current).to_lowercase());
        }
    }
    if !current.is_empty() {
        terms.push(current.to_lowercase());
    }
    terms
}

/// Decode `bytes` as UTF-8 and tokenize. Invalid UTF-8 is surfaced as an
/// error rather than lossily replaced.
pub fn tokenize_bytes(bytes: &[u8]) -> PocketWikiResult<Vec<String>> {
    let text = std::str::from_utf8(bytes).map_err(|e| PocketWikiError::ExternalFailure {
        collaborator: "tokenizer".to_string(),
        source: anyhow::anyhow!("invalid utf-8 input: {e}"),
    })?;
    Ok(tokenize(text))
}
