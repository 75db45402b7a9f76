//! Chunker: splits page text into the indexable `Chunk` units that feed
//! both the BM25 builder and the external embedder.
//!
//! Splits one page's text into paragraph-bounded chunks, falling back to
//! sentence- then whitespace-splitting for any paragraph that alone
//! exceeds the character budget.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::data::{Chunk, Page};
use crate::tokenizer::tokenize;

/// Split `page.text` into zero or more chunks, assigning dense,
/// monotonically increasing `chunk_id`s starting at `next_chunk_id`.
/// Returns the chunks and the next free `chunk_id` for the caller to pass
/// into the following page.
pub fn chunk_page(page: &Page, config: &ChunkingConfig, next_chunk_id: u64) -> (Vec<Chunk>, u64) {
    let paragraphs = split_paragraphs(&page.text);
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let candidate = if current.is_empty() {
            paragraph.to_string()
        } else {
            format!("{current}\n\n{paragraph}")
        };
        let candidate_tokens = tokenize(&candidate).len();

        if current.is_empty()
            && (paragraph.len() > config.max_chunk_length
                || candidate_tokens > config.max_chunk_tokens)
        {
            // A single paragraph already exceeds the budget: split it
            // further and flush each sub-piece as its own chunk.
            for piece in split_oversized(paragraph, config) {
                pieces.push(piece);
            }
            continue;
        }

        if candidate.len() > config.max_chunk_length || candidate_tokens > config.max_chunk_tokens
        {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if paragraph.len() > config.max_chunk_length
                || tokenize(paragraph).len() > config.max_chunk_tokens
            {
                for piece in split_oversized(paragraph, config) {
                    pieces.push(piece);
                }
            } else {
                current = paragraph.to_string();
            }
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    // Merge any chunk shorter than min_chunk_length into the previous one
    // in the same page; drop it if there is no previous chunk.
    let mut merged: Vec<String> = Vec::new();
    for piece in pieces {
        if piece.len() < config.min_chunk_length {
            if let Some(prev) = merged.last_mut() {
                prev.push_str("\n\n");
                prev.push_str(&piece);
                continue;
            }
            // No previous chunk in this page: drop (page too short to index).
            continue;
        }
        merged.push(piece);
    }

    let mut chunk_id = next_chunk_id;
    let mut chunks = Vec::with_capacity(merged.len());
    for text in merged {
        let token_count = tokenize(&text).len() as u32;
        chunks.push(Chunk {
            chunk_id,
            page_id: page.page_id,
            page_title: page.title.clone(),
            text,
            token_count,
        });
        chunk_id += 1;
    }
    (chunks, chunk_id)
}

fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split an oversized paragraph on sentence boundaries, then on
/// whitespace as a last resort, accumulating pieces up to the character
/// budget.
fn split_oversized(paragraph: &str, config: &ChunkingConfig) -> Vec<String> {
    let sentences: Vec<&str> = paragraph.unicode_sentences().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let candidate = if current.is_empty() {
            sentence.to_string()
        } else {
            format!("{current} {sentence}")
        };
        if candidate.len() > config.max_chunk_length && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if sentence.len() > config.max_chunk_length {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_on_whitespace(sentence, config.max_chunk_length));
        } else {
            current = if current.is_empty() {
                sentence.to_string()
            } else {
                format!("{current} {sentence}")
            };
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_on_whitespace(text: &str, max_chunk_length: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate_len = current.len() + if current.is_empty() { 0 } else { 1 } + word.len();
        if candidate_len > max_chunk_length && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> Page {
        Page {
            page_id: 1,
            title: "Test".to_string(),
            text: text.to_string(),
            is_redirect: false,
        }
    }

    #[test]
    fn chunk_ids_are_dense_and_start_at_given_offset() {
        let cfg = ChunkingConfig {
            min_chunk_length: 1,
            max_chunk_length: 50,
            max_chunk_tokens: 100,
        };
        let text = "Paragraph one here.\n\nParagraph two over there.\n\nParagraph three also.";
        let p = page(text);
        let (chunks, next_id) = chunk_page(&p, &cfg, 5);
        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, 5 + i as u64);
        }
        assert_eq!(next_id, 5 + chunks.len() as u64);
    }

    #[test]
    fn chunks_respect_max_chunk_length_budget() {
        let cfg = ChunkingConfig {
            min_chunk_length: 1,
            max_chunk_length: 30,
            max_chunk_tokens: 1000,
        };
        let text = "a".repeat(10) + "\n\n" + &"b".repeat(10) + "\n\n" + &"c".repeat(10);
        let p = page(&text);
        let (chunks, _) = chunk_page(&p, &cfg, 0);
        for c in &chunks {
            assert!(c.text.len() <= cfg.max_chunk_length + 4); // small slack for joins
        }
    }

    #[test]
    fn short_trailing_chunk_merges_into_previous() {
        let cfg = ChunkingConfig {
            min_chunk_length: 20,
            max_chunk_length: 15,
            max_chunk_tokens: 1000,
        };
        let text = "0123456789012345\n\ntiny";
        let p = page(text);
        let (chunks, _) = chunk_page(&p, &cfg, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("tiny"));
    }

    #[test]
    fn oversized_single_paragraph_is_split_further() {
        let cfg = ChunkingConfig {
            min_chunk_length: 1,
            max_chunk_length: 20,
            max_chunk_tokens: 1000,
        };
        let sentence_a = "This is sentence number one here today. ".repeat(1);
        let sentence_b = "This is sentence number two over there. ".repeat(1);
        let text = format!("{sentence_a}{sentence_b}");
        let p = page(&text);
        let (chunks, _) = chunk_page(&p, &cfg, 0);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn empty_page_text_yields_no_chunks() {
        let cfg = ChunkingConfig::default();
        let p = page("");
        let (chunks, next_id) = chunk_page(&p, &cfg, 3);
        assert!(chunks.is_empty());
        assert_eq!(next_id, 3);
    }

    #[test]
    fn token_count_matches_tokenizer_output() {
        let cfg = ChunkingConfig {
            min_chunk_length: 1,
            max_chunk_length: 1000,
            max_chunk_tokens: 1000,
        };
        let p = page("one two three four");
        let (chunks, _) = chunk_page(&p, &cfg, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 4);
    }
}
