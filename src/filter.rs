//! Page filter.
//!
//! A thin predicate stage run between the XML parser and the chunker/
//! embedder. `skip_disambiguation` is a named, reserved config field with
//! no detector behind it yet — left inert rather than invented, since no
//! disambiguation-page heuristic has been agreed on.

use crate::config::FilterConfig;
use crate::data::Page;

/// Whether `page` should be dropped before chunking/indexing.
pub fn should_drop(page: &Page, config: &FilterConfig) -> bool {
    page.is_redirect && config.skip_redirects
    // `config.skip_disambiguation` is intentionally never consulted here.
}
