//! Incremental MediaWiki XML stream parser.
//!
//! Wraps a [`quick_xml::Reader`] over any `BufRead` byte stream and emits
//! one [`Page`] per closed `<page>` element, releasing all memory
//! associated with that element before advancing — peak memory stays
//! bounded by the largest single page rather than growing with the dump.

use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::data::Page;
use crate::exceptions::PocketWikiError;
use crate::logging::{report_progress, ProgressEvent};

#[derive(Default)]
struct PageBuilder {
    page_id: Option<u64>,
    title: Option<String>,
    text: String,
    is_redirect: bool,
    in_revision: bool,
    in_title: bool,
    in_page_id: bool,
    in_text: bool,
}

impl PageBuilder {
    fn into_page(self) -> Option<Page> {
        Some(Page {
            page_id: self.page_id?,
            title: self.title.unwrap_or_default(),
            text: self.text,
            is_redirect: self.is_redirect,
        })
    }
}

/// Streams `Page` records out of `reader` in document order. An `Err` is
/// yielded for a malformed single `<page>` (logged and the stream
/// continues past it) or for a stream that ends mid-page
/// (`TruncatedInput`, which ends the iterator and is the caller's signal
/// to treat the run as retriable).
pub struct XmlPageParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    current: Option<PageBuilder>,
    byte_offset: u64,
    finished: bool,
}

impl<R: BufRead> XmlPageParser<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
            current: None,
            byte_offset: 0,
            finished: false,
        }
    }

    fn approx_offset(&self) -> u64 {
        self.reader.buffer_position()
    }
}

impl<R: BufRead> Iterator for XmlPageParser<R> {
    type Item = Result<Page, PocketWikiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Eof) => {
                    self.finished = true;
                    if self.current.is_some() {
                        return Some(Err(PocketWikiError::TruncatedInput {
                            offset: self.approx_offset(),
                        }));
                    }
                    return None;
                }
                Ok(Event::Start(e)) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    match name {
                        b"page" => self.current = Some(PageBuilder::default()),
                        b"revision" => {
                            if let Some(cur) = &mut self.current {
                                cur.in_revision = true;
                            }
                        }
                        b"title" => {
                            if let Some(cur) = &mut self.current {
                                if !cur.in_revision {
                                    cur.in_title = true;
                                }
                            }
                        }
                        b"id" => {
                            if let Some(cur) = &mut self.current {
                                if !cur.in_revision && cur.page_id.is_none() {
                                    cur.in_page_id = true;
                                }
                            }
                        }
                        b"text" => {
                            if let Some(cur) = &mut self.current {
                                if cur.in_revision {
                                    cur.in_text = true;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"redirect" {
                        if let Some(cur) = &mut self.current {
                            cur.is_redirect = true;
                        }
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some(cur) = &mut self.current {
                        if cur.in_title || cur.in_page_id || cur.in_text {
                            match e.unescape() {
                                Ok(text) => {
                                    if cur.in_title {
                                        cur.title = Some(text.into_owned());
                                    } else if cur.in_page_id {
                                        cur.page_id = text.trim().parse::<u64>().ok();
                                    } else if cur.in_text {
                                        cur.text.push_str(&text);
                                    }
                                }
                                Err(e) => {
                                    let offset = self.approx_offset();
                                    report_progress(ProgressEvent::PageMalformed {
                                        offset,
                                        message: format!("unescape error: {e}"),
                                    });
                                }
                            }
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    match name {
                        b"title" => {
                            if let Some(cur) = &mut self.current {
                                cur.in_title = false;
                            }
                        }
                        b"id" => {
                            if let Some(cur) = &mut self.current {
                                cur.in_page_id = false;
                            }
                        }
                        b"text" => {
                            if let Some(cur) = &mut self.current {
                                cur.in_text = false;
                            }
                        }
                        b"revision" => {
                            if let Some(cur) = &mut self.current {
                                cur.in_revision = false;
                            }
                        }
                        b"page" => {
                            if let Some(builder) = self.current.take() {
                                match builder.into_page() {
                                    Some(page) => {
                                        report_progress(ProgressEvent::PageEmitted {
                                            page_id: page.page_id,
                                            title: page.title.clone(),
                                        });
                                        return Some(Ok(page));
                                    }
                                    None => {
                                        let offset = self.approx_offset();
                                        report_progress(ProgressEvent::PageMalformed {
                                            offset,
                                            message: "page closed without an <id>".to_string(),
                                        });
                                        return Some(Err(PocketWikiError::MalformedPage {
                                            offset,
                                            message: "missing required <id>".to_string(),
                                        }));
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let offset = self.approx_offset();
                    self.byte_offset = offset;
                    // A single malformed page is logged and skipped; the parser
                    // keeps reading subsequent events. Discard any
                    // partially built page so it is not half-emitted.
                    let had_page = self.current.take().is_some();
                    report_progress(ProgressEvent::PageMalformed {
                        offset,
                        message: format!("xml parse error: {e}"),
                    });
                    if had_page {
                        return Some(Err(PocketWikiError::MalformedPage {
                            offset,
                            message: e.to_string(),
                        }));
                    }
                    // No page was in flight; this was noise between pages
                    // (or an unrecoverable stream desync) — keep trying.
                    continue;
                }
            }
        }
    }
}
