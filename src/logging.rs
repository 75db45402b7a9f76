//! Logging and progress reporting system for PocketWikiRAG.
//!
//! Unified system for progress reporting that can be controlled by library
//! users and CLI applications, kept alongside plain `log` calls so
//! `env_logger` keeps working for anyone who never installs a custom
//! [`ProgressHandler`].

use std::sync::Arc;

/// Progress event types for the ingest pipeline and the query path.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A pipeline stage started running (not skipped).
    StageStarted { stage: String },
    /// A pipeline stage was skipped because its input hash matched prior state.
    StageSkipped { stage: String },
    /// A pipeline stage completed successfully.
    StageCompleted { stage: String, elapsed_ms: u64 },
    /// A `<page>` element was emitted by the XML stream parser.
    PageEmitted { page_id: u64, title: String },
    /// A `<page>` element failed to parse and was skipped.
    PageMalformed { offset: u64, message: String },
    /// A checkpoint was written to disk.
    CheckpointWritten {
        pages_processed: u64,
        compressed_bytes_read: u64,
    },
    /// The resume decision for a streaming stage was made.
    ResumeDecision { resumed: bool, reason: String },
    /// BM25 builder progress (documents consumed so far).
    BuilderProgress { documents_indexed: u64 },
    /// A retry attempt for a transient network error.
    RetryAttempt {
        operation: String,
        attempt: usize,
        max_attempts: usize,
        delay_ms: u64,
    },
    /// A hybrid query completed.
    QueryCompleted {
        query_id: String,
        dense_hits: usize,
        sparse_hits: usize,
        fused_hits: usize,
        elapsed_ms: u64,
    },
    /// Error occurred.
    Error { operation: String, error: String },
    /// Debug information.
    Debug { operation: String, details: String },
}

/// Trait for handling progress events.
pub trait ProgressHandler: Send + Sync {
    fn handle_progress(&self, event: ProgressEvent);
}

/// Console progress handler that outputs to stdout with pipeline stage tags.
pub struct ConsoleProgressHandler {
    pub show_progress: bool,
    pub show_debug: bool,
}

impl ConsoleProgressHandler {
    pub fn new() -> Self {
        Self {
            show_progress: true,
            show_debug: false,
        }
    }

    pub fn quiet() -> Self {
        Self {
            show_progress: false,
            show_debug: false,
        }
    }

    pub fn verbose() -> Self {
        Self {
            show_progress: true,
            show_debug: true,
        }
    }

    fn format_message(&self, tag: &str, message: &str) -> String {
        format!("[{}] {}", tag, message)
    }
}

impl Default for ConsoleProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for ConsoleProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => {
                if self.show_progress {
                    println!("{}", self.format_message("stage", &format!("{} started", stage)));
                }
            }
            ProgressEvent::StageSkipped { stage } => {
                if self.show_progress {
                    println!(
                        "{}",
                        self.format_message("stage", &format!("{} skipped (up to date)", stage))
                    );
                }
            }
            ProgressEvent::StageCompleted { stage, elapsed_ms } => {
                if self.show_progress {
                    println!(
                        "{}",
                        self.format_message("stage", &format!("{} completed in {}ms", stage, elapsed_ms))
                    );
                }
            }
            ProgressEvent::PageEmitted { page_id, title } => {
                if self.show_debug {
                    println!(
                        "{}",
                        self.format_message("parse", &format!("page {} \"{}\"", page_id, title))
                    );
                }
            }
            ProgressEvent::PageMalformed { offset, message } => {
                eprintln!(
                    "{}",
                    self.format_message("parse", &format!("skipped malformed page at {}: {}", offset, message))
                );
            }
            ProgressEvent::CheckpointWritten {
                pages_processed,
                compressed_bytes_read,
            } => {
                if self.show_progress {
                    println!(
                        "{}",
                        self.format_message(
                            "checkpoint",
                            &format!("{} pages, {} compressed bytes read", pages_processed, compressed_bytes_read)
                        )
                    );
                }
            }
            ProgressEvent::ResumeDecision { resumed, reason } => {
                if self.show_progress {
                    let verb = if resumed { "resuming" } else { "starting fresh" };
                    println!("{}", self.format_message("checkpoint", &format!("{}: {}", verb, reason)));
                }
            }
            ProgressEvent::BuilderProgress { documents_indexed } => {
                if self.show_debug {
                    println!(
                        "{}",
                        self.format_message("bm25", &format!("{} documents indexed", documents_indexed))
                    );
                }
            }
            ProgressEvent::RetryAttempt {
                operation,
                attempt,
                max_attempts,
                delay_ms,
            } => {
                if self.show_progress {
                    println!(
                        "{}",
                        self.format_message(
                            "retry",
                            &format!(
                                "{} failed (attempt {}/{}), retrying in {}ms",
                                operation, attempt, max_attempts, delay_ms
                            )
                        )
                    );
                }
            }
            ProgressEvent::QueryCompleted {
                query_id,
                dense_hits,
                sparse_hits,
                fused_hits,
                elapsed_ms,
            } => {
                if self.show_progress {
                    println!(
                        "{}",
                        self.format_message(
                            "query",
                            &format!(
                                "{} -- dense={} sparse={} fused={} ({}ms)",
                                query_id, dense_hits, sparse_hits, fused_hits, elapsed_ms
                            )
                        )
                    );
                }
            }
            ProgressEvent::Error { operation, error } => {
                eprintln!("{}", self.format_message("error", &format!("{}: {}", operation, error)));
            }
            ProgressEvent::Debug { operation, details } => {
                if self.show_debug {
                    println!("{}", self.format_message("debug", &format!("{}: {}", operation, details)));
                }
            }
        }
    }
}

/// Silent progress handler that does nothing.
pub struct SilentProgressHandler;

impl ProgressHandler for SilentProgressHandler {
    fn handle_progress(&self, _event: ProgressEvent) {}
}

/// Logger that integrates with the standard `log` crate.
pub struct LogProgressHandler;

impl ProgressHandler for LogProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => log::info!("stage {} started", stage),
            ProgressEvent::StageSkipped { stage } => log::info!("stage {} skipped (up to date)", stage),
            ProgressEvent::StageCompleted { stage, elapsed_ms } => {
                log::info!("stage {} completed in {}ms", stage, elapsed_ms)
            }
            ProgressEvent::PageEmitted { page_id, title } => {
                log::trace!("page {} \"{}\" emitted", page_id, title)
            }
            ProgressEvent::PageMalformed { offset, message } => {
                log::warn!("malformed page at {}: {}", offset, message)
            }
            ProgressEvent::CheckpointWritten {
                pages_processed,
                compressed_bytes_read,
            } => log::debug!(
                "checkpoint written: {} pages, {} compressed bytes",
                pages_processed,
                compressed_bytes_read
            ),
            ProgressEvent::ResumeDecision { resumed, reason } => {
                log::info!("resume decision: resumed={} reason={}", resumed, reason)
            }
            ProgressEvent::BuilderProgress { documents_indexed } => {
                log::debug!("bm25 builder: {} documents indexed", documents_indexed)
            }
            ProgressEvent::RetryAttempt {
                operation,
                attempt,
                max_attempts,
                delay_ms,
            } => log::warn!(
                "retry {}/{} for {}, waiting {}ms",
                attempt,
                max_attempts,
                operation,
                delay_ms
            ),
            ProgressEvent::QueryCompleted {
                query_id,
                dense_hits,
                sparse_hits,
                fused_hits,
                elapsed_ms,
            } => log::info!(
                "query {} completed: dense={} sparse={} fused={} ({}ms)",
                query_id,
                dense_hits,
                sparse_hits,
                fused_hits,
                elapsed_ms
            ),
            ProgressEvent::Error { operation, error } => log::error!("{}: {}", operation, error),
            ProgressEvent::Debug { operation, details } => log::debug!("{}: {}", operation, details),
        }
    }
}

/// Global progress handler.
static PROGRESS_HANDLER: std::sync::OnceLock<Arc<dyn ProgressHandler>> = std::sync::OnceLock::new();

/// Initialize the global progress handler. Only the first call takes effect.
pub fn init_progress_handler(handler: Arc<dyn ProgressHandler>) {
    let _ = PROGRESS_HANDLER.set(handler);
}

fn get_progress_handler() -> Arc<dyn ProgressHandler> {
    PROGRESS_HANDLER
        .get_or_init(|| Arc::new(ConsoleProgressHandler::new()))
        .clone()
}

/// Report a progress event to the installed handler.
pub fn report_progress(event: ProgressEvent) {
    get_progress_handler().handle_progress(event);
}

#[macro_export]
macro_rules! progress_info {
    ($($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Debug {
            operation: "info".to_string(),
            details: format!($($arg)*),
        });
    };
}

#[macro_export]
macro_rules! progress_debug {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Debug {
            operation: $operation.to_string(),
            details: format!($($arg)*),
        });
    };
}

#[macro_export]
macro_rules! progress_error {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Error {
            operation: $operation.to_string(),
            error: format!($($arg)*),
        });
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_handler_formatting() {
        let handler = ConsoleProgressHandler::new();
        let message = handler.format_message("stage", "Test message");
        assert!(message.contains("[stage]"));
        assert!(message.contains("Test message"));
    }

    #[test]
    fn test_progress_events_do_not_panic() {
        let handler = ConsoleProgressHandler::quiet();
        handler.handle_progress(ProgressEvent::StageStarted {
            stage: "chunk".to_string(),
        });
        handler.handle_progress(ProgressEvent::PageMalformed {
            offset: 42,
            message: "unexpected eof".to_string(),
        });
    }
}
