//! Checkpoint manager.
//!
//! Persists exactly one JSON record per streaming stage, owned exclusively
//! by this manager — no other writer touches the checkpoint file. Writes
//! go to `<path>.tmp`, are fsynced, then renamed over `<path>` so a reader
//! never observes a partial record.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::logging::{report_progress, ProgressEvent};

/// The durable checkpoint schema. Unknown keys on read are ignored by
/// `serde`'s default struct deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_url: String,
    pub source_etag: Option<String>,
    pub compressed_bytes_read: u64,
    pub pages_processed: u64,
    pub last_page_id: Option<u64>,
    pub last_page_title: Option<String>,
    pub output_file: String,
    pub output_bytes_written: u64,
    pub last_checkpoint_time: u64,
    pub checkpoint_version: u32,
    /// Hash of the stage's effective config at the time of this
    /// checkpoint (the final resume-decision check).
    pub config_hash: u64,
}

const CHECKPOINT_VERSION: u32 = 1;

impl Checkpoint {
    pub fn new(source_url: String, output_file: String, config_hash: u64) -> Self {
        Self {
            source_url,
            source_etag: None,
            compressed_bytes_read: 0,
            pages_processed: 0,
            last_page_id: None,
            last_page_title: None,
            output_file,
            output_bytes_written: 0,
            last_checkpoint_time: now_unix(),
            checkpoint_version: CHECKPOINT_VERSION,
            config_hash,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Decides when to flush a checkpoint and persists it atomically.
pub struct CheckpointManager {
    path: PathBuf,
    current: Checkpoint,
    pages_since_flush: u64,
    bytes_since_flush: u64,
    last_flush_at: std::time::Instant,
}

/// Outcome of [`CheckpointManager::resume`]: either a checkpoint to
/// continue from, or a signal to start fresh (and why).
pub enum ResumeDecision {
    Resume(Checkpoint),
    FreshStart { reason: String },
}

impl CheckpointManager {
    pub fn new(path: PathBuf, initial: Checkpoint) -> Self {
        Self {
            path,
            current: initial,
            pages_since_flush: 0,
            bytes_since_flush: 0,
            last_flush_at: std::time::Instant::now(),
        }
    }

    /// Evaluate the five-step resume decision. Any failing
    /// step discards the checkpoint and returns a fresh-start signal; the
    /// caller is responsible for truncating/removing the output file.
    pub fn resume(
        path: &Path,
        source_url: &str,
        source_etag: Option<&str>,
        validate_source_unchanged: bool,
        config_hash: u64,
    ) -> ResumeDecision {
        let fresh = |reason: &str| ResumeDecision::FreshStart {
            reason: reason.to_string(),
        };

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return fresh("no checkpoint file"),
        };
        let checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
            Ok(c) => c,
            Err(_) => return fresh("checkpoint did not parse"),
        };

        if checkpoint.source_url != source_url {
            return fresh("source_url does not match current configuration");
        }
        if validate_source_unchanged {
            if let (Some(expected), Some(actual)) =
                (source_etag, checkpoint.source_etag.as_deref())
            {
                if expected != actual {
                    return fresh("source ETag changed");
                }
            }
        }

        let output_path = Path::new(&checkpoint.output_file);
        match std::fs::metadata(output_path) {
            Ok(meta) if meta.len() >= checkpoint.output_bytes_written => {
                if meta.len() > checkpoint.output_bytes_written {
                    // Truncate any trailing partial record past the last
                    // checkpointed boundary.
                    if let Ok(file) = std::fs::OpenOptions::new().write(true).open(output_path) {
                        let _ = file.set_len(checkpoint.output_bytes_written);
                    }
                }
            }
            _ => return fresh("output file missing or shorter than checkpoint records"),
        }

        if checkpoint.config_hash != config_hash {
            return fresh("stage config changed");
        }

        ResumeDecision::Resume(checkpoint)
    }

    /// Record that `pages` new pages and `bytes` new compressed bytes were
    /// consumed, and flush if any trigger threshold is crossed.
    pub fn record_progress(
        &mut self,
        pages: u64,
        bytes: u64,
        last_page_id: u64,
        last_page_title: &str,
        compressed_bytes_read: u64,
        output_bytes_written: u64,
        every_pages: u64,
        every_bytes: u64,
        every_seconds: u64,
    ) -> PocketWikiResult<()> {
        self.pages_since_flush += pages;
        self.bytes_since_flush += bytes;
        self.current.pages_processed += pages;
        self.current.last_page_id = Some(last_page_id);
        self.current.last_page_title = Some(last_page_title.to_string());
        self.current.compressed_bytes_read = compressed_bytes_read;
        self.current.output_bytes_written = output_bytes_written;

        let elapsed = self.last_flush_at.elapsed().as_secs();
        if self.pages_since_flush >= every_pages
            || self.bytes_since_flush >= every_bytes
            || elapsed >= every_seconds
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Always write before surfacing a fatal error upward.
    pub fn flush(&mut self) -> PocketWikiResult<()> {
        self.current.last_checkpoint_time = now_unix();

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let bytes = serde_json::to_vec_pretty(&self.current)?;
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            use std::io::Write;
            file.write_all(&bytes)?;
            file.sync_all().map_err(PocketWikiError::Io)?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.pages_since_flush = 0;
        self.bytes_since_flush = 0;
        self.last_flush_at = std::time::Instant::now();

        report_progress(ProgressEvent::CheckpointWritten {
            pages_processed: self.current.pages_processed,
            compressed_bytes_read: self.current.compressed_bytes_read,
        });
        Ok(())
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        self.current.source_etag = etag;
    }

    pub fn current(&self) -> &Checkpoint {
        &self.current
    }

    /// Remove the checkpoint file (explicit `force_restart`, or on stage
    /// success).
    pub fn delete(path: &Path) -> PocketWikiResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PocketWikiError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resume_fails_fresh_when_no_file_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let decision = CheckpointManager::resume(&path, "http://x", None, true, 1);
        assert!(matches!(decision, ResumeDecision::FreshStart { .. }));
    }

    #[test]
    fn resume_succeeds_when_all_five_checks_pass() {
        let dir = tempdir().unwrap();
        let checkpoint_path = dir.path().join("checkpoint.json");
        let output_path = dir.path().join("articles.jsonl");
        std::fs::write(&output_path, b"0123456789").unwrap();

        let mut checkpoint = Checkpoint::new(
            "http://example/dump.xml.bz2".to_string(),
            output_path.to_string_lossy().to_string(),
            42,
        );
        checkpoint.source_etag = Some("abc".to_string());
        checkpoint.output_bytes_written = 10;

        let mut manager = CheckpointManager::new(checkpoint_path.clone(), checkpoint);
        manager.flush().unwrap();

        let decision = CheckpointManager::resume(
            &checkpoint_path,
            "http://example/dump.xml.bz2",
            Some("abc"),
            true,
            42,
        );
        assert!(matches!(decision, ResumeDecision::Resume(_)));
    }

    #[test]
    fn etag_mismatch_forces_fresh_start() {
        let dir = tempdir().unwrap();
        let checkpoint_path = dir.path().join("checkpoint.json");
        let output_path = dir.path().join("articles.jsonl");
        std::fs::write(&output_path, b"data").unwrap();

        let mut checkpoint = Checkpoint::new(
            "http://example/dump.xml.bz2".to_string(),
            output_path.to_string_lossy().to_string(),
            7,
        );
        checkpoint.source_etag = Some("A".to_string());
        checkpoint.output_bytes_written = 4;
        let mut manager = CheckpointManager::new(checkpoint_path.clone(), checkpoint);
        manager.flush().unwrap();

        let decision = CheckpointManager::resume(
            &checkpoint_path,
            "http://example/dump.xml.bz2",
            Some("B"),
            true,
            7,
        );
        match decision {
            ResumeDecision::FreshStart { reason } => assert!(reason.contains("ETag")),
            _ => panic!("expected fresh start on ETag mismatch"),
        }
    }

    #[test]
    fn config_hash_mismatch_forces_fresh_start() {
        let dir = tempdir().unwrap();
        let checkpoint_path = dir.path().join("checkpoint.json");
        let output_path = dir.path().join("articles.jsonl");
        std::fs::write(&output_path, b"data").unwrap();

        let mut checkpoint =
            Checkpoint::new("http://x".to_string(), output_path.to_string_lossy().to_string(), 1);
        checkpoint.output_bytes_written = 4;
        let mut manager = CheckpointManager::new(checkpoint_path.clone(), checkpoint);
        manager.flush().unwrap();

        let decision = CheckpointManager::resume(&checkpoint_path, "http://x", None, true, 2);
        assert!(matches!(decision, ResumeDecision::FreshStart { .. }));
    }

    #[test]
    fn flush_is_atomic_via_tmp_and_rename() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = Checkpoint::new("http://x".to_string(), "out.jsonl".to_string(), 1);
        let mut manager = CheckpointManager::new(path.clone(), checkpoint);
        manager.flush().unwrap();

        assert!(path.exists());
        let tmp_path_str = format!("{}.tmp", path.display());
        assert!(!Path::new(&tmp_path_str).exists());
    }

    #[test]
    fn unknown_json_keys_are_ignored_on_read() {
        let json = serde_json::json!({
            "source_url": "http://x",
            "source_etag": null,
            "compressed_bytes_read": 0,
            "pages_processed": 0,
            "last_page_id": null,
            "last_page_title": null,
            "output_file": "out.jsonl",
            "output_bytes_written": 0,
            "last_checkpoint_time": 0,
            "checkpoint_version": 1,
            "config_hash": 1,
            "future_field_from_a_newer_version": "ignored",
        });
        let checkpoint: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(checkpoint.source_url, "http://x");
    }
}
