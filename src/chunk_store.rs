//! Chunk store: O(1) `get(chunk_id)` over `chunks.jsonl`.
//!
//! An in-memory byte-offset array is built once at load by scanning the
//! file linearly, after which every lookup is a single seek + read of one
//! line.
//!
//! `ChunkStore` is a trait with exactly one implementation in this crate
//! (`JsonlChunkStore`); the trait boundary leaves room for a future
//! block-compressed text store without touching any caller's contract.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::data::{Chunk, ChunkRecord};
use crate::exceptions::{PocketWikiError, PocketWikiResult};

pub trait ChunkStore: Send + Sync {
    fn get(&self, chunk_id: u64) -> PocketWikiResult<ChunkRecord>;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `chunks.jsonl`-backed chunk store: one `Chunk` JSON object per line,
/// in `chunk_id` order (the invariant the Packager's manifest depends on).
pub struct JsonlChunkStore {
    path: std::path::PathBuf,
    /// `offsets[chunk_id]` is the byte offset of that line's start.
    offsets: Vec<u64>,
}

impl JsonlChunkStore {
    /// Scan `path` once, recording the start offset of every line.
    pub fn open(path: &Path) -> PocketWikiResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut offsets = Vec::new();
        let mut pos: u64 = 0;
        let mut line = Vec::new();
        loop {
            line.clear();
            offsets.push(pos);
            let n = read_line_bytes(&mut reader, &mut line)?;
            if n == 0 {
                offsets.pop(); // no trailing empty record past EOF
                break;
            }
            pos += n as u64;
        }
        Ok(Self {
            path: path.to_path_buf(),
            offsets,
        })
    }

    fn read_chunk_at(&self, offset: u64) -> PocketWikiResult<Chunk> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        serde_json::from_str(line.trim_end()).map_err(PocketWikiError::Json)
    }
}

impl ChunkStore for JsonlChunkStore {
    fn get(&self, chunk_id: u64) -> PocketWikiResult<ChunkRecord> {
        let offset = *self
            .offsets
            .get(chunk_id as usize)
            .ok_or_else(|| PocketWikiError::ExternalFailure {
                collaborator: "chunk_store".to_string(),
                source: anyhow::anyhow!("chunk_id {chunk_id} out of range"),
            })?;
        let chunk = self.read_chunk_at(offset)?;
        Ok(ChunkRecord {
            page_id: chunk.page_id,
            page_title: chunk.page_title,
            text: chunk.text,
        })
    }

    fn len(&self) -> u64 {
        self.offsets.len() as u64
    }
}

fn read_line_bytes<R: Read>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> PocketWikiResult<usize> {
    use std::io::BufRead as _;
    Ok(reader.read_until(b'\n', buf)?)
}

/// Append-only writer used by the chunking/filter stage to build
/// `chunks.jsonl` one line at a time.
pub struct JsonlChunkWriter {
    file: std::io::BufWriter<File>,
    bytes_written: u64,
}

impl JsonlChunkWriter {
    pub fn create_or_append(path: &Path, append: bool) -> PocketWikiResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        let bytes_written = if append { file.metadata()?.len() } else { 0 };
        Ok(Self {
            file: std::io::BufWriter::new(file),
            bytes_written,
        })
    }

    pub fn write_chunk(&mut self, chunk: &Chunk) -> PocketWikiResult<()> {
        use std::io::Write;
        let mut line = serde_json::to_vec(chunk)?;
        line.push(b'\n');
        self.bytes_written += line.len() as u64;
        self.file.write_all(&line)?;
        Ok(())
    }

    pub fn flush(&mut self) -> PocketWikiResult<()> {
        use std::io::Write;
        self.file.flush()?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_chunk(id: u64) -> Chunk {
        Chunk {
            chunk_id: id,
            page_id: 1,
            page_title: "Page".to_string(),
            text: format!("chunk body {id}"),
            token_count: 3,
        }
    }

    #[test]
    fn writes_then_o1_lookups_every_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        {
            let mut writer = JsonlChunkWriter::create_or_append(&path, false).unwrap();
            for id in 0..5 {
                writer.write_chunk(&sample_chunk(id)).unwrap();
            }
            writer.flush().unwrap();
        }

        let store = JsonlChunkStore::open(&path).unwrap();
        assert_eq!(store.len(), 5);
        for id in 0..5 {
            let record = store.get(id).unwrap();
            assert_eq!(record.text, format!("chunk body {id}"));
        }
    }

    #[test]
    fn out_of_range_chunk_id_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        {
            let mut writer = JsonlChunkWriter::create_or_append(&path, false).unwrap();
            writer.write_chunk(&sample_chunk(0)).unwrap();
        }
        let store = JsonlChunkStore::open(&path).unwrap();
        assert!(store.get(99).is_err());
    }

    #[test]
    fn append_mode_preserves_prior_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        {
            let mut writer = JsonlChunkWriter::create_or_append(&path, false).unwrap();
            writer.write_chunk(&sample_chunk(0)).unwrap();
        }
        {
            let mut writer = JsonlChunkWriter::create_or_append(&path, true).unwrap();
            writer.write_chunk(&sample_chunk(1)).unwrap();
        }
        let store = JsonlChunkStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().text, "chunk body 1");
    }

    #[test]
    fn empty_file_yields_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(&path, b"").unwrap();
        let store = JsonlChunkStore::open(&path).unwrap();
        assert_eq!(store.len(), 0);
    }
}
