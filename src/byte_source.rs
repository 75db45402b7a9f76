//! Resumable HTTP + bzip2 byte source.
//!
//! Produces a stream of decompressed bytes from either an `http(s)://` URL
//! (resumed via `Range` requests, validated against the stored `ETag`) or
//! a `file://` URL (resumed via a plain seek). Decompression runs on a
//! blocking thread driving a synchronous [`bzip2::read::MultiBzDecoder`];
//! the async reqwest body stream is bridged to that thread over a bounded
//! channel.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use bzip2::read::MultiBzDecoder;
use futures::StreamExt;
use url::Url;

use crate::config::ByteSourceConfig;
use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::logging::{report_progress, ProgressEvent};

/// Outcome of opening the source: whether the server honored the resume
/// request, and the `ETag` it reported (if any).
pub struct OpenOutcome {
    pub resumed: bool,
    pub etag: Option<String>,
}

/// A resumable, decompressed byte stream.
pub struct ByteSource {
    chunks: tokio::sync::mpsc::Receiver<io::Result<Vec<u8>>>,
    compressed_bytes_read: Arc<AtomicU64>,
    pub outcome: OpenOutcome,
}

impl ByteSource {
    /// Open `url` at compressed-byte `offset`, validating against
    /// `expected_etag` when `config.validate_source_unchanged` is set.
    #[tracing::instrument(skip(config), fields(url = %url, offset))]
    pub async fn open(
        url: &Url,
        offset: u64,
        expected_etag: Option<&str>,
        config: &ByteSourceConfig,
    ) -> PocketWikiResult<Self> {
        match url.scheme() {
            "http" | "https" => Self::open_http(url, offset, expected_etag, config).await,
            "file" => Self::open_file(url, offset),
            other => Err(PocketWikiError::ExternalFailure {
                collaborator: "byte_source".to_string(),
                source: anyhow::anyhow!("unsupported URL scheme: {other}"),
            }),
        }
    }

    async fn open_http(
        url: &Url,
        offset: u64,
        expected_etag: Option<&str>,
        config: &ByteSourceConfig,
    ) -> PocketWikiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(PocketWikiError::Http)?;

        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(config.initial_backoff_ms);

        loop {
            match Self::try_get(&client, url, offset, expected_etag, config).await {
                Ok(outcome_and_response) => {
                    let (outcome, response) = outcome_and_response;
                    return Ok(Self::spawn_http_pipeline(response, outcome, config));
                }
                Err(e) if e.is_retriable() && attempt < config.max_retries => {
                    attempt += 1;
                    report_progress(ProgressEvent::RetryAttempt {
                        operation: "byte_source.open".to_string(),
                        attempt: attempt as usize,
                        max_attempts: config.max_retries as usize,
                        delay_ms: backoff.as_millis() as u64,
                    });
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(
                        backoff * 2,
                        Duration::from_millis(config.max_backoff_ms),
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get(
        client: &reqwest::Client,
        url: &Url,
        offset: u64,
        expected_etag: Option<&str>,
        config: &ByteSourceConfig,
    ) -> PocketWikiResult<(OpenOutcome, reqwest::Response)> {
        let mut req = client.get(url.clone());
        if offset > 0 {
            req = req.header("Range", format!("bytes={offset}-"));
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                PocketWikiError::NetworkTransient {
                    url: url.to_string(),
                    offset,
                    source: anyhow::anyhow!(e),
                }
            } else {
                PocketWikiError::NetworkFatal {
                    url: url.to_string(),
                    source: anyhow::anyhow!(e),
                }
            }
        })?;

        let status = response.status();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if config.validate_source_unchanged {
            if let (Some(expected), Some(actual)) = (expected_etag, etag.as_deref()) {
                if expected != actual {
                    return Err(PocketWikiError::CheckpointMismatch {
                        path: std::path::PathBuf::from(url.as_str()),
                        reason: format!("ETag changed: expected {expected}, got {actual}"),
                    });
                }
            }
        }

        if status.as_u16() == 206 {
            return Ok((OpenOutcome { resumed: true, etag }, response));
        }
        if status.as_u16() == 200 {
            // Server ignored the Range header: a 200 when a non-zero
            // offset was requested forces a restart from zero.
            let resumed = offset == 0;
            return Ok((OpenOutcome { resumed, etag }, response));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(PocketWikiError::NetworkTransient {
                url: url.to_string(),
                offset,
                source: anyhow::anyhow!("HTTP {status}"),
            });
        }
        Err(PocketWikiError::NetworkFatal {
            url: url.to_string(),
            source: anyhow::anyhow!("HTTP {status}"),
        })
    }

    fn spawn_http_pipeline(
        response: reqwest::Response,
        outcome: OpenOutcome,
        config: &ByteSourceConfig,
    ) -> Self {
        let compressed_bytes_read = Arc::new(AtomicU64::new(0));
        let counter = compressed_bytes_read.clone();

        // Bridges the async response body to the synchronous decompressor
        // thread; bounded at a handful of network-chunk-sized buffers so a
        // slow decompressor applies backpressure to the HTTP read.
        let (raw_tx, raw_rx) = std::sync::mpsc::sync_channel::<io::Result<Bytes>>(4);
        let chunk_bytes = config.network_chunk_bytes;

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(item) = stream.next().await {
                let forwarded = match item {
                    Ok(bytes) => {
                        counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                        raw_tx.send(Ok(bytes))
                    }
                    Err(e) => raw_tx.send(Err(io::Error::new(io::ErrorKind::Other, e))),
                };
                if forwarded.is_err() {
                    break; // receiver dropped, nothing left to feed
                }
            }
        });

        let (out_tx, out_rx) = tokio::sync::mpsc::channel::<io::Result<Vec<u8>>>(4);
        tokio::task::spawn_blocking(move || {
            Self::decode_loop(ChannelReader::new(raw_rx), chunk_bytes, out_tx);
        });

        Self {
            chunks: out_rx,
            compressed_bytes_read,
            outcome,
        }
    }

    fn open_file(url: &Url, offset: u64) -> PocketWikiResult<Self> {
        let path = url
            .to_file_path()
            .map_err(|_| PocketWikiError::ExternalFailure {
                collaborator: "byte_source".to_string(),
                source: anyhow::anyhow!("invalid file:// URL: {url}"),
            })?;
        let mut file = std::fs::File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;

        let compressed_bytes_read = Arc::new(AtomicU64::new(0));
        let counter = compressed_bytes_read.clone();
        let (out_tx, out_rx) = tokio::sync::mpsc::channel::<io::Result<Vec<u8>>>(4);

        tokio::task::spawn_blocking(move || {
            Self::decode_loop(CountingReader::new(file, counter), 1024 * 1024, out_tx);
        });

        Ok(Self {
            chunks: out_rx,
            compressed_bytes_read,
            outcome: OpenOutcome {
                resumed: true,
                etag: None,
            },
        })
    }

    /// Runs on a blocking thread: pulls compressed bytes through a
    /// `MultiBzDecoder` and forwards fixed-size decompressed chunks.
    fn decode_loop<R: Read>(
        raw: R,
        chunk_bytes: usize,
        out_tx: tokio::sync::mpsc::Sender<io::Result<Vec<u8>>>,
    ) {
        let mut decoder = MultiBzDecoder::new(raw);
        let mut buf = vec![0u8; chunk_bytes];
        loop {
            match decoder.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = out_tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    }

    pub fn compressed_bytes_read(&self) -> u64 {
        self.compressed_bytes_read.load(Ordering::Relaxed)
    }

    /// A cheap clone of the running compressed-bytes-read counter, for a
    /// caller that hands the source itself off to another thread (the
    /// StreamParse stage moves the source into `BlockingByteReader` but
    /// still needs to read this counter for checkpoint bookkeeping).
    pub fn compressed_bytes_counter(&self) -> Arc<AtomicU64> {
        self.compressed_bytes_read.clone()
    }

    /// Pull the next chunk of decompressed bytes, or `None` at end of
    /// stream. Decompression/transport errors surface as
    /// [`PocketWikiError::DecompressionError`].
    pub async fn next_chunk(&mut self) -> PocketWikiResult<Option<Vec<u8>>> {
        match self.chunks.recv().await {
            None => Ok(None),
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => Err(PocketWikiError::DecompressionError {
                compressed_bytes_read: self.compressed_bytes_read(),
                message: e.to_string(),
            }),
        }
    }

    /// Synchronous sibling of [`Self::next_chunk`] for callers already
    /// running on a blocking thread (the Pipeline Driver's StreamParse
    /// stage drives the XML parser, which is a synchronous `BufRead`
    /// consumer, from inside `tokio::task::spawn_blocking`).
    pub fn blocking_next_chunk(&mut self) -> PocketWikiResult<Option<Vec<u8>>> {
        match self.chunks.blocking_recv() {
            None => Ok(None),
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => Err(PocketWikiError::DecompressionError {
                compressed_bytes_read: self.compressed_bytes_read(),
                message: e.to_string(),
            }),
        }
    }
}

/// Adapts [`ByteSource`] to `std::io::Read` for a synchronous consumer
/// (the XML parser's `BufRead` requirement) by blocking on the same
/// channel `next_chunk` polls asynchronously.
pub struct BlockingByteReader {
    source: ByteSource,
    current: Vec<u8>,
    pos: usize,
}

impl BlockingByteReader {
    pub fn new(source: ByteSource) -> Self {
        Self {
            source,
            current: Vec::new(),
            pos: 0,
        }
    }

    pub fn compressed_bytes_read(&self) -> u64 {
        self.source.compressed_bytes_read()
    }
}

impl Read for BlockingByteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.current.len() {
                let n = std::cmp::min(buf.len(), self.current.len() - self.pos);
                buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.source.blocking_next_chunk() {
                Ok(Some(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(None) => return Ok(0),
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
            }
        }
    }
}

/// Adapts a `std::sync::mpsc::Receiver<io::Result<Bytes>>` into a
/// synchronous `Read` for the bzip2 decoder running on its own thread.
struct ChannelReader {
    rx: std::sync::mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
    pos: usize,
}

impl ChannelReader {
    fn new(rx: std::sync::mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.current.len() {
                let n = std::cmp::min(buf.len(), self.current.len() - self.pos);
                buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(Ok(bytes)) => {
                    self.current = bytes;
                    self.pos = 0;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(0),
            }
        }
    }
}

/// Wraps a plain `Read` (the local `file://` case) and tracks bytes
/// consumed, mirroring the bookkeeping the HTTP path gets from its
/// channel bridge.
struct CountingReader<R: Read> {
    inner: R,
    counter: Arc<AtomicU64>,
}

impl<R: Read> CountingReader<R> {
    fn new(inner: R, counter: Arc<AtomicU64>) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;
        let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn file_source_decompresses_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.xml.bz2");
        let original = b"<mediawiki><page/></mediawiki>".repeat(100);
        std::fs::write(&path, compress(&original)).unwrap();

        let url = Url::from_file_path(&path).unwrap();
        let mut source = ByteSource::open_file(&url, 0).unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, original);
    }

    #[tokio::test]
    async fn file_source_resumes_from_byte_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.xml.bz2");
        let original = b"abcdefghij".repeat(1000);
        let compressed = compress(&original);
        std::fs::write(&path, &compressed).unwrap();

        // Resuming mid-compressed-stream on raw bzip2 isn't generally valid
        // (no block boundary guarantee), so this only exercises the file
        // seek plumbing at offset 0, matching the file source's contract.
        let url = Url::from_file_path(&path).unwrap();
        let mut source = ByteSource::open_file(&url, 0).unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, original);
    }
}
