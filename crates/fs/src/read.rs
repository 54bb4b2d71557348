//! Random-access reads over immutable object content.
//!
//! A handle pins the generation observed at open time, so every block it
//! fetches comes from the same object version even if the key is
//! overwritten mid-read. Two caching modes, chosen by whether the decoded
//! length is known:
//!
//! - known length: block-aligned read-ahead windows fetched with `Range`
//!   requests, one window cached at a time;
//! - unknown length (compressed-at-rest objects the server transcodes):
//!   one forward-growing run is cached with the same hit/partial/miss
//!   shape, but bounds are never clamped to a total size; a read-to-end
//!   issues an open-ended fetch and learns the length by draining the
//!   stream.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::client::GcsClient;
use crate::error::GcsError;
use crate::record::ObjectRecord;

/// Read window for a request at `offset` of `len` bytes: the requested
/// span widened to the read-ahead size and clamped to the object, as an
/// inclusive byte range. `None` when the request starts at or past EOF.
fn block_window(offset: u64, len: usize, block_size: usize, size: u64) -> Option<(u64, u64)> {
    if offset >= size || len == 0 {
        return None;
    }
    let want = (len as u64).max(block_size as u64);
    let end = offset.saturating_add(want).min(size) - 1;
    Some((offset, end))
}

enum ReadCache {
    /// One cached window of a known-length object.
    Blocked { start: u64, data: Bytes },
    /// One cached run of an unknown-length stream. A new fetch replaces
    /// the run; no holes are filled.
    Streamed { start: u64, data: Bytes },
}

pub struct ReadHandle {
    client: GcsClient,
    record: ObjectRecord,
    block_size: usize,
    pos: u64,
    cache: ReadCache,
}

impl ReadHandle {
    pub(crate) fn new(client: GcsClient, record: ObjectRecord) -> Self {
        let block_size = client.config().effective_block_size();
        let cache = if record.size.is_some() {
            ReadCache::Blocked {
                start: 0,
                data: Bytes::new(),
            }
        } else {
            ReadCache::Streamed {
                start: 0,
                data: Bytes::new(),
            }
        };
        Self {
            client,
            record,
            block_size,
            pos: 0,
            cache,
        }
    }

    /// Decoded length, if known. Unknown until EOF for transcoded objects.
    pub fn size(&self) -> Option<u64> {
        self.record.size
    }

    pub fn record(&self) -> &ObjectRecord {
        &self.record
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Read up to `len` bytes at the current position and advance by the
    /// amount returned. An empty result means EOF.
    pub async fn read(&mut self, len: usize) -> Result<Bytes, GcsError> {
        let chunk = self.read_at(self.pos, len).await?;
        self.pos += chunk.len() as u64;
        Ok(chunk)
    }

    /// Positional read; does not move the handle's position.
    pub async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes, GcsError> {
        match &self.cache {
            ReadCache::Blocked { .. } => self.read_blocked(offset, len).await,
            ReadCache::Streamed { start, data } => {
                let (run_start, run) = (*start, data.clone());
                self.read_streamed(run_start, run, offset, len).await
            }
        }
    }

    /// Read everything from the current position to EOF.
    pub async fn read_to_end(&mut self) -> Result<Bytes, GcsError> {
        match &self.cache {
            ReadCache::Streamed { start, data } => {
                let (run_start, run) = (*start, data.clone());
                let out = self.drain_streamed(run_start, run).await?;
                self.pos += out.len() as u64;
                Ok(out)
            }
            ReadCache::Blocked { .. } => {
                let size = self.record.size.unwrap_or(0);
                let len = size.saturating_sub(self.pos) as usize;
                self.read(len).await
            }
        }
    }

    async fn read_blocked(&mut self, offset: u64, len: usize) -> Result<Bytes, GcsError> {
        let size = self.record.size.unwrap_or(0);
        let Some((want_start, want_end)) = block_window(offset, len, self.block_size, size) else {
            return Ok(Bytes::new());
        };

        let served_end = offset + (len as u64).min(size - offset);
        if let ReadCache::Blocked { start, data } = &self.cache {
            let cached_end = start + data.len() as u64;
            if *start <= offset && served_end <= cached_end {
                let lo = (offset - start) as usize;
                let hi = (served_end - start) as usize;
                return Ok(data.slice(lo..hi));
            }
        }

        debug!(
            name = %self.record.name,
            start = want_start,
            end = want_end,
            "fetching read block"
        );
        let response = self
            .client
            .download(
                &self.record.bucket,
                &self.record.key,
                self.record.generation.as_deref(),
                Some((want_start, Some(want_end))),
            )
            .await?;
        let data = response.body;
        let served = data.slice(..((served_end - offset) as usize).min(data.len()));
        self.cache = ReadCache::Blocked {
            start: want_start,
            data,
        };
        Ok(served)
    }

    /// Explicit-range read over the streamed run: full hit served from
    /// the run, a partial hit keeps the cached suffix and fetches only
    /// beyond it, a miss replaces the run. Server digests describe the
    /// stored encoded bytes, not what we receive, so no integrity check
    /// applies here.
    async fn read_streamed(
        &mut self,
        run_start: u64,
        run: Bytes,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, GcsError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut end = offset + len as u64;
        if let Some(size) = self.record.size {
            if offset >= size {
                return Ok(Bytes::new());
            }
            end = end.min(size);
        }
        let run_end = run_start + run.len() as u64;

        if offset >= run_start && end <= run_end {
            let lo = (offset - run_start) as usize;
            let hi = (end - run_start) as usize;
            return Ok(run.slice(lo..hi));
        }

        let (part, fetch_start) = if offset >= run_start && offset < run_end {
            (run.slice((offset - run_start) as usize..), run_end)
        } else {
            (Bytes::new(), offset)
        };

        let mut fetch_end = end + self.block_size as u64;
        if let Some(size) = self.record.size {
            fetch_end = fetch_end.min(size);
        }
        debug!(
            name = %self.record.name,
            start = fetch_start,
            end = fetch_end,
            "fetching stream run"
        );
        let response = self
            .client
            .download(
                &self.record.bucket,
                &self.record.key,
                self.record.generation.as_deref(),
                Some((fetch_start, Some(fetch_end - 1))),
            )
            .await?;
        let data = response.body;
        let wanted = (end - fetch_start) as usize;
        let served = data.slice(..wanted.min(data.len()));
        self.cache = ReadCache::Streamed {
            start: fetch_start,
            data,
        };
        Ok(concat(part, served))
    }

    /// Open-ended fetch from the current position, reusing any cached
    /// prefix. Draining the stream is the only way to learn the decoded
    /// length, so `size` becomes known here.
    async fn drain_streamed(&mut self, run_start: u64, run: Bytes) -> Result<Bytes, GcsError> {
        let run_end = run_start + run.len() as u64;
        let (part, fetch_start) = if self.pos >= run_start && self.pos < run_end {
            (run.slice((self.pos - run_start) as usize..), run_end)
        } else {
            (Bytes::new(), self.pos)
        };

        let response = self
            .client
            .download(
                &self.record.bucket,
                &self.record.key,
                self.record.generation.as_deref(),
                Some((fetch_start, None)),
            )
            .await?;
        let tail = response.body;
        if response.status.is_success() {
            self.record.size = Some(fetch_start + tail.len() as u64);
        }
        self.cache = ReadCache::Streamed {
            start: fetch_start,
            data: tail.clone(),
        };
        Ok(concat(part, tail))
    }
}

fn concat(head: Bytes, tail: Bytes) -> Bytes {
    if head.is_empty() {
        return tail;
    }
    if tail.is_empty() {
        return head;
    }
    let mut out = BytesMut::with_capacity(head.len() + tail.len());
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    out.freeze()
}

impl std::fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle")
            .field("name", &self.record.name)
            .field("pos", &self.pos)
            .field("size", &self.record.size)
            .finish()
    }
}
