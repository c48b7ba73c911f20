//! Concurrent stdout/stderr draining.
//!
//! Each pipe is drained by its own task reading fixed-size chunks, so a
//! child that fills one pipe never blocks because the other is unread.
//! Chunks are handed to a [`ChunkHandler`] one at a time; the handler's
//! future is awaited before the next read, which pushes sink backpressure
//! back onto the pipe instead of buffering or dropping output.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use super::decoder::ChunkDecoder;
use crate::models::chunk::{OutputChunk, StreamKind};

/// Boxed future returned by [`ChunkHandler::on_chunk`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives every decoded chunk in per-stream order.
pub trait ChunkHandler: Send + Sync {
    /// Deliver one chunk. The drain does not read again until this
    /// future resolves.
    fn on_chunk(&self, chunk: OutputChunk) -> HandlerFuture<'_>;
}

/// Counters for one drained pipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Raw bytes read.
    pub bytes: u64,
    /// Chunks delivered (equals the next unused sequence number).
    pub chunks: u64,
    /// Replacement characters substituted for invalid UTF-8.
    pub replaced: u64,
    /// Read error that ended the drain early, if any.
    pub error: Option<String>,
}

/// Result of [`StreamMultiplexer::finish`].
#[derive(Debug, Clone, Default)]
pub struct DrainSummary {
    /// stdout counters.
    pub stdout: StreamStats,
    /// stderr counters.
    pub stderr: StreamStats,
    /// A drain did not reach EOF before the deadline and was aborted.
    pub truncated: bool,
}

impl DrainSummary {
    fn slot(&mut self, kind: StreamKind) -> &mut StreamStats {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }
}

/// Owns the drain tasks of one execution.
pub struct StreamMultiplexer {
    execution_id: String,
    chunk_size: usize,
    handler: Arc<dyn ChunkHandler>,
    drains: Vec<(StreamKind, JoinHandle<StreamStats>)>,
}

impl StreamMultiplexer {
    /// Create a multiplexer delivering to `handler`.
    #[must_use]
    pub fn new(execution_id: String, chunk_size: usize, handler: Arc<dyn ChunkHandler>) -> Self {
        Self {
            execution_id,
            chunk_size: chunk_size.max(1),
            handler,
            drains: Vec::with_capacity(2),
        }
    }

    /// Start draining `reader` as `kind`.
    pub fn attach<R>(&mut self, kind: StreamKind, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let span = info_span!(
            "stream_drain",
            execution_id = %self.execution_id,
            stream = kind.as_str()
        );
        let task = tokio::spawn(
            drain(
                self.execution_id.clone(),
                kind,
                reader,
                self.chunk_size,
                Arc::clone(&self.handler),
            )
            .instrument(span),
        );
        self.drains.push((kind, task));
    }

    /// Wait for every drain to reach EOF, aborting any still running
    /// after `timeout`.
    ///
    /// Once the process group is dead the pipes close and drains finish
    /// promptly; the timeout only matters when a descendant escaped the
    /// group and still holds a pipe open.
    pub async fn finish(self, timeout: Duration) -> DrainSummary {
        let started = tokio::time::Instant::now();
        let mut summary = DrainSummary::default();
        for (kind, mut task) in self.drains {
            let remaining = timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, &mut task).await {
                Ok(Ok(stats)) => *summary.slot(kind) = stats,
                Ok(Err(err)) => {
                    warn!(stream = kind.as_str(), %err, "drain task failed");
                    summary.slot(kind).error = Some(err.to_string());
                }
                Err(_elapsed) => {
                    warn!(
                        execution_id = %self.execution_id,
                        stream = kind.as_str(),
                        "drain did not reach EOF in time, aborting"
                    );
                    task.abort();
                    summary.truncated = true;
                }
            }
        }
        summary
    }
}

async fn drain<R>(
    execution_id: String,
    kind: StreamKind,
    mut reader: R,
    chunk_size: usize,
    handler: Arc<dyn ChunkHandler>,
) -> StreamStats
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; chunk_size];
    let mut decoder = ChunkDecoder::new();
    let mut stats = StreamStats::default();
    let mut seq: u64 = 0;

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(%err, "pipe read failed");
                stats.error = Some(err.to_string());
                break;
            }
        };
        stats.bytes += read as u64;

        let data = decoder.decode(&buf[..read]);
        if data.is_empty() {
            continue;
        }
        handler
            .on_chunk(OutputChunk {
                execution_id: execution_id.clone(),
                stream: kind,
                seq,
                data,
            })
            .await;
        seq += 1;
    }

    if let Some(data) = decoder.finish() {
        handler
            .on_chunk(OutputChunk {
                execution_id,
                stream: kind,
                seq,
                data,
            })
            .await;
        seq += 1;
    }

    stats.chunks = seq;
    stats.replaced = decoder.replaced();
    debug!(bytes = stats.bytes, chunks = stats.chunks, "stream reached EOF");
    stats
}
