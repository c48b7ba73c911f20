//! Stream draining: ordering, sequence numbers, UTF-8 carry and EOF.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use shellwire::models::chunk::{OutputChunk, StreamKind};
use shellwire::stream::decoder::ChunkDecoder;
use shellwire::stream::multiplexer::{ChunkHandler, HandlerFuture, StreamMultiplexer};

#[derive(Default)]
struct Collector {
    chunks: Mutex<Vec<OutputChunk>>,
    delay: Option<Duration>,
}

impl Collector {
    fn text(&self, stream: StreamKind) -> String {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|chunk| chunk.stream == stream)
            .map(|chunk| chunk.data.as_str())
            .collect()
    }

    fn seqs(&self, stream: StreamKind) -> Vec<u64> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|chunk| chunk.stream == stream)
            .map(|chunk| chunk.seq)
            .collect()
    }
}

impl ChunkHandler for Collector {
    fn on_chunk(&self, chunk: OutputChunk) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.chunks.lock().unwrap().push(chunk);
        })
    }
}

#[test]
fn decoder_replaces_invalid_bytes() {
    let mut decoder = ChunkDecoder::new();
    let text = decoder.decode(b"ok\xffok");
    assert_eq!(text, "ok\u{FFFD}ok");
    assert_eq!(decoder.replaced(), 1);
}

#[test]
fn decoder_flushes_truncated_tail_lossily() {
    let mut decoder = ChunkDecoder::new();
    let snowman = "☃".as_bytes();
    assert_eq!(decoder.decode(&snowman[..2]), "");
    assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
    assert!(decoder.finish().is_none());
}

#[tokio::test]
async fn both_streams_are_delivered_with_contiguous_seqs() {
    let collector = Arc::new(Collector::default());
    let mut mux = StreamMultiplexer::new("e1".into(), 4, collector.clone());
    mux.attach(StreamKind::Stdout, &b"hello world"[..]);
    mux.attach(StreamKind::Stderr, &b"oops"[..]);
    let summary = mux.finish(Duration::from_secs(2)).await;

    assert!(!summary.truncated);
    assert_eq!(collector.text(StreamKind::Stdout), "hello world");
    assert_eq!(collector.text(StreamKind::Stderr), "oops");
    assert_eq!(collector.seqs(StreamKind::Stdout), vec![0, 1, 2]);
    assert_eq!(collector.seqs(StreamKind::Stderr), vec![0]);
    assert_eq!(summary.stdout.bytes, 11);
    assert_eq!(summary.stdout.chunks, 3);
}

#[tokio::test]
async fn oversized_drain_timeout_is_accepted() {
    let collector = Arc::new(Collector::default());
    let mut mux = StreamMultiplexer::new("e1".into(), 8, collector.clone());
    mux.attach(StreamKind::Stdout, &b"done"[..]);
    let summary = mux.finish(Duration::MAX).await;

    assert!(!summary.truncated);
    assert_eq!(collector.text(StreamKind::Stdout), "done");
}

#[tokio::test]
async fn multibyte_characters_survive_small_chunks() {
    let text = "añb☃c😀d";
    let collector = Arc::new(Collector::default());
    let mut mux = StreamMultiplexer::new("e1".into(), 3, collector.clone());
    mux.attach(StreamKind::Stdout, text.as_bytes());
    let summary = mux.finish(Duration::from_secs(2)).await;

    assert_eq!(collector.text(StreamKind::Stdout), text);
    assert_eq!(summary.stdout.replaced, 0);
    let seqs = collector.seqs(StreamKind::Stdout);
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn slow_handler_loses_nothing() {
    let collector = Arc::new(Collector {
        chunks: Mutex::default(),
        delay: Some(Duration::from_millis(2)),
    });
    let payload = "x".repeat(64 * 1024);
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut mux = StreamMultiplexer::new("e1".into(), 512, collector.clone());
    mux.attach(StreamKind::Stdout, reader);

    let written = payload.clone();
    let producer = tokio::spawn(async move {
        writer.write_all(written.as_bytes()).await.unwrap();
    });
    producer.await.unwrap();
    let summary = mux.finish(Duration::from_secs(10)).await;

    assert_eq!(collector.text(StreamKind::Stdout), payload);
    assert_eq!(summary.stdout.bytes, payload.len() as u64);
}

#[tokio::test]
async fn drain_that_never_sees_eof_is_aborted() {
    let collector = Arc::new(Collector::default());
    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(b"partial").await.unwrap();
    let mut mux = StreamMultiplexer::new("e1".into(), 16, collector.clone());
    mux.attach(StreamKind::Stdout, reader);

    let summary = mux.finish(Duration::from_millis(200)).await;
    assert!(summary.truncated);
    assert_eq!(collector.text(StreamKind::Stdout), "partial");
    drop(writer);
}
