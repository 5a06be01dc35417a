//! Pipe broker (component C): rendezvous one writer with one or more
//! readers on a shared path and proxy bytes between them with
//! cancellation propagation.
//!
//! Simple mode lives in this module; 1-to-N fan-out mode lives in
//! [`fanout`]. Both share the same [`PipeError`] taxonomy and the same
//! cancellation-aware copy discipline: every chunk transfer checks the
//! pipe's [`CancellationToken`] before it is forwarded, mirroring the
//! `context.Context`-checked reader/writer wrappers in the original
//! implementation's `contextio` package.

pub mod fanout;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Bytes;
use dashmap::DashMap;
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("duplicate reader on this path")]
    DuplicateReader,
    #[error("duplicate writer on this path")]
    DuplicateWriter,
    #[error("transfer was cancelled")]
    Cancelled,
}

/// Header metadata the writer contributes, reflected onto the reader's
/// response once the writer connects.
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    pub content_type: Option<String>,
}

/// Body chunk stream item handed from writer to reader.
pub type Chunk = Result<Bytes, std::io::Error>;

/// The payload posted to `handoff`: the reader's channels, ready for
/// the writer to push header metadata and body bytes into.
pub struct Handoff {
    pub body_tx: mpsc::Sender<Chunk>,
    pub header_tx: oneshot::Sender<HeaderInfo>,
}

struct Pipe {
    reader_connected: AtomicBool,
    writer_connected: AtomicBool,
    cancel: CancellationToken,
    handoff_tx: Mutex<Option<oneshot::Sender<Handoff>>>,
    handoff_rx: Mutex<Option<oneshot::Receiver<Handoff>>>,
}

impl Pipe {
    fn new() -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            reader_connected: AtomicBool::new(false),
            writer_connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handoff_tx: Mutex::new(Some(tx)),
            handoff_rx: Mutex::new(Some(rx)),
        })
    }
}

/// Map from path to in-flight pipe rendezvous record, for simple mode.
#[derive(Default)]
pub struct PipeRegistry {
    pipes: DashMap<String, Arc<Pipe>>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, path: &str) -> Arc<Pipe> {
        self.pipes
            .entry(path.to_string())
            .or_insert_with(Pipe::new)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.pipes.len()
    }

    fn remove(&self, path: &str) {
        self.pipes.remove(path);
    }
}

/// Drops fire cancellation and delete the pipe record, whichever side
/// disconnects first — mirrors the teacher's RAII terminal-restore
/// guard, applied here to rendezvous cleanup instead.
pub struct ReaderGuard {
    registry: Arc<PipeRegistry>,
    path: String,
    pipe: Arc<Pipe>,
    done: bool,
}

impl ReaderGuard {
    pub fn finish(mut self) {
        self.done = true;
        self.pipe.cancel.cancel();
        self.registry.remove(&self.path);
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if !self.done {
            self.pipe.cancel.cancel();
            self.registry.remove(&self.path);
        }
    }
}

pub struct WriterGuard {
    registry: Arc<PipeRegistry>,
    path: String,
    pipe: Arc<Pipe>,
    done: bool,
}

impl WriterGuard {
    pub fn finish(mut self) {
        self.done = true;
        self.registry.remove(&self.path);
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if !self.done {
            self.pipe.cancel.cancel();
            self.registry.remove(&self.path);
        }
    }
}

/// Register as the reader on `path`. Returns the header receiver (the
/// writer's `Content-Type` arrives here once it connects), the body
/// stream, and a guard whose drop fires cancellation.
pub async fn accept_reader(
    registry: Arc<PipeRegistry>,
    path: String,
) -> Result<(oneshot::Receiver<HeaderInfo>, mpsc::Receiver<Chunk>, ReaderGuard), PipeError> {
    let pipe = registry.get_or_create(&path);
    if pipe.reader_connected.swap(true, Ordering::SeqCst) {
        return Err(PipeError::DuplicateReader);
    }

    let (body_tx, body_rx) = mpsc::channel(16);
    let (header_tx, header_rx) = oneshot::channel();

    let slot = pipe.handoff_tx.lock().await.take();
    match slot {
        Some(tx) => {
            // Writer may already be waiting; ignore a dropped receiver,
            // the writer side will observe cancellation on its own.
            let _ = tx.send(Handoff { body_tx, header_tx });
        }
        None => {
            // Someone already consumed the handoff slot; this path was
            // reused after a completed rendezvous without cleanup.
            return Err(PipeError::DuplicateReader);
        }
    }

    let guard = ReaderGuard {
        registry,
        path,
        pipe,
        done: false,
    };
    Ok((header_rx, body_rx, guard))
}

/// Register as the writer on `path`. Blocks until a reader connects or
/// the pipe is cancelled, then returns the handoff payload to stream
/// into.
pub async fn accept_writer(
    registry: Arc<PipeRegistry>,
    path: String,
) -> Result<(Handoff, CancellationToken, WriterGuard), PipeError> {
    let pipe = registry.get_or_create(&path);
    if pipe.writer_connected.swap(true, Ordering::SeqCst) {
        return Err(PipeError::DuplicateWriter);
    }

    let rx = pipe.handoff_rx.lock().await.take();
    let Some(rx) = rx else {
        return Err(PipeError::DuplicateWriter);
    };

    let handoff = tokio::select! {
        res = rx => res.map_err(|_| PipeError::Cancelled)?,
        () = pipe.cancel.cancelled() => return Err(PipeError::Cancelled),
    };

    let cancel = pipe.cancel.clone();
    let guard = WriterGuard {
        registry,
        path,
        pipe,
        done: false,
    };
    Ok((handoff, cancel, guard))
}

/// Copy `body` into `body_tx` in <=1KiB chunks, checking `cancel`
/// before each one. On cancellation an I/O error is pushed to the
/// reader and `PipeError::Cancelled` is returned to the writer.
pub async fn copy_cancelable(
    mut body: axum::body::BodyDataStream,
    body_tx: &mpsc::Sender<Chunk>,
    cancel: &CancellationToken,
) -> Result<u64, PipeError> {
    use futures_util::StreamExt;

    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            let _ = body_tx
                .send(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "pipe cancelled",
                )))
                .await;
            return Err(PipeError::Cancelled);
        }

        tokio::select! {
            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        total += bytes.len() as u64;
                        if body_tx.send(Ok(bytes)).await.is_err() {
                            cancel.cancel();
                            return Err(PipeError::Cancelled);
                        }
                    }
                    Some(Err(err)) => {
                        let io_err = std::io::Error::new(std::io::ErrorKind::Other, err);
                        let _ = body_tx.send(Err(io_err)).await;
                        cancel.cancel();
                        return Err(PipeError::Cancelled);
                    }
                    None => return Ok(total),
                }
            }
            () = cancel.cancelled() => {
                let _ = body_tx
                    .send(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "pipe cancelled",
                    )))
                    .await;
                return Err(PipeError::Cancelled);
            }
        }
    }
}

/// Ties a body stream to a cleanup guard (a [`ReaderGuard`] or a
/// [`fanout::ReceiverGuard`]) so the pipe is torn down the moment the
/// stream itself is dropped, whether that is a clean end or the
/// client going away mid-transfer — not when the handler function
/// that built the response returns, which happens long before either.
pub struct GuardedStream<S, G> {
    inner: S,
    _guard: G,
}

impl<S, G> GuardedStream<S, G> {
    pub fn new(inner: S, guard: G) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl<S: Stream + Unpin, G: Unpin> Stream for GuardedStream<S, G> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_reader_on_same_path_is_rejected() {
        let registry = Arc::new(PipeRegistry::new());
        let (_h, _b, _guard) = accept_reader(registry.clone(), "/p/x".into())
            .await
            .unwrap();
        let err = accept_reader(registry.clone(), "/p/x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::DuplicateReader));
    }

    #[tokio::test]
    async fn second_writer_on_same_path_is_rejected() {
        let registry = Arc::new(PipeRegistry::new());
        let registry2 = registry.clone();
        tokio::spawn(async move {
            let _ = accept_writer(registry2, "/p/y".into()).await;
        });
        tokio::task::yield_now().await;
        let err = accept_writer(registry.clone(), "/p/y".into())
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::DuplicateWriter));
    }

    #[tokio::test]
    async fn writer_body_reaches_reader_in_order() {
        let registry = Arc::new(PipeRegistry::new());

        let reader_registry = registry.clone();
        let reader = tokio::spawn(async move {
            let (header_rx, body_rx, guard) =
                accept_reader(reader_registry, "/p/z".into()).await.unwrap();
            let header = header_rx.await.unwrap();
            let mut body_rx = body_rx;
            let mut collected = Vec::new();
            while let Some(chunk) = body_rx.recv().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            guard.finish();
            (header, collected)
        });

        tokio::task::yield_now().await;

        let writer_registry = registry.clone();
        let (handoff, cancel, guard) = accept_writer(writer_registry, "/p/z".into())
            .await
            .unwrap();
        handoff
            .header_tx
            .send(HeaderInfo {
                content_type: Some("text/plain".into()),
            })
            .unwrap();
        handoff.body_tx.send(Ok(Bytes::from("ping\n"))).await.unwrap();
        drop(handoff.body_tx);
        drop(cancel);
        guard.finish();

        let (header, collected) = reader.await.unwrap();
        assert_eq!(header.content_type.as_deref(), Some("text/plain"));
        assert_eq!(collected, b"ping\n");
        assert_eq!(registry.count(), 0);
    }
}
