//! 1-to-N fan-out pipe mode, selected by the `?n=<int>` query
//! parameter. A single sender's body is mirrored to up to `n`
//! receivers once all of them have connected; receiver disconnects
//! and completions are narrated back to the sender as `[INFO]` lines,
//! matching the original `piping.go` fan-out handler this mode is
//! ported from.

use std::sync::Arc;

use axum::body::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::Chunk;

/// Content-Type/Content-Disposition forwarded from the sender's body
/// (or, for a multipart body, its first part) to every receiver —
/// mirrors the headers `runPipe` in the original copies onto each
/// receiver's response.
#[derive(Debug, Clone, Default)]
pub struct PartHeaders {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("n must be a positive integer")]
    InvalidN,
    #[error("n does not match the sender's advertised receiver count")]
    Mismatch,
    #[error("duplicate sender on this path")]
    DuplicateSender,
    #[error("receiver count exceeds n")]
    OverSubscribed,
}

/// A receiver's leg of the fan-out: an outgoing byte channel plus the
/// cancellation it inherits from its own HTTP connection.
struct ReceiverSlot {
    id: u64,
    body_tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
}

struct FanoutPipe {
    n: usize,
    sender_present: bool,
    sender_info_tx: Option<mpsc::Sender<Bytes>>,
    receivers: Vec<ReceiverSlot>,
    next_receiver_id: u64,
    started: bool,
    completed: usize,
    aborted: usize,
    headers: Option<PartHeaders>,
    header_waiters: Vec<oneshot::Sender<PartHeaders>>,
}

impl FanoutPipe {
    fn new(n: usize) -> Self {
        Self {
            n,
            sender_present: false,
            sender_info_tx: None,
            receivers: Vec::new(),
            next_receiver_id: 0,
            started: false,
            completed: 0,
            aborted: 0,
            headers: None,
            header_waiters: Vec::new(),
        }
    }

    fn ready_to_start(&self) -> bool {
        !self.started && self.sender_present && self.receivers.len() == self.n
    }
}

/// Map from path to in-flight fan-out record.
#[derive(Default)]
pub struct FanoutRegistry {
    pipes: DashMap<String, Arc<Mutex<FanoutPipe>>>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.pipes.len()
    }

    fn get_or_create(&self, path: &str, n: usize) -> Arc<Mutex<FanoutPipe>> {
        self.pipes
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(FanoutPipe::new(n))))
            .clone()
    }

    fn remove_if_empty(&self, path: &str, pipe: &FanoutPipe) {
        if !pipe.sender_present && pipe.receivers.is_empty() {
            self.pipes.remove(path);
        }
    }
}

pub fn validate_n(n: i64) -> Result<usize, FanoutError> {
    if n <= 0 {
        return Err(FanoutError::InvalidN);
    }
    Ok(n as usize)
}

/// Tears a receiver's slot down the moment its body stream is
/// dropped — clean EOF or the client going away mid-transfer — the
/// same RAII contract [`super::ReaderGuard`] applies to simple mode.
/// Cleanup needs the async `FanoutPipe` lock, so unlike `ReaderGuard`
/// it spawns the teardown rather than running it inline in `drop`.
pub struct ReceiverGuard {
    id: u64,
    registry: Arc<FanoutRegistry>,
    path: String,
    pipe: Arc<Mutex<FanoutPipe>>,
    done: bool,
}

impl ReceiverGuard {
    /// Mark this receiver as having finished cleanly, skipping the
    /// disconnect-narration path on drop.
    pub fn finish(mut self) {
        self.done = true;
    }
}

impl Drop for ReceiverGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let registry = self.registry.clone();
        let path = self.path.clone();
        let pipe = self.pipe.clone();
        let id = self.id;
        tokio::spawn(async move {
            let mut guard = pipe.lock().await;
            let before = guard.receivers.len();
            guard.receivers.retain(|r| r.id != id);
            let was_present = guard.receivers.len() != before;
            if was_present && guard.started {
                guard.aborted += 1;
                if let Some(tx) = &guard.sender_info_tx {
                    let _ = tx
                        .send(Bytes::from_static(b"[INFO] A receiver aborted.\n"))
                        .await;
                }
                maybe_finish(&mut guard).await;
            }
            registry.remove_if_empty(&path, &guard);
        });
    }
}

/// Register as a receiver. Returns a one-shot that resolves to the
/// sender's headers once known, the body stream, and a guard whose
/// drop unregisters the receiver and narrates an abort to the sender
/// if the transfer had already started.
pub async fn join_receiver(
    registry: Arc<FanoutRegistry>,
    path: String,
    n: usize,
) -> Result<(oneshot::Receiver<PartHeaders>, mpsc::Receiver<Chunk>, ReceiverGuard), FanoutError> {
    let pipe = registry.get_or_create(&path, n);
    let (body_tx, body_rx) = mpsc::channel(16);
    let (header_tx, header_rx) = oneshot::channel();
    let cancel = CancellationToken::new();

    let id = {
        let mut guard = pipe.lock().await;
        if guard.n != n {
            return Err(FanoutError::Mismatch);
        }
        if guard.receivers.len() >= guard.n {
            return Err(FanoutError::OverSubscribed);
        }
        let id = guard.next_receiver_id;
        guard.next_receiver_id += 1;
        guard.receivers.push(ReceiverSlot {
            id,
            body_tx,
            cancel,
        });
        match &guard.headers {
            Some(headers) => {
                let _ = header_tx.send(headers.clone());
            }
            None => guard.header_waiters.push(header_tx),
        }
        if guard.ready_to_start() {
            guard.started = true;
        }
        id
    };

    let guard = ReceiverGuard {
        id,
        registry,
        path,
        pipe,
        done: false,
    };
    Ok((header_rx, body_rx, guard))
}

/// Register as the sender. Returns the stream of `[INFO]` narration
/// lines to interleave ahead of / alongside the forwarded body, and a
/// handle used to drive the actual transfer once ready.
pub struct SenderHandle {
    pub info_rx: mpsc::Receiver<Bytes>,
    registry: Arc<FanoutRegistry>,
    path: String,
    pipe: Arc<Mutex<FanoutPipe>>,
}

pub async fn join_sender(
    registry: Arc<FanoutRegistry>,
    path: String,
    n: usize,
    headers: PartHeaders,
) -> Result<SenderHandle, FanoutError> {
    let pipe = registry.get_or_create(&path, n);
    let (info_tx, info_rx) = mpsc::channel(8);

    {
        let mut guard = pipe.lock().await;
        if guard.n != n {
            return Err(FanoutError::Mismatch);
        }
        if guard.sender_present {
            return Err(FanoutError::DuplicateSender);
        }
        guard.sender_present = true;
        guard.sender_info_tx = Some(info_tx.clone());
        guard.headers = Some(headers.clone());
        for waiter in guard.header_waiters.drain(..) {
            let _ = waiter.send(headers.clone());
        }
        if guard.ready_to_start() {
            guard.started = true;
            let _ = info_tx
                .send(Bytes::from(format!(
                    "[INFO] Start sending to {n} receiver(s)!\n"
                )))
                .await;
        }
    }

    Ok(SenderHandle {
        info_rx,
        registry,
        path,
        pipe,
    })
}

impl SenderHandle {
    /// Split into the `[INFO]` narration stream (the sender's HTTP
    /// response body) and the driver used to push body chunks to
    /// receivers as they arrive.
    pub fn split(self) -> (mpsc::Receiver<Bytes>, SenderDriver) {
        (
            self.info_rx,
            SenderDriver {
                registry: self.registry,
                path: self.path,
                pipe: self.pipe,
            },
        )
    }
}

/// Drives the actual byte forwarding for a joined sender, once its
/// `[INFO]` stream has been handed off to the HTTP response.
pub struct SenderDriver {
    registry: Arc<FanoutRegistry>,
    path: String,
    pipe: Arc<Mutex<FanoutPipe>>,
}

impl SenderDriver {
    /// Forward one chunk of the sender's body to every still-connected
    /// receiver. Returns the number of receivers the chunk reached.
    pub async fn broadcast(&self, chunk: Bytes) -> usize {
        let mut guard = self.pipe.lock().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for recv in &guard.receivers {
            if recv.cancel.is_cancelled() {
                dead.push(recv.id);
                continue;
            }
            if recv.body_tx.send(Ok(chunk.clone())).await.is_ok() {
                delivered += 1;
            } else {
                dead.push(recv.id);
            }
        }
        for id in dead {
            guard.receivers.retain(|r| r.id != id);
            guard.aborted += 1;
            if let Some(tx) = &guard.sender_info_tx {
                let _ = tx
                    .send(Bytes::from_static(b"[INFO] A receiver aborted.\n"))
                    .await;
            }
        }
        maybe_finish(&mut guard).await;
        delivered
    }

    /// Signal clean EOF from the sender: every still-connected
    /// receiver is counted as completed and its channel is closed.
    pub async fn finish(self) {
        let mut guard = self.pipe.lock().await;
        let finishing: Vec<u64> = guard.receivers.iter().map(|r| r.id).collect();
        guard.receivers.clear();
        guard.completed += finishing.len();
        maybe_finish(&mut guard).await;
        guard.sender_present = false;
        guard.sender_info_tx = None;
        self.registry.remove_if_empty(&self.path, &guard);
    }
}

async fn maybe_finish(guard: &mut FanoutPipe) {
    if !guard.started {
        return;
    }
    if guard.aborted == guard.n {
        if let Some(tx) = &guard.sender_info_tx {
            let _ = tx
                .send(Bytes::from_static(
                    b"[INFO] All receiver(s) was/were aborted halfway.\n",
                ))
                .await;
        }
    } else if guard.completed == guard.n {
        if let Some(tx) = &guard.sender_info_tx {
            let _ = tx
                .send(Bytes::from_static(
                    b"[INFO] All receiver(s) received successfully.\n",
                ))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_n_rejects_non_positive() {
        assert!(matches!(validate_n(0), Err(FanoutError::InvalidN)));
        assert!(matches!(validate_n(-1), Err(FanoutError::InvalidN)));
        assert_eq!(validate_n(3).unwrap(), 3);
    }

    #[tokio::test]
    async fn rendezvous_completes_when_all_receivers_finish() {
        let registry = Arc::new(FanoutRegistry::new());

        let (header_rx1, mut body_rx1, guard1) =
            join_receiver(registry.clone(), "/p/fan".into(), 2)
                .await
                .unwrap();
        let (header_rx2, mut body_rx2, guard2) =
            join_receiver(registry.clone(), "/p/fan".into(), 2)
                .await
                .unwrap();
        let headers = PartHeaders {
            content_type: Some("text/plain".into()),
            content_disposition: None,
        };
        let sender = join_sender(registry.clone(), "/p/fan".into(), 2, headers)
            .await
            .unwrap();
        let (_info_rx, driver) = sender.split();

        driver.broadcast(Bytes::from_static(b"hello")).await;
        driver.finish().await;

        assert_eq!(
            header_rx1.await.unwrap().content_type.as_deref(),
            Some("text/plain")
        );
        assert_eq!(
            header_rx2.await.unwrap().content_type.as_deref(),
            Some("text/plain")
        );

        let chunk = body_rx1.recv().await.unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"hello"));
        let chunk2 = body_rx2.recv().await.unwrap().unwrap();
        assert_eq!(chunk2, Bytes::from_static(b"hello"));

        guard1.finish();
        guard2.finish();

        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn mismatched_n_is_rejected() {
        let registry = Arc::new(FanoutRegistry::new());
        let (_header_rx1, _body_rx1, _guard1) =
            join_receiver(registry.clone(), "/p/fan2".into(), 2)
                .await
                .unwrap();
        let err = join_sender(registry.clone(), "/p/fan2".into(), 3, PartHeaders::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::Mismatch));
    }

    #[tokio::test]
    async fn oversubscribed_receiver_is_rejected() {
        let registry = Arc::new(FanoutRegistry::new());
        let (_header_rx1, _body_rx1, _guard1) =
            join_receiver(registry.clone(), "/p/fan3".into(), 1)
                .await
                .unwrap();
        let err = join_receiver(registry.clone(), "/p/fan3".into(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::OverSubscribed));
    }
}
