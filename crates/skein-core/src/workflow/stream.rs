//! Resumable output streams.
//!
//! Every chunk a run emits is persisted before live subscribers are woken,
//! so a consumer can attach at any offset — before, during, or after the
//! producer's lifetime — and observe exactly the suffix a from-start
//! consumer would see. Liveness within a process rides on a `watch` channel
//! per stream; across processes the persisted chunks plus the run's terminal
//! status are the source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_stream::Stream;

use crate::error::ServerError;
use crate::models::message::OutputChunk;
use crate::workflow::store::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamSignal {
    len: u64,
    closed: bool,
}

/// Registry of live streams plus their persistence.
#[derive(Clone)]
pub struct StreamBus {
    store: RunStore,
    live: Arc<RwLock<HashMap<String, watch::Sender<StreamSignal>>>>,
}

impl StreamBus {
    pub fn new(store: RunStore) -> Self {
        Self {
            store,
            live: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open (or reopen, on resume) the writable end of a stream. The chunk
    /// counter continues from whatever is already persisted.
    pub async fn open(&self, stream_id: &str) -> Result<StreamWriter, ServerError> {
        let persisted = self.store.chunk_count(stream_id).await?;
        let (tx, _) = watch::channel(StreamSignal {
            len: persisted,
            closed: false,
        });
        self.live
            .write()
            .await
            .insert(stream_id.to_string(), tx.clone());
        Ok(StreamWriter {
            stream_id: stream_id.to_string(),
            store: self.store.clone(),
            signal: tx,
            next_seq: Arc::new(AtomicU64::new(persisted)),
        })
    }

    /// Close a stream: wake subscribers with the closed signal and drop the
    /// live entry. Late subscribers fall back to persisted replay.
    pub async fn close(&self, stream_id: &str) {
        let mut live = self.live.write().await;
        if let Some(tx) = live.remove(stream_id) {
            let len = tx.borrow().len;
            let _ = tx.send(StreamSignal { len, closed: true });
        }
    }

    /// Subscribe from `start_index`. Yields persisted chunk bodies in order,
    /// then live chunks until the stream closes; reading past the end of a
    /// finished stream is a clean end, not an error.
    pub async fn subscribe(
        &self,
        stream_id: &str,
        start_index: u64,
    ) -> impl Stream<Item = Result<String, ServerError>> + Send + 'static {
        let mut live_rx = self
            .live
            .read()
            .await
            .get(stream_id)
            .map(|tx| tx.subscribe());
        let store = self.store.clone();
        let stream_id = stream_id.to_string();

        async_stream::stream! {
            let mut cursor = start_index;
            loop {
                let rows = match store.chunks_from(&stream_id, cursor).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                for (seq, body) in rows {
                    cursor = seq + 1;
                    yield Ok(body);
                }

                let Some(rx) = live_rx.as_mut() else {
                    // No live producer in this process: the persisted chunks
                    // are all there will be.
                    break;
                };

                let signal = *rx.borrow_and_update();
                if signal.len > cursor {
                    continue;
                }
                if signal.closed {
                    break;
                }
                if rx.changed().await.is_err() {
                    // Producer dropped without closing (crashed run): drain
                    // whatever made it to disk, then end.
                    live_rx = None;
                }
            }
        }
    }
}

/// Writable end of a resumable stream. Cheap to clone; appends are ordered
/// by an atomic sequence shared across clones.
#[derive(Clone)]
pub struct StreamWriter {
    stream_id: String,
    store: RunStore,
    signal: watch::Sender<StreamSignal>,
    next_seq: Arc<AtomicU64>,
}

impl StreamWriter {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Persist a chunk, then wake live subscribers.
    pub async fn append(&self, chunk: &OutputChunk) -> Result<(), ServerError> {
        let body = serde_json::to_string(chunk)
            .map_err(|e| ServerError::Internal(format!("chunk serialization: {}", e)))?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.store.append_chunk(&self.stream_id, seq, &body).await?;
        let _ = self.signal.send(StreamSignal {
            len: seq + 1,
            closed: false,
        });
        Ok(())
    }
}
