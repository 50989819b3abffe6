//! # Tx Chunks Data Source
//!
//! The independent read path for bulk payload bytes: given a tx id, fetch
//! its metadata and absolute offset, then stream validated chunks forward
//! as the consumer pulls. The stream's total length equals the tx's
//! advertised data size; any fetch or validation error terminates the
//! stream with a [`DataStreamError`]. Dropping the stream cancels the
//! producer at the next chunk boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use async_trait::async_trait;
use bytes::Bytes;
use gateway_telemetry::CHUNK_BYTES_STREAMED;
use shared_types::{ChainError, Transaction, TxId, TxOffset};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Chunks buffered ahead of the consumer.
const STREAM_BUFFER_CHUNKS: usize = 4;

/// Errors terminating a payload stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataStreamError {
    /// A chain fetch failed mid-stream.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Chunk accounting disagrees with the advertised payload size.
    #[error("corrupt payload stream: {0}")]
    Corrupt(String),
}

/// The data source's view of the chain client.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Transaction metadata (for `data_size`).
    async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError>;

    /// Absolute location of the transaction's payload.
    async fn get_tx_offset(&self, id: &TxId) -> Result<TxOffset, ChainError>;

    /// Validated chunk bytes at a global offset.
    async fn get_chunk(&self, offset: u64) -> Result<Vec<u8>, ChainError>;
}

/// An open payload stream.
pub struct TxData {
    /// Total number of bytes the stream will yield on success.
    pub size: u64,
    /// The chunk stream itself.
    pub stream: ReceiverStream<Result<Bytes, DataStreamError>>,
}

/// Streams payload bytes for transactions by composing chain-client calls.
pub struct TxChunksDataSource {
    source: Arc<dyn ChunkSource>,
}

impl TxChunksDataSource {
    /// Build a data source over a chunk source.
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        Self { source }
    }

    /// Open a payload stream for `id`.
    ///
    /// Metadata errors (unknown tx, unavailable offset) surface here;
    /// chunk errors surface as the stream's terminal item.
    pub async fn open(&self, id: &TxId) -> Result<TxData, DataStreamError> {
        let tx = self.source.get_tx(id).await?;
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER_CHUNKS);

        if tx.data_size == 0 {
            // No payload: the stream ends immediately.
            drop(sender);
            return Ok(TxData {
                size: 0,
                stream: ReceiverStream::new(receiver),
            });
        }

        let offset = self.source.get_tx_offset(id).await?;
        if offset.size != tx.data_size {
            return Err(DataStreamError::Corrupt(format!(
                "offset size {} disagrees with tx data size {}",
                offset.size, tx.data_size
            )));
        }

        let source = Arc::clone(&self.source);
        let expected = tx.data_size;
        let start = offset.start_offset();
        let tx_id = id.clone();

        tokio::spawn(async move {
            pump_chunks(source, sender, tx_id, start, expected).await;
        });

        Ok(TxData {
            size: expected,
            stream: ReceiverStream::new(receiver),
        })
    }
}

/// Producer loop: one chunk per iteration, stopping on error, completion,
/// or a dropped consumer.
async fn pump_chunks(
    source: Arc<dyn ChunkSource>,
    sender: mpsc::Sender<Result<Bytes, DataStreamError>>,
    tx_id: TxId,
    start: u64,
    expected: u64,
) {
    let mut cursor = start;
    let mut sent: u64 = 0;

    while sent < expected {
        let chunk = match source.get_chunk(cursor).await {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(tx_id = %tx_id, offset = cursor, error = %e, "chunk fetch failed");
                let _ = sender.send(Err(e.into())).await;
                return;
            }
        };

        let len = chunk.len() as u64;
        if len == 0 || sent + len > expected {
            let _ = sender
                .send(Err(DataStreamError::Corrupt(format!(
                    "chunk of {len} bytes at offset {cursor} breaks the {expected}-byte payload"
                ))))
                .await;
            return;
        }

        sent += len;
        cursor += len;
        CHUNK_BYTES_STREAMED.inc_by(len as f64);

        if sender.send(Ok(Bytes::from(chunk))).await.is_err() {
            // Consumer dropped the stream: cancel between chunk boundaries.
            debug!(tx_id = %tx_id, sent, "payload stream cancelled by consumer");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio_stream::StreamExt;

    struct MockChunkSource {
        txs: Mutex<HashMap<TxId, (Transaction, TxOffset)>>,
        chunks: Mutex<HashMap<u64, Vec<u8>>>,
    }

    impl MockChunkSource {
        fn new() -> Self {
            Self {
                txs: Mutex::new(HashMap::new()),
                chunks: Mutex::new(HashMap::new()),
            }
        }

        /// Register a tx whose payload is `chunks`, laid out back to back
        /// ending at global offset 999 + total size.
        fn add_tx(&self, id: &TxId, chunks: &[&[u8]]) {
            let size: u64 = chunks.iter().map(|c| c.len() as u64).sum();
            let start = 1000u64;
            let tx = Transaction {
                id: id.clone(),
                owner: "owner".into(),
                target: String::new(),
                quantity: "0".into(),
                reward: "1".into(),
                tags: Vec::new(),
                data_size: size,
                data_root: "root".into(),
                signature: "sig".into(),
            };
            let offset = TxOffset {
                offset: start + size - 1,
                size,
            };
            self.txs.lock().insert(id.clone(), (tx, offset));

            let mut cursor = start;
            for chunk in chunks {
                self.chunks.lock().insert(cursor, chunk.to_vec());
                cursor += chunk.len() as u64;
            }
        }
    }

    #[async_trait]
    impl ChunkSource for MockChunkSource {
        async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
            self.txs
                .lock()
                .get(id)
                .map(|(tx, _)| tx.clone())
                .ok_or_else(|| ChainError::NotFound(format!("tx/{id}")))
        }

        async fn get_tx_offset(&self, id: &TxId) -> Result<TxOffset, ChainError> {
            self.txs
                .lock()
                .get(id)
                .map(|(_, offset)| *offset)
                .ok_or_else(|| ChainError::NotFound(format!("tx/{id}/offset")))
        }

        async fn get_chunk(&self, offset: u64) -> Result<Vec<u8>, ChainError> {
            self.chunks
                .lock()
                .get(&offset)
                .cloned()
                .ok_or_else(|| ChainError::NotFound(format!("chunk/{offset}")))
        }
    }

    fn make_id(c: char) -> TxId {
        let id: String = std::iter::repeat(c).take(shared_types::ID_LENGTH).collect();
        id.parse().unwrap()
    }

    async fn collect(data: TxData) -> (Vec<u8>, Option<DataStreamError>) {
        let mut bytes = Vec::new();
        let mut error = None;
        let mut stream = data.stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        (bytes, error)
    }

    #[tokio::test]
    async fn streams_payload_across_chunks() {
        let source = Arc::new(MockChunkSource::new());
        let id = make_id('a');
        source.add_tx(&id, &[b"hello ", b"chunked ", b"world"]);

        let data_source = TxChunksDataSource::new(Arc::clone(&source) as Arc<dyn ChunkSource>);
        let data = data_source.open(&id).await.unwrap();
        assert_eq!(data.size, 19);

        let (bytes, error) = collect(data).await;
        assert!(error.is_none());
        assert_eq!(bytes, b"hello chunked world");
    }

    #[tokio::test]
    async fn zero_size_payload_is_an_empty_stream() {
        let source = Arc::new(MockChunkSource::new());
        let id = make_id('b');
        source.add_tx(&id, &[]);

        let data_source = TxChunksDataSource::new(source as Arc<dyn ChunkSource>);
        let data = data_source.open(&id).await.unwrap();
        assert_eq!(data.size, 0);

        let (bytes, error) = collect(data).await;
        assert!(bytes.is_empty());
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn unknown_tx_fails_at_open() {
        let source = Arc::new(MockChunkSource::new());
        let data_source = TxChunksDataSource::new(source as Arc<dyn ChunkSource>);

        let result = data_source.open(&make_id('c')).await;
        assert!(matches!(
            result,
            Err(DataStreamError::Chain(ChainError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn chunk_error_terminates_stream_early() {
        let source = Arc::new(MockChunkSource::new());
        let id = make_id('d');
        source.add_tx(&id, &[b"first", b"second"]);
        // Remove the second chunk: the stream must end with an error after
        // yielding the first.
        source.chunks.lock().remove(&1005);

        let data_source = TxChunksDataSource::new(Arc::clone(&source) as Arc<dyn ChunkSource>);
        let data = data_source.open(&id).await.unwrap();

        let (bytes, error) = collect(data).await;
        assert_eq!(bytes, b"first");
        assert!(matches!(
            error,
            Some(DataStreamError::Chain(ChainError::NotFound(_)))
        ));
    }
}
