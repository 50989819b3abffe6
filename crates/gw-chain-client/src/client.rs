//! The two-tier fetch client for the trusted node and its peers.
//!
//! Every read prefers the on-disk header cache, then the trusted node.
//! Transaction and chunk reads additionally race the ranked peers when the
//! trusted node fails. Every schema-valid network fetch is written through
//! to the cache; invalid responses are neither cached nor returned.

use crate::chunk::validate_chunk;
use crate::failure::FailureSimulator;
use crate::peers::{PeerEntry, PeerRegistry};
use crate::store::BlobStore;
use crate::wire::{ChunkResponse, NetworkInfo};
use gateway_telemetry::PEER_REFRESHES;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{Block, BlockId, BlockWithTxs, ChainError, Transaction, TxId, TxOffset};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Tuning knobs for the chain client.
#[derive(Debug, Clone)]
pub struct ChainClientConfig {
    /// Base URL of the trusted upstream node.
    pub trusted_node_url: String,
    /// Bypass the on-disk header caches on reads.
    pub skip_cache: bool,
    /// Per-request timeout for block and info fetches.
    pub block_fetch_timeout: Duration,
    /// Per-request soft deadline for a single tx fetch.
    pub tx_fetch_timeout: Duration,
    /// Per-request timeout for chunk fetches.
    pub chunk_fetch_timeout: Duration,
    /// Bound on concurrent tx fetches within one block.
    pub max_in_flight_txs: usize,
    /// How many ranked peers to race on a fan-out.
    pub peer_fanout: usize,
    /// How many ranked peers to keep.
    pub max_peers: usize,
    /// How many `/peers` candidates to probe per refresh.
    pub peer_probe_limit: usize,
    /// How often the peer refresher re-ranks the peer set.
    pub peer_refresh_interval: Duration,
    /// Failure-injection probability for outbound requests.
    pub simulated_failure_rate: f64,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            trusted_node_url: "https://arweave.net".to_string(),
            skip_cache: false,
            block_fetch_timeout: Duration::from_secs(15),
            tx_fetch_timeout: Duration::from_secs(10),
            chunk_fetch_timeout: Duration::from_secs(10),
            max_in_flight_txs: 32,
            peer_fanout: 5,
            max_peers: 10,
            peer_probe_limit: 50,
            peer_refresh_interval: Duration::from_secs(600),
            simulated_failure_rate: 0.0,
        }
    }
}

impl ChainClientConfig {
    /// A config with short timeouts for tests.
    #[must_use]
    pub fn for_testing(trusted_node_url: impl Into<String>) -> Self {
        Self {
            trusted_node_url: trusted_node_url.into(),
            block_fetch_timeout: Duration::from_secs(2),
            tx_fetch_timeout: Duration::from_secs(1),
            chunk_fetch_timeout: Duration::from_secs(1),
            peer_refresh_interval: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// Client for an Arweave-style upstream node with ranked-peer fan-out.
///
/// Cheap to clone; clones share the peer registry and HTTP connection pool.
#[derive(Clone)]
pub struct ArweaveClient {
    http: reqwest::Client,
    config: ChainClientConfig,
    block_store: BlobStore,
    tx_store: BlobStore,
    failure: FailureSimulator,
    peers: Arc<PeerRegistry>,
}

impl ArweaveClient {
    /// Build a client over the given header caches.
    pub fn new(
        config: ChainClientConfig,
        block_store: BlobStore,
        tx_store: BlobStore,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("permagate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        let peers = Arc::new(PeerRegistry::new(config.max_peers));
        let failure = FailureSimulator::new(config.simulated_failure_rate);

        Ok(Self {
            http,
            config,
            block_store,
            tx_store,
            failure,
            peers,
        })
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &ChainClientConfig {
        &self.config
    }

    /// The ranked peer registry.
    #[must_use]
    pub fn peer_registry(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Current tip height reported by the trusted node.
    pub async fn get_height(&self) -> Result<u64, ChainError> {
        let info: NetworkInfo = self
            .fetch_json(
                &self.config.trusted_node_url,
                "info",
                self.config.block_fetch_timeout,
            )
            .await?;
        Ok(info.height)
    }

    /// Block currently reported at `height` by the trusted node.
    ///
    /// Heights are not content-addressed, so this always asks the network;
    /// the response is cached under the block's id.
    pub async fn get_block_by_height(&self, height: u64) -> Result<Block, ChainError> {
        let block: Block = self
            .fetch_json(
                &self.config.trusted_node_url,
                &format!("block/height/{height}"),
                self.config.block_fetch_timeout,
            )
            .await?;

        if block.height != height {
            return Err(ChainError::Invalid(format!(
                "asked for height {height}, got {}",
                block.height
            )));
        }

        self.write_cache(&self.block_store, block.indep_hash.as_str(), &block)
            .await;
        Ok(block)
    }

    /// Block by id, cache first.
    pub async fn get_block_by_id(&self, id: &BlockId) -> Result<Block, ChainError> {
        if !self.config.skip_cache {
            if let Some(block) = self.read_cached::<Block>(&self.block_store, id.as_str()).await {
                return Ok(block);
            }
        }

        let block: Block = self
            .fetch_json(
                &self.config.trusted_node_url,
                &format!("block/hash/{id}"),
                self.config.block_fetch_timeout,
            )
            .await?;

        if block.indep_hash != *id {
            return Err(ChainError::Invalid(format!(
                "asked for block {id}, got {}",
                block.indep_hash
            )));
        }

        self.write_cache(&self.block_store, id.as_str(), &block).await;
        Ok(block)
    }

    /// Transaction by id: cache, then trusted node, then ranked peers.
    pub async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
        if !self.config.skip_cache {
            if let Some(tx) = self.read_cached::<Transaction>(&self.tx_store, id.as_str()).await {
                return Ok(tx);
            }
        }

        let trusted = self.config.trusted_node_url.clone();
        let tx = match self.fetch_tx_from(&trusted, id).await {
            Ok(tx) => tx,
            Err(primary) => {
                let requests: Vec<_> = self
                    .fanout_peers()
                    .into_iter()
                    .map(|peer| {
                        let client = self.clone();
                        let id = id.clone();
                        let base = peer.clone();
                        (peer, async move { client.fetch_tx_from(&base, &id).await })
                    })
                    .collect();
                if requests.is_empty() {
                    return Err(primary);
                }
                self.race_peers(requests).await.map_err(|_| primary)?
            }
        };

        self.write_cache(&self.tx_store, id.as_str(), &tx).await;
        Ok(tx)
    }

    /// Absolute location of a transaction's payload.
    pub async fn get_tx_offset(&self, id: &TxId) -> Result<TxOffset, ChainError> {
        let path = format!("tx/{id}/offset");
        match self
            .fetch_json::<TxOffset>(
                &self.config.trusted_node_url,
                &path,
                self.config.tx_fetch_timeout,
            )
            .await
        {
            Ok(offset) => Ok(offset),
            Err(primary) => {
                let requests: Vec<_> = self
                    .fanout_peers()
                    .into_iter()
                    .map(|peer| {
                        let client = self.clone();
                        let path = path.clone();
                        let base = peer.clone();
                        (peer, async move {
                            client
                                .fetch_json::<TxOffset>(
                                    &base,
                                    &path,
                                    client.config.tx_fetch_timeout,
                                )
                                .await
                        })
                    })
                    .collect();
                if requests.is_empty() {
                    return Err(primary);
                }
                self.race_peers(requests).await.map_err(|_| primary)
            }
        }
    }

    /// Validated chunk bytes at a global byte offset. Never cached.
    pub async fn get_chunk(&self, offset: u64) -> Result<Vec<u8>, ChainError> {
        let path = format!("chunk/{offset}");

        let trusted = match self
            .fetch_json::<ChunkResponse>(
                &self.config.trusted_node_url,
                &path,
                self.config.chunk_fetch_timeout,
            )
            .await
        {
            Ok(response) => validate_chunk(&response),
            Err(e) => Err(e),
        };

        match trusted {
            Ok(bytes) => Ok(bytes),
            Err(primary) => {
                let requests: Vec<_> = self
                    .fanout_peers()
                    .into_iter()
                    .map(|peer| {
                        let client = self.clone();
                        let path = path.clone();
                        let base = peer.clone();
                        (peer, async move {
                            let response = client
                                .fetch_json::<ChunkResponse>(
                                    &base,
                                    &path,
                                    client.config.chunk_fetch_timeout,
                                )
                                .await?;
                            validate_chunk(&response)
                        })
                    })
                    .collect();
                if requests.is_empty() {
                    return Err(primary);
                }
                self.race_peers(requests).await.map_err(|_| primary)
            }
        }
    }

    /// Block plus every tx whose synchronous fetch succeeded within the
    /// per-tx deadline; the rest land in `missing_tx_ids`. Tx failures never
    /// fail the block.
    pub async fn get_block_and_txs_by_height(
        &self,
        height: u64,
    ) -> Result<BlockWithTxs, ChainError> {
        let block = self.get_block_by_height(height).await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight_txs.max(1)));
        let mut join = JoinSet::new();
        for tx_id in block.txs.clone() {
            let client = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let deadline = self.config.tx_fetch_timeout;
            join.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                match tokio::time::timeout(deadline, client.get_tx(&tx_id)).await {
                    Ok(Ok(tx)) => (tx_id, Some(tx)),
                    Ok(Err(e)) => {
                        debug!(tx_id = %tx_id, error = %e, "synchronous tx fetch failed");
                        (tx_id, None)
                    }
                    Err(_) => {
                        debug!(tx_id = %tx_id, "synchronous tx fetch timed out");
                        (tx_id, None)
                    }
                }
            });
        }

        let mut fetched: HashMap<TxId, Option<Transaction>> = HashMap::new();
        while let Some(joined) = join.join_next().await {
            if let Ok((id, maybe_tx)) = joined {
                fetched.insert(id, maybe_tx);
            }
        }

        // Preserve the block's tx order in both lists.
        let mut txs = Vec::new();
        let mut missing_tx_ids = Vec::new();
        for id in &block.txs {
            match fetched.remove(id) {
                Some(Some(tx)) => txs.push(tx),
                _ => missing_tx_ids.push(id.clone()),
            }
        }

        Ok(BlockWithTxs {
            block,
            txs,
            missing_tx_ids,
        })
    }

    /// Re-rank the peer set from the trusted node's `/peers` list.
    pub async fn refresh_peers(&self) -> Result<(), ChainError> {
        let addrs: Vec<String> = self
            .fetch_json(
                &self.config.trusted_node_url,
                "peers",
                self.config.block_fetch_timeout,
            )
            .await?;

        let mut join = JoinSet::new();
        for addr in addrs.into_iter().take(self.config.peer_probe_limit) {
            let client = self.clone();
            join.spawn(async move {
                let url = if addr.starts_with("http://") || addr.starts_with("https://") {
                    addr
                } else {
                    format!("http://{addr}")
                };
                let started = Instant::now();
                let info: NetworkInfo = client
                    .fetch_json(&url, "info", Duration::from_secs(5))
                    .await
                    .ok()?;
                Some(PeerEntry {
                    url,
                    height: info.height,
                    rtt: started.elapsed(),
                })
            });
        }

        let mut entries = Vec::new();
        while let Some(joined) = join.join_next().await {
            if let Ok(Some(entry)) = joined {
                entries.push(entry);
            }
        }

        info!(candidates = entries.len(), "peer set refreshed");
        self.peers.replace(entries);
        PEER_REFRESHES.inc();
        Ok(())
    }

    async fn fetch_tx_from(&self, base: &str, id: &TxId) -> Result<Transaction, ChainError> {
        let tx: Transaction = self
            .fetch_json(base, &format!("tx/{id}"), self.config.tx_fetch_timeout)
            .await?;
        if tx.id != *id {
            return Err(ChainError::Invalid(format!(
                "asked for tx {id}, got {} from {base}",
                tx.id
            )));
        }
        Ok(tx)
    }

    /// Peers to race for one fan-out, best first.
    fn fanout_peers(&self) -> Vec<String> {
        let mut ranked = self.peers.ranked();
        ranked.truncate(self.config.peer_fanout);
        ranked
    }

    /// Race prepared peer requests; the first success wins and the rest are
    /// aborted. Failures demote the peer in the registry.
    async fn race_peers<T, Fut>(&self, requests: Vec<(String, Fut)>) -> Result<T, ChainError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, ChainError>> + Send + 'static,
    {
        let mut join = JoinSet::new();
        for (peer, request) in requests {
            join.spawn(async move { (peer, request.await) });
        }

        let mut last_err = ChainError::Unavailable("no ranked peers".into());
        while let Some(joined) = join.join_next().await {
            let Ok((peer, result)) = joined else { continue };
            match result {
                Ok(value) => {
                    self.peers.record_success(&peer);
                    join.abort_all();
                    return Ok(value);
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "peer fetch failed");
                    self.peers.record_failure(&peer);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<T, ChainError> {
        self.failure.maybe_fail()?;

        let url = format!("{}/{}", base.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ChainError::Unavailable(format!("{url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(ChainError::Unavailable(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChainError::Invalid(format!("{url}: {e}")))
    }

    async fn read_cached<T: DeserializeOwned>(&self, store: &BlobStore, id: &str) -> Option<T> {
        match store.get(id).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(id, error = %e, "header cache read failed");
                None
            }
        }
    }

    async fn write_cache<T: Serialize>(&self, store: &BlobStore, id: &str, value: &T) {
        let Ok(bytes) = serde_json::to_vec(value) else {
            return;
        };
        if let Err(e) = store.put(id, &bytes).await {
            warn!(id, error = %e, "header cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client_with(config: ChainClientConfig) -> (TempDir, ArweaveClient) {
        let dir = TempDir::new().unwrap();
        let blocks = BlobStore::new(dir.path().join("partial-blocks"));
        let txs = BlobStore::new(dir.path().join("partial-txs"));
        let client = ArweaveClient::new(config, blocks, txs).unwrap();
        (dir, client)
    }

    #[tokio::test]
    async fn simulated_failures_surface_before_any_io() {
        let config = ChainClientConfig {
            simulated_failure_rate: 1.0,
            ..ChainClientConfig::for_testing("http://127.0.0.1:1")
        };
        let (_dir, client) = client_with(config);

        assert_eq!(client.get_height().await, Err(ChainError::Simulated));
        assert_eq!(client.get_chunk(0).await, Err(ChainError::Simulated));
    }

    #[tokio::test]
    async fn cached_tx_short_circuits_network() {
        // Unreachable trusted node: only a cache hit can satisfy the read.
        let (_dir, client) = client_with(ChainClientConfig::for_testing("http://127.0.0.1:1"));

        let tx = Transaction {
            id: "oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE".parse().unwrap(),
            owner: "owner".into(),
            target: String::new(),
            quantity: "0".into(),
            reward: "0".into(),
            tags: Vec::new(),
            data_size: 12,
            data_root: "root".into(),
            signature: "sig".into(),
        };
        client
            .tx_store
            .put(tx.id.as_str(), &serde_json::to_vec(&tx).unwrap())
            .await
            .unwrap();

        let fetched = client.get_tx(&tx.id).await.unwrap();
        assert_eq!(fetched, tx);
    }

    #[tokio::test]
    async fn skip_cache_goes_to_network() {
        let config = ChainClientConfig {
            skip_cache: true,
            ..ChainClientConfig::for_testing("http://127.0.0.1:1")
        };
        let (_dir, client) = client_with(config);

        let id: TxId = "oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE".parse().unwrap();
        client.tx_store.put(id.as_str(), b"{}").await.unwrap();

        // The cache entry must be ignored; the unreachable node decides.
        assert!(matches!(
            client.get_tx(&id).await,
            Err(ChainError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_cache_entries_are_ignored() {
        let (_dir, client) = client_with(ChainClientConfig::for_testing("http://127.0.0.1:1"));

        let id: TxId = "oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE".parse().unwrap();
        client.tx_store.put(id.as_str(), b"not json").await.unwrap();

        assert!(matches!(
            client.get_tx(&id).await,
            Err(ChainError::Unavailable(_))
        ));
    }
}
