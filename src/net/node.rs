//! Networked ledger node.
//!
//! A [`Node`] wraps one [`CertificateBlockchain`] behind a single-writer
//! lock: mutations take the write lock, queries the read lock.  Proof-of-work
//! runs on the blocking pool without holding the lock, so queries keep being
//! served while a block is sealed.  Each seal owns its cancellation flag,
//! exposed through a [`SealHandle`].  Reconciliation fetches every peer chain
//! concurrently, each under its own timeout, and broadcasts are
//! fire-and-forget.

use crate::block::Block;
use crate::blockchain::{CertificateBlockchain, VerificationResult};
use crate::certificate::Certificate;
use crate::config::{env_value, parse_env_flag, parse_value};
use crate::consensus::PeerChain;
use crate::error::{BlockError, ConfigError, LedgerError};
use crate::net::transport::{PeerError, PeerTransport};
use crate::transaction::LedgerTransaction;
use futures::future::join_all;
use k256::ecdsa::SigningKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default per-peer timeout for chain fetches.
pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 5_000;

/// Node identity, peers and network behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Identifier used in logs.
    pub node_id: String,
    /// Peer base URLs (or transport-specific identifiers).
    pub peers: Vec<String>,
    /// Upper bound on each peer fetch.
    pub peer_timeout: Duration,
    /// Whether admitted transactions and sealed blocks are pushed to peers.
    pub broadcast: bool,
}

impl NodeConfig {
    /// Configuration with no peers and broadcasting enabled.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            peers: Vec::new(),
            peer_timeout: Duration::from_millis(DEFAULT_PEER_TIMEOUT_MS),
            broadcast: true,
        }
    }

    /// Replaces the peer list.
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Reads `CERTCHAIN_NODE_ID`, `CERTCHAIN_PEERS` (comma separated),
    /// `CERTCHAIN_PEER_TIMEOUT_MS` and `CERTCHAIN_BROADCAST`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id = env_value("CERTCHAIN_NODE_ID")
            .unwrap_or_else(|| format!("node-{}", Uuid::new_v4().simple()));
        let mut config = Self::new(node_id);
        if let Some(peers) = env_value("CERTCHAIN_PEERS") {
            config.peers = parse_peer_list(&peers);
        }
        if let Some(value) = env_value("CERTCHAIN_PEER_TIMEOUT_MS") {
            let ms: u64 = parse_value("CERTCHAIN_PEER_TIMEOUT_MS", &value)?;
            config.peer_timeout = Duration::from_millis(ms);
        }
        if let Some(value) = env_value("CERTCHAIN_BROADCAST") {
            config.broadcast = parse_env_flag(&value);
        }
        Ok(config)
    }
}

fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(|peer| peer.trim_end_matches('/').to_string())
        .collect()
}

/// Failures raised by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The sealing worker panicked or was aborted.
    #[error("sealing worker failed: {0}")]
    Worker(String),
}

/// An in-flight seal started by [`Node::start_seal`].
pub struct SealHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<Result<Block, NodeError>>,
}

impl SealHandle {
    /// Stops this seal without affecting any other.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Waits until the block is committed, rejected or the seal is cancelled.
    pub async fn wait(self) -> Result<Block, NodeError> {
        self.task
            .await
            .map_err(|err| NodeError::Worker(err.to_string()))?
    }
}

/// A ledger shared between request handlers, the sealer and the peer layer.
#[derive(Clone)]
pub struct Node {
    config: NodeConfig,
    ledger: Arc<RwLock<CertificateBlockchain>>,
    transport: Arc<dyn PeerTransport>,
    sealing: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl Node {
    /// Wraps `ledger` for shared use.
    pub fn new(
        config: NodeConfig,
        ledger: CertificateBlockchain,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            transport,
            sealing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Shared handle to the ledger.
    pub fn ledger(&self) -> Arc<RwLock<CertificateBlockchain>> {
        Arc::clone(&self.ledger)
    }

    /// Full chain snapshot, as served to peers.
    pub async fn chain(&self) -> Vec<Block> {
        self.ledger.read().await.chain().to_vec()
    }

    /// Verification query under the read lock.
    pub async fn verify_certificate(&self, id: &str) -> VerificationResult {
        self.ledger.read().await.verify_certificate(id)
    }

    /// Issues a certificate and relays the transaction.
    pub async fn issue_certificate(
        &self,
        certificate: Certificate,
        signing: &SigningKey,
    ) -> Result<LedgerTransaction, NodeError> {
        let tx = self
            .ledger
            .write()
            .await
            .issue_certificate(certificate, signing)?;
        self.spawn_transaction_broadcast(tx.clone());
        Ok(tx)
    }

    /// Queues a revocation and relays the transaction.
    pub async fn revoke_certificate(
        &self,
        id: &str,
        reason: &str,
        signing: &SigningKey,
    ) -> Result<LedgerTransaction, NodeError> {
        let tx = self
            .ledger
            .write()
            .await
            .revoke_certificate(id, reason, signing)?;
        self.spawn_transaction_broadcast(tx.clone());
        Ok(tx)
    }

    /// Records a verification request and relays the transaction.
    pub async fn request_verification(
        &self,
        id: &str,
        verifier: &SigningKey,
    ) -> Result<VerificationResult, NodeError> {
        let (result, tx) = self
            .ledger
            .write()
            .await
            .request_verification(id, verifier)?;
        self.spawn_transaction_broadcast(tx);
        Ok(result)
    }

    /// Admits a transaction relayed by a peer.  Relayed transactions are not
    /// relayed again.
    pub async fn receive_transaction(&self, tx: LedgerTransaction) -> Result<(), NodeError> {
        self.ledger.write().await.admit_transaction(tx)?;
        Ok(())
    }

    /// Commits a block announced by a peer.
    pub async fn receive_block(&self, block: Block) -> Result<Block, NodeError> {
        Ok(self.ledger.write().await.commit_block(block)?)
    }

    /// Seals every pending transaction on behalf of `sealer`.
    ///
    /// The nonce search runs on the blocking pool with the lock released; if
    /// the chain moved in the meantime the commit fails with
    /// [`LedgerError::StaleBlock`].
    pub async fn seal_block(&self, sealer: &str) -> Result<Block, NodeError> {
        self.start_seal(sealer).wait().await
    }

    /// Starts sealing in the background and returns a handle to cancel or
    /// await it.  Must be called from within a Tokio runtime.
    ///
    /// The seal is registered before this returns, so a following
    /// [`Node::cancel_sealing`] always reaches it.
    pub fn start_seal(&self, sealer: impl Into<String>) -> SealHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        self.active_seals().push(Arc::clone(&cancel));
        let node = self.clone();
        let sealer = sealer.into();
        let flag = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            let result = node.run_seal(&sealer, Arc::clone(&flag)).await;
            node.active_seals()
                .retain(|active| !Arc::ptr_eq(active, &flag));
            result
        });
        SealHandle { cancel, task }
    }

    async fn run_seal(&self, sealer: &str, cancel: Arc<AtomicBool>) -> Result<Block, NodeError> {
        let (mut block, difficulty) = {
            let ledger = self.ledger.read().await;
            (ledger.prepare_block(sealer)?, ledger.config().difficulty)
        };
        debug!(node = %self.config.node_id, difficulty, "sealing started");
        let sealed = tokio::task::spawn_blocking(move || -> Result<Block, BlockError> {
            block.seal_with_cancel(difficulty, &cancel)?;
            Ok(block)
        })
        .await
        .map_err(|err| NodeError::Worker(err.to_string()))?
        .map_err(LedgerError::from)?;

        let committed = match self.ledger.write().await.commit_block(sealed) {
            Ok(block) => block,
            Err(err) => {
                warn!(node = %self.config.node_id, error = %err, "sealed block discarded");
                return Err(err.into());
            }
        };
        info!(node = %self.config.node_id, hash = %committed.hash, "block sealed");
        self.spawn_block_broadcast(committed.clone());
        Ok(committed)
    }

    /// Cancels every seal in flight.  Seals started afterwards are unaffected.
    pub fn cancel_sealing(&self) {
        let seals = self.active_seals();
        for flag in seals.iter() {
            flag.store(true, Ordering::SeqCst);
        }
        debug!(node = %self.config.node_id, seals = seals.len(), "sealing cancelled");
    }

    fn active_seals(&self) -> MutexGuard<'_, Vec<Arc<AtomicBool>>> {
        self.sealing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches every peer chain and adopts the best qualifying one.
    /// Unreachable, slow or undecodable peers are skipped.
    pub async fn reconcile(&self) -> bool {
        let fetches = self.config.peers.iter().map(|peer| async move {
            let result = match time::timeout(
                self.config.peer_timeout,
                self.transport.fetch_chain(peer),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PeerError::Timeout(peer.clone())),
            };
            (peer, result)
        });
        let mut candidates = Vec::new();
        for (peer, result) in join_all(fetches).await {
            match result {
                Ok(chain) => candidates.push(PeerChain::new(peer.clone(), chain)),
                Err(err) => {
                    warn!(node = %self.config.node_id, peer = %peer, error = %err, "peer excluded from reconciliation")
                }
            }
        }
        self.ledger.write().await.reconcile_with_peers(&candidates)
    }

    /// Pushes `block` to every peer, returning how many accepted it.
    pub async fn broadcast_block(&self, block: &Block) -> usize {
        let pushes = self
            .config
            .peers
            .iter()
            .map(|peer| async move { (peer, self.transport.push_block(peer, block).await) });
        self.count_deliveries(join_all(pushes).await, "block")
    }

    /// Pushes `tx` to every peer, returning how many accepted it.
    pub async fn broadcast_transaction(&self, tx: &LedgerTransaction) -> usize {
        let pushes = self
            .config
            .peers
            .iter()
            .map(|peer| async move { (peer, self.transport.push_transaction(peer, tx).await) });
        self.count_deliveries(join_all(pushes).await, "transaction")
    }

    fn count_deliveries(&self, results: Vec<(&String, Result<(), PeerError>)>, what: &str) -> usize {
        let mut delivered = 0;
        for (peer, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(node = %self.config.node_id, peer = %peer, what, error = %err, "broadcast failed")
                }
            }
        }
        delivered
    }

    fn spawn_block_broadcast(&self, block: Block) {
        if !self.config.broadcast || self.config.peers.is_empty() {
            return;
        }
        let node = self.clone();
        tokio::spawn(async move {
            node.broadcast_block(&block).await;
        });
    }

    fn spawn_transaction_broadcast(&self, tx: LedgerTransaction) {
        if !self.config.broadcast || self.config.peers.is_empty() {
            return;
        }
        let node = self.clone();
        tokio::spawn(async move {
            node.broadcast_transaction(&tx).await;
        });
    }
}
