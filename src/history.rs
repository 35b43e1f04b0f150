//! History reconciliation
//!
//! Two sources report what happened on chain: block polling, fast but
//! partial, and the history indexer, slow but authoritative. Both converge
//! on the pending store and the history list owned by the coordinator.

use crate::client::HistoryIndexer;
use crate::lifecycle::unix_time;
use crate::notification::{ErrorChannel, Notification};
use crate::pending::PendingTransactionStore;
use crate::transaction::{BlockTransaction, NetworkId, RawTransaction, Transaction};
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Title of the history fetch failure notification
pub const HISTORY_ERROR_TITLE: &str = "Error getting transaction history";

/// Title of the block detection notification
pub const NEW_TRANSACTIONS_TITLE: &str = "New transactions";

/// What a block batch did to the stores
#[derive(Debug, Default)]
pub struct BlockReport {
    /// Transactions added to the pending store
    pub added: usize,

    /// Transactions matching an entry already pending
    pub already_tracked: usize,

    /// Transactions moved from pending to history (non-primary networks)
    pub promoted: usize,

    /// History refresh triggered by this batch, if any
    pub refresh: Option<JoinHandle<Result<usize>>>,
}

#[derive(Clone)]
pub struct HistoryReconciler {
    address: String,
    primary_network: NetworkId,
    active_network: Arc<AtomicU64>,
    indexer: Arc<dyn HistoryIndexer>,
    pending: Arc<RwLock<PendingTransactionStore>>,
    history: Arc<RwLock<Vec<Transaction>>>,
    channel: Arc<dyn ErrorChannel>,

    /// Current time provider (for testing)
    current_time_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl HistoryReconciler {
    pub fn new(
        address: impl Into<String>,
        primary_network: NetworkId,
        active_network: Arc<AtomicU64>,
        indexer: Arc<dyn HistoryIndexer>,
        pending: Arc<RwLock<PendingTransactionStore>>,
        history: Arc<RwLock<Vec<Transaction>>>,
        channel: Arc<dyn ErrorChannel>,
    ) -> Self {
        Self {
            address: address.into(),
            primary_network,
            active_network,
            indexer,
            pending,
            history,
            channel,
            current_time_fn: Arc::new(unix_time),
        }
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.current_time_fn = Arc::new(f);
        self
    }

    fn active_network(&self) -> NetworkId {
        self.active_network.load(Ordering::SeqCst)
    }

    /// Refetch the history of the active address from the indexer
    ///
    /// The history becomes the normal transactions followed by the internal
    /// ones, in indexer order. Pending entries that show up in it are
    /// dropped. On any failure the previous history is kept untouched and a
    /// single notification is dispatched. Returns the new history length.
    pub async fn update_transaction_history(&self) -> Result<usize> {
        let network_id = self.active_network();
        let now = (self.current_time_fn)();

        let fetched = tokio::try_join!(
            self.indexer.transaction_history(&self.address, network_id),
            self.indexer.internal_transactions(&self.address, network_id),
        )
        .and_then(|(normal, internal)| {
            normal
                .into_iter()
                .chain(internal)
                .map(|record| RawTransaction::Indexer(record).into_canonical(network_id, now))
                .collect::<Result<Vec<_>>>()
        });

        let history = match fetched {
            Ok(history) => history,
            Err(e) => {
                warn!("Transaction history update failed: {}", e);
                self.channel.emit(Notification::danger(HISTORY_ERROR_TITLE, e.to_string()));
                return Err(e);
            }
        };

        // Same lock order as block handling: pending, then history
        let mut pending = self.pending.write().await;
        let mut stored = self.history.write().await;
        if self.active_network() != network_id {
            debug!(
                "Discarding history of network {}, active network changed",
                network_id
            );
            return Ok(stored.len());
        }

        let mined = pending.remove_mined(&history);
        if !mined.is_empty() {
            info!("{} pending transactions found in history", mined.len());
        }

        let count = history.len();
        *stored = history;
        debug!("Transaction history updated: {} entries", count);
        Ok(count)
    }

    /// Reconcile transactions observed in a newly seen block
    ///
    /// Contract creations are ignored. A transaction matching a pending
    /// entry by hash, or by nonce from the same sender, is never inserted
    /// twice. If the batch had such a match, a single notification is raised
    /// and, on the primary network, one background history refresh is
    /// started; elsewhere the matched entry moves straight to the history.
    pub async fn handle_block_transactions(
        &self,
        transactions: Vec<BlockTransaction>,
        network_id: Option<NetworkId>,
    ) -> BlockReport {
        let active = self.active_network();
        let network_id = network_id.unwrap_or(active);
        let on_primary = active == self.primary_network;
        let now = (self.current_time_fn)();

        let mut report = BlockReport::default();
        let mut promoted = Vec::new();
        {
            let mut pending = self.pending.write().await;
            for raw in transactions {
                if raw.to.is_none() {
                    debug!("Skipping contract creation {}", raw.hash);
                    continue;
                }

                let transaction = match RawTransaction::Block(raw).into_canonical(network_id, now) {
                    Ok(transaction) => transaction,
                    Err(e) => {
                        warn!("Skipping malformed block transaction: {}", e);
                        continue;
                    }
                };

                let tracked = pending.find_conflict(&transaction).map(|tx| tx.hash.clone());
                match tracked {
                    Some(existing) => {
                        report.already_tracked += 1;
                        if !on_primary {
                            pending.remove(&existing);
                            promoted.push(transaction);
                        }
                    }
                    None => match pending.add(transaction) {
                        Ok(()) => report.added += 1,
                        Err(e) => warn!("Block transaction not tracked: {}", e),
                    },
                }
            }
        }

        if !promoted.is_empty() {
            report.promoted = promoted.len();
            self.history.write().await.extend(promoted);
        }

        if report.already_tracked > 0 {
            self.channel.emit(Notification::info(
                NEW_TRANSACTIONS_TITLE,
                "New transactions were detected",
            ));

            if on_primary {
                let reconciler = self.clone();
                report.refresh = Some(tokio::spawn(async move {
                    reconciler.update_transaction_history().await
                }));
            }
        }

        debug!(
            "Block batch: {} added, {} already tracked, {} promoted",
            report.added, report.already_tracked, report.promoted
        );
        report
    }

    /// History followed by the pending transactions
    pub async fn history_view(&self) -> Vec<Transaction> {
        let mut view = self.history.read().await.clone();
        view.extend(self.pending.read().await.iter().cloned());
        view
    }

    /// Forget the history, e.g. after a network switch
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}
