//! Main transaction coordinator
//!
//! Owns the pending store, the history, the balance and the pollers of one
//! wallet address, and routes send, resend and cancel requests through
//! submission and action processing.

use crate::client::{ChainClient, Credential, HistoryIndexer, TransactionSigner};
use crate::config::CoordinatorConfig;
use crate::events::TransactionEventEmitter;
use crate::history::{BlockReport, HistoryReconciler};
use crate::lifecycle::{ActionProcessor, ActionType};
use crate::nonce::NonceAllocator;
use crate::notification::ErrorChannel;
use crate::pending::PendingTransactionStore;
use crate::poller::{BalancePoller, BlockPoller, PollerHandle, Pollers};
use crate::submission::BroadcastCoordinator;
use crate::transaction::{BlockTransaction, NetworkId, Transaction, TransactionRequest};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome of a send, resend or cancel request
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Hash assigned by the node
    pub hash: String,

    /// Later confirmation or error of the attempt
    pub events: TransactionEventEmitter,
}

/// Coordinator statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatistics {
    pub active_network: NetworkId,
    pub pending_transactions: usize,
    pub history_transactions: usize,
    /// Wei committed by pending outgoing transactions
    pub pending_value: u128,
    pub active_pollers: usize,
}

/// Transaction coordinator
///
/// Entry point of the crate. One instance serves one wallet address:
/// 1. Allocates nonces and submits signed transactions
/// 2. Tracks them as pending until mined
/// 3. Reconciles pending state with polled blocks and indexer history
/// 4. Keeps the balance current
pub struct TransactionCoordinator {
    config: CoordinatorConfig,
    address: String,
    client: Arc<dyn ChainClient>,

    active_network: Arc<AtomicU64>,
    pending: Arc<RwLock<PendingTransactionStore>>,
    history: Arc<RwLock<Vec<Transaction>>>,
    balance: Arc<RwLock<u128>>,

    nonces: Arc<NonceAllocator>,
    broadcaster: BroadcastCoordinator,
    processor: ActionProcessor,
    reconciler: HistoryReconciler,

    pollers: Mutex<Pollers>,
}

impl TransactionCoordinator {
    /// Create a coordinator for `address`; pollers are not started
    pub fn new(
        config: CoordinatorConfig,
        address: impl Into<String>,
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
        indexer: Arc<dyn HistoryIndexer>,
        channel: Arc<dyn ErrorChannel>,
    ) -> Result<Self> {
        config.validate()?;
        let address = address.into();

        let active_network = Arc::new(AtomicU64::new(config.default_network));
        let pending = Arc::new(RwLock::new(PendingTransactionStore::new()));
        let history = Arc::new(RwLock::new(Vec::new()));

        let nonces = Arc::new(NonceAllocator::new(client.clone(), pending.clone()));
        let broadcaster =
            BroadcastCoordinator::new(client.clone(), signer, nonces.clone(), channel.clone());
        let processor = ActionProcessor::new(pending.clone(), nonces.clone(), channel.clone());
        let reconciler = HistoryReconciler::new(
            address.clone(),
            config.primary_network,
            active_network.clone(),
            indexer,
            pending.clone(),
            history.clone(),
            channel,
        );

        Ok(Self {
            config,
            address,
            client,
            active_network,
            pending,
            history,
            balance: Arc::new(RwLock::new(0)),
            nonces,
            broadcaster,
            processor,
            reconciler,
            pollers: Mutex::new(Pollers::new()),
        })
    }

    /// Set the current time function (for testing)
    pub fn with_time_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + Clone + 'static,
    {
        self.processor = self.processor.with_time_fn(f.clone());
        self.reconciler = self.reconciler.with_time_fn(f);
        self
    }

    /// Send a new transaction
    pub async fn send_transaction(
        &self,
        request: TransactionRequest,
        credential: &Credential,
    ) -> Result<ActionResult> {
        self.perform(ActionType::Send, request, credential).await
    }

    /// Rebroadcast a pending transaction at its nonce, e.g. with a higher gas price
    pub async fn resend_transaction(
        &self,
        request: TransactionRequest,
        credential: &Credential,
    ) -> Result<ActionResult> {
        self.perform(ActionType::Resend, request, credential).await
    }

    /// Supersede a pending transaction with a zero-value self transfer
    pub async fn cancel_transaction(
        &self,
        request: TransactionRequest,
        credential: &Credential,
    ) -> Result<ActionResult> {
        self.perform(ActionType::Cancel, request, credential).await
    }

    async fn perform(
        &self,
        action: ActionType,
        mut request: TransactionRequest,
        credential: &Credential,
    ) -> Result<ActionResult> {
        if action != ActionType::Send && request.nonce.is_none() {
            request.nonce = Some(self.replaced_nonce(&request).await?);
        }

        let network_id = self.active_network();
        debug!("Processing {} from {} on network {}", action, request.from, network_id);

        // Held until the store reflects this attempt
        let _guard = self.nonces.lock_address(&request.from).await;

        let submission = self
            .broadcaster
            .send_signed_transaction(request, credential, network_id)
            .await?;
        let hash = self
            .processor
            .process_transaction_action(action, submission.request, &submission.events, network_id)
            .await?;

        info!("{} of transaction {} accepted by node", action, hash);
        Ok(ActionResult {
            hash,
            events: submission.events,
        })
    }

    /// Nonce of the pending transaction a resend or cancel supersedes
    async fn replaced_nonce(&self, request: &TransactionRequest) -> Result<u64> {
        let hash = request
            .replaces
            .as_deref()
            .ok_or_else(|| Error::TransactionNotFound("no transaction to replace".to_string()))?;

        self.pending
            .read()
            .await
            .get_by_hash(hash)
            .and_then(|tx| tx.nonce)
            .ok_or_else(|| Error::TransactionNotFound(hash.to_string()))
    }

    /// Pending transactions in insertion order
    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.read().await.to_vec()
    }

    pub async fn pending_transaction_by_hash(&self, hash: &str) -> Option<Transaction> {
        self.pending.read().await.get_by_hash(hash).cloned()
    }

    /// Transactions reported by the indexer
    pub async fn transaction_history(&self) -> Vec<Transaction> {
        self.history.read().await.clone()
    }

    /// History followed by the pending transactions
    pub async fn history_view(&self) -> Vec<Transaction> {
        self.reconciler.history_view().await
    }

    /// Last polled balance (wei)
    pub async fn balance(&self) -> u128 {
        *self.balance.read().await
    }

    /// Wei committed by pending outgoing transactions on the active network
    pub async fn pending_balance(&self) -> u128 {
        self.pending
            .read()
            .await
            .pending_balance(&self.address, self.active_network())
    }

    /// Balance minus pending balance
    pub async fn available_balance(&self) -> u128 {
        self.balance().await.saturating_sub(self.pending_balance().await)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn active_network(&self) -> NetworkId {
        self.active_network.load(Ordering::SeqCst)
    }

    pub fn is_primary_network(&self) -> bool {
        self.active_network() == self.config.primary_network
    }

    /// Next nonce the address would use on the active network
    pub async fn next_nonce(&self) -> Result<u64> {
        self.nonces
            .get_next_nonce(&self.address, self.active_network())
            .await
    }

    /// Refetch the indexer history of the active network
    pub async fn update_transaction_history(&self) -> Result<usize> {
        self.reconciler.update_transaction_history().await
    }

    /// Reconcile transactions observed in a block
    pub async fn handle_block_transactions(
        &self,
        transactions: Vec<BlockTransaction>,
        network_id: Option<NetworkId>,
    ) -> BlockReport {
        self.reconciler
            .handle_block_transactions(transactions, network_id)
            .await
    }

    /// Start block and balance polling for the active network
    ///
    /// Running pollers are replaced. Fails, leaving no poller running, when
    /// the node does not serve the active network.
    pub async fn start(&self) -> Result<()> {
        let network_id = self.active_network();
        let mut pollers = self.pollers.lock().await;

        let node_network = match self.client.network_id().await {
            Ok(id) => id,
            Err(e) => {
                pollers.cancel_all();
                return Err(e);
            }
        };
        if node_network != network_id {
            warn!(
                "Node serves network {}, not active network {}",
                node_network, network_id
            );
            pollers.cancel_all();
            return Err(Error::NetworkMismatch {
                expected: network_id,
                actual: node_network,
            });
        }

        pollers.install_block(PollerHandle::spawn(
            "block",
            self.config.block_poll_interval(),
            BlockPoller::new(
                self.client.clone(),
                self.reconciler.clone(),
                self.address.clone(),
                network_id,
            ),
        ));
        pollers.install_balance(PollerHandle::spawn(
            "balance",
            self.config.balance_poll_interval(),
            BalancePoller::new(self.client.clone(), self.address.clone(), self.balance.clone()),
        ));

        info!("Transaction coordinator polling network {}", network_id);
        Ok(())
    }

    /// Stop all pollers
    pub async fn stop(&self) {
        self.pollers.lock().await.cancel_all();
        info!("Transaction coordinator stopped");
    }

    /// Switch to another configured network
    ///
    /// The history of the previous network is dropped; pending transactions
    /// stay, tagged with their own network. Running pollers are restarted
    /// for the new network; if the node does not serve it they are stopped
    /// and the error is returned.
    pub async fn change_network(&self, network_id: NetworkId) -> Result<()> {
        if !self.config.has_network(network_id) {
            warn!("Refusing switch to unknown network {}", network_id);
            return Err(Error::UnknownNetwork(network_id));
        }

        let previous = self.active_network.swap(network_id, Ordering::SeqCst);
        if previous == network_id {
            return Ok(());
        }

        self.reconciler.clear_history().await;
        *self.balance.write().await = 0;

        let running = self.pollers.lock().await.active() > 0;
        if running {
            self.start().await?;
        }

        info!("Switched from network {} to {}", previous, network_id);
        Ok(())
    }

    /// Get coordinator statistics
    pub async fn statistics(&self) -> CoordinatorStatistics {
        CoordinatorStatistics {
            active_network: self.active_network(),
            pending_transactions: self.pending.read().await.len(),
            history_transactions: self.history.read().await.len(),
            pending_value: self.pending_balance().await,
            active_pollers: self.pollers.lock().await.active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Outcome, SendFailure};
    use crate::test_utils::{
        block_tx, drain, indexer_record, notification_channel, pending_tx, settle_tasks,
        transfer_request, MockChain, MockIndexer, MockSigner, RECIPIENT,
    };
    use crate::{Notification, Quantity};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const OWNER: &str = "0xaa";

    fn coordinator(
        chain: Arc<MockChain>,
        indexer: Arc<MockIndexer>,
    ) -> (TransactionCoordinator, UnboundedReceiver<Notification>) {
        coordinator_with(chain, Arc::new(MockSigner::default()), indexer)
    }

    fn coordinator_with(
        chain: Arc<MockChain>,
        signer: Arc<MockSigner>,
        indexer: Arc<MockIndexer>,
    ) -> (TransactionCoordinator, UnboundedReceiver<Notification>) {
        let (channel, rx) = notification_channel();
        let coordinator = TransactionCoordinator::new(
            CoordinatorConfig::default(),
            OWNER,
            chain,
            signer,
            indexer,
            Arc::new(channel),
        )
        .unwrap()
        .with_time_fn(|| 1_000);
        (coordinator, rx)
    }

    fn secret() -> Credential {
        Credential::new("secret")
    }

    #[tokio::test]
    async fn test_send_tracks_pending() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, mut rx) = coordinator(chain.clone(), Default::default());

        let result = coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();

        assert_eq!(result.hash, MockChain::hash_for(0));
        let pending = coordinator.pending_transactions().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].nonce, Some(5));
        assert_eq!(pending[0].timestamp, Some(1_000));
        assert_eq!(chain.sent.lock().unwrap()[0], "0xsigned:0xaa:5");
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_consecutive_nonces() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, _rx) = coordinator(chain.clone(), Default::default());

        let credential = secret();
        let (first, second) = tokio::join!(
            coordinator.send_transaction(transfer_request(OWNER), &credential),
            coordinator.send_transaction(transfer_request(OWNER), &credential),
        );
        first.unwrap();
        second.unwrap();

        let mut nonces: Vec<_> = coordinator
            .pending_transactions()
            .await
            .into_iter()
            .filter_map(|tx| tx.nonce)
            .collect();
        nonces.sort_unstable();
        assert_eq!(nonces, vec![5, 6]);
        assert_eq!(chain.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resend_keeps_slot() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, _rx) = coordinator(chain, Default::default());

        let first = coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();
        coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();

        // Nonce is looked up from the replaced transaction
        let request = TransactionRequest {
            gas_price: Quantity(5),
            nonce: None,
            replaces: Some(first.hash.clone()),
            ..transfer_request(OWNER)
        };
        let resent = coordinator
            .resend_transaction(request, &secret())
            .await
            .unwrap();

        let pending = coordinator.pending_transactions().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].hash, resent.hash);
        assert_eq!(pending[0].nonce, Some(5));
        assert!(coordinator.pending_transaction_by_hash(&first.hash).await.is_none());
    }

    #[tokio::test]
    async fn test_resend_of_unknown_transaction_fails() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, _rx) = coordinator(chain.clone(), Default::default());

        let request = TransactionRequest {
            replaces: Some("0xmissing".to_string()),
            ..transfer_request(OWNER)
        };
        let result = coordinator.resend_transaction(request, &secret()).await;

        assert!(matches!(result, Err(Error::TransactionNotFound(_))));
        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_of_mined_transaction_is_reported() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, mut rx) = coordinator(chain.clone(), Default::default());
        let sent = coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();
        let target = coordinator.pending_transaction_by_hash(&sent.hash).await.unwrap();

        // Target nonce 5 mined meanwhile
        chain.nonce.store(6, Ordering::SeqCst);
        let cancel = coordinator
            .cancel_transaction(TransactionRequest::cancellation_of(&target, Quantity(9)), &secret())
            .await
            .unwrap();

        assert!(matches!(
            cancel.events.outcome(),
            Some(Outcome::Failed(SendFailure::CancelRace { nonce: 5, .. }))
        ));
        settle_tasks().await;
        let notifications = drain(&mut rx);
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].text.contains("already mined and can not be canceled"));
    }

    #[tokio::test]
    async fn test_cancel_supersedes_target() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, _rx) = coordinator(chain, Default::default());
        coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();
        let sent = coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();
        let target = coordinator.pending_transaction_by_hash(&sent.hash).await.unwrap();
        assert_eq!(target.nonce, Some(6));

        let cancel = coordinator
            .cancel_transaction(TransactionRequest::cancellation_of(&target, Quantity(9)), &secret())
            .await
            .unwrap();

        assert_eq!(cancel.events.settled().await, Outcome::Confirmed(None));
        let pending = coordinator.pending_transactions().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].hash, cancel.hash);
        assert_eq!(pending[1].nonce, Some(6));
        assert_eq!(pending[1].to.as_deref(), Some(OWNER));
    }

    #[tokio::test]
    async fn test_signing_failure_leaves_store_untouched() {
        let chain = Arc::new(MockChain::new(5));
        let (coordinator, mut rx) = coordinator_with(
            chain,
            Arc::new(MockSigner::rejecting()),
            Default::default(),
        );

        let result = coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await;

        assert!(matches!(result, Err(Error::Signing(_))));
        assert!(coordinator.pending_transactions().await.is_empty());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_change_network() {
        let chain = Arc::new(MockChain::new(0));
        let indexer = Arc::new(MockIndexer::with_records(
            vec![indexer_record("0xn1", OWNER, Some(0))],
            vec![],
        ));
        let (coordinator, _rx) = coordinator(chain, indexer);
        coordinator.update_transaction_history().await.unwrap();
        coordinator
            .handle_block_transactions(vec![block_tx("0xb", OWNER, Some(RECIPIENT), 7)], None)
            .await;

        assert!(matches!(
            coordinator.change_network(42).await,
            Err(Error::UnknownNetwork(42))
        ));
        assert_eq!(coordinator.active_network(), 1);

        coordinator.change_network(3).await.unwrap();
        assert_eq!(coordinator.active_network(), 3);
        assert!(!coordinator.is_primary_network());
        assert!(coordinator.transaction_history().await.is_empty());

        // Pending entry of network 1 stays but no longer drives nonces
        assert_eq!(coordinator.pending_transactions().await.len(), 1);
        assert_eq!(coordinator.next_nonce().await.unwrap(), 0);
        assert_eq!(coordinator.pending_balance().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pollers_update_balance_until_stopped() {
        let chain = Arc::new(MockChain::new(0));
        *chain.balance.lock().unwrap() = 100_000;
        let (coordinator, _rx) = coordinator(chain.clone(), Default::default());
        coordinator
            .pending
            .write()
            .await
            .add(pending_tx("0x1", OWNER, 0))
            .unwrap();

        coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(coordinator.balance().await, 100_000);
        assert_eq!(coordinator.pending_balance().await, 22_000);
        assert_eq!(coordinator.available_balance().await, 78_000);
        assert_eq!(coordinator.statistics().await.active_pollers, 2);

        chain.network.store(4, Ordering::SeqCst);
        coordinator.change_network(4).await.unwrap();
        assert_eq!(coordinator.statistics().await.active_pollers, 2);

        coordinator.stop().await;
        let calls = chain.balance_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(chain.balance_calls.load(Ordering::SeqCst), calls);
        assert_eq!(coordinator.statistics().await.active_pollers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_checks_node_network() {
        let chain = Arc::new(MockChain::new(0));
        chain.network.store(3, Ordering::SeqCst);
        let (coordinator, _rx) = coordinator(chain.clone(), Default::default());

        assert!(matches!(
            coordinator.start().await,
            Err(Error::NetworkMismatch {
                expected: 1,
                actual: 3
            })
        ));
        assert_eq!(coordinator.statistics().await.active_pollers, 0);

        chain.network.store(1, Ordering::SeqCst);
        coordinator.start().await.unwrap();
        assert_eq!(coordinator.statistics().await.active_pollers, 2);

        // Switching while the node stays on network 1 stops polling
        assert!(matches!(
            coordinator.change_network(4).await,
            Err(Error::NetworkMismatch {
                expected: 4,
                actual: 1
            })
        ));
        assert_eq!(coordinator.active_network(), 4);
        assert_eq!(coordinator.statistics().await.active_pollers, 0);
    }

    #[tokio::test]
    async fn test_statistics() {
        let chain = Arc::new(MockChain::new(0));
        let (coordinator, _rx) = coordinator(chain, Default::default());
        coordinator
            .send_transaction(transfer_request(OWNER), &secret())
            .await
            .unwrap();

        let stats = coordinator.statistics().await;
        assert_eq!(
            stats,
            CoordinatorStatistics {
                active_network: 1,
                pending_transactions: 1,
                history_transactions: 0,
                pending_value: 22_000,
                active_pollers: 0,
            }
        );
    }
}
