//! Background pollers
//!
//! Each poller runs on a fixed interval in its own task. A [`PollerHandle`]
//! owns that task and aborts it when cancelled or dropped; [`Pollers`] keeps
//! at most one handle per kind and cancels the old one before installing a
//! replacement.

use crate::client::ChainClient;
use crate::history::HistoryReconciler;
use crate::transaction::{same_address, BlockTransaction, NetworkId};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Work done on every tick
#[async_trait]
pub trait Poller: Send + 'static {
    async fn poll(&mut self) -> Result<()>;
}

/// Owned handle of a running poller task
pub struct PollerHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Spawn `poller` on a fixed interval; the first tick fires immediately
    pub fn spawn<P: Poller>(name: &'static str, period: Duration, mut poller: P) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = poller.poll().await {
                    warn!(poller = name, "Poll failed: {}", e);
                }
            }
        });

        debug!(poller = name, "Poller started ({:?})", period);
        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task
    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!(poller = self.name, "Poller stopped");
    }
}

/// The coordinator's two poller slots
#[derive(Default)]
pub struct Pollers {
    block: Option<PollerHandle>,
    balance: Option<PollerHandle>,
}

impl Pollers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_block(&mut self, handle: PollerHandle) {
        if let Some(previous) = self.block.take() {
            previous.cancel();
        }
        self.block = Some(handle);
    }

    pub fn install_balance(&mut self, handle: PollerHandle) {
        if let Some(previous) = self.balance.take() {
            previous.cancel();
        }
        self.balance = Some(handle);
    }

    pub fn cancel_all(&mut self) {
        self.block.take();
        self.balance.take();
    }

    /// Number of installed pollers
    pub fn active(&self) -> usize {
        self.block.iter().chain(self.balance.iter()).count()
    }
}

/// Feeds transactions of new blocks that involve `address` to the reconciler
pub struct BlockPoller {
    client: Arc<dyn ChainClient>,
    reconciler: HistoryReconciler,
    address: String,
    network_id: NetworkId,
    last_block: Option<u64>,
}

impl BlockPoller {
    pub fn new(
        client: Arc<dyn ChainClient>,
        reconciler: HistoryReconciler,
        address: impl Into<String>,
        network_id: NetworkId,
    ) -> Self {
        Self {
            client,
            reconciler,
            address: address.into(),
            network_id,
            last_block: None,
        }
    }

    fn involves_address(&self, transaction: &BlockTransaction) -> bool {
        same_address(&transaction.from, &self.address)
            || transaction
                .to
                .as_deref()
                .map_or(false, |to| same_address(to, &self.address))
    }
}

#[async_trait]
impl Poller for BlockPoller {
    async fn poll(&mut self) -> Result<()> {
        let block = self.client.latest_block().await?;
        if matches!(self.last_block, Some(last) if block.number <= last) {
            return Ok(());
        }
        self.last_block = Some(block.number);

        let relevant: Vec<_> = block
            .transactions
            .into_iter()
            .filter(|tx| self.involves_address(tx))
            .collect();
        if relevant.is_empty() {
            return Ok(());
        }

        debug!(
            "Block {} has {} transactions of {}",
            block.number,
            relevant.len(),
            self.address
        );
        self.reconciler
            .handle_block_transactions(relevant, Some(self.network_id))
            .await;
        Ok(())
    }
}

/// Keeps the native balance of `address` current
pub struct BalancePoller {
    client: Arc<dyn ChainClient>,
    address: String,
    balance: Arc<RwLock<u128>>,
}

impl BalancePoller {
    pub fn new(client: Arc<dyn ChainClient>, address: impl Into<String>, balance: Arc<RwLock<u128>>) -> Self {
        Self {
            client,
            address: address.into(),
            balance,
        }
    }
}

#[async_trait]
impl Poller for BalancePoller {
    async fn poll(&mut self) -> Result<()> {
        let balance = self.client.get_balance(&self.address).await?;
        *self.balance.write().await = balance;
        Ok(())
    }
}
