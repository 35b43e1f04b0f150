//! Nonce allocation
//!
//! The next nonce for an address is derived from the chain's transaction
//! count and the transactions still pending locally. Allocation and the
//! subsequent signing and submission are serialized per address through
//! [`NonceAllocator::lock_address`].

use crate::client::ChainClient;
use crate::pending::PendingTransactionStore;
use crate::transaction::NetworkId;
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

pub struct NonceAllocator {
    client: Arc<dyn ChainClient>,

    /// Read-only view of the pending store
    pending: Arc<RwLock<PendingTransactionStore>>,

    /// Per-address send locks, keyed by lowercase address
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NonceAllocator {
    pub fn new(client: Arc<dyn ChainClient>, pending: Arc<RwLock<PendingTransactionStore>>) -> Self {
        Self {
            client,
            pending,
            locks: DashMap::new(),
        }
    }

    /// Transaction count of `address` at the latest block
    pub async fn get_nonce_in_block(&self, address: &str) -> Result<u64> {
        let nonce = self.client.get_transaction_count(address).await?;
        debug!("Nonce in block for {}: {}", address, nonce);
        Ok(nonce)
    }

    /// Next nonce to use for `address` on `network_id`
    ///
    /// One above the highest pending nonce of the address, or the chain's
    /// count when nothing is pending.
    pub async fn get_next_nonce(&self, address: &str, network_id: NetworkId) -> Result<u64> {
        let max_pending = self.pending.read().await.max_nonce(address, network_id);

        match max_pending {
            Some(nonce) => {
                let next = nonce.checked_add(1).ok_or_else(|| {
                    Error::InvalidRecord(format!("pending nonce {} of {} is exhausted", nonce, address))
                })?;
                debug!("Next nonce for {} from pending store: {}", address, next);
                Ok(next)
            }
            None => self.get_nonce_in_block(address).await,
        }
    }

    /// Acquire the send lock of `address`
    ///
    /// Hold the guard from nonce allocation until the transaction is in the
    /// pending store, so the next sender sees it.
    pub async fn lock_address(&self, address: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(address.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
