//! External collaborators: chain node, signer and history indexer
//!
//! The coordinator never talks JSON-RPC or HTTP itself; the embedding
//! application supplies implementations of these traits.

use crate::events::Receipt;
use crate::transaction::{Block, IndexerRecord, NetworkId, TransactionRequest};
use crate::Result;
use async_trait::async_trait;
use std::fmt;

/// Chain node access
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Transaction count of `address` at the latest block
    async fn get_transaction_count(&self, address: &str) -> Result<u64>;

    /// Submit a signed raw transaction and return the hash the node assigned
    async fn send_raw_transaction(&self, raw_transaction: &str) -> Result<String>;

    /// Wait until the transaction is mined and return its receipt
    async fn wait_for_receipt(&self, hash: &str) -> Result<Receipt>;

    /// Network id reported by the node
    async fn network_id(&self) -> Result<NetworkId>;

    /// Latest block with full transaction objects
    async fn latest_block(&self) -> Result<Block>;

    /// Native balance of `address` in wei
    async fn get_balance(&self, address: &str) -> Result<u128>;
}

/// Secret unlocking the wallet key; only ever handed to the signer
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Wallet signing capability
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign `request` and return the hex-encoded raw transaction
    async fn sign_transaction(
        &self,
        request: &TransactionRequest,
        credential: &Credential,
    ) -> Result<String>;
}

/// Transaction history service
#[async_trait]
pub trait HistoryIndexer: Send + Sync {
    /// Normal (externally owned account) transactions of `address`
    async fn transaction_history(
        &self,
        address: &str,
        network_id: NetworkId,
    ) -> Result<Vec<IndexerRecord>>;

    /// Internal (contract-initiated) transactions of `address`
    async fn internal_transactions(
        &self,
        address: &str,
        network_id: NetworkId,
    ) -> Result<Vec<IndexerRecord>>;
}
