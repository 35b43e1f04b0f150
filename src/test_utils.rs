//! In-memory collaborators for unit tests

use crate::client::{ChainClient, Credential, HistoryIndexer, TransactionSigner};
use crate::events::Receipt;
use crate::notification::Notification;
use crate::transaction::{
    Block, BlockTransaction, IndexerRecord, NetworkId, Quantity, Transaction, TransactionRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub const RECIPIENT: &str = "0x00000000000000000000000000000000000000bb";

pub fn notification_channel() -> (
    mpsc::UnboundedSender<Notification>,
    mpsc::UnboundedReceiver<Notification>,
) {
    mpsc::unbounded_channel()
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    notifications
}

/// Pending transfer of 1000 wei at gas price 1 on network 1
pub fn pending_tx(hash: &str, from: &str, nonce: u64) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        nonce: Some(nonce),
        from: from.to_string(),
        to: Some(RECIPIENT.to_string()),
        value: Quantity(1_000),
        gas_price: Quantity(1),
        gas_limit: Quantity(21_000),
        input: String::new(),
        network_id: 1,
        chain_id: None,
        timestamp: Some(0),
        success: None,
    }
}

pub fn transfer_request(from: &str) -> TransactionRequest {
    TransactionRequest::transfer(from, RECIPIENT, Quantity(1_000), Quantity(1))
}

pub fn block_tx(hash: &str, from: &str, to: Option<&str>, nonce: u64) -> BlockTransaction {
    BlockTransaction {
        hash: hash.to_string(),
        nonce: Quantity::from(nonce),
        from: from.to_string(),
        to: to.map(str::to_string),
        value: Quantity(1_000),
        gas_price: Quantity(1),
        gas: Quantity(21_000),
        input: String::new(),
        chain_id: Some(Quantity(1)),
    }
}

pub fn indexer_record(hash: &str, from: &str, nonce: Option<u64>) -> IndexerRecord {
    IndexerRecord {
        hash: hash.to_string(),
        from: from.to_string(),
        to: Some(RECIPIENT.to_string()),
        value: Quantity(1_000),
        timestamp: Some(Quantity(1_500_000_000)),
        nonce: nonce.map(Quantity::from),
        gas_price: Some(Quantity(1)),
        gas: Some(Quantity(21_000)),
        input: None,
        success: Some(true),
    }
}

/// Node double
///
/// Hashes are assigned in submission order. Receipts never arrive unless
/// `confirming` was called.
pub struct MockChain {
    pub nonce: AtomicU64,
    pub network: AtomicU64,
    pub count_calls: AtomicUsize,
    pub block_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
    pub sent: Mutex<Vec<String>>,
    pub block: Mutex<Option<Block>>,
    pub balance: Mutex<u128>,
    reject_with: Option<String>,
    receipt_status: Option<bool>,
}

impl MockChain {
    pub fn new(nonce: u64) -> Self {
        Self {
            nonce: AtomicU64::new(nonce),
            network: AtomicU64::new(1),
            count_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            block: Mutex::new(None),
            balance: Mutex::new(0),
            reject_with: None,
            receipt_status: None,
        }
    }

    pub fn rejecting(mut self, message: &str) -> Self {
        self.reject_with = Some(message.to_string());
        self
    }

    pub fn confirming(mut self, status: bool) -> Self {
        self.receipt_status = Some(status);
        self
    }

    pub fn hash_for(index: usize) -> String {
        format!("0x{:064x}", index + 1)
    }

    pub fn set_block(&self, block: Block) {
        *self.block.lock().unwrap() = Some(block);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_transaction_count(&self, _address: &str) -> Result<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn send_raw_transaction(&self, raw_transaction: &str) -> Result<String> {
        if let Some(message) = &self.reject_with {
            return Err(Error::Rpc(message.clone()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(raw_transaction.to_string());
        Ok(Self::hash_for(sent.len() - 1))
    }

    async fn wait_for_receipt(&self, hash: &str) -> Result<Receipt> {
        match self.receipt_status {
            Some(status) => Ok(Receipt {
                transaction_hash: hash.to_string(),
                block_number: 100,
                gas_used: 21_000,
                status,
            }),
            None => std::future::pending().await,
        }
    }

    async fn network_id(&self) -> Result<NetworkId> {
        Ok(self.network.load(Ordering::SeqCst))
    }

    async fn latest_block(&self) -> Result<Block> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.block
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Rpc("no block".to_string()))
    }

    async fn get_balance(&self, _address: &str) -> Result<u128> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.balance.lock().unwrap())
    }
}

/// Signer double; the raw transaction encodes sender and nonce
#[derive(Default)]
pub struct MockSigner {
    reject: bool,
}

impl MockSigner {
    pub fn rejecting() -> Self {
        Self { reject: true }
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    async fn sign_transaction(
        &self,
        request: &TransactionRequest,
        credential: &Credential,
    ) -> Result<String> {
        if self.reject || credential.expose().is_empty() {
            return Err(Error::Signing("invalid password".to_string()));
        }
        Ok(format!(
            "0xsigned:{}:{}",
            request.from,
            request.nonce.unwrap_or_default()
        ))
    }
}

/// Indexer double
#[derive(Default)]
pub struct MockIndexer {
    pub history: Mutex<Vec<IndexerRecord>>,
    pub internal: Mutex<Vec<IndexerRecord>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl MockIndexer {
    pub fn with_records(history: Vec<IndexerRecord>, internal: Vec<IndexerRecord>) -> Self {
        Self {
            history: Mutex::new(history),
            internal: Mutex::new(internal),
            ..Self::default()
        }
    }
}

#[async_trait]
impl HistoryIndexer for MockIndexer {
    async fn transaction_history(
        &self,
        _address: &str,
        _network_id: NetworkId,
    ) -> Result<Vec<IndexerRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Indexer("service unavailable".to_string()));
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn internal_transactions(
        &self,
        _address: &str,
        _network_id: NetworkId,
    ) -> Result<Vec<IndexerRecord>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Indexer("service unavailable".to_string()));
        }
        Ok(self.internal.lock().unwrap().clone())
    }
}

/// Let spawned tasks run until they block again
pub async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
