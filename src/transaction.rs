//! Canonical transaction model
//!
//! Raw records arrive from three sources: transactions observed in polled
//! blocks, records served by the history indexer, and transactions this
//! wallet submitted itself. Each source has its own record type and is
//! normalized into [`Transaction`] at the ingestion boundary through
//! [`RawTransaction::into_canonical`].

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Chain network identifier (1 = main network)
pub type NetworkId = u64;

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Unsigned integer quantity (wei, gas, nonce)
///
/// Deserializes from a JSON number, a decimal string or a `0x` hex string and
/// serializes as a decimal string so large values survive JSON consumers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "QuantityRepr", into = "String")]
pub struct Quantity(pub u128);

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = Error;

    fn try_from(repr: QuantityRepr) -> Result<Self> {
        match repr {
            QuantityRepr::Number(n) => Ok(Quantity(n as u128)),
            QuantityRepr::Text(text) => Quantity::parse(&text),
        }
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> Self {
        quantity.0.to_string()
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Quantity(value as u128)
    }
}

impl From<u128> for Quantity {
    fn from(value: u128) -> Self {
        Quantity(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Quantity {
    /// Zero quantity
    pub const ZERO: Quantity = Quantity(0);

    /// Parse a decimal or `0x`-prefixed hex quantity
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some("") => Ok(0),
            Some(hex) => u128::from_str_radix(hex, 16),
            None => text.parse::<u128>(),
        };

        parsed
            .map(Quantity)
            .map_err(|e| Error::InvalidRecord(format!("invalid quantity '{}': {}", text, e)))
    }

    /// Narrow to `u64` (nonces, chain ids, timestamps)
    pub fn as_u64(self) -> Result<u64> {
        u64::try_from(self.0)
            .map_err(|_| Error::InvalidRecord(format!("quantity {} does not fit in u64", self.0)))
    }
}

/// Canonical transaction entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash, unique per chain
    pub hash: String,

    /// Sender nonce (unknown for some indexer records)
    pub nonce: Option<u64>,

    /// Sender address
    pub from: String,

    /// Recipient address; `None` for contract creation
    pub to: Option<String>,

    /// Transferred value in wei
    pub value: Quantity,

    /// Gas price in wei
    pub gas_price: Quantity,

    /// Gas limit
    pub gas_limit: Quantity,

    /// Hex-encoded call data
    pub input: String,

    /// Wallet network the transaction belongs to
    pub network_id: NetworkId,

    /// Chain id the transaction was signed for, if known
    pub chain_id: Option<u64>,

    /// Unix timestamp (seconds)
    pub timestamp: Option<u64>,

    /// Execution status; `None` while pending
    pub success: Option<bool>,
}

impl Transaction {
    /// Normalize a transaction observed in a polled block
    pub fn from_block(raw: BlockTransaction, network_id: NetworkId, now: u64) -> Result<Self> {
        Ok(Self {
            hash: raw.hash,
            nonce: Some(raw.nonce.as_u64()?),
            from: raw.from,
            to: raw.to,
            value: raw.value,
            gas_price: raw.gas_price,
            gas_limit: raw.gas,
            input: raw.input,
            network_id,
            chain_id: raw.chain_id.map(Quantity::as_u64).transpose()?,
            timestamp: Some(now),
            success: None,
        })
    }

    /// Normalize a record served by the history indexer
    pub fn from_indexer(raw: IndexerRecord, network_id: NetworkId) -> Result<Self> {
        Ok(Self {
            hash: raw.hash,
            nonce: raw.nonce.map(Quantity::as_u64).transpose()?,
            from: raw.from,
            to: raw.to,
            value: raw.value,
            gas_price: raw.gas_price.unwrap_or_default(),
            gas_limit: raw.gas.unwrap_or_default(),
            input: raw.input.unwrap_or_default(),
            network_id,
            chain_id: None,
            timestamp: raw.timestamp.map(Quantity::as_u64).transpose()?,
            success: Some(raw.success.unwrap_or(true)),
        })
    }

    /// Normalize a transaction this wallet submitted
    pub fn from_local(raw: LocalTransaction, network_id: NetworkId, now: u64) -> Self {
        let LocalTransaction { request, hash } = raw;
        Self {
            hash,
            nonce: request.nonce,
            from: request.from,
            to: request.to,
            value: request.value,
            gas_price: request.gas_price,
            gas_limit: request.gas_limit,
            input: request.input,
            network_id,
            chain_id: request.chain_id,
            timestamp: Some(now),
            success: None,
        }
    }

    /// Whether this transaction deploys a contract
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Whether both transactions occupy the same sender nonce slot
    pub fn shares_nonce_with(&self, other: &Transaction) -> bool {
        matches!((self.nonce, other.nonce), (Some(a), Some(b)) if a == b)
            && same_address(&self.from, &other.from)
    }

    /// Upper bound of wei this transaction can take from the sender
    pub fn max_cost(&self) -> u128 {
        self.gas_price
            .0
            .saturating_mul(self.gas_limit.0)
            .saturating_add(self.value.0)
    }
}

/// Transaction as returned by the node inside a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTransaction {
    pub hash: String,
    pub nonce: Quantity,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Quantity,
    #[serde(default)]
    pub gas_price: Quantity,
    #[serde(default)]
    pub gas: Quantity,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub chain_id: Option<Quantity>,
}

/// Block as returned by the node, with full transaction objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(deserialize_with = "quantity_u64")]
    pub number: u64,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

impl Block {
    /// Decode a node block response fetched with full transaction objects
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}

fn quantity_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Quantity::deserialize(deserializer)?
        .as_u64()
        .map_err(serde::de::Error::custom)
}

/// Transaction record served by the history indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerRecord {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Quantity,
    #[serde(default)]
    pub timestamp: Option<Quantity>,
    #[serde(default)]
    pub nonce: Option<Quantity>,
    #[serde(default)]
    pub gas_price: Option<Quantity>,
    #[serde(default, alias = "gasLimit")]
    pub gas: Option<Quantity>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

impl IndexerRecord {
    /// Decode an indexer response holding a list of records
    pub fn list_from_json(value: serde_json::Value) -> Result<Vec<Self>> {
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}

/// Transaction this wallet signed and submitted, with the hash the node assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTransaction {
    pub request: TransactionRequest,
    pub hash: String,
}

/// Raw record from one of the three ingestion sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTransaction {
    /// Observed in a polled block
    Block(BlockTransaction),

    /// Served by the history indexer
    Indexer(IndexerRecord),

    /// Submitted by this wallet
    Local(LocalTransaction),
}

impl RawTransaction {
    /// Normalize into the canonical shape
    ///
    /// `now` stamps records whose source carries no timestamp of its own.
    pub fn into_canonical(self, network_id: NetworkId, now: u64) -> Result<Transaction> {
        match self {
            RawTransaction::Block(raw) => Transaction::from_block(raw, network_id, now),
            RawTransaction::Indexer(raw) => Transaction::from_indexer(raw, network_id),
            RawTransaction::Local(raw) => Ok(Transaction::from_local(raw, network_id, now)),
        }
    }
}

/// Locally built, signable transaction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: String,
    pub to: Option<String>,
    pub value: Quantity,
    pub gas_price: Quantity,
    pub gas_limit: Quantity,
    #[serde(default)]
    pub input: String,
    /// Allocated from the chain and the pending store when unset
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Hash of the pending transaction a resend or cancel supersedes
    #[serde(default)]
    pub replaces: Option<String>,
}

impl TransactionRequest {
    /// Plain value transfer; nonce is allocated at send time
    pub fn transfer(from: &str, to: &str, value: Quantity, gas_price: Quantity) -> Self {
        Self {
            from: from.to_string(),
            to: Some(to.to_string()),
            value,
            gas_price,
            gas_limit: Quantity::from(TRANSFER_GAS_LIMIT),
            input: String::new(),
            nonce: None,
            chain_id: None,
            replaces: None,
        }
    }

    /// Rebroadcast of a pending transaction at the same nonce with a new gas price
    pub fn replacement_of(transaction: &Transaction, gas_price: Quantity) -> Self {
        Self {
            from: transaction.from.clone(),
            to: transaction.to.clone(),
            value: transaction.value,
            gas_price,
            gas_limit: transaction.gas_limit,
            input: transaction.input.clone(),
            nonce: transaction.nonce,
            chain_id: transaction.chain_id,
            replaces: Some(transaction.hash.clone()),
        }
    }

    /// Zero-value self transfer superseding a pending transaction at its nonce
    pub fn cancellation_of(transaction: &Transaction, gas_price: Quantity) -> Self {
        Self {
            from: transaction.from.clone(),
            to: Some(transaction.from.clone()),
            value: Quantity::ZERO,
            gas_price,
            gas_limit: Quantity::from(TRANSFER_GAS_LIMIT),
            input: String::new(),
            nonce: transaction.nonce,
            chain_id: transaction.chain_id,
            replaces: Some(transaction.hash.clone()),
        }
    }
}

/// Compare two addresses ignoring hex case (checksummed vs lowercase)
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Shortened hash for user-facing text: first 5 characters and an ellipsis
pub fn short_hash(hash: &str) -> String {
    let prefix: String = hash.chars().take(5).collect();
    format!("{}...", prefix)
}
