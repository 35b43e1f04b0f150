//! Error types for the transaction coordinator

use crate::transaction::NetworkId;
use thiserror::Error;

/// Coordinator error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The signer rejected or failed to sign the request
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The node returned an error or could not be reached
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The history indexer returned an error or could not be reached
    #[error("Indexer error: {0}")]
    Indexer(String),

    /// Submission failed before a transaction hash was known
    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    /// The target of a cancellation was mined before the cancellation landed
    #[error("Transaction with nonce {nonce} already mined (chain nonce {chain_nonce})")]
    CancelRace { nonce: u64, chain_nonce: u64 },

    /// A pending entry with the same hash, or the same sender and nonce, exists
    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// A raw record could not be normalized into a transaction
    #[error("Invalid transaction record: {0}")]
    InvalidRecord(String),

    /// Network id is not configured
    #[error("Unknown network: {0}")]
    UnknownNetwork(NetworkId),

    /// The node serves another network than the active one
    #[error("Node is on network {actual}, expected {expected}")]
    NetworkMismatch {
        expected: NetworkId,
        actual: NetworkId,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
