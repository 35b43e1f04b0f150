//! # Wallet Transaction Coordinator
//!
//! Transaction lifecycle coordinator for an account-based wallet: manages
//! transactions from nonce allocation and broadcast until they are mined.
//!
//! This crate provides:
//! - Nonce allocation serialized per address
//! - Signing and broadcast through pluggable node and signer clients
//! - Send, resend and cancel workflows over a pending transaction store
//! - Reconciliation with polled blocks and indexer history
//! - Classification of send failures into user notifications

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

mod classifier;
mod client;
mod config;
mod coordinator;
mod error;
mod events;
mod history;
mod lifecycle;
mod nonce;
mod notification;
mod pending;
mod poller;
mod submission;
mod transaction;

#[cfg(test)]
mod test_utils;

pub use classifier::{
    classify, handle_sending_error, sending_error_notification, SendingError, SendingErrorKind,
    SENDING_ERROR_TITLE,
};
pub use client::{ChainClient, Credential, HistoryIndexer, TransactionSigner};
pub use config::{CoordinatorConfig, NetworkConfig};
pub use coordinator::{ActionResult, CoordinatorStatistics, TransactionCoordinator};
pub use error::{Error, Result};
pub use events::{Outcome, Receipt, SendFailure, TransactionEventEmitter};
pub use history::{BlockReport, HistoryReconciler, HISTORY_ERROR_TITLE, NEW_TRANSACTIONS_TITLE};
pub use lifecycle::{cancel_race_notification, ActionProcessor, ActionType};
pub use nonce::NonceAllocator;
pub use notification::{ErrorChannel, Notification, NotificationKind};
pub use pending::PendingTransactionStore;
pub use poller::{BalancePoller, BlockPoller, Poller, PollerHandle, Pollers};
pub use submission::{BroadcastCoordinator, SubmissionResult};
pub use transaction::{
    same_address, short_hash, Block, BlockTransaction, IndexerRecord, LocalTransaction, NetworkId,
    Quantity, RawTransaction, Transaction, TransactionRequest, TRANSFER_GAS_LIMIT,
};
