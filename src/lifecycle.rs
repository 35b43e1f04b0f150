//! Transaction action processing
//!
//! Send, resend and cancel share signing and submission and differ only in
//! how the new hash changes the pending store. The processor waits for the
//! hash, applies the store mutation for the action type and leaves the later
//! confirmation or error to a detached tracker.

use crate::classifier::{handle_sending_error, SendingError, SENDING_ERROR_TITLE};
use crate::events::{Outcome, SendFailure, TransactionEventEmitter};
use crate::nonce::NonceAllocator;
use crate::notification::{ErrorChannel, Notification};
use crate::pending::PendingTransactionStore;
use crate::transaction::{short_hash, LocalTransaction, NetworkId, Transaction, TransactionRequest};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// User-initiated action on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// New transaction
    Send,

    /// Same nonce, adjusted gas
    Resend,

    /// Zero-value self transfer at the same nonce
    Cancel,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Send => write!(f, "send"),
            ActionType::Resend => write!(f, "resend"),
            ActionType::Cancel => write!(f, "cancel"),
        }
    }
}

/// Notification for a cancellation whose target was already mined
pub fn cancel_race_notification(hash: Option<&str>) -> Notification {
    let text = match hash {
        Some(hash) => format!(
            "Transaction {} was already mined and can not be canceled",
            short_hash(hash)
        ),
        None => "Transaction was already mined and can not be canceled".to_string(),
    };
    Notification::danger(SENDING_ERROR_TITLE, text)
}

/// Applies the outcome of a broadcast attempt to the pending store
pub struct ActionProcessor {
    pending: Arc<RwLock<PendingTransactionStore>>,
    nonces: Arc<NonceAllocator>,
    channel: Arc<dyn ErrorChannel>,

    /// Current time provider (for testing)
    current_time_fn: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl ActionProcessor {
    pub fn new(
        pending: Arc<RwLock<PendingTransactionStore>>,
        nonces: Arc<NonceAllocator>,
        channel: Arc<dyn ErrorChannel>,
    ) -> Self {
        Self {
            pending,
            nonces,
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

    /// Drive one attempt until its hash is known
    ///
    /// Resolves with the new hash as soon as the node assigned one. Failures
    /// of the attempt, before or after the hash, are classified and reported
    /// on the error channel by a detached tracker.
    pub async fn process_transaction_action(
        &self,
        action: ActionType,
        request: TransactionRequest,
        events: &TransactionEventEmitter,
        network_id: NetworkId,
    ) -> Result<String> {
        self.track_outcome(&request, events);

        let hash = events.submitted().await.map_err(|failure| {
            debug!("{} attempt failed before a hash was assigned", action);
            Error::from(failure)
        })?;
        info!("{} attempt from {} got hash {}", action, request.from, hash);

        match action {
            ActionType::Send => {
                self.handle_transaction_sending_hash(request, &hash, network_id)
                    .await?
            }
            ActionType::Resend => self.handle_transaction_resending_hash(&request, &hash).await,
            ActionType::Cancel => {
                self.handle_transaction_canceling_hash(request, &hash, events, network_id)
                    .await?
            }
        }

        Ok(hash)
    }

    /// Send: insert the transaction under its new hash
    pub async fn handle_transaction_sending_hash(
        &self,
        request: TransactionRequest,
        new_hash: &str,
        network_id: NetworkId,
    ) -> Result<()> {
        let transaction = self.local_transaction(request, new_hash, network_id);
        let mut pending = self.pending.write().await;

        if pending.get_by_hash(new_hash).is_some() {
            debug!("Transaction {} already tracked from a block", new_hash);
            return Ok(());
        }
        pending.add(transaction).map_err(|e| {
            error!("Sent transaction {} could not be tracked: {}", new_hash, e);
            e
        })
    }

    /// Resend: swap the hash of the entry at the same nonce, in place
    pub async fn handle_transaction_resending_hash(&self, request: &TransactionRequest, new_hash: &str) {
        let mut pending = self.pending.write().await;
        if let Err(e) = pending.update_hash(
            &request.from,
            request.nonce,
            request.replaces.as_deref(),
            new_hash,
        ) {
            warn!("Resent transaction {} has no pending entry: {}", new_hash, e);
        }
    }

    /// Cancel: accept the cancellation only if the target is not mined yet
    ///
    /// When the chain nonce already reached the target nonce the target was
    /// mined first; that is reported and the attempt settles as failed, so
    /// no confirmation is ever emitted. Otherwise the attempt is confirmed as
    /// superseding and the cancellation takes over the target's slot.
    pub async fn handle_transaction_canceling_hash(
        &self,
        request: TransactionRequest,
        new_hash: &str,
        events: &TransactionEventEmitter,
        network_id: NetworkId,
    ) -> Result<()> {
        let target_nonce = request
            .nonce
            .ok_or_else(|| Error::Internal("cancellation without a nonce".to_string()))?;

        let chain_nonce = match self.nonces.get_nonce_in_block(&request.from).await {
            Ok(nonce) => nonce,
            Err(e) => {
                handle_sending_error(
                    self.channel.as_ref(),
                    &SendingError::for_hash(Some(new_hash.to_string())).with_message(e.to_string()),
                );
                return Err(e);
            }
        };

        if chain_nonce >= target_nonce {
            warn!(
                "Cancellation {} too late: nonce {} already mined (chain nonce {})",
                new_hash, target_nonce, chain_nonce
            );
            self.channel
                .emit(cancel_race_notification(request.replaces.as_deref()));
            events.emit_error(SendFailure::CancelRace {
                nonce: target_nonce,
                chain_nonce,
            });
            return Ok(());
        }

        events.emit_confirmation(None);

        let previous_hash = request.replaces.clone();
        let transaction = self.local_transaction(request, new_hash, network_id);
        let mut pending = self.pending.write().await;
        match pending.replace(transaction.clone(), previous_hash.as_deref()) {
            Ok(()) => Ok(()),
            Err(Error::TransactionNotFound(_)) => pending.add(transaction),
            Err(e) => Err(e),
        }
    }

    fn local_transaction(
        &self,
        request: TransactionRequest,
        hash: &str,
        network_id: NetworkId,
    ) -> Transaction {
        Transaction::from_local(
            LocalTransaction {
                request,
                hash: hash.to_string(),
            },
            network_id,
            (self.current_time_fn)(),
        )
    }

    /// Report broadcast failures of the attempt once it settles
    fn track_outcome(&self, request: &TransactionRequest, events: &TransactionEventEmitter) {
        let channel = self.channel.clone();
        let events = events.clone();
        let replaced_hash = request.replaces.clone();

        tokio::spawn(async move {
            match events.settled().await {
                Outcome::Confirmed(receipt) => {
                    debug!(
                        "Attempt {:?} confirmed (receipt: {})",
                        events.transaction_hash(),
                        receipt.is_some()
                    );
                }
                Outcome::Failed(SendFailure::Broadcast { message, receipt }) => {
                    let hash = events.transaction_hash().or(replaced_hash);
                    handle_sending_error(
                        channel.as_ref(),
                        &SendingError::for_hash(hash)
                            .with_message(message)
                            .with_receipt(receipt),
                    );
                }
                // Reported where the race was detected
                Outcome::Failed(SendFailure::CancelRace { .. }) => {}
            }
        });
    }
}

pub(crate) fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
