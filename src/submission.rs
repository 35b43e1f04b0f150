//! Transaction submission
//!
//! Signs a request, hands the raw transaction to the node and binds the
//! node's lifecycle signals to a fresh [`TransactionEventEmitter`]. Nothing
//! here touches the pending store.

use crate::classifier::{handle_sending_error, SendingError};
use crate::client::{ChainClient, Credential, TransactionSigner};
use crate::events::{SendFailure, TransactionEventEmitter};
use crate::nonce::NonceAllocator;
use crate::notification::ErrorChannel;
use crate::transaction::{NetworkId, TransactionRequest};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a submission
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    /// Request as signed, nonce filled in
    pub request: TransactionRequest,

    /// Lifecycle signals of this attempt
    pub events: TransactionEventEmitter,
}

/// Drives signing, then submission
pub struct BroadcastCoordinator {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn TransactionSigner>,
    nonces: Arc<NonceAllocator>,
    channel: Arc<dyn ErrorChannel>,
}

impl BroadcastCoordinator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TransactionSigner>,
        nonces: Arc<NonceAllocator>,
        channel: Arc<dyn ErrorChannel>,
    ) -> Self {
        Self {
            client,
            signer,
            nonces,
            channel,
        }
    }

    /// Sign and submit `request`
    ///
    /// Allocates a nonce when the request has none. A signing failure is
    /// reported on the error channel and aborts before anything reaches the
    /// node. On success the returned emitter receives the hash and, later,
    /// the confirmation or error.
    pub async fn send_signed_transaction(
        &self,
        mut request: TransactionRequest,
        credential: &Credential,
        network_id: NetworkId,
    ) -> Result<SubmissionResult> {
        if request.nonce.is_none() {
            match self.nonces.get_next_nonce(&request.from, network_id).await {
                Ok(nonce) => request.nonce = Some(nonce),
                Err(e) => {
                    handle_sending_error(
                        self.channel.as_ref(),
                        &SendingError::for_hash(request.replaces.clone()).with_message(e.to_string()),
                    );
                    return Err(e);
                }
            }
        }

        debug!(
            "Signing transaction from {} with nonce {:?}",
            request.from, request.nonce
        );
        let raw_transaction = match self.signer.sign_transaction(&request, credential).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Signing rejected for {}: {}", request.from, e);
                handle_sending_error(
                    self.channel.as_ref(),
                    &SendingError::for_hash(request.replaces.clone()),
                );
                return Err(match e {
                    Error::Signing(_) => e,
                    other => Error::Signing(other.to_string()),
                });
            }
        };

        let events = TransactionEventEmitter::new();
        self.spawn_broadcast(raw_transaction, events.clone());

        info!(
            "Transaction from {} with nonce {:?} handed to node",
            request.from, request.nonce
        );
        Ok(SubmissionResult { request, events })
    }

    /// Relay the node's hash, receipt and error signals onto `events`
    fn spawn_broadcast(&self, raw_transaction: String, events: TransactionEventEmitter) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let hash = match client.send_raw_transaction(&raw_transaction).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Node rejected transaction: {}", e);
                    events.emit_error(SendFailure::broadcast(e.to_string()));
                    return;
                }
            };
            events.emit_transaction_hash(hash.clone());

            match client.wait_for_receipt(&hash).await {
                Ok(receipt) if receipt.status => {
                    info!(
                        "Transaction {} mined in block {}",
                        hash, receipt.block_number
                    );
                    events.emit_confirmation(Some(receipt));
                }
                Ok(receipt) => {
                    warn!("Transaction {} failed in block {}", hash, receipt.block_number);
                    events.emit_error(SendFailure::Broadcast {
                        message: "transaction execution failed".to_string(),
                        receipt: Some(receipt),
                    });
                }
                Err(e) => {
                    warn!("Waiting for receipt of {} failed: {}", hash, e);
                    events.emit_error(SendFailure::broadcast(e.to_string()));
                }
            }
        });
    }
}
