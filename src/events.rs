//! Per-attempt broadcast lifecycle signals
//!
//! A [`TransactionEventEmitter`] carries at most one transaction hash and,
//! later, at most one outcome (confirmation or error). Both are kept in a
//! `watch` channel, so a subscriber that attaches after an event fired still
//! observes it.

use crate::Error;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// `false` when execution failed
    pub status: bool,
}

/// Why an attempt did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The node rejected the transaction, or it failed on-chain
    Broadcast {
        message: String,
        receipt: Option<Receipt>,
    },

    /// The cancellation target was mined before the cancellation landed
    CancelRace { nonce: u64, chain_nonce: u64 },
}

impl SendFailure {
    pub fn broadcast(message: impl Into<String>) -> Self {
        SendFailure::Broadcast {
            message: message.into(),
            receipt: None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            SendFailure::Broadcast { message, .. } => message.clone(),
            SendFailure::CancelRace { nonce, chain_nonce } => format!(
                "transaction with nonce {} already mined (chain nonce {})",
                nonce, chain_nonce
            ),
        }
    }
}

impl From<SendFailure> for Error {
    fn from(failure: SendFailure) -> Self {
        match failure {
            SendFailure::Broadcast { message, .. } => Error::Broadcast(message),
            SendFailure::CancelRace { nonce, chain_nonce } => Error::CancelRace { nonce, chain_nonce },
        }
    }
}

/// Final signal of an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Mined, or a cancellation accepted as superseding its target
    Confirmed(Option<Receipt>),

    /// The attempt failed
    Failed(SendFailure),
}

#[derive(Debug, Clone, Default)]
struct AttemptState {
    hash: Option<String>,
    outcome: Option<Outcome>,
}

/// Lifecycle signals of a single broadcast attempt
///
/// Cloning yields another handle to the same attempt. Never reused across
/// attempts.
#[derive(Debug, Clone)]
pub struct TransactionEventEmitter {
    state: Arc<watch::Sender<AttemptState>>,
}

impl Default for TransactionEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionEventEmitter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AttemptState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Record the hash assigned by the node
    ///
    /// Returns `false` if a hash was already recorded or the attempt had
    /// already settled.
    pub fn emit_transaction_hash(&self, hash: impl Into<String>) -> bool {
        let hash = hash.into();
        let emitted = self.state.send_if_modified(|state| {
            if state.hash.is_some() || state.outcome.is_some() {
                return false;
            }
            state.hash = Some(hash.clone());
            true
        });

        if emitted {
            debug!("Attempt received transaction hash {}", hash);
        }
        emitted
    }

    /// Settle the attempt as confirmed; ignored once settled
    pub fn emit_confirmation(&self, receipt: Option<Receipt>) -> bool {
        self.settle(Outcome::Confirmed(receipt))
    }

    /// Settle the attempt as failed; ignored once settled
    pub fn emit_error(&self, failure: SendFailure) -> bool {
        self.settle(Outcome::Failed(failure))
    }

    fn settle(&self, outcome: Outcome) -> bool {
        self.state.send_if_modified(|state| {
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            true
        })
    }

    /// Hash recorded so far
    pub fn transaction_hash(&self) -> Option<String> {
        self.state.borrow().hash.clone()
    }

    /// Outcome recorded so far
    pub fn outcome(&self) -> Option<Outcome> {
        self.state.borrow().outcome.clone()
    }

    /// Resolve once the hash is known or the attempt failed before one was
    pub async fn submitted(&self) -> Result<String, SendFailure> {
        let mut rx = self.state.subscribe();
        let state = match rx
            .wait_for(|state| state.hash.is_some() || state.outcome.is_some())
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => return Err(SendFailure::broadcast("event channel closed")),
        };

        match (state.hash, state.outcome) {
            (Some(hash), _) => Ok(hash),
            (None, Some(Outcome::Failed(failure))) => Err(failure),
            (None, _) => Err(SendFailure::broadcast(
                "attempt settled without a transaction hash",
            )),
        }
    }

    /// Resolve once the attempt is confirmed or failed
    ///
    /// Dropping the returned future unsubscribes.
    pub async fn settled(&self) -> Outcome {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|state| state.outcome.is_some()).await;
        match result {
            Ok(state) => state
                .outcome
                .clone()
                .unwrap_or_else(|| Outcome::Failed(SendFailure::broadcast("missing outcome"))),
            Err(_) => Outcome::Failed(SendFailure::broadcast("event channel closed")),
        }
    }
}
