//! Pending transaction store
//!
//! Ordered collection of broadcast but not yet mined transactions. Insertion
//! order is kept for display. No two entries share a hash, and no two entries
//! of the same sender share a nonce: a resend or cancel replaces the entry at
//! its nonce instead of adding a second one.

use crate::transaction::{same_address, NetworkId, Transaction};
use crate::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct PendingTransactionStore {
    transactions: Vec<Transaction>,
}

impl PendingTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction
    pub fn add(&mut self, transaction: Transaction) -> Result<()> {
        if let Some(existing) = self.find_conflict(&transaction) {
            return Err(Error::DuplicateTransaction(format!(
                "{} conflicts with pending {} (nonce {:?})",
                transaction.hash, existing.hash, existing.nonce
            )));
        }

        debug!(
            "Registered pending transaction {} (nonce {:?})",
            transaction.hash, transaction.nonce
        );
        self.transactions.push(transaction);
        Ok(())
    }

    /// Replace the hash of the entry at `from`/`nonce`, keeping its position
    ///
    /// Falls back to locating the entry by `previous_hash` when no entry holds
    /// that nonce.
    pub fn update_hash(
        &mut self,
        from: &str,
        nonce: Option<u64>,
        previous_hash: Option<&str>,
        new_hash: &str,
    ) -> Result<()> {
        let position = self
            .position_of(from, nonce, previous_hash)
            .ok_or_else(|| Error::TransactionNotFound(describe(from, nonce, previous_hash)))?;

        if self
            .transactions
            .iter()
            .enumerate()
            .any(|(i, tx)| i != position && tx.hash == new_hash)
        {
            return Err(Error::DuplicateTransaction(new_hash.to_string()));
        }

        let entry = &mut self.transactions[position];
        debug!("Replaced pending hash {} with {}", entry.hash, new_hash);
        entry.hash = new_hash.to_string();
        Ok(())
    }

    /// Replace the whole entry occupying the nonce slot of `transaction`
    pub fn replace(&mut self, transaction: Transaction, previous_hash: Option<&str>) -> Result<()> {
        let position = self
            .position_of(&transaction.from, transaction.nonce, previous_hash)
            .ok_or_else(|| {
                Error::TransactionNotFound(describe(
                    &transaction.from,
                    transaction.nonce,
                    previous_hash,
                ))
            })?;

        debug!(
            "Superseded pending {} with {}",
            self.transactions[position].hash, transaction.hash
        );
        self.transactions[position] = transaction;
        Ok(())
    }

    /// Remove the entry with `hash`
    pub fn remove(&mut self, hash: &str) -> Option<Transaction> {
        let position = self.transactions.iter().position(|tx| tx.hash == hash)?;
        Some(self.transactions.remove(position))
    }

    /// Drop every entry that `mined` shows as mined: same hash, or another
    /// transaction of the same sender at the same nonce
    pub fn remove_mined(&mut self, mined: &[Transaction]) -> Vec<Transaction> {
        let (removed, kept): (Vec<_>, Vec<_>) = self.transactions.drain(..).partition(|pending| {
            mined
                .iter()
                .any(|tx| tx.hash == pending.hash || tx.shares_nonce_with(pending))
        });
        self.transactions = kept;
        removed
    }

    /// Entry with the same hash, or the same sender and nonce
    pub fn find_conflict(&self, transaction: &Transaction) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.hash == transaction.hash || tx.shares_nonce_with(transaction))
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.hash == hash)
    }

    pub fn find_by_nonce(&self, from: &str, nonce: u64) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.nonce == Some(nonce) && same_address(&tx.from, from))
    }

    /// Highest nonce sent by `from` on `network_id`
    pub fn max_nonce(&self, from: &str, network_id: NetworkId) -> Option<u64> {
        self.outgoing(from, network_id).filter_map(|tx| tx.nonce).max()
    }

    /// Wei committed by pending transactions sent by `from` on `network_id`
    pub fn pending_balance(&self, from: &str, network_id: NetworkId) -> u128 {
        self.outgoing(from, network_id)
            .map(Transaction::max_cost)
            .fold(0u128, u128::saturating_add)
    }

    fn outgoing<'a>(
        &'a self,
        from: &'a str,
        network_id: NetworkId,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions
            .iter()
            .filter(move |tx| tx.network_id == network_id && same_address(&tx.from, from))
    }

    fn position_of(&self, from: &str, nonce: Option<u64>, hash: Option<&str>) -> Option<usize> {
        nonce
            .and_then(|nonce| {
                self.transactions
                    .iter()
                    .position(|tx| tx.nonce == Some(nonce) && same_address(&tx.from, from))
            })
            .or_else(|| hash.and_then(|hash| self.transactions.iter().position(|tx| tx.hash == hash)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }

    pub fn to_vec(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

fn describe(from: &str, nonce: Option<u64>, hash: Option<&str>) -> String {
    format!(
        "{} nonce {:?} hash {}",
        from,
        nonce,
        hash.unwrap_or("unknown")
    )
}
