//! Pending-transaction admission buffer.

use crate::error::MempoolError;
use crate::transaction::LedgerTransaction;
use std::collections::HashSet;

/// Transactions admitted but not yet sealed, deduplicated by hash.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    pending: Vec<LedgerTransaction>,
    hashes: HashSet<String>,
}

impl Mempool {
    /// Creates an empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `tx` unless a transaction with the same hash is pending.
    pub fn admit(&mut self, tx: LedgerTransaction) -> Result<(), MempoolError> {
        if !self.hashes.insert(tx.hash.clone()) {
            return Err(MempoolError::DuplicateTransaction(tx.hash));
        }
        self.pending.push(tx);
        Ok(())
    }

    /// Returns true if a transaction with `hash` is pending.
    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    /// Up to `limit` pending transactions, highest fee first.
    pub fn select_by_fee(&self, limit: usize) -> Vec<LedgerTransaction> {
        let mut selected = self.pending.clone();
        selected.sort_by(|a, b| b.fee.cmp(&a.fee));
        selected.truncate(limit);
        selected
    }

    /// Up to `limit` pending transactions, oldest first.
    pub fn select_by_age(&self, limit: usize) -> Vec<LedgerTransaction> {
        let mut selected = self.pending.clone();
        selected.sort_by_key(|tx| tx.timestamp);
        selected.truncate(limit);
        selected
    }

    /// Removes every pending transaction whose hash appears in `transactions`.
    pub fn evict(&mut self, transactions: &[LedgerTransaction]) -> usize {
        let doomed: HashSet<&str> = transactions.iter().map(|tx| tx.hash.as_str()).collect();
        let before = self.pending.len();
        self.pending.retain(|tx| !doomed.contains(tx.hash.as_str()));
        self.hashes.retain(|hash| !doomed.contains(hash.as_str()));
        before - self.pending.len()
    }

    /// Drops every pending transaction.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.hashes.clear();
    }

    /// Pending transactions in admission order.
    pub fn pending(&self) -> &[LedgerTransaction] {
        &self.pending
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
