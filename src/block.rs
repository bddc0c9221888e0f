//! Blocks, proof-of-work sealing and chain structure checks.

use crate::crypto::sha256_hex;
use crate::data::{canonical_json, now_ms};
use crate::error::{BlockError, ChainError};
use crate::transaction::{LedgerTransaction, TransactionPayload};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Lowest supported sealing difficulty.
pub const MIN_DIFFICULTY: u8 = 1;
/// Highest supported sealing difficulty.
pub const MAX_DIFFICULTY: u8 = 6;

/// Ordered batch of transactions linked to its predecessor by hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Millisecond timestamp at which the block was assembled.
    pub timestamp: u64,
    /// Transactions in inclusion order.
    pub transactions: Vec<LedgerTransaction>,
    /// Hash of the preceding block (`"0"` for genesis).
    pub previous_hash: String,
    /// Proof-of-work counter.
    pub nonce: u64,
    /// `SHA256(previous_hash ‖ timestamp ‖ canonical(transactions) ‖ nonce)`.
    pub hash: String,
}

/// Returns true if `difficulty` is within the supported range.
pub fn difficulty_in_range(difficulty: u8) -> bool {
    (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty)
}

fn hash_parts(previous_hash: &str, timestamp: u64, serialized: &str, nonce: u64) -> String {
    sha256_hex(format!("{previous_hash}{timestamp}{serialized}{nonce}").as_bytes())
}

fn has_leading_zeros(hash: &str, difficulty: u8) -> bool {
    let needed = difficulty as usize;
    hash.len() >= needed && hash.bytes().take(needed).all(|b| b == b'0')
}

impl Block {
    /// The shared genesis block: no transactions, timestamp zero, never sealed.
    pub fn genesis() -> Result<Self, BlockError> {
        let mut block = Self {
            timestamp: 0,
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Assembles an unsealed block on top of `previous_hash`.
    pub fn new(
        previous_hash: impl Into<String>,
        transactions: Vec<LedgerTransaction>,
    ) -> Result<Self, BlockError> {
        let mut block = Self {
            timestamp: now_ms(),
            transactions,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    fn serialized_transactions(&self) -> Result<String, BlockError> {
        canonical_json(&self.transactions).map_err(|err| BlockError::Encoding(err.to_string()))
    }

    /// Recomputes the block hash from its contents.
    pub fn compute_hash(&self) -> Result<String, BlockError> {
        let serialized = self.serialized_transactions()?;
        Ok(hash_parts(
            &self.previous_hash,
            self.timestamp,
            &serialized,
            self.nonce,
        ))
    }

    /// Searches nonces until the hash has `difficulty` leading zero hex digits.
    ///
    /// CPU bound and unbounded; callers serving requests should run it on a
    /// worker and use [`Block::seal_with_cancel`].
    pub fn seal(&mut self, difficulty: u8) -> Result<(), BlockError> {
        self.seal_with_cancel(difficulty, &AtomicBool::new(false))
    }

    /// Like [`Block::seal`], but gives up with [`BlockError::SealCancelled`]
    /// as soon as `cancel` is raised.
    pub fn seal_with_cancel(&mut self, difficulty: u8, cancel: &AtomicBool) -> Result<(), BlockError> {
        if !difficulty_in_range(difficulty) {
            return Err(BlockError::InvalidDifficulty(difficulty));
        }
        let serialized = self.serialized_transactions()?;
        let mut nonce = self.nonce;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(BlockError::SealCancelled);
            }
            let hash = hash_parts(&self.previous_hash, self.timestamp, &serialized, nonce);
            if has_leading_zeros(&hash, difficulty) {
                self.nonce = nonce;
                self.hash = hash;
                return Ok(());
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Returns true if the stored hash satisfies `difficulty`.
    pub fn meets_difficulty(&self, difficulty: u8) -> bool {
        has_leading_zeros(&self.hash, difficulty)
    }

    /// Public key credited by the block's reward.
    ///
    /// `None` unless the block ends with its only authority reward.
    pub fn sealer(&self) -> Option<&str> {
        let (last, rest) = self.transactions.split_last()?;
        if rest
            .iter()
            .any(|tx| matches!(tx.payload, TransactionPayload::AuthorityReward { .. }))
        {
            return None;
        }
        match &last.payload {
            TransactionPayload::AuthorityReward { sealer, .. } => Some(sealer.as_str()),
            _ => None,
        }
    }

    /// True if this is a genesis-shaped block.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH && self.transactions.is_empty()
    }

    /// Recomputes the hash and verifies every contained transaction.
    pub fn is_valid(&self) -> bool {
        self.check(0).is_ok()
    }

    fn check(&self, index: usize) -> Result<(), ChainError> {
        match self.compute_hash() {
            Ok(hash) if hash == self.hash => {}
            _ => return Err(ChainError::HashMismatch { index }),
        }
        for tx in &self.transactions {
            tx.verify()
                .map_err(|reason| ChainError::InvalidTransaction {
                    index,
                    tx_id: tx.id.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// Checks that `block`, placed at `index`, extends `previous` with a
/// consistent hash, sufficient work and verifiable transactions.
pub fn validate_successor(
    previous: &Block,
    block: &Block,
    index: usize,
    difficulty: u8,
) -> Result<(), ChainError> {
    if block.previous_hash != previous.hash {
        return Err(ChainError::BrokenLink { index });
    }
    block.check(index)?;
    if !block.meets_difficulty(difficulty) {
        return Err(ChainError::InsufficientWork { index, difficulty });
    }
    Ok(())
}

/// Checks genesis shape and `previous_hash` chaining only.
pub fn validate_linkage(chain: &[Block]) -> Result<(), ChainError> {
    match chain.first() {
        Some(genesis) if genesis.is_genesis() => {}
        _ => return Err(ChainError::InvalidGenesis),
    }
    for (index, pair) in chain.windows(2).enumerate() {
        if pair[1].previous_hash != pair[0].hash {
            return Err(ChainError::BrokenLink { index: index + 1 });
        }
    }
    Ok(())
}

/// Full structural check: linkage, per-block hash, work and transaction signatures.
pub fn validate_chain(chain: &[Block], difficulty: u8) -> Result<(), ChainError> {
    validate_linkage(chain)?;
    chain[0].check(0)?;
    for (offset, pair) in chain.windows(2).enumerate() {
        validate_successor(&pair[0], &pair[1], offset + 1, difficulty)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{load_or_derive_keypair, KeySource};

    fn sealed_on(previous: &Block, difficulty: u8) -> Block {
        let sealer = load_or_derive_keypair(&KeySource::Seed("sealer".into())).unwrap();
        let reward = LedgerTransaction::authority_reward(sealer.public_key_hex(), 10, 1).unwrap();
        let mut block = Block::new(previous.hash.clone(), vec![reward]).unwrap();
        block.seal(difficulty).unwrap();
        block
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis().unwrap();
        let b = Block::genesis().unwrap();
        assert_eq!(a, b);
        assert!(a.is_genesis());
        assert!(a.is_valid());
    }

    #[test]
    fn test_seal_meets_difficulty_and_hash_is_consistent() {
        let genesis = Block::genesis().unwrap();
        for difficulty in 1..=3u8 {
            let block = sealed_on(&genesis, difficulty);
            assert!(block.hash.starts_with(&"0".repeat(difficulty as usize)));
            assert_eq!(block.hash, block.compute_hash().unwrap());
            assert!(block.is_valid());
        }
    }

    #[test]
    fn test_seal_rejects_out_of_range_difficulty() {
        let mut block = Block::new("abc", Vec::new()).unwrap();
        assert_eq!(block.seal(0), Err(BlockError::InvalidDifficulty(0)));
        assert_eq!(block.seal(7), Err(BlockError::InvalidDifficulty(7)));
    }

    /// Unsealed block whose current hash misses `difficulty`.
    fn unsealed(previous_hash: &str, difficulty: u8) -> Block {
        let mut block = Block::new(previous_hash, Vec::new()).unwrap();
        while block.meets_difficulty(difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash().unwrap();
        }
        block
    }

    #[test]
    fn test_cancelled_seal_stops() {
        let mut block = unsealed("abc", 6);
        let before = block.clone();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            block.seal_with_cancel(6, &cancel),
            Err(BlockError::SealCancelled)
        );
        assert_eq!(block, before);
    }

    #[test]
    fn test_raised_flag_cancels_even_a_lucky_nonce() {
        let mut block = Block::new("abc", Vec::new()).unwrap();
        while !block.meets_difficulty(1) {
            block.nonce += 1;
            block.hash = block.compute_hash().unwrap();
        }
        let cancel = AtomicBool::new(true);
        assert_eq!(
            block.seal_with_cancel(1, &cancel),
            Err(BlockError::SealCancelled)
        );
    }

    #[test]
    fn test_sealer_is_the_trailing_reward() {
        let genesis = Block::genesis().unwrap();
        let sealed = sealed_on(&genesis, 1);
        let expected = load_or_derive_keypair(&KeySource::Seed("sealer".into()))
            .unwrap()
            .public_key_hex();
        assert_eq!(sealed.sealer(), Some(expected.as_str()));
        assert_eq!(genesis.sealer(), None);

        let reward = sealed.transactions[0].clone();
        let doubled = Block::new(genesis.hash.clone(), vec![reward.clone(), reward]).unwrap();
        assert_eq!(doubled.sealer(), None);
    }

    #[test]
    fn test_tampered_block_is_invalid() {
        let genesis = Block::genesis().unwrap();
        let mut block = sealed_on(&genesis, 1);
        block.timestamp += 1;
        assert!(!block.is_valid());
    }

    #[test]
    fn test_validate_chain_detects_broken_link() {
        let genesis = Block::genesis().unwrap();
        let first = sealed_on(&genesis, 1);
        let second = sealed_on(&first, 1);
        let chain = vec![genesis.clone(), first.clone(), second];
        assert!(validate_chain(&chain, 1).is_ok());

        let unlinked = sealed_on(&genesis, 1);
        let broken = vec![genesis, first, unlinked];
        assert_eq!(
            validate_linkage(&broken),
            Err(ChainError::BrokenLink { index: 2 })
        );
    }

    #[test]
    fn test_validate_chain_requires_work() {
        let genesis = Block::genesis().unwrap();
        let block = unsealed(&genesis.hash, 1);
        let chain = vec![genesis, block];
        assert_eq!(
            validate_chain(&chain, 1),
            Err(ChainError::InsufficientWork {
                index: 1,
                difficulty: 1
            })
        );
        assert_eq!(validate_linkage(&[]), Err(ChainError::InvalidGenesis));
    }
}
