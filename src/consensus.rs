//! Longest-valid-chain reconciliation between peers.
//!
//! A peer chain replaces the local chain only when it is strictly longer and
//! passes the configured validation.  Two knobs are explicit policy rather
//! than incidental behaviour:
//!
//! * [`ValidationMode`]: the default [`ValidationMode::LinkageOnly`] checks
//!   genesis shape and `previous_hash` chaining, nothing more.  Blocks with
//!   forged transactions or missing work are accepted under it; choose
//!   [`ValidationMode::Full`] to re-verify hashes, work, every signature and
//!   that each block was sealed by a currently authorized institution.
//! * [`TieBreak`]: among equally long winners [`TieBreak::FirstSeen`] keeps
//!   whichever appears first in the peer list, which is non-deterministic when
//!   peers are discovered concurrently.  [`TieBreak::LowestTipHash`] picks the
//!   same winner regardless of order.

use crate::authority::AuthorityRegistry;
use crate::block::{validate_chain, validate_linkage, Block};
use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// How thoroughly a candidate chain is checked before adoption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// Genesis shape and hash linkage only.
    #[default]
    LinkageOnly,
    /// Linkage plus block hashes, work, transaction signatures and sealer
    /// authorization.
    Full,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "linkage" | "linkage-only" => Ok(Self::LinkageOnly),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown validation mode {other:?}")),
        }
    }
}

/// Resolution among candidate chains of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Keep the first qualifying peer in iteration order.
    #[default]
    FirstSeen,
    /// Prefer the chain whose tip hash sorts lowest.
    LowestTipHash,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "first-seen" | "first" => Ok(Self::FirstSeen),
            "lowest-hash" | "lowest-tip-hash" => Ok(Self::LowestTipHash),
            other => Err(format!("unknown tie-break {other:?}")),
        }
    }
}

/// Reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Candidate validation depth.
    pub validation: ValidationMode,
    /// Tie resolution among equally long candidates.
    pub tie_break: TieBreak,
}

/// A chain reported by one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerChain {
    /// Peer identifier (base URL or node id).
    pub peer: String,
    /// Full chain as reported by the peer.
    pub chain: Vec<Block>,
}

impl PeerChain {
    /// Pairs a peer identifier with its chain.
    pub fn new(peer: impl Into<String>, chain: Vec<Block>) -> Self {
        Self {
            peer: peer.into(),
            chain,
        }
    }

    fn tip_hash(&self) -> &str {
        self.chain
            .last()
            .map(|block| block.hash.as_str())
            .unwrap_or("")
    }
}

/// Checks that every block after genesis rewards an authorized sealer.
pub fn validate_sealers(chain: &[Block], authorities: &AuthorityRegistry) -> Result<(), ChainError> {
    for (index, block) in chain.iter().enumerate().skip(1) {
        match block.sealer() {
            Some(sealer) if authorities.is_authorized(sealer) => {}
            _ => return Err(ChainError::UnauthorizedSealer { index }),
        }
    }
    Ok(())
}

/// Checks `chain` according to `mode`.
///
/// `authorities` is only consulted under [`ValidationMode::Full`].
pub fn validate_candidate(
    chain: &[Block],
    mode: ValidationMode,
    difficulty: u8,
    authorities: &AuthorityRegistry,
) -> Result<(), ChainError> {
    match mode {
        ValidationMode::LinkageOnly => validate_linkage(chain),
        ValidationMode::Full => {
            validate_chain(chain, difficulty)?;
            validate_sealers(chain, authorities)
        }
    }
}

/// Picks the peer chain that should replace a local chain of `local_len`
/// blocks, returning its index in `peers`.
pub fn select_candidate(
    local_len: usize,
    peers: &[PeerChain],
    policy: &ReconcilePolicy,
    difficulty: u8,
    authorities: &AuthorityRegistry,
) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in peers.iter().enumerate() {
        let len = candidate.chain.len();
        if len <= local_len {
            debug!(peer = %candidate.peer, len, local_len, "peer chain not longer");
            continue;
        }
        if let Err(err) = validate_candidate(&candidate.chain, policy.validation, difficulty, authorities)
        {
            warn!(peer = %candidate.peer, error = %err, "rejecting peer chain");
            continue;
        }
        let replace = match best {
            None => true,
            Some(current) => {
                let incumbent = &peers[current];
                if len != incumbent.chain.len() {
                    len > incumbent.chain.len()
                } else {
                    match policy.tie_break {
                        TieBreak::FirstSeen => false,
                        TieBreak::LowestTipHash => candidate.tip_hash() < incumbent.tip_hash(),
                    }
                }
            }
        };
        if replace {
            best = Some(idx);
        }
    }
    best
}
