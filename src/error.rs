//! Error taxonomy for the ledger.
//!
//! Validation, authorization, crypto and duplicate failures are surfaced to
//! the caller.  Consensus and materialization failures are logged by the
//! engine and never abort the surrounding operation.

use crate::crypto::KeyError;
use thiserror::Error;

/// Failures raised by certificate signing and verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CertificateError {
    /// The signing key does not belong to the issuing institution.
    #[error("signing key does not match the institution public key")]
    KeyMismatch,
    /// The certificate carries no signature.
    #[error("certificate is not signed")]
    Unsigned,
    /// The signature does not verify over the content hash.
    #[error("certificate signature is invalid")]
    InvalidSignature,
    /// Canonical encoding or signing primitive failure.
    #[error("certificate encoding error: {0}")]
    Encoding(String),
}

/// Failures raised by transaction signing and verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// The signing key does not belong to `from_address`.
    #[error("cannot sign a transaction on behalf of another address")]
    ForeignSigning,
    /// Reward transactions have no sender and are never signed.
    #[error("transaction has no sender address to sign for")]
    MissingSender,
    /// The transaction carries no signature.
    #[error("transaction is not signed")]
    Unsigned,
    /// The signature does not verify over the transaction hash.
    #[error("transaction signature is invalid")]
    InvalidSignature,
    /// Canonical encoding or signing primitive failure.
    #[error("transaction encoding error: {0}")]
    Encoding(String),
}

/// Failures raised while sealing a block.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockError {
    /// Difficulty outside the supported `[1, 6]` range.
    #[error("difficulty {0} outside supported range 1..=6")]
    InvalidDifficulty(u8),
    /// The nonce search was cancelled before a valid hash was found.
    #[error("sealing cancelled")]
    SealCancelled,
    /// Canonical encoding failure.
    #[error("block encoding error: {0}")]
    Encoding(String),
}

/// Structural defects found while validating a chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The chain is empty or its first block is not a genesis block.
    #[error("chain does not start with a genesis block")]
    InvalidGenesis,
    /// `previous_hash` does not point at the preceding block.
    #[error("block {index} does not link to its predecessor")]
    BrokenLink {
        /// Position of the offending block.
        index: usize,
    },
    /// The stored hash differs from the recomputed one.
    #[error("block {index} hash does not match its contents")]
    HashMismatch {
        /// Position of the offending block.
        index: usize,
    },
    /// The hash lacks the required leading zeros.
    #[error("block {index} does not satisfy difficulty {difficulty}")]
    InsufficientWork {
        /// Position of the offending block.
        index: usize,
        /// Required number of leading zero hex digits.
        difficulty: u8,
    },
    /// A contained transaction failed signature verification.
    #[error("block {index} transaction {tx_id} failed verification: {reason}")]
    InvalidTransaction {
        /// Position of the offending block.
        index: usize,
        /// Identifier of the failing transaction.
        tx_id: String,
        /// Verification failure.
        reason: TransactionError,
    },
    /// The block's reward does not credit an authorized sealer.
    #[error("block {index} is not sealed by an authorized institution")]
    UnauthorizedSealer {
        /// Position of the offending block.
        index: usize,
    },
}

/// Failures raised by the mempool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MempoolError {
    /// A transaction with the same hash is already pending.
    #[error("transaction {0} is already pending")]
    DuplicateTransaction(String),
}

/// Failures raised by the authority registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// No institution is registered under the key.
    #[error("unknown institution {0}")]
    UnknownInstitution(String),
    /// An institution is already registered under the key.
    #[error("institution {0} already registered")]
    DuplicateInstitution(String),
    /// Filesystem failure while loading a roster.
    #[error("roster I/O error: {0}")]
    Io(String),
    /// The roster could not be parsed or a key failed to decode.
    #[error("roster parse error: {0}")]
    Parse(String),
}

/// Failures raised while replaying a transaction onto the certificate registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterializationError {
    /// The sender is not an authorized institution.
    #[error("sender {0} is not an authorized institution")]
    Unauthorized(String),
    /// The embedded certificate failed verification.
    #[error("certificate {id} failed verification: {reason}")]
    InvalidCertificate {
        /// Certificate identifier.
        id: String,
        /// Verification failure.
        reason: CertificateError,
    },
    /// The sender may not revoke the addressed certificate.
    #[error("{signer} may not revoke certificate {certificate_id}")]
    Forbidden {
        /// Certificate identifier.
        certificate_id: String,
        /// Sender attempting the revocation.
        signer: String,
    },
    /// The addressed certificate does not exist.
    #[error("certificate {0} not found")]
    CertificateNotFound(String),
    /// A privileged transaction arrived without a sender.
    #[error("transaction {0} has no sender")]
    MissingSender(String),
    /// The transaction's effect has already been applied.
    #[error("transaction {0} was already applied")]
    AlreadyApplied(String),
}

/// Failures raised by the ledger engine's public operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The transaction failed signature or shape validation.
    #[error("invalid transaction: {}", .0.join("; "))]
    InvalidTransaction(Vec<String>),
    /// The transaction is already pending.
    #[error("transaction {0} is already pending")]
    DuplicateTransaction(String),
    /// A transaction with the same id is already on chain.
    #[error("transaction {0} is already on chain")]
    AlreadyCommitted(String),
    /// The key is not an authorized institution.
    #[error("{0} is not an authorized institution")]
    Unauthorized(String),
    /// The key may not act on the addressed certificate.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The certificate failed field validation or verification.
    #[error("invalid certificate: {}", .0.join("; "))]
    InvalidCertificate(Vec<String>),
    /// The addressed certificate does not exist.
    #[error("certificate {0} not found")]
    CertificateNotFound(String),
    /// The addressed certificate is already revoked.
    #[error("certificate {0} is already revoked")]
    AlreadyRevoked(String),
    /// The block no longer extends the chain tip.
    #[error("block extends {found} but the tip is {expected}")]
    StaleBlock {
        /// Hash of the current tip.
        expected: String,
        /// `previous_hash` carried by the block.
        found: String,
    },
    /// A block handed to the engine failed structural checks.
    #[error("invalid block: {0}")]
    InvalidBlock(ChainError),
    /// Certificate signing failure.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    /// Transaction signing failure.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// Block sealing failure.
    #[error(transparent)]
    Block(#[from] BlockError),
    /// Key decoding failure.
    #[error(transparent)]
    Crypto(#[from] KeyError),
    /// The ledger configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<MempoolError> for LedgerError {
    fn from(err: MempoolError) -> Self {
        match err {
            MempoolError::DuplicateTransaction(hash) => Self::DuplicateTransaction(hash),
        }
    }
}

/// Failures raised while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// Difficulty outside the supported `[1, 6]` range.
    #[error("difficulty {0} outside supported range 1..=6")]
    InvalidDifficulty(u8),
}
