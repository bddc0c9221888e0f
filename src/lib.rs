#![deny(missing_docs)]

//! # certchain
//!
//! **certchain** is a proof-of-authority ledger for educational
//! certificates.  Authorized institutions issue signed certificates, anyone
//! may verify them, and only the issuing institution may revoke them.  Every
//! lifecycle event is a signed transaction sealed into a hash-linked,
//! proof-of-work block; the certificate registry is never stored, only
//! derived by replaying the chain.
//!
//! ## Features
//!
//! * **Certificates**: the [`certificate`](certificate/index.html) module
//!   defines the [`Certificate`] record, its field validation, and
//!   secp256k1 signing over a canonical content hash.
//! * **Transactions and blocks**: [`LedgerTransaction`] carries an
//!   issuance, verification, revocation or authority reward; [`Block`]
//!   seals a batch of them with a small proof-of-work.
//! * **Authority registry**: [`AuthorityRegistry`] is the single admission
//!   predicate for privileged actions.
//! * **Ledger engine**: [`CertificateBlockchain`] admits transactions,
//!   seals blocks, materializes the registry best-effort and answers
//!   verification queries with a fixed precedence
//!   (not found, revoked, expired, then valid or invalid).
//! * **Reconciliation**: the [`consensus`](consensus/index.html) module
//!   selects the longest qualifying peer chain under an explicit
//!   [`ReconcilePolicy`].
//! * **Networking** (feature `net`): a peer transport trait, an HTTP
//!   implementation and a lock-guarded [`net::Node`].
//!
//! ## Usage
//!
//! ```rust
//! use certchain::{
//!     AuthorityRegistry, CertificateBlockchain, CertificateDraft, CertificateType,
//!     LedgerConfig, VerificationStatus,
//! };
//! use chrono::{Duration, Utc};
//!
//! let (authorities, keys) = AuthorityRegistry::reference_roster().unwrap();
//! let config = LedgerConfig { difficulty: 1, ..LedgerConfig::default() };
//! let mut ledger = CertificateBlockchain::new(config, authorities).unwrap();
//!
//! let issuer = &keys[0];
//! let certificate = CertificateDraft::new(
//!     "Ada Lovelace",
//!     "S-1815",
//!     "Northbridge University",
//!     issuer.public_key_hex(),
//!     CertificateType::Bachelor,
//!     "Analytical Engines",
//!     Utc::now() - Duration::days(1),
//! )
//! .build()
//! .unwrap();
//! let id = certificate.id.clone();
//!
//! ledger.issue_certificate(certificate, &issuer.signing).unwrap();
//! ledger.seal_block(&issuer.public_key_hex()).unwrap();
//! assert_eq!(ledger.verify_certificate(&id).status, VerificationStatus::Valid);
//! ```

pub mod authority;
pub mod block;
pub mod blockchain;
pub mod certificate;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod data;
pub mod error;
pub mod mempool;
#[cfg(feature = "net")]
pub mod net;
pub mod registry;
pub mod transaction;

pub use authority::{AuthorityRegistry, Institution, InstitutionType};
pub use block::{validate_chain, validate_linkage, Block};
pub use blockchain::{CertificateBlockchain, LedgerStats, RebuildReport, VerificationResult};
pub use certificate::{Certificate, CertificateDraft, CertificateType};
pub use config::LedgerConfig;
pub use consensus::{PeerChain, ReconcilePolicy, TieBreak, ValidationMode};
pub use crypto::{load_or_derive_keypair, KeyError, KeyMaterial, KeySource};
pub use error::{
    AuthorityError, BlockError, CertificateError, ChainError, ConfigError, LedgerError,
    MaterializationError, MempoolError, TransactionError,
};
pub use mempool::Mempool;
pub use registry::{CertificateRegistry, RevocationRecord, VerificationRecord};
pub use transaction::{
    LedgerTransaction, TransactionPayload, TransactionType, VerificationSnapshot,
    VerificationStatus,
};
