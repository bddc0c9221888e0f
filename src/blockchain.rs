//! The ledger engine.
//!
//! [`CertificateBlockchain`] owns the chain, the mempool, the authority
//! registry and the derived certificate registry, and every mutation funnels
//! through its methods.  It is a plain struct: callers that share it across
//! tasks wrap it in a single-writer lock (see `net::Node`).
//!
//! ## Consistency model
//!
//! Admission checks signatures and payload shape only.  Whether a
//! transaction actually takes effect is decided when it is materialized
//! during sealing or replay: a transaction that fails there (unauthorized
//! issuer, foreign revocation, unknown certificate) is logged and skipped,
//! and the block carrying it is committed regardless.  Registry contents are
//! therefore always "whatever replaying the chain yields", never more.
//! A transaction id takes effect at most once, however often it appears.

use crate::authority::AuthorityRegistry;
use crate::block::{validate_chain, validate_successor, Block};
use crate::certificate::Certificate;
use crate::config::LedgerConfig;
use crate::consensus::{select_candidate, PeerChain};
use crate::crypto::encode_public_key_hex;
use crate::error::{CertificateError, LedgerError};
use crate::mempool::Mempool;
use crate::registry::{CertificateRegistry, RevocationRecord, VerificationRecord};
use crate::transaction::{
    LedgerTransaction, TransactionType, VerificationSnapshot, VerificationStatus,
};
use chrono::{DateTime, Utc};
use k256::ecdsa::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Answer to a certificate verification query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Queried identifier.
    pub certificate_id: String,
    /// Outcome, decided by existence, then revocation, then expiry, then validity.
    pub status: VerificationStatus,
    /// The certificate, when it exists.
    pub certificate: Option<Certificate>,
    /// Revocation details, when revoked.
    pub revocation: Option<RevocationRecord>,
    /// Whether the issuer is currently authorized.
    pub issuer_authorized: bool,
    /// Millisecond timestamp of the check.
    pub checked_at: u64,
}

impl VerificationResult {
    /// Snapshot suitable for a VERIFICATION transaction.
    pub fn snapshot(&self) -> VerificationSnapshot {
        VerificationSnapshot {
            status: self.status,
            checked_at: self.checked_at,
        }
    }
}

/// Outcome of a registry rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildReport {
    /// Transactions whose effect was applied.
    pub applied: usize,
    /// Transactions skipped because materialization failed.
    pub skipped: usize,
}

/// Summary counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    /// Number of blocks, genesis included.
    pub height: usize,
    /// Transactions across all blocks.
    pub transactions: usize,
    /// Materialized certificates.
    pub certificates: usize,
    /// Revoked certificates.
    pub revoked: usize,
    /// Pending transactions.
    pub pending: usize,
    /// Recorded verifications.
    pub verifications: usize,
}

/// Proof-of-authority certificate ledger.
#[derive(Debug, Clone)]
pub struct CertificateBlockchain {
    chain: Vec<Block>,
    mempool: Mempool,
    authorities: AuthorityRegistry,
    registry: CertificateRegistry,
    committed: HashSet<String>,
    config: LedgerConfig,
}

impl CertificateBlockchain {
    /// Creates a ledger holding only the genesis block.
    ///
    /// Fails with [`LedgerError::Config`] if `config` is out of range.
    pub fn new(config: LedgerConfig, authorities: AuthorityRegistry) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            chain: vec![Block::genesis()?],
            mempool: Mempool::new(),
            authorities,
            registry: CertificateRegistry::new(),
            committed: HashSet::new(),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The full chain, genesis first.
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// The chain tip.
    pub fn latest_block(&self) -> &Block {
        // Never empty: `new` starts from genesis and `replace_chain` refuses
        // an empty chain.
        &self.chain[self.chain.len() - 1]
    }

    /// Transactions awaiting a block, in admission order.
    pub fn pending_transactions(&self) -> &[LedgerTransaction] {
        self.mempool.pending()
    }

    /// The mempool.
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Institution registry.
    pub fn authorities(&self) -> &AuthorityRegistry {
        &self.authorities
    }

    /// Mutable institution registry, for out-of-band (de)authorization.
    pub fn authorities_mut(&mut self) -> &mut AuthorityRegistry {
        &mut self.authorities
    }

    /// Derived certificate registry.
    pub fn registry(&self) -> &CertificateRegistry {
        &self.registry
    }

    /// Validates and queues a transaction.
    pub fn admit_transaction(&mut self, tx: LedgerTransaction) -> Result<(), LedgerError> {
        let mut reasons = Vec::new();
        if tx.kind == TransactionType::AuthorityReward {
            reasons.push("reward transactions are only created by sealing".to_string());
        }
        if let Err(err) = tx.verify() {
            reasons.push(err.to_string());
        }
        reasons.extend(tx.validate_shape());
        if !reasons.is_empty() {
            debug!(tx = %tx.id, ?reasons, "transaction rejected");
            return Err(LedgerError::InvalidTransaction(reasons));
        }
        if self.committed.contains(&tx.id) {
            debug!(tx = %tx.id, "transaction already on chain");
            return Err(LedgerError::AlreadyCommitted(tx.id));
        }
        let (id, kind) = (tx.id.clone(), tx.kind);
        self.mempool.admit(tx)?;
        info!(tx = %id, kind = %kind, pending = self.mempool.len(), "transaction admitted");
        Ok(())
    }

    /// Assembles an unsealed block from every pending transaction plus a
    /// reward for `sealer`.
    pub fn prepare_block(&self, sealer: &str) -> Result<Block, LedgerError> {
        if !self.authorities.is_authorized(sealer) {
            return Err(LedgerError::Unauthorized(sealer.to_string()));
        }
        let mut transactions = self.mempool.pending().to_vec();
        transactions.push(LedgerTransaction::authority_reward(
            sealer,
            self.config.authority_reward,
            self.chain.len() as u64,
        )?);
        Ok(Block::new(self.latest_block().hash.clone(), transactions)?)
    }

    /// Appends a sealed block, materializing its transactions best-effort
    /// and evicting them from the mempool.
    ///
    /// The block must end with a reward crediting an authorized sealer.
    pub fn commit_block(&mut self, block: Block) -> Result<Block, LedgerError> {
        let tip = &self.latest_block().hash;
        if &block.previous_hash != tip {
            return Err(LedgerError::StaleBlock {
                expected: tip.clone(),
                found: block.previous_hash,
            });
        }
        let index = self.chain.len();
        validate_successor(self.latest_block(), &block, index, self.config.difficulty)
            .map_err(LedgerError::InvalidBlock)?;
        match block.sealer() {
            Some(sealer) if self.authorities.is_authorized(sealer) => {}
            sealer => {
                let sealer = sealer.unwrap_or("<none>").to_string();
                warn!(block = index, %sealer, "block sealed by unauthorized institution");
                return Err(LedgerError::Unauthorized(sealer));
            }
        }
        let mut skipped = 0usize;
        for tx in &block.transactions {
            if let Err(err) = self.registry.materialize(tx, &mut self.authorities) {
                skipped += 1;
                warn!(block = index, tx = %tx.id, kind = %tx.kind, error = %err, "skipping transaction effect");
            }
        }
        let evicted = self.mempool.evict(&block.transactions);
        info!(
            block = index,
            hash = %block.hash,
            transactions = block.transactions.len(),
            skipped,
            evicted,
            "block committed"
        );
        self.committed
            .extend(block.transactions.iter().map(|tx| tx.id.clone()));
        self.chain.push(block.clone());
        Ok(block)
    }

    /// Seals every pending transaction into a new block on behalf of `sealer`.
    pub fn seal_block(&mut self, sealer: &str) -> Result<Block, LedgerError> {
        let mut block = self.prepare_block(sealer)?;
        block.seal(self.config.difficulty)?;
        self.commit_block(block)
    }

    /// Full O(n) validation of linkage, hashes, work and signatures.
    pub fn is_chain_valid(&self) -> bool {
        match validate_chain(&self.chain, self.config.difficulty) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "local chain failed validation");
                false
            }
        }
    }

    /// Clears derived state and replays every transaction in chain order.
    pub fn rebuild_certificate_registry(&mut self) -> RebuildReport {
        self.registry.clear();
        self.authorities.reset_counters();
        let mut report = RebuildReport::default();
        for (index, block) in self.chain.iter().enumerate() {
            for tx in &block.transactions {
                match self.registry.materialize(tx, &mut self.authorities) {
                    Ok(()) => report.applied += 1,
                    Err(err) => {
                        report.skipped += 1;
                        warn!(block = index, tx = %tx.id, kind = %tx.kind, error = %err, "replay skipped transaction");
                    }
                }
            }
        }
        info!(
            applied = report.applied,
            skipped = report.skipped,
            certificates = self.registry.len(),
            "certificate registry rebuilt"
        );
        report
    }

    /// Verification query evaluated against `now`.
    pub fn verify_certificate_at(&self, id: &str, now: DateTime<Utc>) -> VerificationResult {
        let checked_at = now.timestamp_millis().max(0) as u64;
        let Some(certificate) = self.registry.certificate(id) else {
            return VerificationResult {
                certificate_id: id.to_string(),
                status: VerificationStatus::NotFound,
                certificate: None,
                revocation: None,
                issuer_authorized: false,
                checked_at,
            };
        };
        let issuer_authorized = self
            .authorities
            .is_authorized(&certificate.institution_public_key);
        let revocation = self.registry.revocation(id).cloned();
        let status = if revocation.is_some() {
            VerificationStatus::Revoked
        } else if certificate.is_expired_at(now) {
            VerificationStatus::Expired
        } else if certificate.verify().is_ok() && issuer_authorized {
            VerificationStatus::Valid
        } else {
            VerificationStatus::Invalid
        };
        VerificationResult {
            certificate_id: id.to_string(),
            status,
            certificate: Some(certificate.clone()),
            revocation,
            issuer_authorized,
            checked_at,
        }
    }

    /// Verification query evaluated now.
    pub fn verify_certificate(&self, id: &str) -> VerificationResult {
        self.verify_certificate_at(id, Utc::now())
    }

    /// Signs `certificate` with the issuer key and queues its ISSUANCE transaction.
    pub fn issue_certificate(
        &mut self,
        mut certificate: Certificate,
        signing: &SigningKey,
    ) -> Result<LedgerTransaction, LedgerError> {
        let issuer = certificate.institution_public_key.clone();
        if !self.authorities.is_authorized(&issuer) {
            return Err(LedgerError::Unauthorized(issuer));
        }
        if let Some(existing) = self.registry.certificate(&certificate.id) {
            if existing.institution_public_key != issuer {
                return Err(LedgerError::Forbidden(format!(
                    "{issuer} may not reissue certificate {}",
                    certificate.id
                )));
            }
        }
        let violations = certificate.validate();
        if !violations.is_empty() {
            return Err(LedgerError::InvalidCertificate(violations));
        }
        certificate.sign(signing).map_err(|err| match err {
            CertificateError::KeyMismatch => LedgerError::Unauthorized(signer_of(signing)),
            other => LedgerError::Certificate(other),
        })?;
        let mut tx = LedgerTransaction::issuance(certificate)?;
        tx.sign(signing)?;
        self.admit_transaction(tx.clone())?;
        Ok(tx)
    }

    /// Queues a REVOCATION of `id` signed by its issuer.
    pub fn revoke_certificate(
        &mut self,
        id: &str,
        reason: &str,
        signing: &SigningKey,
    ) -> Result<LedgerTransaction, LedgerError> {
        let signer = signer_of(signing);
        let certificate = self
            .registry
            .certificate(id)
            .ok_or_else(|| LedgerError::CertificateNotFound(id.to_string()))?;
        if !self.authorities.is_authorized(&signer) || certificate.institution_public_key != signer
        {
            return Err(LedgerError::Forbidden(format!(
                "{signer} may not revoke certificate {id}"
            )));
        }
        if self.registry.is_revoked(id) {
            return Err(LedgerError::AlreadyRevoked(id.to_string()));
        }
        let mut tx = LedgerTransaction::revocation(signer, id, reason)?;
        tx.sign(signing)?;
        self.admit_transaction(tx.clone())?;
        Ok(tx)
    }

    /// Runs a verification query and queues a VERIFICATION transaction
    /// recording it on behalf of `verifier`.
    pub fn request_verification(
        &mut self,
        id: &str,
        verifier: &SigningKey,
    ) -> Result<(VerificationResult, LedgerTransaction), LedgerError> {
        let result = self.verify_certificate(id);
        let mut tx = LedgerTransaction::verification(signer_of(verifier), id, result.snapshot())?;
        tx.sign(verifier)?;
        self.admit_transaction(tx.clone())?;
        Ok((result, tx))
    }

    /// Adopts the best qualifying peer chain, if any is strictly longer than
    /// the local one.  Returns whether the chain was replaced.
    pub fn reconcile_with_peers(&mut self, peers: &[PeerChain]) -> bool {
        let Some(winner) = select_candidate(
            self.chain.len(),
            peers,
            &self.config.reconcile,
            self.config.difficulty,
            &self.authorities,
        ) else {
            debug!(peers = peers.len(), height = self.chain.len(), "local chain kept");
            return false;
        };
        let adopted = &peers[winner];
        info!(
            peer = %adopted.peer,
            from = self.chain.len(),
            to = adopted.chain.len(),
            "replacing local chain"
        );
        self.replace_chain(adopted.chain.clone())
    }

    fn replace_chain(&mut self, chain: Vec<Block>) -> bool {
        if chain.is_empty() {
            warn!("refusing to adopt an empty chain");
            return false;
        }
        self.committed = chain
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        self.chain = chain;
        self.mempool.clear();
        self.rebuild_certificate_registry();
        true
    }

    /// Looks up a certificate.
    pub fn certificate(&self, id: &str) -> Option<&Certificate> {
        self.registry.certificate(id)
    }

    /// Certificates issued by the institution with `public_key`.
    pub fn certificates_by_institution(&self, public_key: &str) -> Vec<&Certificate> {
        self.registry
            .certificates()
            .filter(|cert| cert.institution_public_key == public_key)
            .collect()
    }

    /// Certificates held by `recipient_id`.
    pub fn certificates_by_recipient(&self, recipient_id: &str) -> Vec<&Certificate> {
        self.registry
            .certificates()
            .filter(|cert| cert.recipient_id == recipient_id)
            .collect()
    }

    /// Case-insensitive substring search over id, recipient, course and institution.
    pub fn search(&self, term: &str) -> Vec<&Certificate> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.registry
            .certificates()
            .filter(|cert| {
                [
                    cert.id.as_str(),
                    cert.recipient_name.as_str(),
                    cert.recipient_id.as_str(),
                    cert.course_name.as_str(),
                    cert.institution_name.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Verification audit log for `id`.
    pub fn verification_history(&self, id: &str) -> &[VerificationRecord] {
        self.registry.verification_history(id)
    }

    /// Revocation details for `id`.
    pub fn revocation(&self, id: &str) -> Option<&RevocationRecord> {
        self.registry.revocation(id)
    }

    /// Summary counters.
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            height: self.chain.len(),
            transactions: self.chain.iter().map(|b| b.transactions.len()).sum(),
            certificates: self.registry.len(),
            revoked: self.registry.revoked_count(),
            pending: self.mempool.len(),
            verifications: self.registry.verification_count(),
        }
    }
}

fn signer_of(signing: &SigningKey) -> String {
    encode_public_key_hex(&VerifyingKey::from(signing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificateDraft, CertificateType};
    use crate::crypto::{load_or_derive_keypair, KeyMaterial, KeySource};
    use crate::error::{ChainError, ConfigError};
    use chrono::Duration;

    fn ledger() -> (CertificateBlockchain, Vec<KeyMaterial>) {
        let (authorities, keys) = AuthorityRegistry::reference_roster().unwrap();
        let config = LedgerConfig {
            difficulty: 1,
            ..LedgerConfig::default()
        };
        (CertificateBlockchain::new(config, authorities).unwrap(), keys)
    }

    fn draft(issuer: &KeyMaterial, recipient: &str) -> CertificateDraft {
        CertificateDraft::new(
            recipient,
            format!("S-{}", recipient.len()),
            "Northbridge University",
            issuer.public_key_hex(),
            CertificateType::Bachelor,
            "Applied Geology",
            Utc::now() - Duration::days(30),
        )
    }

    fn issued(
        ledger: &mut CertificateBlockchain,
        issuer: &KeyMaterial,
        recipient: &str,
    ) -> String {
        let cert = draft(issuer, recipient).build().unwrap();
        let id = cert.id.clone();
        ledger.issue_certificate(cert, &issuer.signing).unwrap();
        ledger.seal_block(&issuer.public_key_hex()).unwrap();
        id
    }

    #[test]
    fn test_new_ledger_holds_genesis_only() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.chain().len(), 1);
        assert!(ledger.latest_block().is_genesis());
        assert!(ledger.is_chain_valid());
        assert_eq!(ledger.stats().height, 1);
    }

    #[test]
    fn test_issue_seal_verify() {
        let (mut ledger, keys) = ledger();
        let id = issued(&mut ledger, &keys[0], "Ada Lovelace");
        assert_eq!(ledger.chain().len(), 2);
        assert!(ledger.pending_transactions().is_empty());
        let result = ledger.verify_certificate(&id);
        assert_eq!(result.status, VerificationStatus::Valid);
        assert!(result.issuer_authorized);
        assert_eq!(
            ledger
                .authorities()
                .institution(&keys[0].public_key_hex())
                .unwrap()
                .issued_count,
            1
        );
        let last = ledger.latest_block().transactions.last().unwrap();
        assert_eq!(last.kind, TransactionType::AuthorityReward);
        assert!(ledger.is_chain_valid());
    }

    #[test]
    fn test_issue_rejects_unauthorized_and_foreign_keys() {
        let (mut ledger, keys) = ledger();
        let cert = draft(&keys[0], "Ada Lovelace").build().unwrap();
        assert_eq!(
            ledger.issue_certificate(cert, &keys[1].signing),
            Err(LedgerError::Unauthorized(keys[1].public_key_hex()))
        );

        let outsider = load_or_derive_keypair(&KeySource::Seed("outsider".into())).unwrap();
        let cert = draft(&outsider, "Ada Lovelace").build().unwrap();
        assert_eq!(
            ledger.issue_certificate(cert, &outsider.signing),
            Err(LedgerError::Unauthorized(outsider.public_key_hex()))
        );
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_issue_rejects_invalid_fields() {
        let (mut ledger, keys) = ledger();
        let cert = CertificateDraft::new(
            "A",
            "S-1",
            "Northbridge University",
            keys[0].public_key_hex(),
            CertificateType::Diploma,
            "",
            Utc::now() + Duration::days(3),
        )
        .build()
        .unwrap();
        match ledger.issue_certificate(cert, &keys[0].signing) {
            Err(LedgerError::InvalidCertificate(reasons)) => assert_eq!(reasons.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_admission_rejects_rewards_and_unsigned() {
        let (mut ledger, keys) = ledger();
        let reward =
            LedgerTransaction::authority_reward(keys[0].public_key_hex(), 10, 1).unwrap();
        assert!(matches!(
            ledger.admit_transaction(reward),
            Err(LedgerError::InvalidTransaction(_))
        ));
        let unsigned =
            LedgerTransaction::revocation(keys[0].public_key_hex(), "CERT-1", "error").unwrap();
        match ledger.admit_transaction(unsigned) {
            Err(LedgerError::InvalidTransaction(reasons)) => {
                assert_eq!(reasons, vec!["transaction is not signed".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_admission() {
        let (mut ledger, keys) = ledger();
        let mut tx =
            LedgerTransaction::revocation(keys[0].public_key_hex(), "CERT-1", "error").unwrap();
        tx.sign(&keys[0].signing).unwrap();
        ledger.admit_transaction(tx.clone()).unwrap();
        assert_eq!(
            ledger.admit_transaction(tx.clone()),
            Err(LedgerError::DuplicateTransaction(tx.hash))
        );
        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[test]
    fn test_seal_requires_authorized_sealer() {
        let (mut ledger, _) = ledger();
        assert_eq!(
            ledger.seal_block("nobody"),
            Err(LedgerError::Unauthorized("nobody".into()))
        );
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_commit_rejects_stale_and_unsealed_blocks() {
        let (mut ledger, keys) = ledger();
        let sealer = keys[0].public_key_hex();
        let mut stale = ledger.prepare_block(&sealer).unwrap();
        stale.seal(1).unwrap();
        ledger.seal_block(&sealer).unwrap();
        assert!(matches!(
            ledger.commit_block(stale),
            Err(LedgerError::StaleBlock { .. })
        ));

        let mut tampered = ledger.prepare_block(&sealer).unwrap();
        tampered.seal(1).unwrap();
        tampered.nonce += 1;
        assert_eq!(
            ledger.commit_block(tampered),
            Err(LedgerError::InvalidBlock(ChainError::HashMismatch { index: 2 }))
        );
        assert_eq!(ledger.chain().len(), 2);
    }

    #[test]
    fn test_expiry_and_revocation_precedence() {
        let (mut ledger, keys) = ledger();
        let cert = draft(&keys[0], "Katherine Johnson")
            .expires_at(Utc::now() + Duration::days(1))
            .build()
            .unwrap();
        let id = cert.id.clone();
        ledger.issue_certificate(cert, &keys[0].signing).unwrap();
        ledger.seal_block(&keys[0].public_key_hex()).unwrap();

        let later = Utc::now() + Duration::days(2);
        assert_eq!(
            ledger.verify_certificate_at(&id, later).status,
            VerificationStatus::Expired
        );

        ledger
            .revoke_certificate(&id, "issued in error", &keys[0].signing)
            .unwrap();
        ledger.seal_block(&keys[0].public_key_hex()).unwrap();
        let result = ledger.verify_certificate_at(&id, later);
        assert_eq!(result.status, VerificationStatus::Revoked);
        assert_eq!(result.revocation.unwrap().reason, "issued in error");
        assert_eq!(
            ledger.revoke_certificate(&id, "again", &keys[0].signing),
            Err(LedgerError::AlreadyRevoked(id))
        );
    }

    #[test]
    fn test_revocation_gates() {
        let (mut ledger, keys) = ledger();
        assert_eq!(
            ledger.revoke_certificate("CERT-none", "n/a", &keys[0].signing),
            Err(LedgerError::CertificateNotFound("CERT-none".into()))
        );
        let id = issued(&mut ledger, &keys[0], "Rosalind Franklin");
        assert!(matches!(
            ledger.revoke_certificate(&id, "rivalry", &keys[1].signing),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(ledger.revocation(&id).is_none());
    }

    #[test]
    fn test_deauthorized_issuer_reports_invalid() {
        let (mut ledger, keys) = ledger();
        let id = issued(&mut ledger, &keys[0], "Lise Meitner");
        ledger
            .authorities_mut()
            .revoke_authorization(&keys[0].public_key_hex())
            .unwrap();
        let result = ledger.verify_certificate(&id);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(!result.issuer_authorized);
        assert_eq!(
            ledger.verify_certificate("CERT-missing").status,
            VerificationStatus::NotFound
        );
    }

    #[test]
    fn test_request_verification_records_history() {
        let (mut ledger, keys) = ledger();
        let id = issued(&mut ledger, &keys[0], "Chien-Shiung Wu");
        let (result, tx) = ledger.request_verification(&id, &keys[2].signing).unwrap();
        assert_eq!(result.status, VerificationStatus::Valid);
        assert_eq!(tx.kind, TransactionType::Verification);
        ledger.seal_block(&keys[1].public_key_hex()).unwrap();
        let history = ledger.verification_history(&id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].verifier, keys[2].public_key_hex());
        assert_eq!(history[0].result.status, VerificationStatus::Valid);
        assert_eq!(ledger.stats().verifications, 1);
    }

    #[test]
    fn test_failed_materialization_still_commits_block() {
        let (mut ledger, keys) = ledger();
        let mut orphan =
            LedgerTransaction::revocation(keys[1].public_key_hex(), "CERT-ghost", "n/a").unwrap();
        orphan.sign(&keys[1].signing).unwrap();
        ledger.admit_transaction(orphan.clone()).unwrap();
        let block = ledger.seal_block(&keys[1].public_key_hex()).unwrap();
        assert!(block.transactions.iter().any(|tx| tx.id == orphan.id));
        assert_eq!(ledger.stats().revoked, 0);
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_rebuild_matches_incremental_state() {
        let (mut ledger, keys) = ledger();
        let first = issued(&mut ledger, &keys[0], "Mary Jackson");
        issued(&mut ledger, &keys[1], "Dorothy Vaughan");
        ledger
            .revoke_certificate(&first, "superseded", &keys[0].signing)
            .unwrap();
        ledger.seal_block(&keys[2].public_key_hex()).unwrap();

        let before = ledger.registry().clone();
        let counters: Vec<u64> = ledger
            .authorities()
            .institutions()
            .map(|inst| inst.issued_count)
            .collect();
        let report = ledger.rebuild_certificate_registry();
        assert_eq!(report.skipped, 0);
        assert_eq!(ledger.registry(), &before);
        let rebuilt: Vec<u64> = ledger
            .authorities()
            .institutions()
            .map(|inst| inst.issued_count)
            .collect();
        assert_eq!(rebuilt, counters);
    }

    #[test]
    fn test_queries_and_search() {
        let (mut ledger, keys) = ledger();
        issued(&mut ledger, &keys[0], "Hedy Lamarr");
        issued(&mut ledger, &keys[1], "Annie Easley");
        assert_eq!(
            ledger
                .certificates_by_institution(&keys[0].public_key_hex())
                .len(),
            1
        );
        assert_eq!(ledger.certificates_by_recipient("S-11").len(), 1);
        assert_eq!(ledger.search("hedy").len(), 1);
        assert_eq!(ledger.search("GEOLOGY").len(), 2);
        assert!(ledger.search("   ").is_empty());
        let stats = ledger.stats();
        assert_eq!(stats.height, 3);
        assert_eq!(stats.certificates, 2);
        assert_eq!(stats.transactions, 4);
    }

    #[test]
    fn test_chain_validity_is_idempotent_and_detects_tampering() {
        let (mut ledger, keys) = ledger();
        issued(&mut ledger, &keys[0], "Barbara McClintock");
        assert_eq!(ledger.is_chain_valid(), ledger.is_chain_valid());
        ledger.chain[1].timestamp += 1;
        assert!(!ledger.is_chain_valid());
        assert!(!ledger.is_chain_valid());
    }

    #[test]
    fn test_new_rejects_out_of_range_config() {
        let (authorities, _) = AuthorityRegistry::reference_roster().unwrap();
        let config = LedgerConfig {
            difficulty: 9,
            ..LedgerConfig::default()
        };
        assert_eq!(
            CertificateBlockchain::new(config, authorities).err(),
            Some(LedgerError::Config(ConfigError::InvalidDifficulty(9)))
        );
    }

    #[test]
    fn test_commit_rejects_blocks_not_sealed_by_an_authority() {
        let (mut ledger, _) = ledger();
        let outsider = load_or_derive_keypair(&KeySource::Seed("outsider".into())).unwrap();
        let tip = ledger.latest_block().hash.clone();
        let reward = LedgerTransaction::authority_reward(outsider.public_key_hex(), 10, 1).unwrap();
        let mut rogue = Block::new(tip.clone(), vec![reward]).unwrap();
        rogue.seal(1).unwrap();
        assert_eq!(
            ledger.commit_block(rogue),
            Err(LedgerError::Unauthorized(outsider.public_key_hex()))
        );

        let mut bare = Block::new(tip, Vec::new()).unwrap();
        bare.seal(1).unwrap();
        assert_eq!(
            ledger.commit_block(bare),
            Err(LedgerError::Unauthorized("<none>".into()))
        );
        assert_eq!(ledger.chain().len(), 1);
    }

    #[test]
    fn test_committed_transactions_cannot_be_readmitted() {
        let (mut ledger, keys) = ledger();
        issued(&mut ledger, &keys[0], "Jocelyn Bell");
        let issuance = ledger.chain()[1].transactions[0].clone();
        assert_eq!(
            ledger.admit_transaction(issuance.clone()),
            Err(LedgerError::AlreadyCommitted(issuance.id))
        );
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_replayed_transactions_in_a_block_take_no_effect() {
        let (mut ledger, keys) = ledger();
        let id = issued(&mut ledger, &keys[0], "Vera Rubin");
        ledger.request_verification(&id, &keys[2].signing).unwrap();
        ledger.seal_block(&keys[1].public_key_hex()).unwrap();
        let issuance = ledger.chain()[1].transactions[0].clone();
        let verification = ledger.chain()[2].transactions[0].clone();

        let sealer = keys[0].public_key_hex();
        let reward = LedgerTransaction::authority_reward(&sealer, 10, 3).unwrap();
        let mut replay = Block::new(
            ledger.latest_block().hash.clone(),
            vec![issuance, verification, reward],
        )
        .unwrap();
        replay.seal(1).unwrap();
        ledger.commit_block(replay).unwrap();

        assert_eq!(ledger.chain().len(), 4);
        assert_eq!(ledger.verification_history(&id).len(), 1);
        assert_eq!(
            ledger.authorities().institution(&sealer).unwrap().issued_count,
            1
        );

        let before = ledger.registry().clone();
        let report = ledger.rebuild_certificate_registry();
        assert_eq!(report.skipped, 2);
        assert_eq!(ledger.registry(), &before);
    }

    #[test]
    fn test_foreign_reissue_of_existing_id_is_forbidden() {
        let (mut ledger, keys) = ledger();
        let id = issued(&mut ledger, &keys[0], "Cecilia Payne");
        let mut hijack = draft(&keys[1], "Cecilia Payne").build().unwrap();
        hijack.id = id.clone();
        assert!(matches!(
            ledger.issue_certificate(hijack, &keys[1].signing),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(ledger.pending_transactions().is_empty());
        assert_eq!(
            ledger.certificate(&id).unwrap().institution_public_key,
            keys[0].public_key_hex()
        );
    }

    #[test]
    fn test_replace_chain_refuses_empty_chain() {
        let (mut ledger, keys) = ledger();
        issued(&mut ledger, &keys[0], "Henrietta Leavitt");
        assert!(!ledger.replace_chain(Vec::new()));
        assert_eq!(ledger.chain().len(), 2);
        assert!(!ledger.latest_block().is_genesis());
    }
}
