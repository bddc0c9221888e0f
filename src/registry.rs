//! Certificate registry derived from the chain.
//!
//! Nothing here is authoritative: the registry is whatever replaying every
//! transaction of every block, in chain order, produces.  Replay is
//! deterministic, so two nodes holding the same chain hold equal registries.

use crate::authority::AuthorityRegistry;
use crate::certificate::Certificate;
use crate::error::MaterializationError;
use crate::transaction::{LedgerTransaction, TransactionPayload, VerificationSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Audit entry appended for every materialized VERIFICATION transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    /// Public key of whoever requested the verification.
    pub verifier: String,
    /// Result observed at the time.
    pub result: VerificationSnapshot,
    /// Timestamp of the carrying transaction.
    pub timestamp: u64,
    /// Carrying transaction.
    pub transaction_id: String,
}

/// Details of a materialized revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRecord {
    /// Reason given by the issuer.
    pub reason: String,
    /// Public key of the revoking institution.
    pub revoked_by: String,
    /// Timestamp of the carrying transaction.
    pub timestamp: u64,
    /// Carrying transaction.
    pub transaction_id: String,
}

/// Materialized view of certificates, revocations and verification history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateRegistry {
    certificates: BTreeMap<String, Certificate>,
    revocations: BTreeMap<String, RevocationRecord>,
    verifications: BTreeMap<String, Vec<VerificationRecord>>,
    applied: BTreeSet<String>,
}

impl CertificateRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every derived entry.
    pub fn clear(&mut self) {
        self.certificates.clear();
        self.revocations.clear();
        self.verifications.clear();
        self.applied.clear();
    }

    /// Applies the effect of `tx`.
    ///
    /// `authorities` is consulted for issuance and revocation gates and has
    /// its per-issuer counters bumped on issuance.  A transaction id takes
    /// effect at most once; later copies fail with
    /// [`MaterializationError::AlreadyApplied`].
    pub fn materialize(
        &mut self,
        tx: &LedgerTransaction,
        authorities: &mut AuthorityRegistry,
    ) -> Result<(), MaterializationError> {
        if self.applied.contains(&tx.id) {
            return Err(MaterializationError::AlreadyApplied(tx.id.clone()));
        }
        self.apply(tx, authorities)?;
        self.applied.insert(tx.id.clone());
        Ok(())
    }

    /// Returns true if the transaction `id` has already taken effect.
    pub fn is_applied(&self, id: &str) -> bool {
        self.applied.contains(id)
    }

    fn apply(
        &mut self,
        tx: &LedgerTransaction,
        authorities: &mut AuthorityRegistry,
    ) -> Result<(), MaterializationError> {
        match &tx.payload {
            TransactionPayload::Issuance { certificate } => {
                let sender = sender_of(tx)?;
                if !authorities.is_authorized(sender) {
                    return Err(MaterializationError::Unauthorized(sender.to_string()));
                }
                let owned_elsewhere = self
                    .certificates
                    .get(&certificate.id)
                    .is_some_and(|existing| existing.institution_public_key != sender);
                if certificate.institution_public_key != sender || owned_elsewhere {
                    return Err(MaterializationError::Forbidden {
                        certificate_id: certificate.id.clone(),
                        signer: sender.to_string(),
                    });
                }
                certificate
                    .verify()
                    .map_err(|reason| MaterializationError::InvalidCertificate {
                        id: certificate.id.clone(),
                        reason,
                    })?;
                self.certificates
                    .insert(certificate.id.clone(), certificate.clone());
                authorities.record_issuance(sender, tx.timestamp);
            }
            TransactionPayload::Verification {
                certificate_id,
                result,
            } => {
                let verifier = sender_of(tx)?;
                self.verifications
                    .entry(certificate_id.clone())
                    .or_default()
                    .push(VerificationRecord {
                        verifier: verifier.to_string(),
                        result: *result,
                        timestamp: tx.timestamp,
                        transaction_id: tx.id.clone(),
                    });
            }
            TransactionPayload::Revocation {
                certificate_id,
                reason,
            } => {
                let sender = sender_of(tx)?;
                let certificate = self.certificates.get(certificate_id).ok_or_else(|| {
                    MaterializationError::CertificateNotFound(certificate_id.clone())
                })?;
                if !authorities.is_authorized(sender) || certificate.institution_public_key != sender
                {
                    return Err(MaterializationError::Forbidden {
                        certificate_id: certificate_id.clone(),
                        signer: sender.to_string(),
                    });
                }
                self.revocations.insert(
                    certificate_id.clone(),
                    RevocationRecord {
                        reason: reason.clone(),
                        revoked_by: sender.to_string(),
                        timestamp: tx.timestamp,
                        transaction_id: tx.id.clone(),
                    },
                );
            }
            TransactionPayload::AuthorityReward { .. } => {}
        }
        Ok(())
    }

    /// Looks up a certificate.
    pub fn certificate(&self, id: &str) -> Option<&Certificate> {
        self.certificates.get(id)
    }

    /// All certificates ordered by id.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.values()
    }

    /// Returns true if `id` has been revoked.
    pub fn is_revoked(&self, id: &str) -> bool {
        self.revocations.contains_key(id)
    }

    /// Revocation details for `id`.
    pub fn revocation(&self, id: &str) -> Option<&RevocationRecord> {
        self.revocations.get(id)
    }

    /// Identifiers of every revoked certificate.
    pub fn revoked_ids(&self) -> impl Iterator<Item = &str> {
        self.revocations.keys().map(String::as_str)
    }

    /// Verification audit log for `id`, oldest first.
    pub fn verification_history(&self, id: &str) -> &[VerificationRecord] {
        self.verifications
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Returns true if no certificate has been materialized.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Number of revoked certificates.
    pub fn revoked_count(&self) -> usize {
        self.revocations.len()
    }

    /// Total number of recorded verifications.
    pub fn verification_count(&self) -> usize {
        self.verifications.values().map(Vec::len).sum()
    }
}

fn sender_of(tx: &LedgerTransaction) -> Result<&str, MaterializationError> {
    tx.from_address
        .as_deref()
        .ok_or_else(|| MaterializationError::MissingSender(tx.id.clone()))
}
