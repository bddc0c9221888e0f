//! Signed ledger transactions carrying certificate lifecycle events.

use crate::certificate::Certificate;
use crate::crypto::{key_matches, sha256_hex, sign_digest_hex, verify_digest_hex};
use crate::data::{canonical_json, now_ms};
use crate::error::TransactionError;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Intent carried by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// A new certificate enters the registry.
    Issuance,
    /// Someone checked a certificate; the outcome is kept for audit.
    Verification,
    /// The issuer withdraws a certificate.
    Revocation,
    /// Synthesized reward for the institution that sealed a block.
    AuthorityReward,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Issuance => "ISSUANCE",
            Self::Verification => "VERIFICATION",
            Self::Revocation => "REVOCATION",
            Self::AuthorityReward => "AUTHORITY_REWARD",
        };
        f.write_str(name)
    }
}

/// Outcome of a certificate verification query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Signature valid and issuer still authorized.
    Valid,
    /// Signature invalid or issuer no longer authorized.
    Invalid,
    /// Revoked by its issuer.
    Revoked,
    /// Past its expiration date.
    Expired,
    /// No such certificate.
    NotFound,
}

/// Verification result recorded inside a VERIFICATION transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSnapshot {
    /// Status observed by the verifier.
    pub status: VerificationStatus,
    /// Millisecond timestamp of the check.
    pub checked_at: u64,
}

/// Type-specific transaction body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPayload {
    /// Signed certificate being issued.
    Issuance {
        /// The certificate, signed by its institution.
        certificate: Certificate,
    },
    /// Audit record of a verification.
    #[serde(rename_all = "camelCase")]
    Verification {
        /// Certificate that was checked.
        certificate_id: String,
        /// Outcome at the time of the check.
        result: VerificationSnapshot,
    },
    /// Withdrawal of a certificate by its issuer.
    #[serde(rename_all = "camelCase")]
    Revocation {
        /// Certificate being revoked.
        certificate_id: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Reward credited to a block sealer.
    #[serde(rename_all = "camelCase")]
    AuthorityReward {
        /// Public key of the sealing institution.
        sealer: String,
        /// Reward units.
        reward: u64,
        /// Height of the block the reward belongs to.
        height: u64,
    },
}

impl TransactionPayload {
    /// Transaction type implied by the payload variant.
    pub fn kind(&self) -> TransactionType {
        match self {
            Self::Issuance { .. } => TransactionType::Issuance,
            Self::Verification { .. } => TransactionType::Verification,
            Self::Revocation { .. } => TransactionType::Revocation,
            Self::AuthorityReward { .. } => TransactionType::AuthorityReward,
        }
    }
}

/// Signed envelope appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    /// Unique transaction identifier.
    pub id: String,
    /// Declared intent; must agree with the payload variant.
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Hex public key of the sender; absent for rewards.
    pub from_address: Option<String>,
    /// Optional recipient (student id, sealer key).
    pub to_address: Option<String>,
    /// Type-specific body.
    pub payload: TransactionPayload,
    /// Fee offered for inclusion.
    pub fee: u64,
    /// Millisecond creation timestamp.
    pub timestamp: u64,
    /// SHA-256 over the canonical encoding of every field except the signature.
    pub hash: String,
    /// Hex ECDSA signature by `from_address` over `hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionContent<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: TransactionType,
    from_address: &'a Option<String>,
    to_address: &'a Option<String>,
    payload: &'a TransactionPayload,
    fee: u64,
    timestamp: u64,
}

impl LedgerTransaction {
    fn build(
        from_address: Option<String>,
        to_address: Option<String>,
        payload: TransactionPayload,
    ) -> Result<Self, TransactionError> {
        let mut tx = Self {
            id: format!("TX-{}", Uuid::new_v4().simple()),
            kind: payload.kind(),
            from_address,
            to_address,
            payload,
            fee: 0,
            timestamp: now_ms(),
            hash: String::new(),
            signature: None,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// Issuance of a signed certificate by its institution.
    pub fn issuance(certificate: Certificate) -> Result<Self, TransactionError> {
        let from = certificate.institution_public_key.clone();
        let to = certificate.recipient_id.clone();
        Self::build(
            Some(from),
            Some(to),
            TransactionPayload::Issuance { certificate },
        )
    }

    /// Audit record of `verifier` checking `certificate_id`.
    pub fn verification(
        verifier: impl Into<String>,
        certificate_id: impl Into<String>,
        result: VerificationSnapshot,
    ) -> Result<Self, TransactionError> {
        Self::build(
            Some(verifier.into()),
            None,
            TransactionPayload::Verification {
                certificate_id: certificate_id.into(),
                result,
            },
        )
    }

    /// Revocation of `certificate_id` by `institution`.
    pub fn revocation(
        institution: impl Into<String>,
        certificate_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Self, TransactionError> {
        Self::build(
            Some(institution.into()),
            None,
            TransactionPayload::Revocation {
                certificate_id: certificate_id.into(),
                reason: reason.into(),
            },
        )
    }

    /// Unsigned reward for the institution sealing block `height`.
    pub fn authority_reward(
        sealer: impl Into<String>,
        reward: u64,
        height: u64,
    ) -> Result<Self, TransactionError> {
        let sealer = sealer.into();
        Self::build(
            None,
            Some(sealer.clone()),
            TransactionPayload::AuthorityReward {
                sealer,
                reward,
                height,
            },
        )
    }

    /// Sets the fee, rehashing and dropping any signature.
    pub fn with_fee(mut self, fee: u64) -> Result<Self, TransactionError> {
        self.fee = fee;
        self.reseal()?;
        Ok(self)
    }

    /// Sets the timestamp, rehashing and dropping any signature.
    pub fn with_timestamp(mut self, timestamp: u64) -> Result<Self, TransactionError> {
        self.timestamp = timestamp;
        self.reseal()?;
        Ok(self)
    }

    fn reseal(&mut self) -> Result<(), TransactionError> {
        self.hash = self.compute_hash()?;
        self.signature = None;
        Ok(())
    }

    /// Recomputes the transaction hash from the current field values.
    pub fn compute_hash(&self) -> Result<String, TransactionError> {
        let content = TransactionContent {
            id: &self.id,
            kind: self.kind,
            from_address: &self.from_address,
            to_address: &self.to_address,
            payload: &self.payload,
            fee: self.fee,
            timestamp: self.timestamp,
        };
        let encoded =
            canonical_json(&content).map_err(|err| TransactionError::Encoding(err.to_string()))?;
        Ok(sha256_hex(encoded.as_bytes()))
    }

    /// Signs the transaction with the sender's key.
    pub fn sign(&mut self, signing: &SigningKey) -> Result<(), TransactionError> {
        let from = self
            .from_address
            .as_deref()
            .ok_or(TransactionError::MissingSender)?;
        if !key_matches(signing, from) {
            return Err(TransactionError::ForeignSigning);
        }
        let hash = self.compute_hash()?;
        let signature = sign_digest_hex(signing, &hash)
            .map_err(|err| TransactionError::Encoding(err.to_string()))?;
        self.hash = hash;
        self.signature = Some(signature);
        Ok(())
    }

    /// Verifies the sender signature; rewards carry no sender and always pass.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let Some(from) = self.from_address.as_deref() else {
            return Ok(());
        };
        let signature = self
            .signature
            .as_deref()
            .ok_or(TransactionError::Unsigned)?;
        let hash = self.compute_hash()?;
        if hash != self.hash {
            return Err(TransactionError::InvalidSignature);
        }
        verify_digest_hex(from, &hash, signature).map_err(|_| TransactionError::InvalidSignature)
    }

    /// Certificate addressed by the transaction, if any.
    pub fn certificate_id(&self) -> Option<&str> {
        match &self.payload {
            TransactionPayload::Issuance { certificate } => Some(certificate.id.as_str()),
            TransactionPayload::Verification { certificate_id, .. }
            | TransactionPayload::Revocation { certificate_id, .. } => {
                Some(certificate_id.as_str())
            }
            TransactionPayload::AuthorityReward { .. } => None,
        }
    }

    /// Collects type-specific payload violations.
    pub fn validate_shape(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.id.trim().is_empty() {
            violations.push("transaction id is required".to_string());
        }
        if self.kind != self.payload.kind() {
            violations.push(format!(
                "declared type {} does not match {} payload",
                self.kind,
                self.payload.kind()
            ));
        }
        let sender = self.from_address.as_deref();
        match &self.payload {
            TransactionPayload::Issuance { certificate } => {
                if sender.is_none() {
                    violations.push("issuance requires a sender".to_string());
                }
                if !certificate.is_signed() {
                    violations.push("issuance requires a signed certificate".to_string());
                }
                if sender.is_some() && sender != Some(certificate.institution_public_key.as_str())
                {
                    violations.push("certificate issuer does not match sender".to_string());
                }
            }
            TransactionPayload::Verification { certificate_id, .. } => {
                if sender.is_none() {
                    violations.push("verification requires a verifier".to_string());
                }
                if certificate_id.trim().is_empty() {
                    violations.push("verification requires a certificate id".to_string());
                }
            }
            TransactionPayload::Revocation {
                certificate_id,
                reason,
            } => {
                if sender.is_none() {
                    violations.push("revocation requires a sender".to_string());
                }
                if certificate_id.trim().is_empty() {
                    violations.push("revocation requires a certificate id".to_string());
                }
                if reason.trim().is_empty() {
                    violations.push("revocation requires a reason".to_string());
                }
            }
            TransactionPayload::AuthorityReward { sealer, .. } => {
                if sender.is_some() {
                    violations.push("reward must not carry a sender".to_string());
                }
                if self.to_address.as_deref() != Some(sealer.as_str()) {
                    violations.push("reward must be addressed to its sealer".to_string());
                }
            }
        }
        violations
    }
}
