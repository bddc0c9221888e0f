//! Educational certificates and their institution signatures.
//!
//! A certificate is drafted unsigned, signed exactly once by the issuing
//! institution's key, and treated as immutable afterwards: any field change
//! alters the recomputed content hash and verification fails.

use crate::crypto::{key_matches, sign_digest_hex, verify_digest_hex, PUBLIC_KEY_HEX_LEN};
use crate::data::canonical_json;
use crate::error::CertificateError;
use chrono::{DateTime, Utc};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Minimum number of characters in a person or institution name.
pub const MIN_NAME_CHARS: usize = 2;

/// Kind of credential a certificate attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateType {
    /// Bachelor's degree.
    Bachelor,
    /// Master's degree.
    Master,
    /// Doctorate.
    Phd,
    /// Diploma programme.
    Diploma,
    /// Short-course certification.
    Certification,
    /// Professional qualification.
    Professional,
}

impl CertificateType {
    /// Every supported certificate type.
    pub const ALL: [CertificateType; 6] = [
        Self::Bachelor,
        Self::Master,
        Self::Phd,
        Self::Diploma,
        Self::Certification,
        Self::Professional,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bachelor => "BACHELOR",
            Self::Master => "MASTER",
            Self::Phd => "PHD",
            Self::Diploma => "DIPLOMA",
            Self::Certification => "CERTIFICATION",
            Self::Professional => "PROFESSIONAL",
        }
    }

    /// Credential level assumed when the issuer leaves it blank.
    pub fn default_credential_level(&self) -> &'static str {
        match self {
            Self::Bachelor => "undergraduate",
            Self::Master | Self::Phd => "postgraduate",
            Self::Diploma | Self::Certification | Self::Professional => "professional",
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|kind| kind.as_str()).collect();
                format!(
                    "unknown certificate type {input:?}; expected one of {}",
                    known.join(", ")
                )
            })
    }
}

/// Credential record issued by an institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Unique certificate identifier.
    pub id: String,
    /// Full name of the recipient.
    pub recipient_name: String,
    /// Institution-assigned recipient identifier (student number).
    pub recipient_id: String,
    /// Display name of the issuing institution.
    pub institution_name: String,
    /// Hex public key of the issuing institution.
    pub institution_public_key: String,
    /// Credential kind.
    pub certificate_type: CertificateType,
    /// Programme or course title.
    pub course_name: String,
    /// When the certificate was issued.
    pub issue_date: DateTime<Utc>,
    /// When the recipient completed the programme.
    pub completion_date: DateTime<Utc>,
    /// Optional grade or classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    /// Credential level (undergraduate, postgraduate, ...).
    pub credential_level: String,
    /// Optional expiry; evaluated on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// Free-form issuer metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// SHA-256 over the canonical encoding of every other field except the signature.
    pub content_hash: String,
    /// Hex ECDSA signature by the institution over `content_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateContent<'a> {
    id: &'a str,
    recipient_name: &'a str,
    recipient_id: &'a str,
    institution_name: &'a str,
    institution_public_key: &'a str,
    certificate_type: CertificateType,
    course_name: &'a str,
    issue_date: &'a DateTime<Utc>,
    completion_date: &'a DateTime<Utc>,
    grade: &'a Option<String>,
    credential_level: &'a str,
    expiration_date: &'a Option<DateTime<Utc>>,
    metadata: &'a BTreeMap<String, Value>,
}

impl Certificate {
    /// Recomputes the content hash from the current field values.
    pub fn compute_hash(&self) -> Result<String, CertificateError> {
        let content = CertificateContent {
            id: &self.id,
            recipient_name: &self.recipient_name,
            recipient_id: &self.recipient_id,
            institution_name: &self.institution_name,
            institution_public_key: &self.institution_public_key,
            certificate_type: self.certificate_type,
            course_name: &self.course_name,
            issue_date: &self.issue_date,
            completion_date: &self.completion_date,
            grade: &self.grade,
            credential_level: &self.credential_level,
            expiration_date: &self.expiration_date,
            metadata: &self.metadata,
        };
        let encoded =
            canonical_json(&content).map_err(|err| CertificateError::Encoding(err.to_string()))?;
        Ok(crate::crypto::sha256_hex(encoded.as_bytes()))
    }

    /// Signs the certificate with the institution's private key.
    pub fn sign(&mut self, signing: &SigningKey) -> Result<(), CertificateError> {
        if !key_matches(signing, &self.institution_public_key) {
            return Err(CertificateError::KeyMismatch);
        }
        let hash = self.compute_hash()?;
        let signature = sign_digest_hex(signing, &hash)
            .map_err(|err| CertificateError::Encoding(err.to_string()))?;
        self.content_hash = hash;
        self.signature = Some(signature);
        Ok(())
    }

    /// Checks the stored hash against the fields and the signature against the issuer key.
    pub fn verify(&self) -> Result<(), CertificateError> {
        let signature = self
            .signature
            .as_deref()
            .ok_or(CertificateError::Unsigned)?;
        let hash = self.compute_hash()?;
        if hash != self.content_hash {
            return Err(CertificateError::InvalidSignature);
        }
        verify_digest_hex(&self.institution_public_key, &hash, signature)
            .map_err(|_| CertificateError::InvalidSignature)
    }

    /// Returns true once a signature is attached.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Returns true if the certificate has an expiration date at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    /// Returns true if the certificate has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Collects every field-level violation against the clock `now`.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut violations = Vec::new();
        if self.recipient_name.trim().chars().count() < MIN_NAME_CHARS {
            violations.push(format!(
                "recipient name must be at least {MIN_NAME_CHARS} characters"
            ));
        }
        if self.institution_name.trim().chars().count() < MIN_NAME_CHARS {
            violations.push(format!(
                "institution name must be at least {MIN_NAME_CHARS} characters"
            ));
        }
        if self.recipient_id.trim().is_empty() {
            violations.push("recipient id is required".to_string());
        }
        if self.course_name.trim().is_empty() {
            violations.push("course name is required".to_string());
        }
        if self.institution_public_key.len() < PUBLIC_KEY_HEX_LEN {
            violations.push(format!(
                "institution public key must be at least {PUBLIC_KEY_HEX_LEN} hex characters"
            ));
        }
        if self.completion_date > now {
            violations.push("completion date cannot be in the future".to_string());
        }
        if let Some(expires) = self.expiration_date {
            if expires <= now {
                violations.push("expiration date must be in the future".to_string());
            }
        }
        violations
    }

    /// Collects every field-level violation against the current time.
    pub fn validate(&self) -> Vec<String> {
        self.validate_at(Utc::now())
    }
}

/// Builder for an unsigned [`Certificate`].
#[derive(Debug, Clone)]
pub struct CertificateDraft {
    recipient_name: String,
    recipient_id: String,
    institution_name: String,
    institution_public_key: String,
    certificate_type: CertificateType,
    course_name: String,
    completion_date: DateTime<Utc>,
    issue_date: Option<DateTime<Utc>>,
    grade: Option<String>,
    credential_level: Option<String>,
    expiration_date: Option<DateTime<Utc>>,
    metadata: BTreeMap<String, Value>,
}

impl CertificateDraft {
    /// Starts a draft with every required field.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipient_name: impl Into<String>,
        recipient_id: impl Into<String>,
        institution_name: impl Into<String>,
        institution_public_key: impl Into<String>,
        certificate_type: CertificateType,
        course_name: impl Into<String>,
        completion_date: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient_name: recipient_name.into(),
            recipient_id: recipient_id.into(),
            institution_name: institution_name.into(),
            institution_public_key: institution_public_key.into(),
            certificate_type,
            course_name: course_name.into(),
            completion_date,
            issue_date: None,
            grade: None,
            credential_level: None,
            expiration_date: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the issue date (defaults to now).
    pub fn issued_at(mut self, issue_date: DateTime<Utc>) -> Self {
        self.issue_date = Some(issue_date);
        self
    }

    /// Sets the grade.
    pub fn grade(mut self, grade: impl Into<String>) -> Self {
        self.grade = Some(grade.into());
        self
    }

    /// Overrides the credential level derived from the type.
    pub fn credential_level(mut self, level: impl Into<String>) -> Self {
        self.credential_level = Some(level.into());
        self
    }

    /// Sets an expiration date.
    pub fn expires_at(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Assigns an identifier and content hash, producing an unsigned certificate.
    pub fn build(self) -> Result<Certificate, CertificateError> {
        let credential_level = self
            .credential_level
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| self.certificate_type.default_credential_level().to_string());
        let mut certificate = Certificate {
            id: format!("CERT-{}", Uuid::new_v4().simple()),
            recipient_name: self.recipient_name,
            recipient_id: self.recipient_id,
            institution_name: self.institution_name,
            institution_public_key: self.institution_public_key,
            certificate_type: self.certificate_type,
            course_name: self.course_name,
            issue_date: self.issue_date.unwrap_or_else(Utc::now),
            completion_date: self.completion_date,
            grade: self.grade,
            credential_level,
            expiration_date: self.expiration_date,
            metadata: self.metadata,
            content_hash: String::new(),
            signature: None,
        };
        certificate.content_hash = certificate.compute_hash()?;
        Ok(certificate)
    }
}
