//! Institutions permitted to issue, revoke and seal.
//!
//! Membership is bootstrapped out of band, either from a JSON roster or the
//! built-in three-institution reference deployment.  Authorization is the
//! only gate the ledger engine consults before privileged actions.

use crate::crypto::{decode_public_key_hex, load_or_derive_keypair, KeyMaterial, KeySource};
use crate::error::AuthorityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Category of an institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstitutionType {
    /// Degree-granting university.
    University,
    /// College or polytechnic.
    College,
    /// Vocational training provider.
    TrainingProvider,
    /// Professional accreditation body.
    ProfessionalBody,
}

/// Registry record for one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    /// Display name.
    pub name: String,
    /// Institution category.
    #[serde(rename = "type")]
    pub kind: InstitutionType,
    /// Hex public key identifying the institution.
    pub public_key: String,
    /// Whether the institution may currently issue, revoke and seal.
    pub authorized: bool,
    /// Certificates materialized for this issuer on the current chain.
    pub issued_count: u64,
    /// Millisecond timestamp of the last materialized issuance.
    pub last_activity: Option<u64>,
}

impl Institution {
    /// Creates an authorized institution with zeroed counters.
    pub fn new(name: impl Into<String>, kind: InstitutionType, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            public_key: public_key.into(),
            authorized: true,
            issued_count: 0,
            last_activity: None,
        }
    }
}

/// Institution records keyed by hex public key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityRegistry {
    institutions: BTreeMap<String, Institution>,
}

#[derive(Debug, Clone, Deserialize)]
struct RosterFile {
    institutions: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterEntry {
    name: String,
    #[serde(rename = "type")]
    kind: InstitutionType,
    public_key: String,
    #[serde(default = "default_authorized")]
    authorized: bool,
}

fn default_authorized() -> bool {
    true
}

/// Names, types and key seeds of the reference deployment.
pub const REFERENCE_ROSTER: [(&str, InstitutionType, &str); 3] = [
    (
        "Northbridge University",
        InstitutionType::University,
        "northbridge-university",
    ),
    (
        "Westfield Technical College",
        InstitutionType::College,
        "westfield-technical-college",
    ),
    (
        "Institute of Applied Engineering",
        InstitutionType::ProfessionalBody,
        "institute-of-applied-engineering",
    ),
];

impl AuthorityRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry from a JSON roster file.
    ///
    /// The expected format is:
    ///
    /// ```json
    /// { "institutions": [
    ///     { "name": "...", "type": "UNIVERSITY", "publicKey": "<hex>", "authorized": true }
    /// ] }
    /// ```
    pub fn from_roster_path(path: &Path) -> Result<Self, AuthorityError> {
        let contents = fs::read_to_string(path).map_err(|err| AuthorityError::Io(err.to_string()))?;
        Self::from_roster_json(&contents)
    }

    /// Parses a registry from roster JSON text.
    pub fn from_roster_json(contents: &str) -> Result<Self, AuthorityError> {
        let parsed: RosterFile =
            serde_json::from_str(contents).map_err(|err| AuthorityError::Parse(err.to_string()))?;
        let mut registry = Self::new();
        for entry in parsed.institutions {
            decode_public_key_hex(&entry.public_key)
                .map_err(|err| AuthorityError::Parse(err.to_string()))?;
            let mut institution = Institution::new(entry.name, entry.kind, entry.public_key);
            institution.authorized = entry.authorized;
            registry.register(institution)?;
        }
        Ok(registry)
    }

    /// Builds the three-institution reference deployment and returns each
    /// institution's key material alongside the registry.
    pub fn reference_roster() -> Result<(Self, Vec<KeyMaterial>), AuthorityError> {
        let mut registry = Self::new();
        let mut keys = Vec::with_capacity(REFERENCE_ROSTER.len());
        for (name, kind, seed) in REFERENCE_ROSTER {
            let material = load_or_derive_keypair(&KeySource::Seed(seed.to_string()))
                .map_err(|err| AuthorityError::Parse(err.to_string()))?;
            registry.register(Institution::new(name, kind, material.public_key_hex()))?;
            keys.push(material);
        }
        Ok((registry, keys))
    }

    /// Adds a new institution.
    pub fn register(&mut self, institution: Institution) -> Result<(), AuthorityError> {
        if self.institutions.contains_key(&institution.public_key) {
            return Err(AuthorityError::DuplicateInstitution(institution.public_key));
        }
        self.institutions
            .insert(institution.public_key.clone(), institution);
        Ok(())
    }

    /// Grants authorization; a no-op if already authorized.
    pub fn authorize(&mut self, public_key: &str) -> Result<(), AuthorityError> {
        self.set_authorized(public_key, true)
    }

    /// Withdraws authorization; a no-op if already withdrawn.
    pub fn revoke_authorization(&mut self, public_key: &str) -> Result<(), AuthorityError> {
        self.set_authorized(public_key, false)
    }

    fn set_authorized(&mut self, public_key: &str, authorized: bool) -> Result<(), AuthorityError> {
        let institution = self
            .institutions
            .get_mut(public_key)
            .ok_or_else(|| AuthorityError::UnknownInstitution(public_key.to_string()))?;
        institution.authorized = authorized;
        Ok(())
    }

    /// The single admission predicate for privileged actions.
    pub fn is_authorized(&self, public_key: &str) -> bool {
        self.institutions
            .get(public_key)
            .map(|institution| institution.authorized)
            .unwrap_or(false)
    }

    /// Looks up an institution.
    pub fn institution(&self, public_key: &str) -> Option<&Institution> {
        self.institutions.get(public_key)
    }

    /// All institutions ordered by public key.
    pub fn institutions(&self) -> impl Iterator<Item = &Institution> {
        self.institutions.values()
    }

    /// Bumps the issuer's counter and activity timestamp.
    pub fn record_issuance(&mut self, public_key: &str, timestamp: u64) {
        if let Some(institution) = self.institutions.get_mut(public_key) {
            institution.issued_count = institution.issued_count.saturating_add(1);
            institution.last_activity = Some(timestamp);
        }
    }

    /// Zeroes every derived counter ahead of a registry rebuild.
    pub fn reset_counters(&mut self) {
        for institution in self.institutions.values_mut() {
            institution.issued_count = 0;
            institution.last_activity = None;
        }
    }

    /// Number of registered institutions.
    pub fn len(&self) -> usize {
        self.institutions.len()
    }

    /// Returns true if no institution is registered.
    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn test_reference_roster_has_three_authorized_institutions() {
        let (registry, keys) = AuthorityRegistry::reference_roster().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(keys.len(), 3);
        for key in &keys {
            assert!(registry.is_authorized(&key.public_key_hex()));
        }
    }

    #[test]
    fn test_authorization_toggles_are_idempotent() {
        let (mut registry, keys) = AuthorityRegistry::reference_roster().unwrap();
        let pk = keys[0].public_key_hex();
        registry.revoke_authorization(&pk).unwrap();
        registry.revoke_authorization(&pk).unwrap();
        assert!(!registry.is_authorized(&pk));
        registry.authorize(&pk).unwrap();
        registry.authorize(&pk).unwrap();
        assert!(registry.is_authorized(&pk));
        assert_eq!(
            registry.authorize("unknown"),
            Err(AuthorityError::UnknownInstitution("unknown".into()))
        );
        assert!(!registry.is_authorized("unknown"));
    }

    #[test]
    fn test_counters_reset() {
        let (mut registry, keys) = AuthorityRegistry::reference_roster().unwrap();
        let pk = keys[1].public_key_hex();
        registry.record_issuance(&pk, 42);
        registry.record_issuance(&pk, 43);
        let institution = registry.institution(&pk).unwrap();
        assert_eq!(institution.issued_count, 2);
        assert_eq!(institution.last_activity, Some(43));
        registry.reset_counters();
        assert_eq!(registry.institution(&pk).unwrap().issued_count, 0);
    }

    #[test]
    fn test_roster_file_loads_and_rejects_bad_keys() {
        let (_, keys) = AuthorityRegistry::reference_roster().unwrap();
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!("roster_{nanos}.json"));
        let roster = format!(
            r#"{{"institutions":[{{"name":"Harbour Academy","type":"COLLEGE","publicKey":"{}","authorized":false}}]}}"#,
            keys[0].public_key_hex()
        );
        fs::write(&path, roster).unwrap();
        let registry = AuthorityRegistry::from_roster_path(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_authorized(&keys[0].public_key_hex()));

        let bad = r#"{"institutions":[{"name":"X","type":"COLLEGE","publicKey":"zz"}]}"#;
        assert!(matches!(
            AuthorityRegistry::from_roster_json(bad),
            Err(AuthorityError::Parse(_))
        ));
    }
}
