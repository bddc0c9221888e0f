//! Hashing and signature primitives shared by every ledger entity.
//!
//! Digests are SHA-256 rendered as lowercase hex.  Keys are secp256k1 ECDSA:
//! public keys travel as hex SEC1 compressed points and signatures as hex of
//! the fixed 64-byte `r || s` encoding, always produced over a 32-byte digest.

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in hex characters of a compressed SEC1 public key.
pub const PUBLIC_KEY_HEX_LEN: usize = 66;

/// Length in bytes of a secp256k1 secret scalar.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Describes how a signing key should be obtained.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Deterministic key derived by hashing a seed string.
    Seed(String),
    /// Hex-encoded 32-byte secret scalar.
    Hex(String),
    /// Freshly generated random key.
    Random,
}

impl KeySource {
    /// Parses a key specification: `seed://<text>`, a 64-char hex secret, or
    /// anything else (including nothing) for a random key.
    pub fn from_spec(spec: Option<&str>) -> Self {
        match spec {
            Some(value) if value.starts_with("seed://") => {
                Self::Seed(value.trim_start_matches("seed://").to_string())
            }
            Some(value)
                if value.len() == SECRET_KEY_LENGTH * 2
                    && value.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Self::Hex(value.to_string())
            }
            _ => Self::Random,
        }
    }
}

/// Signing key together with its verifying half.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// Private signing key.
    pub signing: SigningKey,
    /// Public verifying key associated with `signing`.
    pub verifying: VerifyingKey,
}

impl KeyMaterial {
    /// Wraps an existing signing key.
    pub fn from_signing(signing: SigningKey) -> Self {
        let verifying = VerifyingKey::from(&signing);
        Self { signing, verifying }
    }

    /// Hex SEC1 compressed encoding of the public key.
    pub fn public_key_hex(&self) -> String {
        encode_public_key_hex(&self.verifying)
    }

    /// Hex encoding of the secret scalar.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }
}

/// Errors reported while decoding keys or signatures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Hex or curve-point parsing failure.
    #[error("key decode error: {0}")]
    Decode(String),
    /// Buffer did not match the expected length.
    #[error("unexpected key length: {0}")]
    InvalidLength(usize),
    /// Signature did not verify for the supplied key and digest.
    #[error("signature verification failed")]
    BadSignature,
}

/// Loads or derives key material according to the source specification.
pub fn load_or_derive_keypair(source: &KeySource) -> Result<KeyMaterial, KeyError> {
    let signing = match source {
        KeySource::Seed(seed) => derive_key_from_seed(seed)?,
        KeySource::Hex(secret) => decode_signing_key_hex(secret)?,
        KeySource::Random => SigningKey::random(&mut OsRng),
    };
    Ok(KeyMaterial::from_signing(signing))
}

fn derive_key_from_seed(seed: &str) -> Result<SigningKey, KeyError> {
    let mut counter = 0u32;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(b"CERTCHAIN_KEY_SEED");
        hasher.update(seed.as_bytes());
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();
        // A digest outside the curve order is astronomically unlikely; rehash if it happens.
        match SigningKey::from_slice(&digest) {
            Ok(key) => return Ok(key),
            Err(_) if counter < 8 => counter += 1,
            Err(err) => return Err(KeyError::Decode(err.to_string())),
        }
    }
}

/// Decodes a hex secret scalar into a signing key.
pub fn decode_signing_key_hex(input: &str) -> Result<SigningKey, KeyError> {
    let bytes = hex::decode(input.trim()).map_err(|err| KeyError::Decode(err.to_string()))?;
    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    SigningKey::from_slice(&bytes).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Encodes a public key as hex SEC1 (compressed).
pub fn encode_public_key_hex(verifying: &VerifyingKey) -> String {
    hex::encode(verifying.to_encoded_point(true).as_bytes())
}

/// Decodes a hex SEC1 public key (compressed or uncompressed).
pub fn decode_public_key_hex(input: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(input).map_err(|err| KeyError::Decode(err.to_string()))?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Returns true when `signing` is the private half of `public_key_hex`.
pub fn key_matches(signing: &SigningKey, public_key_hex: &str) -> bool {
    match decode_public_key_hex(public_key_hex) {
        Ok(expected) => signing.verifying_key() == &expected,
        Err(_) => false,
    }
}

/// SHA-256 of `data`, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Signs a hex digest and returns the hex signature.
pub fn sign_digest_hex(signing: &SigningKey, digest_hex: &str) -> Result<String, KeyError> {
    let digest = decode_digest(digest_hex)?;
    let signature: Signature = signing
        .sign_prehash(&digest)
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    Ok(hex::encode(signature.to_bytes()))
}

/// Verifies a hex signature over a hex digest with a hex public key.
pub fn verify_digest_hex(
    public_key_hex: &str,
    digest_hex: &str,
    signature_hex: &str,
) -> Result<(), KeyError> {
    let verifying = decode_public_key_hex(public_key_hex)?;
    let digest = decode_digest(digest_hex)?;
    let bytes = hex::decode(signature_hex).map_err(|err| KeyError::Decode(err.to_string()))?;
    let signature =
        Signature::from_slice(&bytes).map_err(|err| KeyError::Decode(err.to_string()))?;
    verifying
        .verify_prehash(&digest, &signature)
        .map_err(|_| KeyError::BadSignature)
}

fn decode_digest(digest_hex: &str) -> Result<Vec<u8>, KeyError> {
    let digest = hex::decode(digest_hex).map_err(|err| KeyError::Decode(err.to_string()))?;
    if digest.len() != 32 {
        return Err(KeyError::InvalidLength(digest.len()));
    }
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_keys_are_deterministic() {
        let a = load_or_derive_keypair(&KeySource::Seed("registrar".into())).unwrap();
        let b = load_or_derive_keypair(&KeySource::Seed("registrar".into())).unwrap();
        let c = load_or_derive_keypair(&KeySource::Seed("bursar".into())).unwrap();
        assert_eq!(a.public_key_hex(), b.public_key_hex());
        assert_ne!(a.public_key_hex(), c.public_key_hex());
        assert_eq!(a.public_key_hex().len(), PUBLIC_KEY_HEX_LEN);
    }

    #[test]
    fn test_hex_source_round_trips_secret() {
        let original = load_or_derive_keypair(&KeySource::Random).unwrap();
        let spec = original.secret_hex();
        let source = KeySource::from_spec(Some(&spec));
        let restored = load_or_derive_keypair(&source).unwrap();
        assert_eq!(original.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let keys = load_or_derive_keypair(&KeySource::Seed("signer".into())).unwrap();
        let digest = sha256_hex(b"diploma");
        let signature = sign_digest_hex(&keys.signing, &digest).unwrap();
        assert!(verify_digest_hex(&keys.public_key_hex(), &digest, &signature).is_ok());
        let other = sha256_hex(b"forged diploma");
        assert_eq!(
            verify_digest_hex(&keys.public_key_hex(), &other, &signature),
            Err(KeyError::BadSignature)
        );
    }

    #[test]
    fn test_key_matches() {
        let keys = load_or_derive_keypair(&KeySource::Seed("a".into())).unwrap();
        let other = load_or_derive_keypair(&KeySource::Seed("b".into())).unwrap();
        assert!(key_matches(&keys.signing, &keys.public_key_hex()));
        assert!(!key_matches(&keys.signing, &other.public_key_hex()));
        assert!(!key_matches(&keys.signing, "not-a-key"));
    }
}
