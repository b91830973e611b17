//! Hybrid PQC Engine (§4.1, 35% share): ML-KEM key encapsulation combined
//! with AES-256-GCM under a key derived via HKDF-SHA256. Neither side alone
//! is trusted to carry the full security margin — the classical AEAD key is
//! always derived from the post-quantum shared secret, never used raw.

use std::time::{Duration, SystemTime};

use pqcrypto_mlkem::mlkem1024;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext, PublicKey, SecretKey, SharedSecret};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::config::PqcLevel;

use super::primitives::{aes_gcm_open, aes_gcm_seal, CryptoError};

const HYBRID_SALT: &[u8] = b"PULSAR-HYBRID-v1";

/// A keypair's public half, tagged with the ML-KEM parameter set it was
/// generated under so decapsulation always uses the matching algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyMaterial {
    pub key_id: String,
    pub level: PqcLevelTag,
    pub public_key: Vec<u8>,
}

/// Serializable mirror of `PqcLevel` (the config type has no serde impl by
/// design — it is an environment-parsing concern, not a wire concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PqcLevelTag {
    MlKem768,
    MlKem1024,
}

impl From<PqcLevel> for PqcLevelTag {
    fn from(level: PqcLevel) -> Self {
        match level {
            PqcLevel::MlKem768 => PqcLevelTag::MlKem768,
            PqcLevel::MlKem1024 => PqcLevelTag::MlKem1024,
        }
    }
}

/// A generated keypair. The secret key is zeroized on drop; callers that
/// need to persist it must go through `KeyStore::export_sealed`.
pub struct KeyPair {
    pub public: PublicKeyMaterial,
    secret_bytes: Vec<u8>,
    pub created_at: SystemTime,
    pub stale: bool,
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_bytes.zeroize();
    }
}

impl KeyPair {
    /// Generate a fresh ML-KEM keypair at the requested security level.
    /// `key_id` is the hex BLAKE3 of the encoded public key: a local
    /// bookkeeping fingerprint, not a wire value, so there is no reason to
    /// pay SHA-256's cost for it.
    pub fn generate(level: PqcLevel) -> Self {
        let (public_bytes, secret_bytes) = match level {
            PqcLevel::MlKem768 => {
                let (pk, sk) = mlkem768::keypair();
                (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
            }
            PqcLevel::MlKem1024 => {
                let (pk, sk) = mlkem1024::keypair();
                (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
            }
        };
        let key_id = blake3::hash(&public_bytes).to_hex().to_string();
        Self {
            public: PublicKeyMaterial {
                key_id,
                level: level.into(),
                public_key: public_bytes,
            },
            secret_bytes,
            created_at: SystemTime::now(),
            stale: false,
        }
    }

    /// Reconstruct a keypair from raw public/secret key bytes recovered from
    /// a sealed backup (§4.1 supplement: `KeyStore::import_sealed`). Unlike
    /// `generate`, this does not mint new key material — it restores exactly
    /// the bytes that were previously exported.
    pub fn from_parts(level: PqcLevel, public_key: Vec<u8>, secret_key: Vec<u8>, created_at: SystemTime) -> Self {
        let key_id = blake3::hash(&public_key).to_hex().to_string();
        Self {
            public: PublicKeyMaterial {
                key_id,
                level: level.into(),
                public_key,
            },
            secret_bytes: secret_key,
            created_at,
            stale: false,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.public.key_id
    }

    /// The raw secret key bytes, exposed only so a sealed backup can carry
    /// them — never logged, never part of a wire envelope.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret_bytes
    }

    /// §4.1: a key becomes stale after `rotation_period`, but remains usable
    /// for decryption (not new encryption) through `grace_period` beyond
    /// that, so in-flight envelopes sealed just before rotation still open.
    pub fn is_within_grace(&self, rotation_period: Duration, grace_period: Duration) -> bool {
        let age = self.created_at.elapsed().unwrap_or(Duration::ZERO);
        age < rotation_period + grace_period
    }

    pub fn is_expired(&self, rotation_period: Duration, grace_period: Duration) -> bool {
        !self.is_within_grace(rotation_period, grace_period)
    }
}

/// Sealed hybrid ciphertext prior to wire encoding: the KEM ciphertext, the
/// AEAD nonce, and the AEAD ciphertext, each still as raw bytes.
pub struct HybridSealed {
    pub kem_ciphertext: Vec<u8>,
    pub nonce: [u8; 12],
    pub aead_ciphertext: Vec<u8>,
}

/// Encapsulate against `public`, derive an AES-256 key from the shared
/// secret via HKDF-SHA256 (salt `PULSAR-HYBRID-v1`, info = key_id), and
/// seal `plaintext` under it. The shared secret and derived key are
/// zeroized before returning.
pub fn encrypt_hybrid(public: &PublicKeyMaterial, plaintext: &[u8]) -> HybridSealed {
    let (mut shared_secret, kem_ciphertext) = match public.level {
        PqcLevelTag::MlKem768 => {
            let pk = mlkem768::PublicKey::from_bytes(&public.public_key)
                .expect("stored public key bytes are always well-formed");
            let (ss, ct) = mlkem768::encapsulate(&pk);
            (ss.as_bytes().to_vec(), ct.as_bytes().to_vec())
        }
        PqcLevelTag::MlKem1024 => {
            let pk = mlkem1024::PublicKey::from_bytes(&public.public_key)
                .expect("stored public key bytes are always well-formed");
            let (ss, ct) = mlkem1024::encapsulate(&pk);
            (ss.as_bytes().to_vec(), ct.as_bytes().to_vec())
        }
    };

    let mut aes_key_vec = super::primitives::hkdf_sha256(
        &shared_secret,
        HYBRID_SALT,
        public.key_id.as_bytes(),
        32,
    );
    let mut aes_key = [0u8; 32];
    aes_key.copy_from_slice(&aes_key_vec);

    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    let aead_ciphertext = aes_gcm_seal(&aes_key, &nonce, plaintext);

    shared_secret.zeroize();
    aes_key_vec.zeroize();
    aes_key.zeroize();

    HybridSealed {
        kem_ciphertext,
        nonce,
        aead_ciphertext,
    }
}

/// Decapsulate with `keypair`'s secret key and open the AEAD ciphertext.
/// Mirrors the key derivation in `encrypt_hybrid` exactly.
pub fn decrypt_hybrid(
    keypair: &KeyPair,
    kem_ciphertext: &[u8],
    nonce: &[u8; 12],
    aead_ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut shared_secret = match keypair.public.level {
        PqcLevelTag::MlKem768 => {
            let sk = mlkem768::SecretKey::from_bytes(&keypair.secret_bytes)
                .map_err(|_| CryptoError::Malformed)?;
            let ct = mlkem768::Ciphertext::from_bytes(kem_ciphertext)
                .map_err(|_| CryptoError::Malformed)?;
            mlkem768::decapsulate(&ct, &sk).as_bytes().to_vec()
        }
        PqcLevelTag::MlKem1024 => {
            let sk = mlkem1024::SecretKey::from_bytes(&keypair.secret_bytes)
                .map_err(|_| CryptoError::Malformed)?;
            let ct = mlkem1024::Ciphertext::from_bytes(kem_ciphertext)
                .map_err(|_| CryptoError::Malformed)?;
            mlkem1024::decapsulate(&ct, &sk).as_bytes().to_vec()
        }
    };

    let mut aes_key_vec = super::primitives::hkdf_sha256(
        &shared_secret,
        HYBRID_SALT,
        keypair.public.key_id.as_bytes(),
        32,
    );
    let mut aes_key = [0u8; 32];
    aes_key.copy_from_slice(&aes_key_vec);

    let result = aes_gcm_open(&aes_key, nonce, aead_ciphertext);

    shared_secret.zeroize();
    aes_key_vec.zeroize();
    aes_key.zeroize();

    result
}
