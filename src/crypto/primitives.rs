//! Thin adapter over the vetted crypto primitives the rest of the crate
//! builds on: SHA-256, HKDF-SHA256, AES-256-GCM, and ECDSA-secp256k1
//! recovery (§4 "Crypto Primitives", 10% share). Nothing here implements a
//! primitive from scratch — each function is a constant-time-respecting
//! wrapper around an audited crate, per §1's non-goal of rolling our own
//! cryptography.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("authentication tag verification failed")]
    AuthenticationFailure,
    #[error("malformed input")]
    Malformed,
    #[error("signature recovery failed")]
    RecoveryFailed,
    #[error("envelope's algorithm tag does not match the requested key level")]
    AlgorithmMismatch,
    #[error("key has passed its rotation grace period and can no longer be used")]
    StaleKey,
}

/// SHA-256 over arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HKDF-SHA256 with explicit salt and info, producing `out_len` bytes.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], out_len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .expect("hkdf output length is within RFC 5869 bounds for SHA-256");
    okm
}

/// AES-256-GCM seal with the given 32-byte key, 12-byte nonce, and empty AAD.
pub fn aes_gcm_seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .expect("AES-256-GCM encryption over a bounded plaintext cannot fail")
}

/// AES-256-GCM open. Any authentication failure surfaces uniformly as
/// `AuthenticationFailure` (§4.1: indistinguishable from `Malformed` to an
/// attacker observing timing).
pub fn aes_gcm_open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// Constant-time byte comparison, used anywhere two secrets/tags/addresses
/// must be compared without leaking timing information.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Recover the Ethereum-style `0x`-prefixed lowercase-hex address that
/// produced `signature` over `message` (ECDSA-secp256k1 recovery, §4.6).
pub fn recover_address(
    message: &[u8],
    signature: &[u8; 64],
    recovery_id: u8,
) -> Result<String, CryptoError> {
    let sig = K256Signature::from_slice(signature).map_err(|_| CryptoError::Malformed)?;
    let rec_id = RecoveryId::from_byte(recovery_id).ok_or(CryptoError::Malformed)?;

    let prehash = keccak256(message);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, rec_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    Ok(address_from_verifying_key(&verifying_key))
}

/// Verify that `signature` was produced by the holder of `address` over
/// `message`, without needing recovery (used when the verifying key is
/// already known, e.g. replay of a stored signer).
pub fn verify_signature(
    message: &[u8],
    signature: &[u8; 64],
    verifying_key: &VerifyingKey,
) -> bool {
    let Ok(sig) = K256Signature::from_slice(signature) else {
        return false;
    };
    let prehash = keccak256(message);
    verifying_key.verify_prehash(&prehash, &sig).is_ok()
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let uncompressed = key.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
