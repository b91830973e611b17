//! Wallet-signature Auth Protocol (§4.6, 10% share): nonce issuance,
//! ECDSA-secp256k1 recovery verification, and session token issuance.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::crypto::primitives::{constant_time_eq, recover_address};
use crate::identity::{AgentId, Role, Tier};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no nonce outstanding for this agent, or it has already been consumed")]
    NonceUsed,
    #[error("nonce has expired")]
    NonceExpired,
    #[error("signature does not recover to the claimed agent address")]
    SignatureInvalid,
    #[error("session token is expired or its signature does not verify")]
    InvalidSession,
    #[error("malformed signature encoding")]
    Malformed,
}

struct NonceEntry {
    nonce_hex: String,
    message: String,
    expires_at: DateTime<Utc>,
}

/// A signed, time-bounded bearer credential (§3 "Session Token").
/// Verification is constant-time and an expired token is rejected without
/// distinguishing *why* (§4.6), so `verify` collapses both failure modes
/// into a single bool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub agent_id: AgentId,
    pub role: Role,
    pub tier: Tier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

impl SessionToken {
    fn canonical_bytes(
        agent_id: AgentId,
        role: Role,
        tier: Tier,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Vec<u8> {
        format!(
            "{agent_id}|{role:?}|{tier:?}|{}|{}",
            issued_at.to_rfc3339(),
            expires_at.to_rfc3339()
        )
        .into_bytes()
    }

    fn sign(
        key: &[u8; 32],
        agent_id: AgentId,
        role: Role,
        tier: Tier,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> String {
        let bytes = Self::canonical_bytes(agent_id, role, tier, issued_at, expires_at);
        let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(&bytes);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time signature check plus an expiry check; both collapse
    /// into a single `bool` so a caller cannot distinguish "bad signature"
    /// from "expired" (§4.6, §7).
    pub fn verify(&self, key: &[u8; 32], now: DateTime<Utc>) -> bool {
        let expected = Self::sign(key, self.agent_id, self.role, self.tier, self.issued_at, self.expires_at);
        let sig_ok = constant_time_eq(expected.as_bytes(), self.signature.as_bytes());
        let time_ok = now < self.expires_at;
        sig_ok && time_ok
    }

    /// Opaque bearer encoding: base64 of the token's JSON form. The HTTP
    /// front-door (§6, out of scope) would hand this back to callers as
    /// `{token}` in `POST /auth/verify`'s response.
    pub fn to_bearer(&self) -> String {
        BASE64.encode(serde_json::to_vec(self).expect("SessionToken always serializes"))
    }

    pub fn from_bearer(s: &str) -> Result<Self, AuthError> {
        let bytes = BASE64.decode(s).map_err(|_| AuthError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
    }
}

/// Parse a 65-byte `r || s || v` hex-encoded wallet signature into the
/// 64-byte compact form `k256` expects plus a normalized recovery id
/// (Ethereum's `eth_sign` convention adds 27 to `v`).
pub fn split_wallet_signature(signature_hex: &str) -> Result<([u8; 64], u8), AuthError> {
    let bytes = hex::decode(signature_hex.trim_start_matches("0x")).map_err(|_| AuthError::Malformed)?;
    if bytes.len() != 65 {
        return Err(AuthError::Malformed);
    }
    let mut compact = [0u8; 64];
    compact.copy_from_slice(&bytes[..64]);
    let v = bytes[64];
    let recovery_id = if v >= 27 { v - 27 } else { v };
    Ok((compact, recovery_id))
}

/// Nonce issuance, signature verification, and session token minting
/// (§4.6). Owns the per-agent nonce cache; holds no other global state.
pub struct AuthProtocol {
    session_key: Secret<[u8; 32]>,
    nonce_lifetime: Duration,
    session_lifetime: Duration,
    nonces: DashMap<AgentId, NonceEntry>,
}

impl AuthProtocol {
    pub fn new(session_key: [u8; 32], nonce_lifetime: Duration, session_lifetime: Duration) -> Self {
        Self {
            session_key: Secret::new(session_key),
            nonce_lifetime,
            session_lifetime,
            nonces: DashMap::new(),
        }
    }

    /// Issue a fresh single-use nonce for `agent_id`. Overwrites any
    /// previously outstanding nonce for the same agent (at most one
    /// nonce is live per agent at a time).
    pub fn issue_nonce(&self, agent_id: AgentId) -> (String, String, DateTime<Utc>) {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let nonce_hex = hex::encode(raw);
        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(self.nonce_lifetime).unwrap_or(chrono::Duration::seconds(300));
        let message = format!(
            "PULSAR-SENTINEL-AUTH\nagent:{agent_id}\nnonce:{nonce_hex}\nissued_at:{}",
            issued_at.to_rfc3339()
        );
        self.nonces.insert(
            agent_id,
            NonceEntry {
                nonce_hex: nonce_hex.clone(),
                message: message.clone(),
                expires_at,
            },
        );
        (nonce_hex, message, expires_at)
    }

    /// Verify a signature over the previously-issued nonce message and, on
    /// success, consume the nonce and mint a session token. The recovered
    /// address is compared against `agent_id` in constant time.
    pub fn verify(
        &self,
        agent_id: AgentId,
        signature: &[u8; 64],
        recovery_id: u8,
        nonce: &str,
        role: Role,
        tier: Tier,
    ) -> Result<SessionToken, AuthError> {
        let Some(entry) = self.nonces.get(&agent_id) else {
            return Err(AuthError::NonceUsed);
        };
        if !constant_time_eq(entry.nonce_hex.as_bytes(), nonce.as_bytes()) {
            return Err(AuthError::NonceUsed);
        }
        if Utc::now() > entry.expires_at {
            drop(entry);
            self.nonces.remove(&agent_id);
            return Err(AuthError::NonceExpired);
        }
        let message = entry.message.clone();
        drop(entry);

        let recovered =
            recover_address(message.as_bytes(), signature, recovery_id).map_err(|_| AuthError::SignatureInvalid)?;
        if !constant_time_eq(recovered.as_bytes(), agent_id.to_string().as_bytes()) {
            return Err(AuthError::SignatureInvalid);
        }

        // Single-use: the nonce is removed only once the signature has
        // verified, so a failed attempt can be retried until it expires.
        self.nonces.remove(&agent_id);

        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(self.session_lifetime).unwrap_or(chrono::Duration::seconds(86_400));
        let signature_hex = SessionToken::sign(
            self.session_key.expose_secret(),
            agent_id,
            role,
            tier,
            issued_at,
            expires_at,
        );
        Ok(SessionToken {
            agent_id,
            role,
            tier,
            issued_at,
            expires_at,
            signature: signature_hex,
        })
    }

    pub fn verify_session(&self, token: &SessionToken) -> bool {
        token.verify(self.session_key.expose_secret(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey};
    use sha3::{Digest, Keccak256};

    fn keccak256(data: &[u8]) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn wallet() -> (SigningKey, AgentId) {
        let signing_key = SigningKey::from_bytes(&[0x42u8; 32].into()).unwrap();
        let address = crate::crypto::primitives::address_from_verifying_key(signing_key.verifying_key());
        let agent: AgentId = address.parse().unwrap();
        (signing_key, agent)
    }

    fn sign(signing_key: &SigningKey, message: &str) -> ([u8; 64], u8) {
        let prehash = keccak256(message.as_bytes());
        let (sig, rec_id): (K256Signature, RecoveryId) =
            signing_key.sign_prehash_recoverable(&prehash).unwrap();
        (sig.to_bytes().into(), rec_id.to_byte())
    }

    #[test]
    fn nonce_round_trip_issues_a_valid_session() {
        let (signing_key, agent) = wallet();
        let auth = AuthProtocol::new([1u8; 32], Duration::from_secs(300), Duration::from_secs(86_400));
        let (nonce, message, _expires) = auth.issue_nonce(agent);
        let (sig, rec_id) = sign(&signing_key, &message);

        let token = auth
            .verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore)
            .unwrap();
        assert!(auth.verify_session(&token));
    }

    #[test]
    fn nonce_is_single_use() {
        let (signing_key, agent) = wallet();
        let auth = AuthProtocol::new([1u8; 32], Duration::from_secs(300), Duration::from_secs(86_400));
        let (nonce, message, _) = auth.issue_nonce(agent);
        let (sig, rec_id) = sign(&signing_key, &message);

        auth.verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore)
            .unwrap();
        let replay = auth.verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore);
        assert_eq!(replay, Err(AuthError::NonceUsed));
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let (_signing_key, agent) = wallet();
        let (other_key, _other_agent) = {
            let sk = SigningKey::from_bytes(&[0x99u8; 32].into()).unwrap();
            let addr = crate::crypto::primitives::address_from_verifying_key(sk.verifying_key());
            (sk, addr)
        };
        let auth = AuthProtocol::new([1u8; 32], Duration::from_secs(300), Duration::from_secs(86_400));
        let (nonce, message, _) = auth.issue_nonce(agent);
        let (sig, rec_id) = sign(&other_key, &message);

        let result = auth.verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore);
        assert_eq!(result, Err(AuthError::SignatureInvalid));
    }

    #[test]
    fn expired_session_token_fails_verification() {
        let (signing_key, agent) = wallet();
        let auth = AuthProtocol::new([1u8; 32], Duration::from_secs(300), Duration::from_secs(0));
        let (nonce, message, _) = auth.issue_nonce(agent);
        let (sig, rec_id) = sign(&signing_key, &message);
        let token = auth
            .verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore)
            .unwrap();
        assert!(!auth.verify_session(&token));
    }

    #[test]
    fn bearer_encoding_round_trips() {
        let (signing_key, agent) = wallet();
        let auth = AuthProtocol::new([7u8; 32], Duration::from_secs(300), Duration::from_secs(86_400));
        let (nonce, message, _) = auth.issue_nonce(agent);
        let (sig, rec_id) = sign(&signing_key, &message);
        let token = auth
            .verify(agent, &sig, rec_id, &nonce, Role::User, Tier::SentinelCore)
            .unwrap();
        let bearer = token.to_bearer();
        let parsed = SessionToken::from_bearer(&bearer).unwrap();
        assert_eq!(parsed.agent_id, token.agent_id);
        assert!(auth.verify_session(&parsed));
    }

    #[test]
    fn splits_eth_style_signature_into_compact_and_recovery_id() {
        let mut sig_bytes = vec![0u8; 64];
        sig_bytes.push(28); // v = 28 => recovery_id 1
        let hex = format!("0x{}", hex::encode(&sig_bytes));
        let (compact, rec_id) = split_wallet_signature(&hex).unwrap();
        assert_eq!(compact.len(), 64);
        assert_eq!(rec_id, 1);
    }
}
