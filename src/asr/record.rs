//! The Agent State Record itself (§5.1): the unit of the audit trail. Every
//! state-changing action produces exactly one signed `AsrRecord`.

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::primitives::sha256;
use crate::identity::AgentId;
use crate::metadata::MetadataValue;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AsrError {
    #[error("timestamp {new} does not advance monotonically past {prev} for this agent")]
    NonMonotonicTimestamp { prev: i64, new: i64 },
    #[error("signature does not match canonical record bytes")]
    SignatureMismatch,
}

/// §3: a 16-byte random id, hex-encoded with an `asr_` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsrId([u8; 16]);

impl AsrId {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for AsrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asr_{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AsrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Error, Debug)]
pub enum AsrIdParseError {
    #[error("asr_id must be asr_-prefixed hex")]
    MissingPrefix,
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("asr_id must decode to exactly 16 bytes, got {0}")]
    WrongLength(usize),
}

impl std::str::FromStr for AsrId {
    type Err = AsrIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("asr_").ok_or(AsrIdParseError::MissingPrefix)?;
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 16 {
            return Err(AsrIdParseError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for AsrId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AsrId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The fixed set of action kinds an `AsrRecord` can describe (§5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsrAction {
    Authenticated,
    AuthenticationFailed,
    Encrypted,
    Decrypted,
    DecryptionFailed,
    KeyGenerated,
    KeyRotated,
    ThreatScoreUpdated,
    TierTransition,
    AccessDenied,
    RateLimited,
    StrikeIssued,
    Banned,
    HeirTransfer,
}

/// A single signed audit entry. Field order is fixed (§5.1) because the
/// canonical signing form is derived by concatenating fields in this exact
/// order, with `signature` omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrRecord {
    pub asr_id: AsrId,
    pub timestamp: DateTime<Utc>,
    pub agent_id: AgentId,
    pub action: AsrAction,
    pub threat_level: u32,
    pub pqc_status: String,
    pub metadata: MetadataValue,
    pub signature: String,
}

impl AsrRecord {
    /// Build and sign a new record. `timestamp` is supplied by the caller
    /// (not read from the clock here) so the ASR store can enforce
    /// per-agent monotonicity before a record is accepted.
    pub fn new(
        timestamp: DateTime<Utc>,
        agent_id: AgentId,
        action: AsrAction,
        threat_level: u32,
        pqc_status: impl Into<String>,
        metadata: MetadataValue,
    ) -> Self {
        let mut record = Self {
            asr_id: AsrId::generate(),
            timestamp,
            agent_id,
            action,
            threat_level,
            pqc_status: pqc_status.into(),
            metadata,
            signature: String::new(),
        };
        record.signature = hex::encode(record.compute_signature());
        record
    }

    /// Canonical byte form used both to sign and to verify: every field
    /// except `signature`, each on its own line, in declaration order.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut s = String::new();
        s.push_str(&self.asr_id.to_string());
        s.push('\n');
        s.push_str(&self.timestamp.to_rfc3339());
        s.push('\n');
        s.push_str(&self.agent_id.to_string());
        s.push('\n');
        s.push_str(&serde_json::to_string(&self.action).unwrap_or_default());
        s.push('\n');
        s.push_str(&self.threat_level.to_string());
        s.push('\n');
        s.push_str(&self.pqc_status);
        s.push('\n');
        s.push_str(&self.metadata.to_canonical_string());
        s.into_bytes()
    }

    fn compute_signature(&self) -> [u8; 32] {
        sha256(&self.canonical_bytes())
    }

    /// Verify that `signature` still matches the record's canonical bytes
    /// (tamper-evidence: a single flipped field changes the signature).
    pub fn verify(&self) -> Result<(), AsrError> {
        let expected = hex::encode(self.compute_signature());
        if expected == self.signature {
            Ok(())
        } else {
            Err(AsrError::SignatureMismatch)
        }
    }

    /// Leaf hash used by the Merkle batcher (§3, §4.2): the record's own
    /// 32-byte signature, decoded from its hex form.
    pub fn leaf_hash(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        let decoded = hex::decode(&self.signature).expect("signature is always 32-byte hex");
        out.copy_from_slice(&decoded);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_agent() -> AgentId {
        AgentId::from_bytes([7u8; 20])
    }

    #[test]
    fn signature_verifies_and_detects_tamper() {
        let record = AsrRecord::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            sample_agent(),
            AsrAction::Authenticated,
            10,
            "active",
            MetadataValue::map(),
        );
        record.verify().unwrap();

        let mut tampered = record.clone();
        tampered.threat_level = 999;
        assert_eq!(tampered.verify(), Err(AsrError::SignatureMismatch));
    }

    #[test]
    fn canonical_form_is_stable_for_identical_inputs() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = AsrRecord::new(
            ts,
            sample_agent(),
            AsrAction::Encrypted,
            0,
            "active",
            MetadataValue::map(),
        );
        // Distinct asr_id (random per record) means distinct signatures, but
        // the same logical inputs always verify internally regardless.
        let b = AsrRecord::new(
            ts,
            sample_agent(),
            AsrAction::Encrypted,
            0,
            "active",
            MetadataValue::map(),
        );
        a.verify().unwrap();
        b.verify().unwrap();
        assert_ne!(a.asr_id, b.asr_id);
    }

    #[test]
    fn asr_id_displays_with_asr_prefix_and_round_trips() {
        let record = AsrRecord::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            sample_agent(),
            AsrAction::Authenticated,
            1,
            "safe",
            MetadataValue::map(),
        );
        let rendered = record.asr_id.to_string();
        assert!(rendered.starts_with("asr_"));
        assert_eq!(rendered.len(), "asr_".len() + 32);
        let parsed: AsrId = rendered.parse().unwrap();
        assert_eq!(parsed, record.asr_id);
    }

    #[test]
    fn leaf_hash_is_the_records_raw_signature() {
        let record = AsrRecord::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            sample_agent(),
            AsrAction::Encrypted,
            1,
            "safe",
            MetadataValue::map(),
        );
        let expected = hex::decode(&record.signature).unwrap();
        assert_eq!(record.leaf_hash().to_vec(), expected);
    }
}
