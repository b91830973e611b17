//! Request/response shapes for the HTTP surface described in §6. The HTTP
//! front-door itself is an external collaborator (out of scope, §1) — this
//! module only pins down the exact payloads so a thin web layer can be
//! bolted on without redesigning the wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asr::{AsrAction, AsrRecord};
use crate::identity::AgentId;
use crate::threat::{ThreatFactors, ThreatTier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRequest {
    pub wallet_address: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub wallet_address: AgentId,
    /// 65-byte `r || s || v` hex signature (`0x`-prefixed optional),
    /// Ethereum `eth_sign` convention (§4.6).
    pub signature: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireAlgorithm {
    MlKem768,
    MlKem1024,
    Aes256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub data_b64: String,
    pub algorithm: WireAlgorithm,
    pub public_key_b64: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub ciphertext_b64: String,
    pub algorithm: WireAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub ciphertext_b64: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub data_b64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub anchor_network: String,
    pub batch_max: usize,
    pub pqc_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrQueryResponse {
    pub records: Vec<AsrRecordView>,
}

/// `GET /asr/{agent}` row shape: every ASR field except the internal
/// leaf-hash helper, which is not part of the public wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrRecordView {
    pub asr_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: AgentId,
    pub action: AsrAction,
    pub threat_level: u32,
    pub pqc_status: String,
    pub signature: String,
}

impl From<&AsrRecord> for AsrRecordView {
    fn from(record: &AsrRecord) -> Self {
        Self {
            asr_id: record.asr_id.to_string(),
            timestamp: record.timestamp,
            agent_id: record.agent_id,
            action: record.action,
            threat_level: record.threat_level,
            pqc_status: record.pqc_status.clone(),
            signature: record.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtsResponse {
    pub pts: f64,
    pub tier: String,
    pub quantum_risk: u32,
    pub access_violations: u32,
    pub rate_limit_hits: u32,
    pub signature_failures: u32,
}

impl PtsResponse {
    pub fn from_parts(pts: f64, tier: ThreatTier, factors: ThreatFactors) -> Self {
        Self {
            pts,
            tier: match tier {
                ThreatTier::Safe => "safe".to_string(),
                ThreatTier::Caution => "caution".to_string(),
                ThreatTier::Critical => "critical".to_string(),
            },
            quantum_risk: factors.quantum_risk,
            access_violations: factors.access_violations,
            rate_limit_hits: factors.rate_limit_hits,
            signature_failures: factors.signature_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_response_maps_tier_to_lowercase_string() {
        let response = PtsResponse::from_parts(50.0, ThreatTier::Caution, ThreatFactors::default());
        assert_eq!(response.tier, "caution");
        assert_eq!(response.pts, 50.0);
    }

    #[test]
    fn nonce_request_round_trips_through_json() {
        let req = NonceRequest {
            wallet_address: AgentId::from_bytes([1u8; 20]),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: NonceRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.wallet_address, req.wallet_address);
    }
}
