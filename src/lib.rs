//! PULSAR SENTINEL core: a quantum-resistant security substrate combining
//! hybrid post-quantum + classical authenticated encryption, a
//! tamper-evident Merkle-batched audit trail, and a threat-score-gated
//! governance layer (§1–§2).
//!
//! The crate exposes no process-global state (§9): every operation takes
//! an explicit [`PulsarSentinel`] context built from its constituent
//! subsystems, each of which is independently usable.

pub mod access;
pub mod anchor;
pub mod api;
pub mod asr;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod metadata;
pub mod threat;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use access::{AccessControl, AccessError, Operation};
use anchor::AnchorSink;
use asr::{AsrAction, AsrError, AsrPipeline, AsrStore};
use auth::{AuthError, AuthProtocol, SessionToken};
use config::{EnvConfig, PqcLevel};
use crypto::envelope::{AesEnvelope, HybridAlgorithm, HybridEnvelope};
use crypto::keystore::KeyStore;
use crypto::pqc::{decrypt_hybrid as pqc_decrypt, encrypt_hybrid as pqc_encrypt, PqcLevelTag, PublicKeyMaterial};
use crypto::primitives::CryptoError;
use identity::{AgentId, AgentRegistry, Role, Tier};
use metadata::MetadataValue;
use threat::{ThreatEngine, ThreatEventKind};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session token is missing, expired, or does not verify")]
    Unauthenticated,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Asr(#[from] AsrError),
}

/// The composed context object (§9): every subsystem a caller needs to
/// drive an authenticated request through the flow described in §2 —
/// Access Control, the Hybrid PQC Engine, and the ASR Pipeline.
pub struct PulsarSentinel<S: AsrStore, A: AnchorSink> {
    pub config: EnvConfig,
    pub registry: Arc<AgentRegistry>,
    pub keystore: Arc<KeyStore>,
    pub asr: Arc<AsrPipeline<S, A>>,
    pub threat: Arc<ThreatEngine>,
    pub access: Arc<AccessControl>,
    pub auth: Arc<AuthProtocol>,
}

impl<S: AsrStore, A: AnchorSink> PulsarSentinel<S, A> {
    pub fn new(config: EnvConfig, store: Arc<S>, anchor: Arc<A>, session_key: [u8; 32]) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let keystore = Arc::new(KeyStore::new(config.key_rotation, config.key_rotation_grace));
        let threat = Arc::new(ThreatEngine::new(std::time::Duration::from_secs(24 * 3600)));
        let access = Arc::new(AccessControl::new(
            registry.clone(),
            threat.clone(),
            config.strike_threshold,
        ));
        let auth = Arc::new(AuthProtocol::new(
            session_key,
            config.nonce_lifetime,
            config.session_lifetime,
        ));
        let asr = Arc::new(AsrPipeline::new(store, anchor, config.batch_max, config.batch_max_age));
        Self {
            config,
            registry,
            keystore,
            asr,
            threat,
            access,
            auth,
        }
    }

    /// RC-1.01: any mutating operation requires a currently-valid session
    /// token. A failure contributes to `signature_failures` and is itself
    /// audited, same as a failed capability check.
    async fn require_session(&self, token: &SessionToken) -> Result<(), EngineError> {
        if self.auth.verify_session(token) {
            return Ok(());
        }
        self.note_threat_event(token.agent_id, ThreatEventKind::SignatureFailure)
            .await;
        let _ = self
            .asr
            .submit(token.agent_id, AsrAction::AuthenticationFailed, 3, "warning", MetadataValue::map())
            .await;
        Err(EngineError::Unauthenticated)
    }

    /// Runs the §4.4 capability decision and audits a denial, recording
    /// the corresponding ASR action so a rejected request still leaves a
    /// trail (§7: authorization errors are reported and `AccessViolation`
    /// is recorded — this is that recording, one layer up from
    /// `AccessControl`, which only owns the threat-counter side effect).
    async fn authorize(&self, agent: AgentId, op: Operation) -> Result<(), EngineError> {
        match self.access.check(agent, op) {
            Ok(()) => Ok(()),
            Err(e) => {
                let action = match e {
                    AccessError::RateLimited => AsrAction::RateLimited,
                    AccessError::Banned => AsrAction::Banned,
                    _ => AsrAction::AccessDenied,
                };
                let mut meta = MetadataValue::map();
                meta.insert("reason", e.to_string().into());
                let _ = self.asr.submit(agent, action, 3, "warning", meta).await;
                Err(EngineError::Access(e))
            }
        }
    }

    async fn note_threat_event(&self, agent: AgentId, kind: ThreatEventKind) {
        if let Some(transition) = self.threat.record(agent, kind) {
            let mut meta = MetadataValue::map();
            meta.insert("from", format!("{:?}", transition.from).into());
            meta.insert("to", format!("{:?}", transition.to).into());
            info!(agent = %agent, from = ?transition.from, to = ?transition.to, "pts tier transition");
            let _ = self
                .asr
                .submit(agent, AsrAction::TierTransition, 3, "warning", meta)
                .await;
        }
    }

    /// Seal `plaintext` under `recipient` (or this node's own active key
    /// for `level` if no recipient is given) via the Hybrid PQC Engine,
    /// and record an `Encrypted` ASR event (§4.1, §2 flow).
    pub async fn encrypt_hybrid(
        &self,
        token: &SessionToken,
        level: PqcLevel,
        recipient: Option<PublicKeyMaterial>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::EncryptHybrid).await?;

        let public = recipient.unwrap_or_else(|| self.keystore.active_public_key(level));
        let algorithm = match public.level {
            PqcLevelTag::MlKem768 => HybridAlgorithm::MlKem768,
            PqcLevelTag::MlKem1024 => HybridAlgorithm::MlKem1024,
        };
        let sealed = pqc_encrypt(&public, plaintext);
        let envelope = HybridEnvelope {
            algorithm,
            kem_ciphertext: sealed.kem_ciphertext,
            nonce: sealed.nonce,
            aead_ciphertext: sealed.aead_ciphertext,
        };
        let bytes = envelope.encode();

        let mut meta = MetadataValue::map();
        meta.insert("key_id", public.key_id.clone().into());
        self.asr
            .submit(token.agent_id, AsrAction::Encrypted, 1, "safe", meta)
            .await?;
        Ok(bytes)
    }

    /// Decode a hybrid envelope and decrypt it against whichever of this
    /// node's own keypairs (current or grace-period previous) for that
    /// level opens it.
    pub async fn decrypt_hybrid(&self, token: &SessionToken, level: PqcLevel, envelope: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::Decrypt).await?;

        let decoded = HybridEnvelope::decode(envelope).map_err(EngineError::Crypto)?;

        let expected_algorithm = match level {
            PqcLevel::MlKem768 => HybridAlgorithm::MlKem768,
            PqcLevel::MlKem1024 => HybridAlgorithm::MlKem1024,
        };
        let result = if decoded.algorithm != expected_algorithm {
            Err(CryptoError::AlgorithmMismatch)
        } else {
            self.keystore.try_each(level, |kp| {
                pqc_decrypt(kp, &decoded.kem_ciphertext, &decoded.nonce, &decoded.aead_ciphertext)
            })
        };

        match result {
            Ok(plaintext) => {
                self.asr
                    .submit(token.agent_id, AsrAction::Decrypted, 1, "safe", MetadataValue::map())
                    .await?;
                Ok(plaintext)
            }
            Err(e) => {
                self.note_threat_event(token.agent_id, ThreatEventKind::SignatureFailure).await;
                self.asr
                    .submit(token.agent_id, AsrAction::DecryptionFailed, 3, "warning", MetadataValue::map())
                    .await?;
                Err(EngineError::Crypto(e))
            }
        }
    }

    /// AES-256-CBC/HMAC password fallback path (§4.2). Counts as a
    /// `quantum_risk` event — it is explicitly the non-PQC path.
    pub async fn encrypt_aes(&self, token: &SessionToken, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::EncryptAes).await?;

        let sealed = crypto::aes_fallback::encrypt_aes(password, plaintext);
        let envelope = AesEnvelope {
            salt: sealed.salt,
            iv: sealed.iv,
            hmac: sealed.tag,
            ciphertext: sealed.ciphertext,
        };

        self.note_threat_event(token.agent_id, ThreatEventKind::QuantumRisk).await;
        self.asr
            .submit(token.agent_id, AsrAction::Encrypted, 2, "warning", MetadataValue::map())
            .await?;
        Ok(envelope.encode())
    }

    pub async fn decrypt_aes(&self, token: &SessionToken, password: &[u8], envelope: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::Decrypt).await?;

        let decoded = AesEnvelope::decode(envelope).map_err(EngineError::Crypto)?;
        self.note_threat_event(token.agent_id, ThreatEventKind::QuantumRisk).await;

        match crypto::aes_fallback::decrypt_aes(password, &decoded.salt, &decoded.iv, &decoded.ciphertext, &decoded.hmac) {
            Ok(plaintext) => {
                self.asr
                    .submit(token.agent_id, AsrAction::Decrypted, 2, "warning", MetadataValue::map())
                    .await?;
                Ok(plaintext)
            }
            Err(e) => {
                self.note_threat_event(token.agent_id, ThreatEventKind::SignatureFailure).await;
                self.asr
                    .submit(token.agent_id, AsrAction::DecryptionFailed, 3, "warning", MetadataValue::map())
                    .await?;
                Err(EngineError::Crypto(e))
            }
        }
    }

    /// §4.1 `rotate`: requires `Role::Sentinel` or above.
    pub async fn rotate_key(&self, token: &SessionToken, level: PqcLevel) -> Result<String, EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::KeyRotate).await?;

        let new_key_id = self.keystore.rotate(level);
        let mut meta = MetadataValue::map();
        meta.insert("new_key_id", new_key_id.clone().into());
        self.asr
            .submit(token.agent_id, AsrAction::KeyRotated, 2, "safe", meta)
            .await?;
        Ok(new_key_id)
    }

    /// RC-2.01 admin escape hatch: requires `Role::Admin`.
    pub async fn admin_reset_strikes(&self, token: &SessionToken, target: AgentId) -> Result<(), EngineError> {
        self.require_session(token).await?;
        self.authorize(token.agent_id, Operation::ResetStrikes).await?;
        self.access.reset_strikes(target);
        self.asr
            .submit(target, AsrAction::StrikeIssued, 1, "safe", MetadataValue::map())
            .await?;
        Ok(())
    }

    /// RC-1.02: no prior session is required — the heir is proving a
    /// fresh claim, not renewing an existing one.
    pub async fn heir_transfer(
        &self,
        agent: AgentId,
        claimant: AgentId,
        signature: &[u8; 64],
        recovery_id: u8,
    ) -> Result<(), EngineError> {
        self.access
            .heir_transfer(agent, claimant, signature, recovery_id, self.config.heir_inactivity)?;
        self.asr
            .submit(claimant, AsrAction::HeirTransfer, 3, "warning", MetadataValue::map())
            .await?;
        Ok(())
    }

    /// §4.6 nonce issuance; unauthenticated by construction.
    pub fn issue_nonce(&self, agent_id: AgentId) -> (String, String, chrono::DateTime<chrono::Utc>) {
        self.auth.issue_nonce(agent_id)
    }

    /// §4.6 signature verification: on success the agent is marked
    /// authenticated at `role`/`tier` and an `Authenticated` ASR is
    /// emitted; on failure `signature_failures` increments.
    pub async fn authenticate(
        &self,
        agent_id: AgentId,
        signature: &[u8; 64],
        recovery_id: u8,
        nonce: &str,
        role: Role,
        tier: Tier,
    ) -> Result<SessionToken, EngineError> {
        match self.auth.verify(agent_id, signature, recovery_id, nonce, role, tier) {
            Ok(token) => {
                self.registry.mark_authenticated(agent_id, role, tier);
                self.asr
                    .submit(agent_id, AsrAction::Authenticated, 1, "safe", MetadataValue::map())
                    .await?;
                Ok(token)
            }
            Err(e) => {
                self.note_threat_event(agent_id, ThreatEventKind::SignatureFailure).await;
                self.asr
                    .submit(agent_id, AsrAction::AuthenticationFailed, 3, "warning", MetadataValue::map())
                    .await?;
                Err(EngineError::Auth(e))
            }
        }
    }
}
