//! Rule Engine & Access Control (§4.4, 15% share): the four governance
//! rule codes (RC-1.01, RC-1.02, RC-2.01, RC-3.02) and the capability
//! decision they feed. RC-3.02 ("fallback") is realized entirely by
//! [`crate::anchor::RetryingAnchorSink`] and has no separate code here —
//! this module owns the other three.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use crate::crypto::primitives::{constant_time_eq, recover_address, CryptoError};
use crate::identity::{AgentId, AgentRegistry, AgentState, Role, Tier};
use crate::threat::{ThreatEngine, ThreatEventKind, ThreatTier};

/// The set of operations an authenticated agent can attempt. Each has a
/// minimum required role and a read/write classification (§4.4 step 3:
/// read-only operations remain available even in the `Critical` PTS tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EncryptHybrid,
    EncryptAes,
    Decrypt,
    KeyRotate,
    ReadAsr,
    ReadPts,
    ResetStrikes,
    HeirClaim,
}

impl Operation {
    fn required_role(self) -> Role {
        match self {
            Operation::EncryptHybrid
            | Operation::EncryptAes
            | Operation::Decrypt
            | Operation::ReadAsr
            | Operation::ReadPts => Role::User,
            Operation::KeyRotate => Role::Sentinel,
            Operation::ResetStrikes => Role::Admin,
            Operation::HeirClaim => Role::None, // the heir may not hold any role yet
        }
    }

    /// §4.4 step 3's `ReadOnlySet`.
    fn is_read_only(self) -> bool {
        matches!(self, Operation::ReadAsr | Operation::ReadPts)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    #[error("agent is banned (RC-2.01)")]
    Banned,
    #[error("required role not held")]
    Forbidden,
    #[error("PTS tier is Critical; only read-only operations are permitted")]
    CriticalTierLocked,
    #[error("per-minute rate quota exhausted")]
    RateLimited,
    #[error("heir claim signature invalid or claim not yet eligible")]
    HeirClaimRejected,
}

/// Fixed-window (per-minute) rate counter keyed by agent (§4.4 quotas).
struct RateLimiter {
    buckets: DashMap<AgentId, Mutex<(i64, u32)>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if this call is within `tier`'s per-minute quota,
    /// consuming one unit of it. The window resets at each minute boundary
    /// (§8 property 7).
    fn allow(&self, agent: AgentId, tier: Tier) -> bool {
        let quota = tier.quota_per_minute();
        let minute = Utc::now().timestamp() / 60;
        let entry = self
            .buckets
            .entry(agent)
            .or_insert_with(|| Mutex::new((minute, 0)));
        let mut state = entry.lock().unwrap();
        if state.0 != minute {
            *state = (minute, 0);
        }
        if state.1 >= quota {
            return false;
        }
        state.1 += 1;
        true
    }
}

/// Canonical message a would-be heir signs to claim a revoked agent's role
/// (RC-1.02). Deliberately time-invariant: eligibility is gated by
/// `last_activity` in [`AgentRegistry::transfer_to_heir`], not by a nonce,
/// since the claim itself is idempotent.
pub fn heir_claim_message(agent: AgentId, claimant: AgentId) -> String {
    format!("PULSAR-SENTINEL-HEIR-CLAIM|{agent}|{claimant}")
}

/// Ties together the agent registry, the threat engine, and the per-minute
/// rate limiter to implement the capability decision in §4.4. Holds no
/// global state: a caller constructs one explicitly and shares it via the
/// context object (§9).
pub struct AccessControl {
    registry: std::sync::Arc<AgentRegistry>,
    threat: std::sync::Arc<ThreatEngine>,
    rate_limiter: RateLimiter,
    strike_threshold: u8,
}

impl AccessControl {
    pub fn new(
        registry: std::sync::Arc<AgentRegistry>,
        threat: std::sync::Arc<ThreatEngine>,
        strike_threshold: u8,
    ) -> Self {
        Self {
            registry,
            threat,
            rate_limiter: RateLimiter::new(),
            strike_threshold,
        }
    }

    /// §4.4's five-step capability decision for `(agent, operation)`.
    pub fn check(&self, agent: AgentId, op: Operation) -> Result<(), AccessError> {
        let state: AgentState = self.registry.get_or_create(agent);

        if state.banned {
            return Err(AccessError::Banned);
        }

        if state.role < op.required_role() {
            self.threat.record(agent, ThreatEventKind::AccessViolation);
            self.registry.add_strike(agent, self.strike_threshold);
            return Err(AccessError::Forbidden);
        }

        let (_, tier, _) = self.threat.score(agent);
        if tier == ThreatTier::Critical && !op.is_read_only() {
            return Err(AccessError::CriticalTierLocked);
        }

        if !self.rate_limiter.allow(agent, state.tier) {
            self.threat.record(agent, ThreatEventKind::RateLimitHit);
            return Err(AccessError::RateLimited);
        }

        self.registry.touch(agent);
        Ok(())
    }

    /// RC-1.02: verify a heir-claim signature and, if the original agent
    /// has been inactive for at least `heir_inactivity`, transfer the role.
    pub fn heir_transfer(
        &self,
        agent: AgentId,
        claimant: AgentId,
        signature: &[u8; 64],
        recovery_id: u8,
        heir_inactivity: Duration,
    ) -> Result<(), AccessError> {
        let message = heir_claim_message(agent, claimant);
        let recovered = recover_address(message.as_bytes(), signature, recovery_id)
            .map_err(|_: CryptoError| AccessError::HeirClaimRejected)?;
        if !constant_time_eq(recovered.as_bytes(), claimant.to_string().as_bytes()) {
            return Err(AccessError::HeirClaimRejected);
        }
        if self.registry.transfer_to_heir(agent, claimant, heir_inactivity) {
            Ok(())
        } else {
            Err(AccessError::HeirClaimRejected)
        }
    }

    /// Admin operation (RC-2.01): clears strikes and un-bans `agent`.
    /// Callers are responsible for checking the invoking agent holds
    /// `Role::Admin` via `check(invoker, Operation::ResetStrikes)` first.
    pub fn reset_strikes(&self, agent: AgentId) {
        self.registry.reset_strikes(agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Tier;

    fn setup() -> (AccessControl, std::sync::Arc<AgentRegistry>, AgentId) {
        let registry = std::sync::Arc::new(AgentRegistry::new());
        let threat = std::sync::Arc::new(ThreatEngine::new(Duration::from_secs(86_400)));
        let agent = AgentId::from_bytes([9u8; 20]);
        registry.mark_authenticated(agent, Role::User, Tier::SentinelCore);
        let access = AccessControl::new(registry.clone(), threat, 3);
        (access, registry, agent)
    }

    #[test]
    fn allows_operation_within_role_and_quota() {
        let (access, _registry, agent) = setup();
        assert!(access.check(agent, Operation::EncryptHybrid).is_ok());
    }

    #[test]
    fn denies_operation_requiring_higher_role() {
        let (access, registry, agent) = setup();
        let result = access.check(agent, Operation::KeyRotate);
        assert_eq!(result, Err(AccessError::Forbidden));
        assert_eq!(registry.get(agent).unwrap().strike_count, 1);
    }

    #[test]
    fn three_forbidden_attempts_ban_the_agent() {
        let (access, registry, agent) = setup();
        for _ in 0..3 {
            let _ = access.check(agent, Operation::ResetStrikes);
        }
        assert!(registry.get(agent).unwrap().banned);
        assert_eq!(access.check(agent, Operation::EncryptHybrid), Err(AccessError::Banned));
    }

    #[test]
    fn rate_limit_boundary_allows_quota_then_denies() {
        let (access, _registry, agent) = setup(); // SentinelCore: 10/min
        for _ in 0..10 {
            assert!(access.check(agent, Operation::EncryptHybrid).is_ok());
        }
        assert_eq!(
            access.check(agent, Operation::EncryptHybrid),
            Err(AccessError::RateLimited)
        );
    }

    #[test]
    fn critical_tier_blocks_mutating_ops_but_not_reads() {
        let (access, _registry, agent) = setup();
        for _ in 0..4 {
            access.threat.record(agent, ThreatEventKind::QuantumRisk);
        }
        let (_, tier, _) = access.threat.score(agent);
        assert_eq!(tier, ThreatTier::Critical);
        assert_eq!(
            access.check(agent, Operation::EncryptHybrid),
            Err(AccessError::CriticalTierLocked)
        );
        assert!(access.check(agent, Operation::ReadAsr).is_ok());
    }
}
