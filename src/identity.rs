//! Agent identity, roles, and subscription tiers (§3).

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 20-byte blockchain-style address, canonicalized to `0x`-prefixed
/// lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentId(pub [u8; 20]);

impl AgentId {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({self})")
    }
}

#[derive(Error, Debug)]
pub enum AgentIdParseError {
    #[error("address must be 0x-prefixed hex")]
    MissingPrefix,
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("address must decode to exactly 20 bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for AgentId {
    type Err = AgentIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let stripped = lower
            .strip_prefix("0x")
            .ok_or(AgentIdParseError::MissingPrefix)?;
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 20 {
            return Err(AgentIdParseError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for AgentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An agent's access role. `None` means the agent has never authenticated.
/// Declaration order doubles as privilege order (`None < User < Sentinel <
/// Admin`), used by Access Control to check "at least this role".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    None,
    User,
    Sentinel,
    Admin,
}

/// Subscription tier, used for rate quotas (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    LegacyBuilder,
    SentinelCore,
    AutonomousGuild,
}

impl Tier {
    /// Per-minute request quota (§4.4).
    pub fn quota_per_minute(self) -> u32 {
        match self {
            Tier::LegacyBuilder => 5,
            Tier::SentinelCore => 10,
            Tier::AutonomousGuild => 100,
        }
    }
}

/// Mutable per-agent state: role, tier, strikes, activity, heir.
///
/// Invariant: `role == Role::None` iff the agent has never authenticated;
/// `strike_count == 3` iff the agent is banned (teacher-free invariant
/// carried straight from §3).
#[derive(Debug, Clone)]
pub struct AgentState {
    pub role: Role,
    pub tier: Tier,
    pub strike_count: u8,
    pub last_activity: SystemTime,
    pub heir: Option<AgentId>,
    pub banned: bool,
}

impl AgentState {
    fn fresh() -> Self {
        Self {
            role: Role::None,
            tier: Tier::LegacyBuilder,
            strike_count: 0,
            last_activity: SystemTime::now(),
            heir: None,
            banned: false,
        }
    }
}

/// In-memory agent registry. No global state: callers hold an explicit
/// handle and pass it through the context object (§9).
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, RwLock<AgentState>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Returns a clone of the agent's current state, creating a fresh
    /// (unauthenticated) record if none exists yet.
    pub fn get_or_create(&self, agent: AgentId) -> AgentState {
        self.agents
            .entry(agent)
            .or_insert_with(|| RwLock::new(AgentState::fresh()))
            .read()
            .unwrap()
            .clone()
    }

    pub fn get(&self, agent: AgentId) -> Option<AgentState> {
        self.agents.get(&agent).map(|s| s.read().unwrap().clone())
    }

    pub fn mark_authenticated(&self, agent: AgentId, role: Role, tier: Tier) {
        let mut state = self
            .agents
            .entry(agent)
            .or_insert_with(|| RwLock::new(AgentState::fresh()));
        let mut state = state.write().unwrap();
        state.role = role;
        state.tier = tier;
        state.last_activity = SystemTime::now();
    }

    pub fn touch(&self, agent: AgentId) {
        if let Some(state) = self.agents.get(&agent) {
            state.write().unwrap().last_activity = SystemTime::now();
        }
    }

    /// RC-2.01: record a strike; bans the agent once `threshold` is reached.
    /// Returns the new strike count.
    pub fn add_strike(&self, agent: AgentId, threshold: u8) -> u8 {
        let entry = self
            .agents
            .entry(agent)
            .or_insert_with(|| RwLock::new(AgentState::fresh()));
        let mut state = entry.write().unwrap();
        state.strike_count = state.strike_count.saturating_add(1);
        if state.strike_count >= threshold {
            state.banned = true;
        }
        state.strike_count
    }

    /// Admin operation: clears strikes and un-bans, restoring role to `User`.
    pub fn reset_strikes(&self, agent: AgentId) {
        if let Some(state) = self.agents.get(&agent) {
            let mut state = state.write().unwrap();
            state.strike_count = 0;
            state.banned = false;
            if state.role == Role::None {
                state.role = Role::User;
            }
        }
    }

    pub fn set_heir(&self, agent: AgentId, heir: AgentId) {
        let entry = self
            .agents
            .entry(agent)
            .or_insert_with(|| RwLock::new(AgentState::fresh()));
        entry.write().unwrap().heir = Some(heir);
    }

    /// RC-1.02: transfer role from `agent` to its designated heir if the
    /// inactivity threshold has elapsed. Returns `true` if a transfer
    /// happened.
    pub fn transfer_to_heir(
        &self,
        agent: AgentId,
        claimant: AgentId,
        heir_inactivity: Duration,
    ) -> bool {
        let Some(original) = self.agents.get(&agent) else {
            return false;
        };
        let (heir, role, tier, eligible) = {
            let state = original.read().unwrap();
            let elapsed = state
                .last_activity
                .elapsed()
                .unwrap_or(Duration::ZERO);
            let eligible = state.heir == Some(claimant) && elapsed >= heir_inactivity;
            (state.heir, state.role, state.tier, eligible)
        };
        if !eligible || heir != Some(claimant) {
            return false;
        }
        drop(original);

        {
            let mut orig = self.agents.get(&agent).unwrap().write().unwrap();
            // `banned` alone marks the original agent as revoked; `role` is
            // left untouched; `role == None` means "never authenticated"
            // (§3), which is false for an agent that just had its standing
            // transferred away.
            orig.banned = true;
        }
        let heir_entry = self
            .agents
            .entry(claimant)
            .or_insert_with(|| RwLock::new(AgentState::fresh()));
        let mut heir_state = heir_entry.write().unwrap();
        heir_state.role = role;
        heir_state.tier = tier;
        heir_state.last_activity = SystemTime::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_canonical_hex() {
        let id: AgentId = "0x0102030405060708090a0b0c0d0e0f1011121314"
            .parse()
            .unwrap();
        assert_eq!(
            id.to_string(),
            "0x0102030405060708090a0b0c0d0e0f1011121314"
        );
    }

    #[test]
    fn serializes_as_canonical_hex_string() {
        let id = AgentId::from_bytes([0xabu8; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn rejects_malformed_address() {
        assert!("not-hex".parse::<AgentId>().is_err());
        assert!("0x1234".parse::<AgentId>().is_err());
    }

    #[test]
    fn three_strikes_bans() {
        let registry = AgentRegistry::new();
        let agent = AgentId([1u8; 20]);
        registry.mark_authenticated(agent, Role::User, Tier::SentinelCore);
        assert_eq!(registry.add_strike(agent, 3), 1);
        assert_eq!(registry.add_strike(agent, 3), 2);
        assert_eq!(registry.add_strike(agent, 3), 3);
        assert!(registry.get(agent).unwrap().banned);

        registry.reset_strikes(agent);
        let state = registry.get(agent).unwrap();
        assert!(!state.banned);
        assert_eq!(state.strike_count, 0);
    }

    #[test]
    fn heir_transfer_revokes_via_banned_flag_without_clearing_role() {
        let registry = AgentRegistry::new();
        let agent = AgentId([2u8; 20]);
        let heir = AgentId([3u8; 20]);
        registry.mark_authenticated(agent, Role::Sentinel, Tier::AutonomousGuild);
        registry.set_heir(agent, heir);

        let transferred = registry.transfer_to_heir(agent, heir, Duration::from_secs(0));
        assert!(transferred);

        let original = registry.get(agent).unwrap();
        assert!(original.banned);
        // `role == None` means "never authenticated" (§3); a revoked agent
        // that previously authenticated must not be confused with one.
        assert_eq!(original.role, Role::Sentinel);

        let heir_state = registry.get(heir).unwrap();
        assert_eq!(heir_state.role, Role::Sentinel);
        assert_eq!(heir_state.tier, Tier::AutonomousGuild);
    }
}
