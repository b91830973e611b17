//! Threat Engine (§4.3, 10% share): maintains per-agent sliding-window
//! event counters and computes the Points-Toward-Threat-Score (PTS) on
//! demand. The engine is the single source of truth for `pts(agent)`
//! queries from Access Control; it holds no knowledge of roles, quotas, or
//! capability decisions — those live in [`crate::access`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::identity::AgentId;

/// The four countable event kinds that feed PTS (§3 "Threat Factors").
/// `QuantumRisk` is recorded whenever an operation completes using a
/// non-PQC algorithm (the AES-only fallback path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatEventKind {
    QuantumRisk,
    AccessViolation,
    RateLimitHit,
    SignatureFailure,
}

/// Rolling counts within the engine's window, as of the last prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreatFactors {
    pub quantum_risk: u32,
    pub access_violations: u32,
    pub rate_limit_hits: u32,
    pub signature_failures: u32,
}

/// The three PTS bands (§3). Distinct from [`crate::identity::Tier`], which
/// is a subscription tier, not a risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatTier {
    Safe,
    Caution,
    Critical,
}

fn tier_for(pts: f64) -> ThreatTier {
    if pts < 50.0 {
        ThreatTier::Safe
    } else if pts < 150.0 {
        ThreatTier::Caution
    } else {
        ThreatTier::Critical
    }
}

/// §3: `PTS = 50*q + 0.3*v + 0.2*r + 0.1*s`, clamped to `[0, 1000]`. Per
/// the Open Question in §9(i), this crate treats `50` as the per-event
/// quantum-risk multiplier (not `0.4`) — see `DESIGN.md`.
fn compute_pts(factors: &ThreatFactors) -> f64 {
    let raw = 50.0 * factors.quantum_risk as f64
        + 0.3 * factors.access_violations as f64
        + 0.2 * factors.rate_limit_hits as f64
        + 0.1 * factors.signature_failures as f64;
    raw.clamp(0.0, 1000.0)
}

/// A detected tier change, to be surfaced to the ASR pipeline as a
/// `TierTransition` event by the caller (the engine itself never touches
/// the ASR pipeline, keeping it free of async and of cross-subsystem
/// coupling — §9 "no global mutable state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTransition {
    pub agent: AgentId,
    pub from: ThreatTier,
    pub to: ThreatTier,
}

struct AgentWindow {
    quantum_risk: VecDeque<Instant>,
    access_violations: VecDeque<Instant>,
    rate_limit_hits: VecDeque<Instant>,
    signature_failures: VecDeque<Instant>,
    last_tier: ThreatTier,
}

impl AgentWindow {
    fn new() -> Self {
        Self {
            quantum_risk: VecDeque::new(),
            access_violations: VecDeque::new(),
            rate_limit_hits: VecDeque::new(),
            signature_failures: VecDeque::new(),
            last_tier: ThreatTier::Safe,
        }
    }

    fn ring_mut(&mut self, kind: ThreatEventKind) -> &mut VecDeque<Instant> {
        match kind {
            ThreatEventKind::QuantumRisk => &mut self.quantum_risk,
            ThreatEventKind::AccessViolation => &mut self.access_violations,
            ThreatEventKind::RateLimitHit => &mut self.rate_limit_hits,
            ThreatEventKind::SignatureFailure => &mut self.signature_failures,
        }
    }

    /// Drop entries older than `window`, relative to `now`. Each ring is
    /// insertion-ordered (oldest at the front), so pruning is O(expired).
    fn prune(&mut self, now: Instant, window: Duration) {
        for ring in [
            &mut self.quantum_risk,
            &mut self.access_violations,
            &mut self.rate_limit_hits,
            &mut self.signature_failures,
        ] {
            while let Some(&front) = ring.front() {
                if now.duration_since(front) > window {
                    ring.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn factors(&self) -> ThreatFactors {
        ThreatFactors {
            quantum_risk: self.quantum_risk.len() as u32,
            access_violations: self.access_violations.len() as u32,
            rate_limit_hits: self.rate_limit_hits.len() as u32,
            signature_failures: self.signature_failures.len() as u32,
        }
    }
}

/// Per-agent sliding-window threat counters (§4.3). Uses a `DashMap` so
/// unrelated agents never contend on each other's state, with a per-agent
/// `Mutex` guarding the ring-buffer prune/insert (§5 shared-resource
/// policy).
pub struct ThreatEngine {
    windows: DashMap<AgentId, Mutex<AgentWindow>>,
    window: Duration,
}

impl ThreatEngine {
    /// `window` is the rolling lookback (default 24h per §3).
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Record one event for `agent`, pruning the window first. Returns
    /// `Some(TierTransition)` exactly when this event changed the agent's
    /// PTS tier (§8 scenario S6: a tier change fires exactly once).
    pub fn record(&self, agent: AgentId, kind: ThreatEventKind) -> Option<TierTransition> {
        let entry = self.windows.entry(agent).or_insert_with(|| Mutex::new(AgentWindow::new()));
        let mut window = entry.lock().unwrap();
        let now = Instant::now();
        window.prune(now, self.window);
        window.ring_mut(kind).push_back(now);

        let new_tier = tier_for(compute_pts(&window.factors()));
        if new_tier == window.last_tier {
            return None;
        }
        let from = window.last_tier;
        window.last_tier = new_tier;
        Some(TierTransition {
            agent,
            from,
            to: new_tier,
        })
    }

    /// `score(agent)` (§4.3): O(1) in steady state after pruning. Agents
    /// with no history are `Safe` at `PTS = 0`.
    pub fn score(&self, agent: AgentId) -> (f64, ThreatTier, ThreatFactors) {
        let Some(entry) = self.windows.get(&agent) else {
            return (0.0, ThreatTier::Safe, ThreatFactors::default());
        };
        let mut window = entry.lock().unwrap();
        window.prune(Instant::now(), self.window);
        let factors = window.factors();
        let pts = compute_pts(&factors);
        (pts, tier_for(pts), factors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::from_bytes([5u8; 20])
    }

    #[test]
    fn fresh_agent_is_safe_at_zero() {
        let engine = ThreatEngine::new(Duration::from_secs(86_400));
        let (pts, tier, factors) = engine.score(agent());
        assert_eq!(pts, 0.0);
        assert_eq!(tier, ThreatTier::Safe);
        assert_eq!(factors, ThreatFactors::default());
    }

    #[test]
    fn one_quantum_risk_event_raises_pts_to_50_and_flips_tier() {
        let engine = ThreatEngine::new(Duration::from_secs(86_400));
        let transition = engine.record(agent(), ThreatEventKind::QuantumRisk).unwrap();
        assert_eq!(transition.from, ThreatTier::Safe);
        assert_eq!(transition.to, ThreatTier::Caution);

        let (pts, tier, factors) = engine.score(agent());
        assert_eq!(pts, 50.0);
        assert_eq!(tier, ThreatTier::Caution);
        assert_eq!(factors.quantum_risk, 1);
    }

    #[test]
    fn tier_transition_fires_exactly_once() {
        let engine = ThreatEngine::new(Duration::from_secs(86_400));
        assert!(engine.record(agent(), ThreatEventKind::QuantumRisk).is_some());
        // Second violation-free event of the same kind stays in `Caution`
        // (100 < 150) so no further transition fires.
        assert!(engine
            .record(agent(), ThreatEventKind::AccessViolation)
            .is_none());
    }

    #[test]
    fn pts_is_monotonic_while_events_stay_in_window() {
        let engine = ThreatEngine::new(Duration::from_secs(86_400));
        let mut last_pts = 0.0;
        for kind in [
            ThreatEventKind::AccessViolation,
            ThreatEventKind::RateLimitHit,
            ThreatEventKind::SignatureFailure,
        ] {
            engine.record(agent(), kind);
            let (pts, ..) = engine.score(agent());
            assert!(pts >= last_pts);
            last_pts = pts;
        }
    }

    #[test]
    fn events_outside_the_window_stop_contributing() {
        let engine = ThreatEngine::new(Duration::from_millis(20));
        engine.record(agent(), ThreatEventKind::QuantumRisk);
        std::thread::sleep(Duration::from_millis(40));
        let (pts, tier, factors) = engine.score(agent());
        assert_eq!(pts, 0.0);
        assert_eq!(tier, ThreatTier::Safe);
        assert_eq!(factors.quantum_risk, 0);
    }

    #[test]
    fn distinct_agents_do_not_share_counters() {
        let engine = ThreatEngine::new(Duration::from_secs(86_400));
        let a = AgentId::from_bytes([1u8; 20]);
        let b = AgentId::from_bytes([2u8; 20]);
        engine.record(a, ThreatEventKind::QuantumRisk);
        let (pts_a, ..) = engine.score(a);
        let (pts_b, ..) = engine.score(b);
        assert_eq!(pts_a, 50.0);
        assert_eq!(pts_b, 0.0);
    }
}
