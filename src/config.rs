//! Environment-driven configuration (§6 of the spec).
//!
//! Mirrors the teacher's `infrastructure::config::Config::from_env` pattern:
//! `dotenvy` loads a `.env` file if present, every key has a typed default,
//! and a malformed value is a fatal `ConfigInvalid` error rather than a
//! silently-substituted default.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Post-quantum security level selector (§6 `PQC_SECURITY_LEVEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PqcLevel {
    MlKem768,
    MlKem1024,
}

/// Anchor network selector (§6 `ANCHOR_NETWORK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorNetwork {
    Mainnet,
    Testnet,
    None,
}

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub pqc_security_level: PqcLevel,
    pub key_rotation: Duration,
    pub key_rotation_grace: Duration,
    pub rate_limit_default: u32,
    pub strike_threshold: u8,
    pub heir_inactivity: Duration,
    pub anchor_network: AnchorNetwork,
    pub batch_max: usize,
    pub batch_max_age: Duration,
    pub session_lifetime: Duration,
    pub nonce_lifetime: Duration,
    pub data_dir: std::path::PathBuf,
}

impl EnvConfig {
    /// Load configuration from the process environment, applying defaults
    /// for anything unset. Returns `ConfigError` (fatal, §7) on a malformed
    /// value for a key that *is* set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let pqc_security_level = match env_opt("PQC_SECURITY_LEVEL")? {
            Some(v) => match v.as_str() {
                "768" => PqcLevel::MlKem768,
                "1024" => PqcLevel::MlKem1024,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "PQC_SECURITY_LEVEL",
                        reason: format!("expected 768 or 1024, got {other}"),
                    })
                }
            },
            None => PqcLevel::MlKem768,
        };

        let key_rotation_days: u64 = env_parse_or("KEY_ROTATION_DAYS", 90)?;
        let rate_limit_default: u32 = env_parse_or("RATE_LIMIT_DEFAULT", 5)?;
        let strike_threshold: u8 = env_parse_or("STRIKE_THRESHOLD", 3)?;
        let heir_inactivity_days: u64 = env_parse_or("HEIR_INACTIVITY_DAYS", 90)?;

        let anchor_network = match env_opt("ANCHOR_NETWORK")? {
            Some(v) => match v.as_str() {
                "mainnet" => AnchorNetwork::Mainnet,
                "testnet" => AnchorNetwork::Testnet,
                "none" => AnchorNetwork::None,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "ANCHOR_NETWORK",
                        reason: format!("expected mainnet/testnet/none, got {other}"),
                    })
                }
            },
            None => AnchorNetwork::None,
        };

        let batch_max: usize = env_parse_or("BATCH_MAX", 50)?;
        let batch_max_age_sec: u64 = env_parse_or("BATCH_MAX_AGE_SEC", 30)?;
        let session_lifetime_sec: u64 = env_parse_or("SESSION_LIFETIME_SEC", 86_400)?;
        let nonce_lifetime_sec: u64 = env_parse_or("NONCE_LIFETIME_SEC", 300)?;

        let data_dir = env::var("PULSAR_DATA_DIR")
            .unwrap_or_else(|_| "./pulsar-data".to_string())
            .into();

        Ok(Self {
            pqc_security_level,
            key_rotation: Duration::from_secs(key_rotation_days * 86_400),
            key_rotation_grace: Duration::from_secs(7 * 86_400),
            rate_limit_default,
            strike_threshold,
            heir_inactivity: Duration::from_secs(heir_inactivity_days * 86_400),
            anchor_network,
            batch_max,
            batch_max_age: Duration::from_secs(batch_max_age_sec),
            session_lifetime: Duration::from_secs(session_lifetime_sec),
            nonce_lifetime: Duration::from_secs(nonce_lifetime_sec),
            data_dir,
        })
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            pqc_security_level: PqcLevel::MlKem768,
            key_rotation: Duration::from_secs(90 * 86_400),
            key_rotation_grace: Duration::from_secs(7 * 86_400),
            rate_limit_default: 5,
            strike_threshold: 3,
            heir_inactivity: Duration::from_secs(90 * 86_400),
            anchor_network: AnchorNetwork::None,
            batch_max: 50,
            batch_max_age: Duration::from_secs(30),
            session_lifetime: Duration::from_secs(86_400),
            nonce_lifetime: Duration::from_secs(300),
            data_dir: "./pulsar-data".into(),
        }
    }
}

fn env_opt(key: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(v) => Ok(Some(v)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

fn env_parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key)? {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.batch_max, 50);
        assert_eq!(cfg.batch_max_age, Duration::from_secs(30));
        assert_eq!(cfg.session_lifetime, Duration::from_secs(86_400));
        assert_eq!(cfg.nonce_lifetime, Duration::from_secs(300));
        assert_eq!(cfg.strike_threshold, 3);
    }
}
