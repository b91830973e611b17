//! Key lifecycle management: generation, rotation, and sealed backup/restore
//! (§4.1 supplement). A `KeyStore` owns the active keypair per key level and
//! keeps the immediately-prior keypair around through its grace period so
//! in-flight envelopes still decrypt after rotation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::PqcLevel;

use super::aes_fallback::{decrypt_aes, encrypt_aes};
use super::pqc::{KeyPair, PublicKeyMaterial};
use super::primitives::CryptoError;

/// A keypair's secret material, sealed under a passphrase for durable
/// storage (§4.1 supplement: `export_sealed` / `import_sealed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedKey {
    pub key_id: String,
    pub salt: [u8; 16],
    pub iv: [u8; 16],
    pub tag: [u8; 32],
    pub ciphertext: Vec<u8>,
}

/// Plaintext form recovered from a `SealedKey`, re-assembled into a usable
/// `KeyPair` by the caller via `KeyStore::import_sealed`.
#[derive(Serialize, Deserialize)]
struct ExportedKeyPair {
    level: PqcLevel,
    secret_key: Vec<u8>,
    public_key: Vec<u8>,
    created_at_unix: u64,
}

struct Slot {
    current: KeyPair,
    previous: Option<KeyPair>,
}

/// Tracks the active keypair (and the one it superseded) per PQC level.
/// No global state: a caller holds the store explicitly via the context
/// object (§9).
pub struct KeyStore {
    slots: RwLock<HashMap<PqcLevel, Slot>>,
    rotation_period: Duration,
    grace_period: Duration,
}

impl KeyStore {
    pub fn new(rotation_period: Duration, grace_period: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            rotation_period,
            grace_period,
        }
    }

    /// Return the active public key for `level`, generating one if this is
    /// the first use. §4.1: a key past `rotation_period + grace_period` must
    /// never be handed out for a new encapsulation, so a stale active key
    /// is rotated in place before its public half is returned.
    pub fn active_public_key(&self, level: PqcLevel) -> PublicKeyMaterial {
        {
            let slots = self.slots.read().unwrap();
            if let Some(slot) = slots.get(&level) {
                if !slot.current.is_expired(self.rotation_period, self.grace_period) {
                    return slot.current.public.clone();
                }
            } else {
                drop(slots);
                let mut slots = self.slots.write().unwrap();
                return slots
                    .entry(level)
                    .or_insert_with(|| Slot {
                        current: KeyPair::generate(level),
                        previous: None,
                    })
                    .current
                    .public
                    .clone();
            }
        }

        warn!(?level, "active key is stale, rotating before issuing a new encapsulation key");
        let mut slots = self.slots.write().unwrap();
        let fresh = KeyPair::generate(level);
        let public = fresh.public.clone();
        let previous = slots.remove(&level).map(|slot| slot.current);
        slots.insert(level, Slot { current: fresh, previous });
        public
    }

    /// Rotate the active keypair for `level`: the current keypair becomes
    /// `previous` (still usable for decryption within the grace period) and
    /// a fresh keypair takes over for new encryptions. Returns the new
    /// `key_id`.
    pub fn rotate(&self, level: PqcLevel) -> String {
        let mut slots = self.slots.write().unwrap();
        let fresh = KeyPair::generate(level);
        let key_id = fresh.key_id().to_string();
        match slots.remove(&level) {
            Some(slot) => {
                slots.insert(
                    level,
                    Slot {
                        current: fresh,
                        previous: Some(slot.current),
                    },
                );
            }
            None => {
                slots.insert(
                    level,
                    Slot {
                        current: fresh,
                        previous: None,
                    },
                );
            }
        }
        key_id
    }

    /// Whether `level`'s active keypair has aged past rotation + grace and
    /// must not be used for new encryptions.
    pub fn is_stale(&self, level: PqcLevel) -> bool {
        let slots = self.slots.read().unwrap();
        match slots.get(&level) {
            Some(slot) => slot.current.is_expired(self.rotation_period, self.grace_period),
            None => false,
        }
    }

    /// Find whichever keypair (current or previous, across levels) owns
    /// `key_id`, for decrypting an envelope that names an older key.
    pub fn find_for_decrypt<R>(&self, key_id: &str, f: impl FnOnce(&KeyPair) -> R) -> Option<R> {
        let slots = self.slots.read().unwrap();
        for slot in slots.values() {
            if slot.current.key_id() == key_id {
                return Some(f(&slot.current));
            }
            if let Some(prev) = &slot.previous {
                if prev.key_id() == key_id {
                    return Some(f(prev));
                }
            }
        }
        None
    }

    /// Try `f` against `level`'s active keypair, falling back to the
    /// immediately-prior one (still within its grace period). Used to
    /// decrypt an envelope whose wire format carries only an algorithm
    /// tag, not a `key_id` (§6 hybrid envelope). A keypair past its own
    /// `rotation_period + grace_period` is never tried; if that leaves no
    /// candidate at all, the failure is `StaleKey` rather than
    /// `AuthenticationFailure` (§4.1, §7).
    pub fn try_each<R>(
        &self,
        level: PqcLevel,
        mut f: impl FnMut(&KeyPair) -> Result<R, CryptoError>,
    ) -> Result<R, CryptoError> {
        let slots = self.slots.read().unwrap();
        let slot = slots.get(&level).ok_or(CryptoError::Malformed)?;

        let mut tried_any = false;
        if !slot.current.is_expired(self.rotation_period, self.grace_period) {
            tried_any = true;
            if let Ok(r) = f(&slot.current) {
                return Ok(r);
            }
        }
        if let Some(prev) = &slot.previous {
            if !prev.is_expired(self.rotation_period, self.grace_period) {
                tried_any = true;
                if let Ok(r) = f(prev) {
                    return Ok(r);
                }
            }
        }

        if !tried_any {
            return Err(CryptoError::StaleKey);
        }
        Err(CryptoError::AuthenticationFailure)
    }

    /// Seal the active keypair for `level` under `passphrase` for durable
    /// storage outside the process.
    pub fn export_sealed(&self, level: PqcLevel, passphrase: &[u8]) -> Option<SealedKey> {
        let slots = self.slots.read().unwrap();
        let slot = slots.get(&level)?;
        Some(seal_keypair(&slot.current, passphrase))
    }

    /// Restore a previously-sealed keypair as the active keypair for its
    /// level, demoting whatever was active to `previous`.
    pub fn import_sealed(
        &self,
        sealed: &SealedKey,
        passphrase: &[u8],
    ) -> Result<String, CryptoError> {
        let plaintext = decrypt_aes(
            passphrase,
            &sealed.salt,
            &sealed.iv,
            &sealed.ciphertext,
            &sealed.tag,
        )?;
        let exported: ExportedKeyPair =
            serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Malformed)?;

        let created_at = std::time::UNIX_EPOCH + Duration::from_secs(exported.created_at_unix);
        let restored = KeyPair::from_parts(exported.level, exported.public_key, exported.secret_key, created_at);
        let key_id = restored.key_id().to_string();
        let mut slots = self.slots.write().unwrap();
        match slots.remove(&exported.level) {
            Some(slot) => {
                slots.insert(
                    exported.level,
                    Slot {
                        current: restored,
                        previous: Some(slot.current),
                    },
                );
            }
            None => {
                slots.insert(
                    exported.level,
                    Slot {
                        current: restored,
                        previous: None,
                    },
                );
            }
        }
        Ok(key_id)
    }
}

fn seal_keypair(keypair: &KeyPair, passphrase: &[u8]) -> SealedKey {
    let exported = ExportedKeyPair {
        level: match keypair.public.level {
            super::pqc::PqcLevelTag::MlKem768 => PqcLevel::MlKem768,
            super::pqc::PqcLevelTag::MlKem1024 => PqcLevel::MlKem1024,
        },
        secret_key: keypair.secret_bytes().to_vec(),
        public_key: keypair.public.public_key.clone(),
        created_at_unix: keypair
            .created_at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    let plaintext = serde_json::to_vec(&exported).expect("exported keypair always serializes");
    let sealed = encrypt_aes(passphrase, &plaintext);
    SealedKey {
        key_id: keypair.key_id().to_string(),
        salt: sealed.salt,
        iv: sealed.iv,
        tag: sealed.tag,
        ciphertext: sealed.ciphertext,
    }
}
