//! Operator CLI: issue a nonce, complete wallet authentication, and drive a
//! hybrid encrypt/decrypt round trip against an in-process engine. This is
//! a demonstration/inspection tool, not the production entry point — a real
//! deployment drives [`pulsar_sentinel`] from behind its own HTTP front-door
//! (§6, out of scope here).

use std::sync::Arc;

use pulsar_sentinel::anchor::NoopAnchorSink;
use pulsar_sentinel::asr::InMemoryAsrStore;
use pulsar_sentinel::config::{EnvConfig, PqcLevel};
use pulsar_sentinel::identity::AgentId;
use pulsar_sentinel::PulsarSentinel;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsar_sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EnvConfig::from_env()?;
    tracing::info!(pqc_level = ?config.pqc_security_level, "pulsar sentinel cli starting");

    let engine = PulsarSentinel::new(
        config,
        Arc::new(InMemoryAsrStore::new()),
        Arc::new(NoopAnchorSink),
        session_key_from_env(),
    );

    let agent = demo_agent();
    tracing::info!(agent = %agent, "issuing nonce for demo agent");

    let (_nonce, message, _expires) = engine.issue_nonce(agent);
    println!("signing challenge for {agent}:\n  {message}");
    println!(
        "no wallet is attached to this CLI invocation, so authentication cannot complete here.\n\
         sign the message above out-of-band and call `authenticate` on the engine with the resulting\n\
         signature and recovery id to obtain a session token."
    );

    let public = engine.keystore.active_public_key(PqcLevel::MlKem768);
    println!("active ML-KEM-768 key id: {}", public.key_id);

    Ok(())
}

fn demo_agent() -> AgentId {
    AgentId::from_bytes([0x42u8; 20])
}

fn session_key_from_env() -> [u8; 32] {
    match std::env::var("PULSAR_SESSION_KEY") {
        Ok(hex_key) => {
            let mut key = [0u8; 32];
            if let Ok(bytes) = hex::decode(hex_key.trim_start_matches("0x")) {
                if bytes.len() == 32 {
                    key.copy_from_slice(&bytes);
                    return key;
                }
            }
            tracing::warn!("PULSAR_SESSION_KEY is set but not valid 32-byte hex; using a random key");
            random_session_key()
        }
        Err(_) => random_session_key(),
    }
}

fn random_session_key() -> [u8; 32] {
    use rand_core::{OsRng, RngCore};
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}
