//! The anchor sink abstraction (§5.3): submitting a Merkle root to an
//! external chain is behind a trait so the pipeline never hardcodes a
//! particular network client, and tests can swap in a no-op sink.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorFailure {
    #[error("anchor network unavailable")]
    NetworkUnavailable,
    #[error("insufficient funds to submit anchor transaction")]
    InsufficientFunds,
    #[error("anchor transaction confirmation timed out")]
    TransactionTimeout,
    #[error("anchor transaction permanently rejected: {0}")]
    PermanentRejection(String),
}

impl AnchorFailure {
    /// RC-3.02: only transient failures are worth retrying against a
    /// fallback network; a permanent rejection or funding problem is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnchorFailure::NetworkUnavailable | AnchorFailure::TransactionTimeout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorReceipt {
    pub tx_id: String,
}

/// Submits Merkle roots to a chain and reports on their confirmation
/// status. Implementors own whatever network/RPC client they need.
#[async_trait]
pub trait AnchorSink: Send + Sync {
    async fn submit(&self, root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure>;
    async fn confirmations(&self, tx_id: &str) -> Result<u64, AnchorFailure>;

    /// Poll `confirmations` until `required` is reached or `timeout` elapses
    /// (§4.5, §5: every network call, including a confirmation wait, has an
    /// explicit deadline). The default implementation polls every 50ms and
    /// surfaces `TransactionTimeout` on expiry; an implementor with a push-
    /// based confirmation source may override it.
    async fn await_confirmation(&self, tx_id: &str, required: u64, timeout: Duration) -> Result<(), AnchorFailure> {
        let poll_interval = Duration::from_millis(50);
        let wait = async {
            loop {
                match self.confirmations(tx_id).await {
                    Ok(n) if n >= required => return Ok(()),
                    Ok(_) => {}
                    Err(e) if !e.is_retryable() => return Err(e),
                    Err(_) => {}
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(AnchorFailure::TransactionTimeout),
        }
    }
}

/// Reference sink that "anchors" by doing nothing but returning a
/// deterministic receipt derived from the root. Used when `ANCHOR_NETWORK`
/// is `none` (§6) and in tests.
pub struct NoopAnchorSink;

#[async_trait]
impl AnchorSink for NoopAnchorSink {
    async fn submit(&self, root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure> {
        Ok(AnchorReceipt {
            tx_id: format!("noop:{}", hex::encode(root)),
        })
    }

    async fn confirmations(&self, _tx_id: &str) -> Result<u64, AnchorFailure> {
        Ok(1)
    }
}
