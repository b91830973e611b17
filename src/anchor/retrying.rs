//! Retry-with-fallback decorator over an `AnchorSink` (§5.3, RC-3.02):
//! transient failures on the primary network are retried with exponential
//! backoff before falling back to a secondary sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::sink::{AnchorFailure, AnchorReceipt, AnchorSink};

pub struct RetryingAnchorSink<P: AnchorSink, S: AnchorSink> {
    primary: P,
    secondary: Option<S>,
    max_attempts: u32,
    base_delay: Duration,
}

impl<P: AnchorSink, S: AnchorSink> RetryingAnchorSink<P, S> {
    pub fn new(primary: P, secondary: Option<S>) -> Self {
        Self {
            primary,
            secondary,
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }

    pub fn with_backoff(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self
    }

    async fn submit_with_retry(&self, root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure> {
        let mut last_err = AnchorFailure::NetworkUnavailable;
        for attempt in 0..self.max_attempts {
            match self.primary.submit(root).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "anchor submission to primary failed, retrying");
                    last_err = e;
                    tokio::time::sleep(self.base_delay * 2u32.pow(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl<P: AnchorSink, S: AnchorSink> AnchorSink for RetryingAnchorSink<P, S> {
    async fn submit(&self, root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure> {
        match self.submit_with_retry(root).await {
            Ok(receipt) => Ok(receipt),
            Err(primary_err) => match &self.secondary {
                Some(secondary) => {
                    warn!(error = %primary_err, "falling back to secondary anchor network");
                    secondary.submit(root).await
                }
                None => Err(primary_err),
            },
        }
    }

    async fn confirmations(&self, tx_id: &str) -> Result<u64, AnchorFailure> {
        if let Ok(n) = self.primary.confirmations(tx_id).await {
            return Ok(n);
        }
        match &self.secondary {
            Some(secondary) => secondary.confirmations(tx_id).await,
            None => self.primary.confirmations(tx_id).await,
        }
    }

    async fn await_confirmation(&self, tx_id: &str, required: u64, timeout: Duration) -> Result<(), AnchorFailure> {
        if self
            .primary
            .await_confirmation(tx_id, required, timeout)
            .await
            .is_ok()
        {
            return Ok(());
        }
        match &self.secondary {
            Some(secondary) => secondary.await_confirmation(tx_id, required, timeout).await,
            None => self.primary.await_confirmation(tx_id, required, timeout).await,
        }
    }
}

/// Type-erased anchor sink handle for the pipeline, which doesn't know at
/// compile time whether it's holding a bare sink or a retrying decorator.
pub type SharedAnchorSink = Arc<dyn AnchorSink>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyOnceSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnchorSink for FlakyOnceSink {
        async fn submit(&self, root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AnchorFailure::NetworkUnavailable)
            } else {
                Ok(AnchorReceipt {
                    tx_id: hex::encode(root),
                })
            }
        }
        async fn confirmations(&self, _tx_id: &str) -> Result<u64, AnchorFailure> {
            Ok(1)
        }
    }

    struct AlwaysRejectSink;

    #[async_trait]
    impl AnchorSink for AlwaysRejectSink {
        async fn submit(&self, _root: &[u8; 32]) -> Result<AnchorReceipt, AnchorFailure> {
            Err(AnchorFailure::PermanentRejection("malformed root".into()))
        }
        async fn confirmations(&self, _tx_id: &str) -> Result<u64, AnchorFailure> {
            Err(AnchorFailure::PermanentRejection("unknown tx".into()))
        }
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let sink = RetryingAnchorSink::new(
            FlakyOnceSink {
                calls: AtomicU32::new(0),
            },
            None::<super::super::sink::NoopAnchorSink>,
        )
        .with_backoff(3, Duration::from_millis(1));
        let receipt = sink.submit(&[2u8; 32]).await.unwrap();
        assert_eq!(receipt.tx_id, hex::encode([2u8; 32]));
    }

    #[tokio::test]
    async fn falls_back_to_secondary_on_permanent_rejection() {
        let sink = RetryingAnchorSink::new(AlwaysRejectSink, Some(super::super::sink::NoopAnchorSink))
            .with_backoff(2, Duration::from_millis(1));
        let receipt = sink.submit(&[3u8; 32]).await;
        // primary permanently rejects (not retryable) -> falls back immediately
        assert!(receipt.is_ok());
    }

    #[tokio::test]
    async fn await_confirmation_falls_back_to_secondary_within_the_given_deadline() {
        let sink = RetryingAnchorSink::new(AlwaysRejectSink, Some(super::super::sink::NoopAnchorSink));
        sink.await_confirmation("tx", 1, Duration::from_millis(50))
            .await
            .unwrap();
    }
}
