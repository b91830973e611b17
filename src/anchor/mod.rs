//! On-chain anchoring of Merkle-batched ASR roots (§5.3).

pub mod retrying;
pub mod scheduler;
pub mod sink;

pub use retrying::{RetryingAnchorSink, SharedAnchorSink};
pub use scheduler::AnchorScheduler;
pub use sink::{AnchorFailure, AnchorReceipt, AnchorSink, NoopAnchorSink};
