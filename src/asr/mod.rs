//! Agent State Record audit pipeline: signed records, append-only storage,
//! Merkle batching, and anchor submission (§5).

pub mod merkle;
pub mod pipeline;
pub mod record;
pub mod store;

pub use merkle::{verify_proof, MerkleBatch, ProofStep};
pub use pipeline::{AsrPipeline, BatchStatus};
pub use record::{AsrAction, AsrError, AsrId, AsrRecord};
pub use store::{AsrStore, FileAsrStore, InMemoryAsrStore};
