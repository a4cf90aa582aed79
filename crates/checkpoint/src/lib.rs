//! Durable progress for the extraction pipeline.
//!
//! Layout of a checkpoint directory:
//!
//! - `progress.json`: processed chunk ids, running totals, timestamps
//! - `concepts.jsonl`, `relationships.jsonl`: append-only candidate rows,
//!   each tagged with its chunk id and write batch
//! - `snapshots/`: timestamped full dumps, for inspection only

pub mod error;
pub mod log;
pub mod progress;
pub mod store;

pub use error::{CheckpointError, Result};
pub use progress::Progress;
pub use store::CheckpointStore;
