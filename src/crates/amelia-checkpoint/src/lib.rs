//! Checkpoint storage for the Amelia orchestration engine.
//!
//! A checkpoint is a durable snapshot of a workflow's execution state plus
//! the nodes scheduled to run next. The [`Checkpointer`] trait is the
//! storage contract; [`MemoryCheckpointer`] and [`SqliteCheckpointer`] are
//! the shipped backends. The state payload is opaque bytes to the store;
//! the runtime serializes through the versioned envelope in
//! [`payload`].
//!
//! Checkpoints enable:
//!
//! - **Suspend/resume**: workflows pause at approval gates and survive
//!   process restarts.
//! - **Crash recovery**: execution resumes from the latest snapshot with
//!   no step re-executed.
//! - **History**: `list` exposes the full linear-with-branching trail
//!   for inspection and replay.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod payload;
pub mod sqlite;
pub mod traits;

pub use checkpoint::Checkpoint;
pub use error::{CheckpointError, Result};
pub use memory::MemoryCheckpointer;
pub use payload::{decode_payload, encode_payload, PAYLOAD_SCHEMA_VERSION};
pub use sqlite::SqliteCheckpointer;
pub use traits::Checkpointer;
