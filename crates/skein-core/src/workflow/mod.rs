//! Durable workflow engine — checkpointed steps, resumable runs, replayable
//! output streams.
//!
//! A workflow is an async function registered by name against the engine. It
//! receives a [`WorkflowCtx`] and performs its side effects through
//! [`WorkflowCtx::step`], the durability boundary: completed step outputs are
//! persisted and replayed on resume instead of re-executing, so a run that is
//! interrupted by a crash or redeploy picks up exactly where it left off.
//!
//! # Architecture
//!
//! ```text
//! engine.start(name, args) ──► workflow_runs row ──► tokio task
//!                                    │                    │
//!                        workflow_steps (checkpoints) ◄── ctx.step(...)
//!                                    │                    │
//!                        stream_chunks (replayable)  ◄── ctx.emit(...)
//!                                    │
//!                  engine.subscribe(stream_id, start_index)
//! ```
//!
//! Everything a run produces — step outputs and stream chunks — lives in
//! SQLite, so a run handle is re-derivable after the originating process has
//! been replaced.

pub mod ctx;
pub mod engine;
pub mod store;
pub mod stream;

pub use ctx::WorkflowCtx;
pub use engine::{RunHandle, WorkflowEngine};
pub use store::{RunRecord, RunStatus, RunStore, StepRecord};
pub use stream::{StreamBus, StreamWriter};

use crate::error::ServerError;

/// Typed failures of workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A step body failed; the run aborts.
    #[error("step `{name}` failed: {message}")]
    Step { name: String, message: String },

    /// A resumed run issued a different step than its checkpoint recorded.
    /// Step shape is part of the durable contract; this is not recoverable.
    #[error("replay mismatch at seq {seq}: body issued `{issued}`, checkpoint has `{recorded}`")]
    ReplayMismatch {
        seq: u32,
        issued: String,
        recorded: String,
    },

    /// The agent loop hit its turn ceiling without the terminal tool.
    #[error("agent exceeded {0} turns without calling the terminal tool")]
    TurnLimit(u32),

    #[error("checkpoint serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] ServerError),
}

impl WorkflowError {
    /// Whether the underlying cause is a missing domain row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowError::Storage(e) if e.is_not_found())
    }
}
