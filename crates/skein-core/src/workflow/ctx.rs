//! Step execution context — the durability boundary of a workflow body.

use std::future::Future;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ServerError;
use crate::models::message::OutputChunk;
use crate::workflow::store::{RunStore, StepRecord};
use crate::workflow::stream::StreamWriter;
use crate::workflow::WorkflowError;

/// Execution context handed to a workflow body.
///
/// Steps are numbered in issue order. On resume the body re-runs from the
/// top; `step` replays checkpointed outputs for already-completed sequence
/// numbers and only truly executes the first not-yet-completed step, which
/// is what makes local variables between suspension points reconstructible
/// as long as all meaningful state flows through step outputs.
pub struct WorkflowCtx {
    run_id: String,
    store: RunStore,
    writer: StreamWriter,
    replay: Mutex<Replay>,
}

struct Replay {
    next_seq: u32,
    checkpoints: Vec<StepRecord>,
}

impl WorkflowCtx {
    pub fn new(run_id: String, store: RunStore, writer: StreamWriter, checkpoints: Vec<StepRecord>) -> Self {
        Self {
            run_id,
            store,
            writer,
            replay: Mutex::new(Replay {
                next_seq: 0,
                checkpoints,
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Writable end of this run's resumable output stream.
    ///
    /// Emit only from inside step bodies: a chunk written outside a step is
    /// re-emitted every time the run resumes.
    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub async fn emit(&self, chunk: &OutputChunk) -> Result<(), ServerError> {
        self.writer.append(chunk).await
    }

    /// Execute `f(input)` as the next step, or replay its checkpoint.
    ///
    /// Once a step has recorded a successful output it is never re-executed
    /// on resume — the persisted result is substituted. A step that fails
    /// before recording completion is re-run from scratch, so bodies with
    /// external side effects must be safe to retry (create-if-not-exists
    /// semantics).
    pub async fn step<I, O, F, Fut>(&self, name: &str, input: I, f: F) -> Result<O, WorkflowError>
    where
        I: Serialize,
        O: Serialize + DeserializeOwned,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<O, WorkflowError>>,
    {
        let (seq, cached) = {
            let mut replay = self.replay.lock().expect("replay cursor poisoned");
            let seq = replay.next_seq;
            replay.next_seq += 1;
            let cached = replay
                .checkpoints
                .iter()
                .find(|c| c.seq == seq)
                .cloned();
            (seq, cached)
        };

        if let Some(checkpoint) = cached {
            if checkpoint.name != name {
                return Err(WorkflowError::ReplayMismatch {
                    seq,
                    issued: name.to_string(),
                    recorded: checkpoint.name,
                });
            }
            tracing::debug!(run_id = %self.run_id, seq, step = name, "replaying checkpointed step");
            return Ok(serde_json::from_value(checkpoint.output)?);
        }

        tracing::debug!(run_id = %self.run_id, seq, step = name, "executing step");
        let output = f(input).await?;
        let value = serde_json::to_value(&output)?;
        self.store.save_step(&self.run_id, seq, name, &value).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::workflow::store::{RunRecord, RunStatus};
    use crate::workflow::stream::StreamBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn seeded_ctx(store: &RunStore, bus: &StreamBus, run: &RunRecord) -> WorkflowCtx {
        let checkpoints = store.load_steps(&run.id).await.unwrap();
        let writer = bus.open(&run.stream_id).await.unwrap();
        WorkflowCtx::new(run.id.clone(), store.clone(), writer, checkpoints)
    }

    async fn body(ctx: &WorkflowCtx, effects: &Arc<AtomicU32>) -> Result<String, WorkflowError> {
        let a: u32 = ctx
            .step("provision", (), |_| async {
                effects.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await?;
        let b: u32 = ctx.step("double", a, |x| async move { Ok(x * 2) }).await?;
        Ok(format!("result-{}", b))
    }

    #[tokio::test]
    async fn resume_replays_completed_steps_without_side_effects() {
        let db = Database::open_in_memory().unwrap();
        let store = RunStore::new(db);
        let bus = StreamBus::new(store.clone());
        let run = RunRecord::new("test", serde_json::Value::Null);
        store.create_run(&run).await.unwrap();
        store
            .update_status(&run.id, RunStatus::Running, None)
            .await
            .unwrap();

        let effects = Arc::new(AtomicU32::new(0));

        // First execution: both steps run.
        let ctx = seeded_ctx(&store, &bus, &run).await;
        let first = body(&ctx, &effects).await.unwrap();
        assert_eq!(effects.load(Ordering::SeqCst), 1);

        // Simulated process replacement: a fresh ctx loads the checkpoints
        // and the body re-runs from the top without re-invoking any step.
        let ctx = seeded_ctx(&store, &bus, &run).await;
        let second = body(&ctx, &effects).await.unwrap();

        assert_eq!(effects.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn crash_between_steps_resumes_at_first_incomplete() {
        let db = Database::open_in_memory().unwrap();
        let store = RunStore::new(db);
        let bus = StreamBus::new(store.clone());
        let run = RunRecord::new("test", serde_json::Value::Null);
        store.create_run(&run).await.unwrap();

        let effects = Arc::new(AtomicU32::new(0));

        // Crash after step 0: run only the first step, then drop the ctx.
        {
            let ctx = seeded_ctx(&store, &bus, &run).await;
            let fx = effects.clone();
            let _: u32 = ctx
                .step("provision", (), |_| async {
                    fx.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
        }

        let ctx = seeded_ctx(&store, &bus, &run).await;
        let out = body(&ctx, &effects).await.unwrap();

        // Step 0's side effect happened exactly once; the run completed.
        assert_eq!(effects.load(Ordering::SeqCst), 1);
        assert_eq!(out, "result-14");
    }

    #[tokio::test]
    async fn replay_mismatch_is_detected() {
        let db = Database::open_in_memory().unwrap();
        let store = RunStore::new(db);
        let bus = StreamBus::new(store.clone());
        let run = RunRecord::new("test", serde_json::Value::Null);
        store.create_run(&run).await.unwrap();

        let ctx = seeded_ctx(&store, &bus, &run).await;
        let _: u32 = ctx.step("alpha", (), |_| async { Ok(1) }).await.unwrap();

        // Resumed body issues a different first step.
        let ctx = seeded_ctx(&store, &bus, &run).await;
        let err = ctx
            .step::<_, u32, _, _>("beta", (), |_| async { Ok(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ReplayMismatch { .. }));
    }

    #[tokio::test]
    async fn failed_step_is_not_checkpointed() {
        let db = Database::open_in_memory().unwrap();
        let store = RunStore::new(db);
        let bus = StreamBus::new(store.clone());
        let run = RunRecord::new("test", serde_json::Value::Null);
        store.create_run(&run).await.unwrap();

        let ctx = seeded_ctx(&store, &bus, &run).await;
        let err = ctx
            .step::<_, u32, _, _>("flaky", (), |_| async {
                Err(WorkflowError::Step {
                    name: "flaky".to_string(),
                    message: "transient".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Step { .. }));

        // A retry from scratch executes the step for real.
        let ctx = seeded_ctx(&store, &bus, &run).await;
        let ok: u32 = ctx.step("flaky", (), |_| async { Ok(42) }).await.unwrap();
        assert_eq!(ok, 42);
    }
}
