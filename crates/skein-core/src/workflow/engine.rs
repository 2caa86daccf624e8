//! The run registry: starting, resuming, and attaching to workflow runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio_stream::Stream;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::message::OutputChunk;
use crate::workflow::ctx::WorkflowCtx;
use crate::workflow::store::{RunRecord, RunStatus, RunStore, StepRecord};
use crate::workflow::stream::StreamBus;
use crate::workflow::WorkflowError;

type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Value, WorkflowError>> + Send>>;
type WorkflowFn = Arc<dyn Fn(Arc<WorkflowCtx>, Value) -> WorkflowFuture + Send + Sync>;

/// Handle returned by `start`/`resume`: stable across resumes, resolvable on
/// any process.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub stream_id: String,
}

/// Durable workflow engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: RunStore,
    bus: StreamBus,
    workflows: RwLock<HashMap<String, WorkflowFn>>,
}

impl WorkflowEngine {
    pub fn new(db: Database) -> Self {
        let store = RunStore::new(db);
        let bus = StreamBus::new(store.clone());
        Self {
            inner: Arc::new(EngineInner {
                store,
                bus,
                workflows: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a workflow body under a stable name. The name is persisted on
    /// every run row, which is what lets a replacement process resume runs it
    /// did not start.
    pub fn register<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Arc<WorkflowCtx>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        let wrapped: WorkflowFn = Arc::new(move |ctx, args| Box::pin(f(ctx, args)));
        self.inner
            .workflows
            .write()
            .expect("workflow registry poisoned")
            .insert(name.to_string(), wrapped);
    }

    fn lookup(&self, name: &str) -> Result<WorkflowFn, ServerError> {
        self.inner
            .workflows
            .read()
            .expect("workflow registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::BadRequest(format!("Unknown workflow: {}", name)))
    }

    /// Queue a new run and return its handle immediately. Two starts with the
    /// same workflow+args are independent runs; dedup is the caller's job.
    pub async fn start(&self, name: &str, args: Value) -> Result<RunHandle, ServerError> {
        let body = self.lookup(name)?;
        let record = RunRecord::new(name, args);
        self.inner.store.create_run(&record).await?;
        tracing::info!(run_id = %record.id, workflow = name, "starting workflow run");
        self.spawn(body, record, Vec::new()).await
    }

    /// Resume a run from its checkpoints. Terminal runs are returned as-is —
    /// their streams replay from persistence.
    pub async fn resume(&self, run_id: &str) -> Result<RunHandle, ServerError> {
        let record = self
            .inner
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("Run {} not found", run_id)))?;

        if record.status.is_terminal() {
            return Ok(RunHandle {
                run_id: record.id,
                stream_id: record.stream_id,
            });
        }

        let body = self.lookup(&record.workflow)?;
        let checkpoints = self.inner.store.load_steps(&record.id).await?;
        tracing::info!(
            run_id = %record.id,
            workflow = %record.workflow,
            checkpoints = checkpoints.len(),
            "resuming workflow run"
        );
        self.spawn(body, record, checkpoints).await
    }

    async fn spawn(
        &self,
        body: WorkflowFn,
        record: RunRecord,
        checkpoints: Vec<StepRecord>,
    ) -> Result<RunHandle, ServerError> {
        let handle = RunHandle {
            run_id: record.id.clone(),
            stream_id: record.stream_id.clone(),
        };

        self.inner
            .store
            .update_status(&record.id, RunStatus::Running, None)
            .await?;
        let writer = self.inner.bus.open(&record.stream_id).await?;

        let ctx = Arc::new(WorkflowCtx::new(
            record.id.clone(),
            self.inner.store.clone(),
            writer.clone(),
            checkpoints,
        ));
        let fut = body(ctx, record.args.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let (status, error) = match &result {
                Ok(_) => (RunStatus::Completed, None),
                Err(e) => (RunStatus::Failed, Some(e.to_string())),
            };

            if let Err(e) = &result {
                tracing::error!(run_id = %record.id, error = %e, "workflow run failed");
                // Failed is terminal, so this emits at most once per run.
                let _ = writer
                    .append(&OutputChunk::Error {
                        message: e.to_string(),
                    })
                    .await;
            } else {
                tracing::info!(run_id = %record.id, "workflow run completed");
            }

            if let Err(e) = engine
                .inner
                .store
                .update_status(&record.id, status, error)
                .await
            {
                tracing::error!(run_id = %record.id, error = %e, "failed to persist run status");
            }
            engine.inner.bus.close(&record.stream_id).await;
        });

        Ok(handle)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, ServerError> {
        self.inner.store.get_run(run_id).await
    }

    pub async fn run_by_stream(&self, stream_id: &str) -> Result<Option<RunRecord>, ServerError> {
        self.inner.store.run_by_stream(stream_id).await
    }

    /// Attach to a run's output stream at an arbitrary offset.
    pub async fn subscribe(
        &self,
        stream_id: &str,
        start_index: u64,
    ) -> impl Stream<Item = Result<String, ServerError>> + Send + 'static {
        self.inner.bus.subscribe(stream_id, start_index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(Database::open_in_memory().unwrap())
    }

    async fn wait_terminal(engine: &WorkflowEngine, run_id: &str) -> RunRecord {
        for _ in 0..200 {
            let run = engine.get_run(run_id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never reached a terminal status", run_id);
    }

    #[tokio::test]
    async fn start_runs_to_completion_and_closes_stream() {
        let engine = engine();
        engine.register("greet", |ctx, args| async move {
            let name: String = ctx
                .step("pick-name", args, |a| async move {
                    Ok(a.get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("world")
                        .to_string())
                })
                .await?;
            let emitter = ctx.clone();
            ctx.step("emit", name.clone(), |n| async move {
                emitter
                    .emit(&OutputChunk::TextDelta {
                        delta: format!("hello {}", n),
                    })
                    .await?;
                Ok(())
            })
            .await?;
            Ok(json!({ "greeted": name }))
        });

        let handle = engine.start("greet", json!({ "name": "skein" })).await.unwrap();
        let run = wait_terminal(&engine, &handle.run_id).await;
        assert_eq!(run.status, RunStatus::Completed);

        let chunks: Vec<_> = engine
            .subscribe(&handle.stream_id, 0)
            .await
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].as_ref().unwrap().contains("hello skein"));
    }

    #[tokio::test]
    async fn unknown_workflow_is_rejected() {
        let engine = engine();
        let err = engine.start("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn failed_run_records_error_and_error_chunk() {
        let engine = engine();
        engine.register("boom", |_ctx, _args| async move {
            Err(WorkflowError::Step {
                name: "explode".to_string(),
                message: "kaput".to_string(),
            })
        });

        let handle = engine.start("boom", json!({})).await.unwrap();
        let run = wait_terminal(&engine, &handle.run_id).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("kaput"));

        let chunks: Vec<_> = engine
            .subscribe(&handle.stream_id, 0)
            .await
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].as_ref().unwrap().contains("kaput"));
    }

    #[tokio::test]
    async fn resume_skips_checkpointed_steps() {
        static EFFECTS: AtomicU32 = AtomicU32::new(0);

        let engine = engine();
        engine.register("provision", |ctx, _args| async move {
            let id: u32 = ctx
                .step("create-resource", (), |_| async {
                    EFFECTS.fetch_add(1, Ordering::SeqCst);
                    Ok(99)
                })
                .await?;
            Ok(json!({ "resourceId": id }))
        });

        let handle = engine.start("provision", json!({})).await.unwrap();
        wait_terminal(&engine, &handle.run_id).await;
        assert_eq!(EFFECTS.load(Ordering::SeqCst), 1);

        // Force the run back to a non-terminal status, as a process crash
        // after the checkpoint write would leave it.
        engine
            .inner
            .store
            .update_status(&handle.run_id, RunStatus::Running, None)
            .await
            .unwrap();

        let resumed = engine.resume(&handle.run_id).await.unwrap();
        assert_eq!(resumed.run_id, handle.run_id);
        let run = wait_terminal(&engine, &handle.run_id).await;
        assert_eq!(run.status, RunStatus::Completed);

        // The checkpointed step was replayed, not re-executed.
        assert_eq!(EFFECTS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resume_of_terminal_run_returns_replayable_handle() {
        let engine = engine();
        engine.register("once", |ctx, _args| async move {
            let emitter = ctx.clone();
            ctx.step("say", (), |_| async move {
                emitter
                    .emit(&OutputChunk::TextDelta {
                        delta: "done".to_string(),
                    })
                    .await?;
                Ok(())
            })
            .await?;
            Ok(json!({}))
        });

        let handle = engine.start("once", json!({})).await.unwrap();
        wait_terminal(&engine, &handle.run_id).await;

        let resumed = engine.resume(&handle.run_id).await.unwrap();
        assert_eq!(resumed.stream_id, handle.stream_id);

        let chunks: Vec<_> = engine
            .subscribe(&resumed.stream_id, 0)
            .await
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn resume_of_unknown_run_is_not_found() {
        let engine = engine();
        let err = engine.resume("missing").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
