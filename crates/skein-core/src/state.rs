//! Shared application state.
//!
//! Everything is explicitly constructed and dependency-injected: the
//! database handle is opened once at startup and passed into stores, the
//! engine, and the workflow/tool execution context — no process-wide
//! singletons opened at import time.

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::inference::{ModelClient, ScriptedClient};
use crate::sandbox::{FakeSandbox, SandboxClient};
use crate::store::{JobStore, SpecStore, ThreadStore};
use crate::workflow::WorkflowEngine;
use crate::workflows;

/// Everything a workflow body or tool handler needs. Cheap to clone into
/// registered workflow closures.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub config: Arc<Config>,
    pub threads: ThreadStore,
    pub specs: SpecStore,
    pub jobs: JobStore,
    pub model: ModelClient,
    pub sandbox: SandboxClient,
    pub engine: WorkflowEngine,
}

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub db: Database,
    pub config: Arc<Config>,
    pub threads: ThreadStore,
    pub specs: SpecStore,
    pub jobs: JobStore,
    pub model: ModelClient,
    pub sandbox: SandboxClient,
    pub engine: WorkflowEngine,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Production wiring: env config, HTTP model gateway, HTTP sandbox API.
    pub fn new(db: Database) -> Self {
        let config = Config::from_env();
        let model = ModelClient::gateway(&config.gateway_base_url, &config.gateway_api_key);
        let sandbox = SandboxClient::http(&config.sandbox_base_url, &config.github_token);
        Self::with_collaborators(db, config, model, sandbox)
    }

    /// Explicit wiring for tests and embedders.
    pub fn with_collaborators(
        db: Database,
        config: Config,
        model: ModelClient,
        sandbox: SandboxClient,
    ) -> Self {
        let engine = WorkflowEngine::new(db.clone());
        let state = Self {
            config: Arc::new(config),
            threads: ThreadStore::new(db.clone()),
            specs: SpecStore::new(db.clone()),
            jobs: JobStore::new(db.clone()),
            model,
            sandbox,
            engine,
            db,
        };
        workflows::register_all(&state.engine, &state.deps());
        state
    }

    /// In-memory database, scripted model, recording sandbox (for testing).
    pub fn for_testing() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let config = Config {
            planner_model: "test-planner".to_string(),
            codegen_model: "test-codegen".to_string(),
            gateway_base_url: String::new(),
            gateway_api_key: "test-key".to_string(),
            sandbox_base_url: String::new(),
            repo_owner: "skein-dev".to_string(),
            github_token: "test-token".to_string(),
            repos: vec!["widgets".to_string()],
            max_agent_turns: 8,
        };
        let model = ModelClient::Scripted(ScriptedClient::new());
        let sandbox = SandboxClient::InMemory(FakeSandbox::new());
        Self::with_collaborators(db, config, model, sandbox)
    }

    pub fn deps(&self) -> WorkflowDeps {
        WorkflowDeps {
            config: self.config.clone(),
            threads: self.threads.clone(),
            specs: self.specs.clone(),
            jobs: self.jobs.clone(),
            model: self.model.clone(),
            sandbox: self.sandbox.clone(),
            engine: self.engine.clone(),
        }
    }

    /// The scripted model client (panics on production wiring; for tests).
    pub fn scripted_model(&self) -> &ScriptedClient {
        match &self.model {
            ModelClient::Scripted(c) => c,
            _ => panic!("state was not built with a scripted model"),
        }
    }

    /// The recording sandbox (panics on production wiring; for tests).
    pub fn fake_sandbox(&self) -> &FakeSandbox {
        match &self.sandbox {
            SandboxClient::InMemory(c) => c,
            _ => panic!("state was not built with an in-memory sandbox"),
        }
    }
}
