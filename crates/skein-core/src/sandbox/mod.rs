//! Sandbox collaborator — isolated execution environments addressed by an
//! opaque id.
//!
//! Used exclusively from inside workflow steps, so a retried step may call
//! `create` again; the in-memory variant counts calls so tests can assert
//! that checkpointed steps never re-create.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Result of a command executed inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Closed set of sandbox clients.
#[derive(Clone)]
pub enum SandboxClient {
    Http(HttpSandbox),
    InMemory(FakeSandbox),
}

impl SandboxClient {
    pub fn http(base_url: &str, token: &str) -> Self {
        Self::Http(HttpSandbox::new(base_url, token))
    }

    pub fn in_memory() -> Self {
        Self::InMemory(FakeSandbox::new())
    }

    /// Provision a sandbox cloning the given repository. Returns its id.
    pub async fn create(&self, repo_url: &str) -> Result<String, ServerError> {
        match self {
            Self::Http(c) => c.create(repo_url).await,
            Self::InMemory(c) => c.create(repo_url),
        }
    }

    pub async fn run_command(
        &self,
        sandbox_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, ServerError> {
        match self {
            Self::Http(c) => c.run_command(sandbox_id, cmd, args).await,
            Self::InMemory(c) => c.run_command(sandbox_id, cmd, args),
        }
    }

    pub async fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), ServerError> {
        match self {
            Self::Http(c) => c.write_file(sandbox_id, path, content).await,
            Self::InMemory(c) => c.write_file(sandbox_id, path, content),
        }
    }

    pub async fn stop(&self, sandbox_id: &str) -> Result<(), ServerError> {
        match self {
            Self::Http(c) => c.stop(sandbox_id).await,
            Self::InMemory(c) => c.stop(sandbox_id),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// REST client for the sandbox provisioning API.
#[derive(Clone)]
pub struct HttpSandbox {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSandbox {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(900)) // 15 min: clone + install
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn create(&self, repo_url: &str) -> Result<String, ServerError> {
        let json = self
            .post(
                &format!("{}/sandboxes", self.base_url),
                &serde_json::json!({ "repoUrl": repo_url, "vcpus": 2 }),
            )
            .await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ServerError::External("Sandbox create returned no id".to_string()))
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, ServerError> {
        let json = self
            .post(
                &format!("{}/sandboxes/{}/commands", self.base_url, sandbox_id),
                &serde_json::json!({ "cmd": cmd, "args": args }),
            )
            .await?;
        serde_json::from_value(json)
            .map_err(|e| ServerError::External(format!("Sandbox command response parse: {}", e)))
    }

    async fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), ServerError> {
        self.post(
            &format!("{}/sandboxes/{}/files", self.base_url, sandbox_id),
            &serde_json::json!({ "path": path, "content": content }),
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, sandbox_id: &str) -> Result<(), ServerError> {
        let resp = self
            .client
            .delete(format!("{}/sandboxes/{}", self.base_url, sandbox_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ServerError::External(format!("Sandbox stop failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(ServerError::External(format!(
                "Sandbox stop returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ServerError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ServerError::External(format!("Sandbox request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ServerError::External(format!(
                "Sandbox API returned {}: {}",
                status, text
            )));
        }
        resp.json()
            .await
            .map_err(|e| ServerError::External(format!("Sandbox response parse: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// In-memory fake (tests, offline dev)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    counter: u32,
    created: Vec<String>,
    commands: Vec<(String, String)>,
    files: Vec<(String, String)>,
    stopped: Vec<String>,
    scripted_outputs: VecDeque<CommandOutput>,
}

/// Records every operation; command outputs can be scripted per call.
#[derive(Clone, Default)]
pub struct FakeSandbox {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, output: CommandOutput) {
        self.inner
            .lock()
            .expect("fake sandbox")
            .scripted_outputs
            .push_back(output);
    }

    pub fn create_count(&self) -> usize {
        self.inner.lock().expect("fake sandbox").created.len()
    }

    pub fn command_count(&self) -> usize {
        self.inner.lock().expect("fake sandbox").commands.len()
    }

    pub fn stopped_ids(&self) -> Vec<String> {
        self.inner.lock().expect("fake sandbox").stopped.clone()
    }

    pub fn written_paths(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("fake sandbox")
            .files
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn create(&self, repo_url: &str) -> Result<String, ServerError> {
        let mut state = self.inner.lock().expect("fake sandbox");
        state.counter += 1;
        state.created.push(repo_url.to_string());
        Ok(format!("sbx-{}", state.counter))
    }

    fn run_command(
        &self,
        sandbox_id: &str,
        cmd: &str,
        args: &[String],
    ) -> Result<CommandOutput, ServerError> {
        let mut state = self.inner.lock().expect("fake sandbox");
        state
            .commands
            .push((sandbox_id.to_string(), format!("{} {}", cmd, args.join(" "))));
        Ok(state.scripted_outputs.pop_front().unwrap_or(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        }))
    }

    fn write_file(&self, sandbox_id: &str, path: &str, _content: &str) -> Result<(), ServerError> {
        self.inner
            .lock()
            .expect("fake sandbox")
            .files
            .push((sandbox_id.to_string(), path.to_string()));
        Ok(())
    }

    fn stop(&self, sandbox_id: &str) -> Result<(), ServerError> {
        self.inner
            .lock()
            .expect("fake sandbox")
            .stopped
            .push(sandbox_id.to_string());
        Ok(())
    }
}
