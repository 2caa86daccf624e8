//! The closed tool registry for the planner and worker agents.
//!
//! Each tool is a tagged variant with a schemars-derived input schema and a
//! handler dispatched by tag. Handlers never fail the run: validation
//! problems and missing rows come back as `{ "error": true, "message" }`
//! data so the agent loop can react conversationally.

use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::{CLI_PLANNER_CONFIG, CLI_WORKER_CONFIG};
use crate::inference::ToolDescriptor;
use crate::models::job::{Job, JobStatus};
use crate::models::spec::Spec;
use crate::models::thread::ThreadState;
use crate::state::WorkflowDeps;
use crate::workflows::WORKER_WORKFLOW;

/// Every tool the platform knows. The agent loop refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    InitSandbox,
    CloseSandbox,
    CliQuery,
    DraftSpec,
    UpdateSpec,
    FinalizeSpec,
    UpdateTitle,
    ReportCompletion,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitSandbox => "init_sandbox",
            Self::CloseSandbox => "close_sandbox",
            Self::CliQuery => "cli_query",
            Self::DraftSpec => "draft_spec",
            Self::UpdateSpec => "update_spec",
            Self::FinalizeSpec => "finalize_spec",
            Self::UpdateTitle => "update_title",
            Self::ReportCompletion => "report_completion",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "init_sandbox" => Some(Self::InitSandbox),
            "close_sandbox" => Some(Self::CloseSandbox),
            "cli_query" => Some(Self::CliQuery),
            "draft_spec" => Some(Self::DraftSpec),
            "update_spec" => Some(Self::UpdateSpec),
            "finalize_spec" => Some(Self::FinalizeSpec),
            "update_title" => Some(Self::UpdateTitle),
            "report_completion" => Some(Self::ReportCompletion),
            _ => None,
        }
    }
}

/// One registered tool: tag, model-facing description, input schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: ToolName,
    pub description: &'static str,
    pub input_schema: serde_json::Value,
}

fn spec<T: JsonSchema>(name: ToolName, description: &'static str) -> ToolSpec {
    ToolSpec {
        name,
        description,
        input_schema: serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default(),
    }
}

/// The tool set an agent is allowed to call.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    /// Planner surface: explore, draft, finalize, housekeeping.
    pub fn planner() -> Self {
        Self {
            tools: vec![
                spec::<InitSandboxInput>(
                    ToolName::InitSandbox,
                    "Initializes a sandbox cloning the given repository. One-time \
                     operation; call before any other codebase operation.",
                ),
                spec::<CloseSandboxInput>(
                    ToolName::CloseSandbox,
                    "Closes the sandbox with the given sandboxId. Must be called when \
                     done with the sandbox, before reporting completion.",
                ),
                spec::<CliQueryInput>(
                    ToolName::CliQuery,
                    "Sends a natural-language query to the AI agent installed in the \
                     sandbox CLI. Provide full sentences with as much detail as possible.",
                ),
                spec::<DraftSpecInput>(
                    ToolName::DraftSpec,
                    "Create a draft design spec for a given thread based on the \
                     conversation so far.",
                ),
                spec::<UpdateSpecInput>(
                    ToolName::UpdateSpec,
                    "Update a draft design spec for a given thread. Content fully \
                     replaces the existing spec content.",
                ),
                spec::<FinalizeSpecInput>(
                    ToolName::FinalizeSpec,
                    "Finalize the latest draft spec for a thread and create a queued \
                     implementation job.",
                ),
                spec::<UpdateTitleInput>(
                    ToolName::UpdateTitle,
                    "Update the title of a conversation thread. Use sparingly, when the \
                     overall topic or goal changes significantly.",
                ),
                spec::<ReportCompletionInput>(
                    ToolName::ReportCompletion,
                    "Call this exactly once when the task is complete, with a concise \
                     one-sentence summary of what you accomplished.",
                ),
            ],
        }
    }

    /// Worker surface: sandbox execution plus the terminal tool.
    pub fn worker() -> Self {
        Self {
            tools: vec![
                spec::<InitSandboxInput>(
                    ToolName::InitSandbox,
                    "Initializes a sandbox cloning the given repository. One-time \
                     operation; call before any other codebase operation.",
                ),
                spec::<CloseSandboxInput>(
                    ToolName::CloseSandbox,
                    "Closes the sandbox with the given sandboxId. Must be called when \
                     done with the sandbox, before reporting completion.",
                ),
                spec::<CliQueryInput>(
                    ToolName::CliQuery,
                    "Sends a natural-language query to the AI agent installed in the \
                     sandbox CLI. Provide full sentences with as much detail as possible.",
                ),
                spec::<ReportCompletionInput>(
                    ToolName::ReportCompletion,
                    "Call this exactly once when the job is complete, with a concise \
                     one-sentence summary. Include prUrl when a pull request was opened.",
                ),
            ],
        }
    }

    pub fn contains(&self, name: ToolName) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// The surface advertised to the model.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name.as_str().to_string(),
                description: t.description.to_string(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }
}

// ─── Tool inputs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitSandboxInput {
    /// Repository name without the owner prefix.
    pub repo: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloseSandboxInput {
    pub sandbox_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CliQueryInput {
    /// Natural-language instructions for the CLI agent.
    pub query: String,
    pub sandbox_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DraftSpecInput {
    pub thread_id: String,
    /// Target repository, all lowercase.
    pub repo: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSpecInput {
    pub spec_id: String,
    pub title: Option<String>,
    pub repo: Option<String>,
    /// Fully replaces the existing spec content.
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeSpecInput {
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTitleInput {
    pub thread_id: String,
    pub title: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportCompletionInput {
    pub summary: String,
    pub code: Option<i64>,
    pub pr_url: Option<String>,
}

// ─── Executor ───────────────────────────────────────────────────────────────

fn err_data(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": true, "message": message.into() })
}

/// Executes tool calls against the domain. Carries the agent's scope: worker
/// executors know their job and use the worker sandbox profile.
#[derive(Clone)]
pub struct ToolExecutor {
    deps: WorkflowDeps,
    registry: ToolRegistry,
    job_id: Option<String>,
}

impl ToolExecutor {
    pub fn planner(deps: WorkflowDeps) -> Self {
        Self {
            deps,
            registry: ToolRegistry::planner(),
            job_id: None,
        }
    }

    pub fn worker(deps: WorkflowDeps, job_id: String) -> Self {
        Self {
            deps,
            registry: ToolRegistry::worker(),
            job_id: Some(job_id),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }

    /// Dispatch a tool call by tag. Always returns data, never an error.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> serde_json::Value {
        let Some(tool) = ToolName::from_str(name) else {
            return err_data(format!("Unknown tool: {}", name));
        };
        if !self.registry.contains(tool) {
            return err_data(format!("Tool {} is not available to this agent", name));
        }

        let result = match tool {
            ToolName::InitSandbox => self.init_sandbox(args).await,
            ToolName::CloseSandbox => self.close_sandbox(args).await,
            ToolName::CliQuery => self.cli_query(args).await,
            ToolName::DraftSpec => self.draft_spec(args).await,
            ToolName::UpdateSpec => self.update_spec(args).await,
            ToolName::FinalizeSpec => self.finalize_spec(args).await,
            ToolName::UpdateTitle => self.update_title(args).await,
            ToolName::ReportCompletion => self.report_completion(args).await,
        };
        match result {
            Ok(value) => value,
            Err(message) => err_data(message),
        }
    }

    // ─── Sandbox tools ──────────────────────────────────────────────────

    async fn init_sandbox(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: InitSandboxInput = parse(args)?;
        let config = &self.deps.config;
        let repo_url = format!("https://github.com/{}/{}.git", config.repo_owner, input.repo);

        let sandbox_id = self
            .deps
            .sandbox
            .create(&repo_url)
            .await
            .map_err(|e| format!("init_sandbox failed: {}", e))?;
        tracing::info!(repo = %input.repo, sandbox = %sandbox_id, "sandbox initialized");

        self.configure_sandbox(&sandbox_id)
            .await
            .map_err(|e| format!("sandbox configuration failed: {}", e))?;

        Ok(serde_json::json!({ "sandboxId": sandbox_id }))
    }

    /// Install the CLI agent, write its config, and set up git identity and
    /// credentials inside a fresh sandbox.
    async fn configure_sandbox(&self, sandbox_id: &str) -> Result<(), crate::error::ServerError> {
        let config = &self.deps.config;
        let sandbox = &self.deps.sandbox;

        sandbox
            .run_command(
                sandbox_id,
                "npm",
                &args(&["install", "-g", "@continuedev/cli"]),
            )
            .await?;

        let profile = if self.job_id.is_some() {
            CLI_WORKER_CONFIG
        } else {
            CLI_PLANNER_CONFIG
        };
        let cli_config = profile.replace("{api_key}", &config.gateway_api_key);
        sandbox
            .write_file(sandbox_id, ".continue/config.yaml", &cli_config)
            .await?;

        sandbox
            .run_command(
                sandbox_id,
                "git",
                &args(&["config", "--global", "credential.helper", "store"]),
            )
            .await?;
        sandbox
            .run_command(
                sandbox_id,
                "sh",
                &args(&[
                    "-c",
                    &format!(
                        "echo 'https://x-access-token:{}@github.com' > ~/.git-credentials",
                        config.github_token
                    ),
                ]),
            )
            .await?;
        sandbox
            .run_command(
                sandbox_id,
                "git",
                &args(&["config", "--global", "user.name", "Skein"]),
            )
            .await?;
        sandbox
            .run_command(
                sandbox_id,
                "git",
                &args(&["config", "--global", "user.email", "bot@skein.dev"]),
            )
            .await?;

        tracing::info!(sandbox = %sandbox_id, "sandbox configured");
        Ok(())
    }

    async fn close_sandbox(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: CloseSandboxInput = parse(args)?;
        self.deps
            .sandbox
            .stop(&input.sandbox_id)
            .await
            .map_err(|e| format!("close_sandbox failed: {}", e))?;
        Ok(serde_json::json!({ "closed": true }))
    }

    async fn cli_query(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: CliQueryInput = parse(args)?;
        let cmd_args = vec![
            "--config".to_string(),
            "./.continue/config.yaml".to_string(),
            "-p".to_string(),
            "--auto".to_string(),
            input.query,
        ];
        let output = self
            .deps
            .sandbox
            .run_command(&input.sandbox_id, "cn", &cmd_args)
            .await
            .map_err(|e| format!("cli_query failed: {}", e))?;
        Ok(serde_json::to_value(output).unwrap_or_default())
    }

    // ─── Spec tools ─────────────────────────────────────────────────────

    async fn draft_spec(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: DraftSpecInput = parse(args)?;

        let thread = self
            .deps
            .threads
            .get(&input.thread_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Thread {} not found", input.thread_id))?;

        let transcript = serde_json::to_string_pretty(&thread.chat).unwrap_or_default();
        let prompt = format!(
            "You are a senior software engineer producing a concise internal design \
             specification in Markdown format.\n\
             The following is the full planning conversation between the user and \
             assistant delimited by triple backticks.\n```\n{}\n```\n\n\
             Write a clear, well-structured design spec that includes a title, overview, \
             requirements, proposed solution, next steps and acceptance criteria.\n\
             Respond ONLY with Markdown.",
            transcript
        );

        let content = self
            .deps
            .model
            .generate(&self.deps.config.planner_model, &prompt)
            .await
            .map_err(|e| format!("draft_spec failed: {}", e))?;

        let title = derive_spec_title(&content, &thread.title);
        let spec = Spec::new_draft(thread.id.clone(), title, content, input.repo);
        self.deps
            .specs
            .create(&spec)
            .await
            .map_err(|e| format!("draft_spec failed: {}", e))?;

        Ok(serde_json::json!({
            "specId": spec.id,
            "title": spec.title,
            "content": spec.content,
            "repo": spec.repo,
        }))
    }

    async fn update_spec(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: UpdateSpecInput = parse(args)?;

        if self
            .deps
            .specs
            .get(&input.spec_id)
            .await
            .map_err(|e| e.to_string())?
            .is_none()
        {
            return Err(format!("Spec {} not found", input.spec_id));
        }

        self.deps
            .specs
            .update_draft(&input.spec_id, input.title, input.content, input.repo)
            .await
            .map_err(|e| format!("update_spec failed: {}", e))?;

        let spec = self
            .deps
            .specs
            .get(&input.spec_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Spec {} not found", input.spec_id))?;

        Ok(serde_json::json!({
            "specId": spec.id,
            "title": spec.title,
            "content": spec.content,
            "repo": spec.repo,
        }))
    }

    async fn finalize_spec(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: FinalizeSpecInput = parse(args)?;

        let spec = self
            .deps
            .specs
            .latest_draft(&input.thread_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "No draft spec found to finalize".to_string())?;

        let job = Job::new(spec.id.clone());
        self.deps
            .jobs
            .create(&job)
            .await
            .map_err(|e| format!("finalize_spec failed: {}", e))?;

        let run = self
            .deps
            .engine
            .start(WORKER_WORKFLOW, serde_json::json!({ "jobId": job.id }))
            .await
            .map_err(|e| format!("finalize_spec failed: {}", e))?;

        self.deps
            .threads
            .update_state(&input.thread_id, ThreadState::Working)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(job = %job.id, run = %run.run_id, "spec finalized, worker started");
        Ok(serde_json::json!({ "jobId": job.id, "runId": run.run_id }))
    }

    // ─── Thread tools ───────────────────────────────────────────────────

    async fn update_title(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: UpdateTitleInput = parse(args)?;
        let trimmed = input.title.trim();
        if trimmed.is_empty() {
            return Err("Title cannot be empty".to_string());
        }
        if trimmed.len() < 3 || trimmed.len() > 120 {
            return Err("Title must be between 3 and 120 characters".to_string());
        }

        if self
            .deps
            .threads
            .get(&input.thread_id)
            .await
            .map_err(|e| e.to_string())?
            .is_none()
        {
            return Err("Thread not found".to_string());
        }

        self.deps
            .threads
            .update_title(&input.thread_id, trimmed)
            .await
            .map_err(|e| format!("update_title failed: {}", e))?;

        Ok(serde_json::json!({ "id": input.thread_id, "title": trimmed }))
    }

    // ─── Terminal tool ──────────────────────────────────────────────────

    async fn report_completion(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let input: ReportCompletionInput = parse(args)?;

        if let (Some(job_id), Some(pr_url)) = (&self.job_id, &input.pr_url) {
            self.deps
                .jobs
                .set_pr(job_id, pr_url, JobStatus::PrOpen)
                .await
                .map_err(|e| format!("report_completion failed: {}", e))?;
        }

        tracing::info!(summary = %input.summary, "completion reported");
        Ok(serde_json::json!({ "acknowledged": true }))
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid tool input: {}", e))
}

/// Title from the first markdown heading, falling back to the thread title.
fn derive_spec_title(content: &str, thread_title: &str) -> String {
    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with('#') {
        let title = first_line.trim_start_matches('#').trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }
    if !thread_title.is_empty() {
        return format!("Draft Spec for {}", thread_title);
    }
    "Draft Spec".to_string()
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
