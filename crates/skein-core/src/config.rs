//! Runtime configuration, resolved once from the environment.

/// Default planner model (conversation, spec drafting).
pub const DEFAULT_PLANNER_MODEL: &str = "anthropic/claude-haiku-4.5";
/// Default codegen model (worker / implementation).
pub const DEFAULT_CODEGEN_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Hard ceiling on agent-loop turns. The halting predicate alone is the
/// model calling the terminal tool; this bound keeps a run that never calls
/// it from spinning forever.
pub const DEFAULT_MAX_AGENT_TURNS: u32 = 24;

/// Config file installed into every sandbox so the in-sandbox CLI agent can
/// answer planner queries. `{api_key}` is substituted at write time.
pub const CLI_PLANNER_CONFIG: &str = "\
name: Skein
version: 1.0.0
schema: v1
models:
  - name: Planner
    provider: openai
    model: openai/gpt-5.1-codex
    apiKey: {api_key}
    apiBase: https://ai-gateway.vercel.sh/v1
    roles:
      - chat
context:
  - uses: continuedev/terminal-context
  - uses: continuedev/file-context
";

/// Worker variant adds edit/apply roles and a commit-message prompt.
pub const CLI_WORKER_CONFIG: &str = "\
name: Skein
version: 1.0.0
schema: v1
models:
  - name: Worker
    provider: openai
    model: openai/gpt-5.1-codex
    apiKey: {api_key}
    apiBase: https://ai-gateway.vercel.sh/v1
    roles:
      - chat
      - edit
      - apply
context:
  - uses: continuedev/terminal-context
  - uses: continuedev/file-context
prompts:
  - uses: continuedev/commit-message-prompt
";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub planner_model: String,
    pub codegen_model: String,
    /// Base URL for the Anthropic-compatible model gateway.
    pub gateway_base_url: String,
    pub gateway_api_key: String,
    /// Base URL for the sandbox provisioning API.
    pub sandbox_base_url: String,
    /// GitHub org/user that owns the target repositories.
    pub repo_owner: String,
    pub github_token: String,
    /// Repositories the planner is allowed to operate on.
    pub repos: Vec<String>,
    pub max_agent_turns: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            planner_model: std::env::var("PLANNER_MODEL")
                .unwrap_or_else(|_| DEFAULT_PLANNER_MODEL.to_string()),
            codegen_model: std::env::var("CODEGEN_MODEL")
                .unwrap_or_else(|_| DEFAULT_CODEGEN_MODEL.to_string()),
            gateway_base_url: std::env::var("AI_GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            gateway_api_key: std::env::var("AI_GATEWAY_API_KEY").unwrap_or_default(),
            sandbox_base_url: std::env::var("SANDBOX_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:7431".to_string()),
            repo_owner: std::env::var("GITHUB_OWNER").unwrap_or_else(|_| "skein-dev".to_string()),
            github_token: std::env::var("GITHUB_TOKEN").unwrap_or_default(),
            repos: std::env::var("SKEIN_REPOS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_agent_turns: std::env::var("MAX_AGENT_TURNS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_AGENT_TURNS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
