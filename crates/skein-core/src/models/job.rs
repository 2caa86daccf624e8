use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status lifecycle of a worker execution request.
///
/// `queued → apply → {pr_open | complete} | failed`; the intermediate
/// `planning`/`codegen`/`test` stages are reported by the worker agent as it
/// progresses through larger specs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Planning,
    Codegen,
    Apply,
    Test,
    PrOpen,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Planning => "planning",
            Self::Codegen => "codegen",
            Self::Apply => "apply",
            Self::Test => "test",
            Self::PrOpen => "pr_open",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "planning" => Self::Planning,
            "codegen" => Self::Codegen,
            "apply" => Self::Apply,
            "test" => Self::Test,
            "pr_open" => Self::PrOpen,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            _ => Self::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One request to execute a Spec's implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub spec_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(spec_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            spec_id,
            status: JobStatus::Queued,
            branch: None,
            pr_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
