use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    Initial,
    Update,
}

impl SpecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Update => "update",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "update" => Self::Update,
            _ => Self::Initial,
        }
    }
}

/// A versioned implementation specification document.
///
/// `thread_id` is absent for update specs created from webhook feedback on a
/// branch whose originating thread can no longer be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub title: String,
    pub content: String,
    pub repo: String,
    pub spec_type: SpecType,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Spec {
    /// A version-1 draft created by the planner's `draft_spec` tool.
    pub fn new_draft(thread_id: String, title: String, content: String, repo: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: Some(thread_id),
            title,
            content,
            repo,
            spec_type: SpecType::Initial,
            version: 1,
            branch: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An update spec created from PR review feedback. The branch is carried
    /// over so the worker reuses it instead of deriving a fresh one.
    pub fn new_update(
        thread_id: Option<String>,
        title: String,
        content: String,
        repo: String,
        branch: String,
        version: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id,
            title,
            content,
            repo,
            spec_type: SpecType::Update,
            version,
            branch: Some(branch),
            created_at: now,
            updated_at: now,
        }
    }
}
