use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::ChatMessage;

/// Lifecycle state of a conversation thread.
///
/// `planning ⇄ working → waiting_for_feedback`, driven by chat activity,
/// spec finalize, and PR review webhooks. `archived` is reached only by
/// explicit user action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Planning,
    Working,
    WaitingForFeedback,
    Archived,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Working => "working",
            Self::WaitingForFeedback => "waiting_for_feedback",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "working" => Self::Working,
            "waiting_for_feedback" => Self::WaitingForFeedback,
            "archived" => Self::Archived,
            _ => Self::Planning,
        }
    }
}

/// A persisted conversation and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub state: ThreadState,
    #[serde(default)]
    pub chat: Vec<ChatMessage>,
    /// Current resumable output stream, when a planner run is (or was) live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: String, title: String, chat: Vec<ChatMessage>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            state: ThreadState::Planning,
            chat,
            stream_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
