//! Webhook API — /api/webhook/github
//!
//! PR review feedback re-enters the pipeline here: a comment on a PR becomes
//! an update Spec on the commented branch plus a queued Job, and the owning
//! thread (when resolvable) moves to waiting_for_feedback. Signature
//! verification is an upstream concern (reverse proxy / gateway).

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};

use skein_core::models::{Job, Spec, ThreadState};
use skein_core::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_event))
}

async fn github_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let action = payload
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    tracing::info!(event, action, "incoming GitHub webhook");

    let Some(feedback) = parse_feedback(event, action, &payload) else {
        return Ok(Json(serde_json::json!({ "processed": false })));
    };

    // Thread the feedback back to its conversation via the branch's latest
    // spec; an unknown branch yields a standalone version-1 update spec.
    let predecessor = state.specs.latest_on_branch(&feedback.branch).await?;
    let (thread_id, version) = match &predecessor {
        Some(spec) => (spec.thread_id.clone(), spec.version + 1),
        None => (None, 1),
    };

    let spec = Spec::new_update(
        thread_id.clone(),
        format!("Update for PR {}#{}", feedback.repo, feedback.number),
        feedback.context,
        feedback.repo,
        feedback.branch,
        version,
    );
    state.specs.create(&spec).await?;

    let job = Job::new(spec.id.clone());
    state.jobs.create(&job).await?;

    if let Some(thread_id) = &thread_id {
        state
            .threads
            .update_state(thread_id, ThreadState::WaitingForFeedback)
            .await?;
    }

    tracing::info!(spec = %spec.id, job = %job.id, "created update spec and job from webhook");
    Ok(Json(serde_json::json!({
        "processed": true,
        "specId": spec.id,
        "jobId": job.id,
    })))
}

struct Feedback {
    repo: String,
    number: i64,
    branch: String,
    context: String,
}

/// Build the spec content from the webhook payload. Review comments carry
/// file/line/diff context; PR issue comments resolve their branch from a
/// `[branch]` tag in the issue title.
fn parse_feedback(event: &str, action: &str, payload: &serde_json::Value) -> Option<Feedback> {
    if action != "created" {
        return None;
    }

    let repo = payload
        .get("repository")
        .and_then(|r| r.get("name"))
        .and_then(|v| v.as_str())?
        .to_string();
    let comment = payload.get("comment")?;
    let author = comment
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let comment_body = comment.get("body").and_then(|v| v.as_str()).unwrap_or("");

    match event {
        "pull_request_review_comment" => {
            let pr = payload.get("pull_request")?;
            let number = pr.get("number").and_then(|v| v.as_i64())?;
            let branch = pr
                .get("head")
                .and_then(|h| h.get("ref"))
                .and_then(|v| v.as_str())?
                .to_string();

            let mut context = format!("Comment by {}", author);
            let line = comment
                .get("line")
                .and_then(|v| v.as_i64())
                .or_else(|| comment.get("original_line").and_then(|v| v.as_i64()));
            if let (Some(path), Some(line)) =
                (comment.get("path").and_then(|v| v.as_str()), line)
            {
                context.push_str(&format!("\n\n**Location:** `{}:{}`", path, line));
                let start_line = comment.get("start_line").and_then(|v| v.as_i64());
                if let Some(start) = start_line.filter(|s| *s != line) {
                    context.push_str(&format!(" (lines {}-{})", start, line));
                }
            }
            if let Some(diff_hunk) = comment.get("diff_hunk").and_then(|v| v.as_str()) {
                context.push_str(&format!("\n\n**Code Context:**\n```diff\n{}\n```", diff_hunk));
            }
            context.push_str(&format!("\n\n**Comment:**\n{}", comment_body));

            Some(Feedback {
                repo,
                number,
                branch,
                context,
            })
        }
        "issue_comment" => {
            let issue = payload.get("issue")?;
            // Issues and PRs both trigger issue_comment; only PRs matter.
            issue.get("pull_request")?;
            let number = issue.get("number").and_then(|v| v.as_i64())?;
            let title = issue.get("title").and_then(|v| v.as_str()).unwrap_or("");

            let branch_re = regex::Regex::new(r"^\[(.*?)\]").expect("branch tag regex");
            let branch = branch_re
                .captures(title)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())?;

            Some(Feedback {
                repo,
                number,
                branch,
                context: format!("Comment by {} on PR #{}:\n\n{}", author, number, comment_body),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_comment_payload() -> serde_json::Value {
        json!({
            "action": "created",
            "repository": { "name": "widgets" },
            "pull_request": {
                "number": 7,
                "head": { "ref": "feat/autogen-cafe0123" }
            },
            "comment": {
                "user": { "login": "reviewer" },
                "body": "Please rename this function",
                "path": "src/widget.rs",
                "line": 42,
                "diff_hunk": "@@ -40,3 +40,4 @@\n fn frob() {}"
            }
        })
    }

    #[test]
    fn review_comment_builds_location_context() {
        let feedback =
            parse_feedback("pull_request_review_comment", "created", &review_comment_payload())
                .unwrap();
        assert_eq!(feedback.repo, "widgets");
        assert_eq!(feedback.branch, "feat/autogen-cafe0123");
        assert!(feedback.context.contains("`src/widget.rs:42`"));
        assert!(feedback.context.contains("```diff"));
        assert!(feedback.context.contains("Please rename this function"));
    }

    #[test]
    fn issue_comment_resolves_branch_from_title_tag() {
        let payload = json!({
            "action": "created",
            "repository": { "name": "widgets" },
            "issue": {
                "number": 9,
                "title": "[feat/autogen-beef4567] Widget overhaul",
                "pull_request": {}
            },
            "comment": {
                "user": { "login": "reviewer" },
                "body": "Still broken"
            }
        });
        let feedback = parse_feedback("issue_comment", "created", &payload).unwrap();
        assert_eq!(feedback.branch, "feat/autogen-beef4567");
        assert!(feedback.context.contains("PR #9"));
    }

    #[test]
    fn non_pr_issue_comment_is_ignored() {
        let payload = json!({
            "action": "created",
            "repository": { "name": "widgets" },
            "issue": { "number": 9, "title": "[b] t" },
            "comment": { "user": { "login": "x" }, "body": "hi" }
        });
        assert!(parse_feedback("issue_comment", "created", &payload).is_none());
    }

    #[test]
    fn non_created_actions_are_ignored() {
        assert!(parse_feedback(
            "pull_request_review_comment",
            "deleted",
            &review_comment_payload()
        )
        .is_none());
    }
}
