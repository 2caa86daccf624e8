//! The planning workflow: conversational back-and-forth, spec drafting, and
//! finalization, run as one durable agent loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::DurableAgent;
use crate::error::ServerError;
use crate::models::message::ChatMessage;
use crate::state::WorkflowDeps;
use crate::tools::{ToolExecutor, ToolName};
use crate::workflow::{WorkflowCtx, WorkflowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanArgs {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
}

pub fn planner_system(repos: &[String]) -> String {
    let repos_note = if repos.is_empty() {
        "No repositories found. Do not reference any repository names unless they \
         appear here when available."
            .to_string()
    } else {
        format!("Accessible repositories: {}", repos.join(", "))
    };

    format!(
        "You are Skein, an AI engineering assistant that guides a user through THREE distinct stages.\n\
         \n\
         1. **Planning Discussion** - Conversational back-and-forth to understand the user's goal.\n\
         2. **Drafting Spec** - Produce a structured design/implementation spec that the user can review.\n\
         3. **Finalization & Implementation** - After explicit user approval, queue an implementation job.\n\
         \n\
         ENVIRONMENT CONTEXT\n\
         - {repos_note}\n\
         - You must only operate on repositories from this list. Never invent or assume a repository that does not exist.\n\
         \n\
         Determine the CURRENT INTENT from the latest user message:\n\
         - If they are still clarifying requirements or asking questions, stay in Planning Discussion. Use the `cli_query` tool to query the codebase directly.\n\
         - If they indicate they are ready to see a spec (e.g. \"sounds good, can you draft a spec?\"), CALL the `draft_spec` tool exactly once.\n\
         - If they explicitly approve the draft spec (e.g. \"looks good, ship it\"), CALL the `finalize_spec` tool exactly once.\n\
         \n\
         The draft spec will be passed onto an expert coding AI agent. Embed as much context as possible in the spec: file names, line numbers, code context, and ideal implementation steps.\n\
         \n\
         Tool usage rules:\n\
         - Remember to initialize a sandbox in order to explore repos, and close the sandbox after use.\n\
         - Never call `draft_spec` or `finalize_spec` without meeting the intent criteria above.\n\
         - After calling a tool, wait for the tool response before progressing to the next stage.\n\
         - When the overall task is complete, CALL the `report_completion` tool exactly once with a one-sentence summary.\n\
         \n\
         General guidelines:\n\
         - Keep all normal conversation messages concise and focused.\n\
         - Use the `update_title` tool to keep the title up-to-date with the overall thread.\n\
         - Never leak internal reasoning or tool call JSON to the user.",
        repos_note = repos_note
    )
}

pub async fn plan(
    ctx: Arc<WorkflowCtx>,
    deps: WorkflowDeps,
    args: Value,
) -> Result<Value, WorkflowError> {
    let args: PlanArgs = serde_json::from_value(args)?;
    tracing::info!(thread = %args.thread_id, model = %deps.config.planner_model, "planner run starting");

    let executor = ToolExecutor::planner(deps.clone());
    let agent = DurableAgent {
        model: deps.config.planner_model.clone(),
        system: planner_system(&deps.config.repos),
    };

    let input_len = args.messages.len();
    let outcome = agent
        .run(
            &ctx,
            &executor,
            args.messages,
            ToolName::ReportCompletion,
            deps.config.max_agent_turns,
        )
        .await?;

    let threads = deps.threads.clone();
    // Only what the loop itself produced goes onto the thread; the planner's
    // input (the injected routing note included) is not assistant output.
    let new_messages = outcome.messages[input_len..].to_vec();
    ctx.step("save-transcript", args.thread_id.clone(), move |thread_id| async move {
        let mut thread = threads
            .get(&thread_id)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("Thread {} not found", thread_id)))?;
        let appended = new_messages.len();
        thread.chat.extend(new_messages);
        threads.save_chat(&thread_id, &thread.chat).await?;
        Ok(serde_json::json!({ "appended": appended }))
    })
    .await?;

    Ok(serde_json::json!({
        "threadId": args.thread_id,
        "turns": outcome.turns,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ScriptedClient;
    use crate::models::thread::Thread;
    use crate::state::AppStateInner;
    use crate::workflow::store::RunStatus;
    use crate::workflows::PLANNER_WORKFLOW;
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn wait_terminal(state: &AppStateInner, run_id: &str) -> RunStatus {
        for _ in 0..200 {
            let run = state.engine.get_run(run_id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                return run.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never reached a terminal status", run_id);
    }

    #[tokio::test]
    async fn plan_run_appends_agent_output_and_streams_chunks() {
        let state = AppStateInner::for_testing();
        let thread = Thread::new(
            "t-1".to_string(),
            "New Thread".to_string(),
            vec![ChatMessage::user("earlier question")],
        );
        state.threads.save(&thread).await.unwrap();

        let scripted = state.scripted_model();
        scripted.push_turn(crate::inference::ModelTurn {
            text: "Sounds good, let me wrap up.".to_string(),
            tool_calls: vec![],
        });
        scripted.push_turn(ScriptedClient::tool_turn(
            "report_completion",
            json!({ "summary": "planned" }),
        ));

        let handle = state
            .engine
            .start(
                PLANNER_WORKFLOW,
                serde_json::to_value(PlanArgs {
                    thread_id: "t-1".to_string(),
                    messages: vec![
                        ChatMessage::system("Thread Context: threadId=t-1"),
                        ChatMessage::user("earlier question"),
                        ChatMessage::user("hello"),
                    ],
                })
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(wait_terminal(&state, &handle.run_id).await, RunStatus::Completed);

        // The loop's output was appended after the persisted history; the
        // injected routing note is planner input and never lands in chat.
        let loaded = state.threads.get("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.chat[0].content, "earlier question");
        assert!(loaded
            .chat
            .iter()
            .any(|m| m.content.contains("Sounds good")));
        assert!(loaded.chat.iter().any(|m| m.content.contains("acknowledged")));
        assert!(!loaded
            .chat
            .iter()
            .any(|m| m.content.contains("Thread Context")));

        // The stream carries the text delta and the tool activity.
        let chunks: Vec<_> = state
            .engine
            .subscribe(&handle.stream_id, 0)
            .await
            .collect::<Vec<_>>()
            .await;
        let bodies: Vec<String> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert!(bodies.iter().any(|b| b.contains("textDelta")));
        assert!(bodies.iter().any(|b| b.contains("toolResult")));
    }

    #[tokio::test]
    async fn failed_planner_run_is_recorded() {
        let state = AppStateInner::for_testing();
        let thread = Thread::new("t-2".to_string(), "T".to_string(), vec![]);
        state.threads.save(&thread).await.unwrap();
        // Scripted model exhausted immediately: the first turn fails.

        let handle = state
            .engine
            .start(
                PLANNER_WORKFLOW,
                serde_json::to_value(PlanArgs {
                    thread_id: "t-2".to_string(),
                    messages: vec![ChatMessage::user("hello")],
                })
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(wait_terminal(&state, &handle.run_id).await, RunStatus::Failed);
        let run = state.engine.get_run(&handle.run_id).await.unwrap().unwrap();
        assert!(run.error.unwrap().contains("exhausted"));
    }
}
