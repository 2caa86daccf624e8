//! Durable agent — the model + tool-call loop expressed over workflow steps.
//!
//! Each model turn and each tool invocation is its own checkpointed step, so
//! a resumed run replays completed turns and tool calls without re-invoking
//! the model or repeating side effects. All stream emission happens inside
//! step bodies for the same reason: replay must not duplicate chunks.

use std::sync::Arc;

use crate::inference::{ModelTurn, TurnRequest};
use crate::models::message::{ChatMessage, OutputChunk};
use crate::tools::{ToolExecutor, ToolName};
use crate::workflow::{WorkflowCtx, WorkflowError};

/// One logical agent: a model, its instructions, and (via the executor) the
/// tools it may call. The agent only emits tool calls; domain transitions
/// happen inside the tool handlers and the surrounding workflow.
pub struct DurableAgent {
    pub model: String,
    pub system: String,
}

/// Result of a finished agent loop.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Turn on which the terminal tool was called.
    pub turns: u32,
    /// Full transcript including assistant text and tool results.
    pub messages: Vec<ChatMessage>,
}

impl DurableAgent {
    /// Run the loop until a turn contains a call to `terminal`, or fail with
    /// `TurnLimit` after `max_turns` turns.
    pub async fn run(
        &self,
        ctx: &Arc<WorkflowCtx>,
        executor: &ToolExecutor,
        mut messages: Vec<ChatMessage>,
        terminal: ToolName,
        max_turns: u32,
    ) -> Result<AgentOutcome, WorkflowError> {
        for turn_no in 1..=max_turns {
            let turn = self.model_turn(ctx, executor, turn_no, &messages).await?;

            // Record the whole assistant turn, tool calls included, so the
            // history the next turn sees shows the calls were already issued.
            let mut assistant = turn.text.clone();
            for call in &turn.tool_calls {
                if !assistant.is_empty() {
                    assistant.push('\n');
                }
                assistant.push_str(&format!("[tool_call] {} {}", call.name, call.arguments));
            }
            if !assistant.is_empty() {
                messages.push(ChatMessage::assistant(assistant));
            }

            let mut halted = false;
            for (i, call) in turn.tool_calls.iter().enumerate() {
                if ToolName::from_str(&call.name) == Some(terminal) {
                    halted = true;
                }

                let step_name = format!("turn-{}/tool-{}-{}", turn_no, i, call.name);
                let exec = executor.clone();
                let emitter = ctx.clone();
                let call = call.clone();
                let input_args = call.arguments.clone();
                let output: serde_json::Value = ctx
                    .step(&step_name, input_args, move |_| async move {
                        let output = exec.execute(&call.name, call.arguments.clone()).await;
                        emitter
                            .emit(&OutputChunk::ToolResult {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                output: output.clone(),
                            })
                            .await?;
                        Ok(output)
                    })
                    .await?;

                messages.push(ChatMessage::tool(format!(
                    "[{}] {}",
                    turn.tool_calls[i].name, output
                )));
            }

            if halted {
                tracing::info!(run_id = %ctx.run_id(), turns = turn_no, "agent halted on terminal tool");
                return Ok(AgentOutcome {
                    turns: turn_no,
                    messages,
                });
            }
        }

        Err(WorkflowError::TurnLimit(max_turns))
    }

    /// One model turn as a checkpointed step. Text and tool-call chunks are
    /// emitted by the model client while the step executes; a replayed step
    /// emits nothing.
    async fn model_turn(
        &self,
        ctx: &Arc<WorkflowCtx>,
        executor: &ToolExecutor,
        turn_no: u32,
        messages: &[ChatMessage],
    ) -> Result<ModelTurn, WorkflowError> {
        let request = TurnRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            messages: messages.to_vec(),
            tools: executor.registry().descriptors(),
        };
        let model = executor.deps().model.clone();
        let writer = ctx.writer().clone();

        ctx.step(&format!("turn-{}", turn_no), (), move |_| async move {
            let turn = model.turn(request, &writer).await?;
            Ok(turn)
        })
        .await
    }
}
