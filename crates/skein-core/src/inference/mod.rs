//! Model-gateway collaborator — generates text and agent turns via an
//! Anthropic-compatible Messages API.
//!
//! The gateway is called non-streaming and the resulting content blocks are
//! forwarded onto the run's output stream as chunks; the resumable-stream
//! contract is about replayability, not chunk granularity. A scripted
//! variant backs tests and keyless local operation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::models::message::{ChatMessage, MessageRole, OutputChunk};
use crate::workflow::stream::StreamWriter;

/// Tool surface advertised to the model for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The model's output for a single agent turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Request for one agent turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
}

/// Closed set of model clients; dispatch is by variant, not duck typing.
#[derive(Clone)]
pub enum ModelClient {
    Gateway(GatewayClient),
    Scripted(ScriptedClient),
}

impl ModelClient {
    pub fn gateway(base_url: &str, api_key: &str) -> Self {
        Self::Gateway(GatewayClient::new(base_url, api_key))
    }

    /// Run one agent turn, forwarding model output onto `sink`.
    pub async fn turn(
        &self,
        req: TurnRequest,
        sink: &StreamWriter,
    ) -> Result<ModelTurn, ServerError> {
        match self {
            Self::Gateway(c) => c.turn(req, sink).await,
            Self::Scripted(c) => c.turn(sink).await,
        }
    }

    /// Plain text generation (spec drafting).
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServerError> {
        match self {
            Self::Gateway(c) => c.generate(model, prompt).await,
            Self::Scripted(c) => c.generate().await,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP gateway
// ---------------------------------------------------------------------------

/// Calls an Anthropic-compatible Messages API over HTTP.
///
/// POST {base_url}/v1/messages
/// Headers:
///   x-api-key: {api_key}
///   anthropic-version: 2023-06-01
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300)) // 5 min timeout
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn turn(&self, req: TurnRequest, sink: &StreamWriter) -> Result<ModelTurn, ServerError> {
        let body = self.build_body(&req);
        let json = self.post(&body).await?;

        let mut turn = ModelTurn::default();
        if let Some(blocks) = json.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        if !text.is_empty() {
                            sink.append(&OutputChunk::TextDelta {
                                delta: text.to_string(),
                            })
                            .await?;
                            turn.text.push_str(text);
                        }
                    }
                    Some("tool_use") => {
                        let call = ToolCall {
                            id: block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: block
                                .get("input")
                                .cloned()
                                .unwrap_or(serde_json::Value::Null),
                        };
                        sink.append(&OutputChunk::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        })
                        .await?;
                        turn.tool_calls.push(call);
                    }
                    _ => {}
                }
            }
        }
        Ok(turn)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServerError> {
        let body = serde_json::json!({
            "model": model,
            "max_tokens": 8192,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = self.post(&body).await?;

        let text = json
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    fn build_body(&self, req: &TurnRequest) -> serde_json::Value {
        let mut system = req.system.clone();
        // The Messages API requires strict user/assistant alternation, so
        // consecutive same-role entries (several tool results, say) fold
        // into one message.
        let mut folded: Vec<(&'static str, String)> = Vec::new();
        for msg in &req.messages {
            let role = match msg.role {
                MessageRole::System => {
                    system.push_str("\n\n");
                    system.push_str(&msg.content);
                    continue;
                }
                MessageRole::Assistant => "assistant",
                // Tool results go back to the model as user content.
                MessageRole::User | MessageRole::Tool => "user",
            };
            match folded.last_mut() {
                Some((last, content)) if *last == role => {
                    content.push_str("\n\n");
                    content.push_str(&msg.content);
                }
                _ => folded.push((role, msg.content.clone())),
            }
        }
        let messages: Vec<serde_json::Value> = folded
            .into_iter()
            .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
            .collect();

        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "max_tokens": 8192,
            "system": system,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, ServerError> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ServerError::External(format!("Model gateway request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ServerError::External(format!(
                "Model gateway returned {}: {}",
                status, text
            )));
        }

        resp.json()
            .await
            .map_err(|e| ServerError::External(format!("Model gateway response parse: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Scripted client (tests, keyless operation)
// ---------------------------------------------------------------------------

/// Deterministic stand-in for the gateway: turns and generations are popped
/// from queues in order. Shared across clones.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    turns: Arc<Mutex<VecDeque<ModelTurn>>>,
    generations: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&self, turn: ModelTurn) {
        self.turns.lock().expect("scripted turns").push_back(turn);
    }

    pub fn push_generation(&self, text: impl Into<String>) {
        self.generations
            .lock()
            .expect("scripted generations")
            .push_back(text.into());
    }

    /// A turn that calls a single tool.
    pub fn tool_turn(name: &str, arguments: serde_json::Value) -> ModelTurn {
        ModelTurn {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                arguments,
            }],
        }
    }

    async fn turn(&self, sink: &StreamWriter) -> Result<ModelTurn, ServerError> {
        let turn = self
            .turns
            .lock()
            .expect("scripted turns")
            .pop_front()
            .ok_or_else(|| ServerError::External("Scripted model exhausted".to_string()))?;

        if !turn.text.is_empty() {
            sink.append(&OutputChunk::TextDelta {
                delta: turn.text.clone(),
            })
            .await?;
        }
        for call in &turn.tool_calls {
            sink.append(&OutputChunk::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;
        }
        Ok(turn)
    }

    async fn generate(&self) -> Result<String, ServerError> {
        self.generations
            .lock()
            .expect("scripted generations")
            .pop_front()
            .ok_or_else(|| ServerError::External("Scripted model exhausted".to_string()))
    }
}
