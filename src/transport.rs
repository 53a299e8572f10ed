use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::deadline::CallBudget;
use crate::error::{Result, TutorError};
use crate::models::{ChatRequest, ChatResponse, CompletionCallResult, ToolCall};

/// One chat-completions call. Streaming is selected by `req.stream`; both
/// modes resolve to the same accumulated result.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, req: &ChatRequest, budget: &CallBudget) -> Result<CompletionCallResult>;
}

pub struct OpenRouterTransport {
    client: Client,
    api_key: String,
    base_url: String,
    referer: String,
    title: String,
}

impl OpenRouterTransport {
    pub fn new(
        client: Client,
        api_key: String,
        base_url: String,
        referer: String,
        title: String,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            referer,
            title,
        }
    }

    async fn send(&self, req: &ChatRequest) -> Result<CompletionCallResult> {
        if self.api_key.is_empty() {
            return Err(TutorError::Config("OPENROUTER_API_KEY is not set".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let accept = if req.stream {
            "text/event-stream"
        } else {
            "application/json"
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .header("Accept", accept)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TutorError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        if !req.stream {
            let parsed: ChatResponse = response.json().await.map_err(|e| {
                TutorError::Internal(format!("Failed to parse completion response: {e}"))
            })?;
            return Ok(parsed.into());
        }

        let mut acc = SseAccumulator::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            if acc.push(&bytes) {
                break;
            }
        }
        Ok(acc.finish())
    }
}

#[async_trait]
impl Transport for OpenRouterTransport {
    async fn chat(&self, req: &ChatRequest, budget: &CallBudget) -> Result<CompletionCallResult> {
        tracing::debug!(
            model = %req.model,
            stream = req.stream,
            tools = req.tools.as_ref().map_or(0, Vec::len),
            "Sending chat completion"
        );
        budget.run("completion call", self.send(req)).await
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates a server-sent-events completion stream.
///
/// Lines may be split across transport chunks, so bytes are buffered until a
/// newline arrives. Fragments that are not valid JSON are skipped.
#[derive(Debug, Default)]
pub struct SseAccumulator {
    buffer: Vec<u8>,
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    done: bool,
}

impl SseAccumulator {
    /// Feed raw bytes; returns true once the `[DONE]` sentinel was seen
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.done {
            return true;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\r', '\n']));
            if self.done {
                return true;
            }
        }
        false
    }

    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("Skipping malformed stream fragment: {}", e);
                return;
            }
        };

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                self.text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }
    }

    pub fn finish(mut self) -> CompletionCallResult {
        // A final line without trailing newline is still a fragment
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.handle_line(line.trim_end());
        }

        CompletionCallResult {
            text: self.text,
            tool_calls: self
                .tool_calls
                .into_values()
                .filter(|c| !c.name.is_empty())
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.name,
                    arguments: c.arguments,
                })
                .collect(),
        }
    }
}
