//! Chat-completions-backed implementation of the shared `llm_provider`
//! contract.
//!
//! This adapter projects the history lineage into a chat messages array,
//! streams content deltas as chunks, and classifies the terminal reply.
//! Classification precedence is a behavioral contract: the structured
//! function-call payload is parsed as JSON first; a payload that is not
//! valid JSON is retried as a raw Lua snippet; only when both
//! interpretations fail does the call conclude as an error reply.

use std::sync::Arc;
use std::time::Duration;

use chat_api::{
    ChatApiClient, ChatApiConfig, ChatApiError, ChatFunctionCall, ChatMessage, ChatRequest,
    ChatStreamEvent, StreamResult,
};
use history_tree::{HistoryNode, NodeData};
use llm_provider::{
    CancelSignal, CodeReply, ErrorReply, Llm, LlmReply, MessageReply, ProviderError, StreamChunk,
};
use serde_json::{json, Value};

/// Stable provider identifier used by startup selection.
pub const CHAT_PROVIDER_ID: &str = "chat";

const SYSTEM_INSTRUCTIONS: &str =
    "You are a Lua programmer executing code in a REPL with full internet and file system access. \
     Call the lua function to run code; answer in plain text only when nothing needs to run.";

/// Runtime configuration for the chat backend.
#[derive(Debug, Clone)]
pub struct ChatLlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl ChatLlmConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_chat_api_config(self) -> ChatApiConfig {
        let mut config = ChatApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

trait StreamClient: Send + Sync {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<StreamResult, ChatApiError>;
}

struct DefaultStreamClient {
    client: ChatApiClient,
}

impl StreamClient for DefaultStreamClient {
    fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent),
    ) -> Result<StreamResult, ChatApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ChatApiError::Unknown(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(async {
            let mut events = Vec::new();
            let finish_reason = self
                .client
                .stream_with_handler(request, Some(cancel), |event| {
                    on_event(event.clone());
                    events.push(event);
                })
                .await?;

            Ok(StreamResult {
                events,
                finish_reason,
            })
        })
    }
}

/// `Llm` adapter backed by the chat-completions transport.
pub struct ChatLlm {
    model: String,
    stream_client: Arc<dyn StreamClient>,
    endpoint: String,
}

impl ChatLlm {
    /// Creates a backend using real chat-completions transport.
    pub fn new(config: ChatLlmConfig) -> Result<Self, ProviderError> {
        let model = config.model.clone();
        let client = ChatApiClient::new(config.into_chat_api_config())
            .map_err(|error| ProviderError::backend(format!(
                "failed to initialize chat backend: {error}"
            )))?;
        let endpoint = client.normalized_endpoint();

        Ok(Self {
            model,
            stream_client: Arc::new(DefaultStreamClient { client }),
            endpoint,
        })
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(model: &str, stream_client: Arc<dyn StreamClient>) -> Self {
        Self {
            model: model.to_string(),
            stream_client,
            endpoint: "https://test.invalid/v1/chat/completions".to_string(),
        }
    }

    fn chat_request(&self, lineage: &[&HistoryNode], prompt: &str) -> ChatRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_INSTRUCTIONS)];

        for node in lineage {
            self.push_turns(&mut messages, node);
        }

        // The prompt continues a trailing human turn instead of opening a
        // competing one.
        match messages.last_mut() {
            Some(last) if last.role == "user" => last.append_content(prompt),
            _ => messages.push(ChatMessage::user(prompt)),
        }

        ChatRequest::new(self.model.clone(), messages)
    }

    fn push_turns(&self, messages: &mut Vec<ChatMessage>, node: &HistoryNode) {
        match &node.data {
            NodeData::Root => {}
            NodeData::UserCode { code, result } => {
                let block = format!(">>> {code}\n{result}");
                match messages.last_mut() {
                    Some(last) if last.role == "user" => last.append_content(&block),
                    _ => messages.push(ChatMessage::user(block)),
                }
            }
            NodeData::ModelCode {
                prompt,
                code,
                result,
                ..
            } => {
                messages.push(ChatMessage::user(prompt.clone()));
                messages.push(ChatMessage::assistant_function_call(
                    "lua",
                    json!({ "code": code }).to_string(),
                ));
                messages.push(ChatMessage::function_result("lua", result.clone()));
            }
            NodeData::ModelMessage {
                prompt, message, ..
            } => {
                messages.push(ChatMessage::user(prompt.clone()));
                messages.push(ChatMessage::assistant(message.clone()));
            }
            NodeData::ModelError { prompt, error, .. } => {
                messages.push(ChatMessage::user(prompt.clone()));
                if let Ok(assistant) =
                    serde_json::from_value::<ChatMessage>(self.render_as_turn(node))
                {
                    messages.push(assistant);
                }
                messages.push(ChatMessage::user(error.clone()));
            }
        }
    }
}

impl Llm for ChatLlm {
    fn supports_agent_loop(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("{CHAT_PROVIDER_ID} model {} at {}", self.model, self.endpoint)
    }

    fn build_request(&self, lineage: &[&HistoryNode], prompt: &str) -> Value {
        serde_json::to_value(self.chat_request(lineage, prompt)).unwrap_or(Value::Null)
    }

    fn render_as_turn(&self, node: &HistoryNode) -> Value {
        match &node.data {
            NodeData::Root => Value::Null,
            NodeData::UserCode { code, result } => {
                json!({ "role": "user", "content": format!(">>> {code}\n{result}") })
            }
            NodeData::ModelCode { code, .. } => json!({
                "role": "assistant",
                "content": null,
                "function_call": { "name": "lua", "arguments": json!({ "code": code }).to_string() },
            }),
            NodeData::ModelMessage { message, .. } => {
                json!({ "role": "assistant", "content": message })
            }
            // Error turns replay the assistant message the backend actually
            // produced, recovered from the opaque payload this backend wrote.
            NodeData::ModelError { error, raw, .. } => raw
                .get("message")
                .cloned()
                .unwrap_or_else(|| json!({ "role": "assistant", "content": error })),
        }
    }

    fn call(
        &self,
        lineage: &[&HistoryNode],
        prompt: &str,
        cancel: &CancelSignal,
        on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<LlmReply, ProviderError> {
        let request = self.chat_request(lineage, prompt);

        let mut on_event = |event: ChatStreamEvent| {
            if let ChatStreamEvent::ContentDelta { delta } = event {
                if !delta.is_empty() {
                    on_chunk(StreamChunk { text: delta });
                }
            }
        };

        let result = self
            .stream_client
            .stream(&request, cancel, &mut on_event)
            .map_err(map_transport_error)?;

        Ok(classify(prompt, &result))
    }
}

fn map_transport_error(error: ChatApiError) -> ProviderError {
    match error {
        ChatApiError::Cancelled => ProviderError::Cancelled,
        other => ProviderError::backend(format!("chat request failed: {other}")),
    }
}

/// Assembles the streamed deltas and applies the classification contract.
fn classify(prompt: &str, result: &StreamResult) -> LlmReply {
    let mut content = String::new();
    let mut function_name: Option<String> = None;
    let mut arguments = String::new();

    for event in &result.events {
        match event {
            ChatStreamEvent::ContentDelta { delta } => content.push_str(delta),
            ChatStreamEvent::FunctionCallDelta {
                name,
                arguments: delta,
            } => {
                if let Some(name) = name {
                    function_name = Some(name.clone());
                }
                arguments.push_str(delta);
            }
            ChatStreamEvent::Finished { .. } => {}
        }
    }

    let message = if content.trim().is_empty() {
        None
    } else {
        Some(content.clone())
    };
    let raw = raw_payload(&content, function_name.as_deref(), &arguments, result);

    if function_name.is_some() {
        return classify_directive(prompt, message, &arguments, raw);
    }

    match message {
        Some(message) => LlmReply::Message(MessageReply {
            prompt: prompt.to_string(),
            message,
            raw,
        }),
        None => LlmReply::Error(ErrorReply {
            prompt: prompt.to_string(),
            error: "model returned an empty reply".to_string(),
            raw,
        }),
    }
}

/// Structured parse first, raw-source validity second, error last.
fn classify_directive(
    prompt: &str,
    message: Option<String>,
    arguments: &str,
    raw: Value,
) -> LlmReply {
    let structured_error = match serde_json::from_str::<Value>(arguments) {
        Ok(payload) => match payload.get("code").and_then(Value::as_str) {
            Some(code) => {
                return LlmReply::Code(CodeReply {
                    prompt: prompt.to_string(),
                    message,
                    code: code.to_string(),
                    raw,
                });
            }
            None => "directive payload has no string 'code' field".to_string(),
        },
        Err(error) => error.to_string(),
    };

    // Models sometimes put bare source where the JSON object belongs.
    if lua_engine::is_valid_source(arguments) {
        tracing::debug!("directive payload fell back to raw source classification");
        return LlmReply::Code(CodeReply {
            prompt: prompt.to_string(),
            message,
            code: arguments.to_string(),
            raw,
        });
    }

    LlmReply::Error(ErrorReply {
        prompt: prompt.to_string(),
        error: structured_error,
        raw,
    })
}

/// Reconstructed backend-native reply stored opaquely on history nodes.
fn raw_payload(
    content: &str,
    function_name: Option<&str>,
    arguments: &str,
    result: &StreamResult,
) -> Value {
    let mut message = json!({
        "role": "assistant",
        "content": if content.is_empty() { Value::Null } else { Value::String(content.to_string()) },
    });

    if let Some(name) = function_name {
        message["function_call"] = serde_json::to_value(ChatFunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
        .unwrap_or(Value::Null);
    }

    json!({
        "message": message,
        "finish_reason": result.finish_reason,
    })
}
