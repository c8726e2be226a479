//! llama.cpp-server-backed implementation of the shared `llm_provider`
//! contract.
//!
//! Local completion models have no message channel and no structured
//! directives: the lineage is rendered as one flat Lua-commented prompt, the
//! server's `/completion` endpoint continues it, and the continuation is
//! always classified as proposed code. Agent mode is unsupported — raw
//! completions are not reliable enough for unattended re-invocation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use history_tree::{HistoryNode, NodeData};
use llm_provider::{
    CancelSignal, CodeReply, ErrorReply, Llm, LlmReply, ProviderError, StreamChunk,
};
use serde_json::{json, Value};

/// Stable provider identifier used by startup selection.
pub const LLAMA_PROVIDER_ID: &str = "llama";

const COMPLETION_PATH: &str = "/completion";
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const DEFAULT_PREDICT_TOKENS: u32 = 128;

/// Runtime configuration for the llama backend.
#[derive(Debug, Clone)]
pub struct LlamaLlmConfig {
    /// Server root, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub predict_tokens: u32,
    pub timeout: Option<Duration>,
}

impl LlamaLlmConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            predict_tokens: DEFAULT_PREDICT_TOKENS,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_predict_tokens(mut self, predict_tokens: u32) -> Self {
        self.predict_tokens = predict_tokens;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

trait CompletionClient: Send + Sync {
    fn complete(&self, request: &Value, cancel: &CancelSignal) -> Result<Value, ProviderError>;
}

struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, request: &Value, cancel: &CancelSignal) -> Result<Value, ProviderError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                ProviderError::backend(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(async {
            let send = async {
                let response = self
                    .http
                    .post(&self.endpoint)
                    .json(request)
                    .send()
                    .await
                    .map_err(|error| {
                        ProviderError::backend(format!("llama request failed: {error}"))
                    })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::backend(format!(
                        "llama server returned HTTP {status}: {body}"
                    )));
                }

                response.json::<Value>().await.map_err(|error| {
                    ProviderError::backend(format!("llama response was not JSON: {error}"))
                })
            };

            let mut send = Box::pin(send);
            loop {
                if cancel.load(Ordering::Acquire) {
                    return Err(ProviderError::Cancelled);
                }

                if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut send).await {
                    if cancel.load(Ordering::Acquire) {
                        return Err(ProviderError::Cancelled);
                    }
                    return output;
                }
            }
        })
    }
}

/// `Llm` adapter speaking the llama.cpp server completion protocol.
pub struct LlamaLlm {
    endpoint: String,
    predict_tokens: u32,
    client: Arc<dyn CompletionClient>,
}

impl LlamaLlm {
    /// Creates a backend against a running llama.cpp server.
    pub fn new(config: LlamaLlmConfig) -> Result<Self, ProviderError> {
        let endpoint = completion_endpoint(&config.base_url);

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|error| {
            ProviderError::backend(format!("failed to initialize llama backend: {error}"))
        })?;

        Ok(Self {
            endpoint: endpoint.clone(),
            predict_tokens: config.predict_tokens,
            client: Arc::new(HttpCompletionClient { http, endpoint }),
        })
    }

    #[cfg(test)]
    fn with_client_for_tests(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            endpoint: "http://test.invalid/completion".to_string(),
            predict_tokens: DEFAULT_PREDICT_TOKENS,
            client,
        }
    }

    fn full_prompt(lineage: &[&HistoryNode], prompt: &str) -> String {
        let mut full_prompt = String::new();

        for node in lineage {
            match &node.data {
                NodeData::Root => {}
                NodeData::UserCode { code, result } => {
                    full_prompt.push_str(&format!("{code}\n-- out: {result}\n"));
                }
                NodeData::ModelCode {
                    prompt,
                    code,
                    result,
                    ..
                } => {
                    full_prompt.push_str(&format!("-- {prompt}\n{code}\n-- out: {result}\n"));
                }
                NodeData::ModelMessage {
                    prompt, message, ..
                } => {
                    full_prompt.push_str(&format!("-- {prompt}\n-- {message}\n"));
                }
                NodeData::ModelError { prompt, error, .. } => {
                    full_prompt.push_str(&format!("-- {prompt}\n-- {error}\n"));
                }
            }
        }

        full_prompt.push_str(&format!("\n-- {prompt}\n"));
        full_prompt
    }
}

impl Llm for LlamaLlm {
    fn describe(&self) -> String {
        format!("{LLAMA_PROVIDER_ID} completion server at {}", self.endpoint)
    }

    fn build_request(&self, lineage: &[&HistoryNode], prompt: &str) -> Value {
        json!({
            "prompt": Self::full_prompt(lineage, prompt),
            "n_predict": self.predict_tokens,
            "stop": ["\n\n"],
            "stream": false,
        })
    }

    fn render_as_turn(&self, node: &HistoryNode) -> Value {
        let rendered = Self::full_prompt(&[node], "");
        let rendered = rendered
            .strip_suffix("\n-- \n")
            .unwrap_or(&rendered)
            .to_string();
        Value::String(rendered)
    }

    fn call(
        &self,
        lineage: &[&HistoryNode],
        prompt: &str,
        cancel: &CancelSignal,
        _on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<LlmReply, ProviderError> {
        let request = self.build_request(lineage, prompt);

        tracing::debug!(endpoint = %self.endpoint, "requesting local completion");
        let response = self.client.complete(&request, cancel)?;

        let content = response
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();

        if content.is_empty() {
            return Ok(LlmReply::Error(ErrorReply {
                prompt: prompt.to_string(),
                error: "local model returned an empty completion".to_string(),
                raw: response,
            }));
        }

        Ok(LlmReply::Code(CodeReply {
            prompt: prompt.to_string(),
            message: None,
            code: content.to_string(),
            raw: response,
        }))
    }
}

fn completion_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with(COMPLETION_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{COMPLETION_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex, MutexGuard};

    use history_tree::{HistoryTree, NodeData};
    use llm_provider::{CancelSignal, Llm, LlmReply, ProviderError};
    use serde_json::{json, Value};

    use super::{completion_endpoint, CompletionClient, LlamaLlm};

    struct FakeCompletionClient {
        observed_request: Mutex<Option<Value>>,
        outcome: Mutex<Option<Result<Value, ProviderError>>>,
    }

    impl FakeCompletionClient {
        fn respond(response: Value) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(Ok(response))),
            })
        }

        fn fail(error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                observed_request: Mutex::new(None),
                outcome: Mutex::new(Some(Err(error))),
            })
        }

        fn observed_prompt(&self) -> String {
            lock_unpoisoned(&self.observed_request)
                .as_ref()
                .and_then(|request| request["prompt"].as_str().map(ToString::to_string))
                .expect("a request should have been observed")
        }
    }

    impl CompletionClient for FakeCompletionClient {
        fn complete(
            &self,
            request: &Value,
            _cancel: &CancelSignal,
        ) -> Result<Value, ProviderError> {
            *lock_unpoisoned(&self.observed_request) = Some(request.clone());
            lock_unpoisoned(&self.outcome)
                .take()
                .expect("fake outcome should be consumed exactly once")
        }
    }

    fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn call(backend: &LlamaLlm, lineage: &[&history_tree::HistoryNode], prompt: &str) -> Result<LlmReply, ProviderError> {
        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        backend.call(lineage, prompt, &cancel, &mut |_| {})
    }

    #[test]
    fn lineage_renders_as_a_flat_commented_prompt() {
        let fake = FakeCompletionClient::respond(json!({ "content": "print(x)" }));
        let backend = LlamaLlm::with_client_for_tests(Arc::clone(&fake) as Arc<dyn CompletionClient>);

        let mut tree = HistoryTree::new();
        tree.add_node(NodeData::UserCode {
            code: "x = 2".to_string(),
            result: String::new(),
        });
        tree.add_node(NodeData::ModelCode {
            prompt: "double it".to_string(),
            message: None,
            code: "x = x * 2".to_string(),
            result: String::new(),
            raw: Value::Null,
        });

        call(&backend, &tree.lineage(None), "show it").expect("call should classify");

        let prompt = fake.observed_prompt();
        assert!(prompt.contains("x = 2\n-- out: \n"));
        assert!(prompt.contains("-- double it\nx = x * 2\n"));
        assert!(prompt.ends_with("\n-- show it\n"));
    }

    #[test]
    fn completions_are_always_classified_as_code() {
        let fake = FakeCompletionClient::respond(json!({ "content": "  print(1)\n" }));
        let backend = LlamaLlm::with_client_for_tests(fake);

        let tree = HistoryTree::new();
        let reply = call(&backend, &tree.lineage(None), "print one").expect("call should classify");

        assert!(matches!(
            reply,
            LlmReply::Code(reply) if reply.code == "print(1)" && reply.message.is_none()
        ));
    }

    #[test]
    fn empty_completions_classify_as_error_content() {
        let fake = FakeCompletionClient::respond(json!({ "content": "   " }));
        let backend = LlamaLlm::with_client_for_tests(fake);

        let tree = HistoryTree::new();
        let reply = call(&backend, &tree.lineage(None), "anything").expect("call should classify");

        assert!(matches!(
            reply,
            LlmReply::Error(reply) if reply.error.contains("empty completion")
        ));
    }

    #[test]
    fn transport_failures_propagate_unchanged() {
        let fake = FakeCompletionClient::fail(ProviderError::backend("connection refused"));
        let backend = LlamaLlm::with_client_for_tests(fake);

        let tree = HistoryTree::new();
        let result = call(&backend, &tree.lineage(None), "hi");

        assert!(matches!(
            result,
            Err(ProviderError::Backend(message)) if message.contains("connection refused")
        ));
    }

    #[test]
    fn agent_loop_is_unsupported() {
        let fake = FakeCompletionClient::respond(json!({ "content": "x" }));
        let backend = LlamaLlm::with_client_for_tests(fake);
        assert!(!backend.supports_agent_loop());
    }

    #[test]
    fn endpoints_are_normalized_from_server_roots() {
        assert_eq!(
            completion_endpoint("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/completion"
        );
        assert_eq!(
            completion_endpoint("http://127.0.0.1:8080/completion"),
            "http://127.0.0.1:8080/completion"
        );
    }
}
