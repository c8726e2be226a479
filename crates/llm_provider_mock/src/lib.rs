//! Deterministic mock implementation of the shared `llm_provider` contract.
//!
//! This crate contains no transport logic and is intended for local
//! development (`ailua --mock`) and contract-level integration testing:
//! scripted replies are consumed in order, each optionally streaming chunks
//! before its classification, and the script falling dry falls back to a
//! fixed code proposal so a demo session never runs out of answers.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use history_tree::{HistoryNode, NodeData};
use llm_provider::{
    CancelSignal, CodeReply, ErrorReply, Llm, LlmReply, MessageReply, ProviderError, StreamChunk,
};
use serde_json::{json, Value};

/// Stable identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

const DEFAULT_CODE: &str = "for name in pairs(_G) do print(name) end";
const DEFAULT_MESSAGE: &str = "This code will list the global names";

/// One scripted turn: chunks streamed first, then the classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Code {
        message: Option<String>,
        code: String,
    },
    Message {
        message: String,
    },
    Error {
        error: String,
    },
}

/// Deterministic mock backend.
pub struct MockLlm {
    script: Mutex<VecDeque<ScriptedReply>>,
    stream_replies: bool,
    agent_loop: bool,
    chunk_delay: Option<Duration>,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    /// Creates a mock that always proposes the default snippet.
    #[must_use]
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// Creates a mock that consumes `script` in order, then falls back to
    /// the default code proposal.
    #[must_use]
    pub fn with_script(script: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stream_replies: true,
            agent_loop: false,
            chunk_delay: None,
        }
    }

    /// Enables agent-mode support on this mock.
    #[must_use]
    pub fn with_agent_loop(mut self) -> Self {
        self.agent_loop = true;
        self
    }

    /// Disables chunk streaming (replies arrive whole).
    #[must_use]
    pub fn without_streaming(mut self) -> Self {
        self.stream_replies = false;
        self
    }

    /// Adds a per-chunk delay so demo sessions stream visibly.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn next_scripted(&self) -> ScriptedReply {
        lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or(ScriptedReply::Code {
                message: Some(DEFAULT_MESSAGE.to_string()),
                code: DEFAULT_CODE.to_string(),
            })
    }

    fn streamed_text(reply: &ScriptedReply) -> Option<&str> {
        match reply {
            ScriptedReply::Code { message, .. } => message.as_deref(),
            ScriptedReply::Message { message } => Some(message),
            ScriptedReply::Error { .. } => None,
        }
    }
}

impl Llm for MockLlm {
    fn supports_agent_loop(&self) -> bool {
        self.agent_loop
    }

    fn describe(&self) -> String {
        format!("{MOCK_PROVIDER_ID} (scripted replies, no transport)")
    }

    fn build_request(&self, lineage: &[&HistoryNode], prompt: &str) -> Value {
        let mut turns: Vec<Value> = lineage
            .iter()
            .filter(|node| !node.data.is_root())
            .map(|node| self.render_as_turn(node))
            .collect();
        turns.push(json!({ "role": "user", "text": prompt }));

        json!({ "provider": MOCK_PROVIDER_ID, "turns": turns })
    }

    fn render_as_turn(&self, node: &HistoryNode) -> Value {
        match &node.data {
            NodeData::Root => Value::Null,
            NodeData::UserCode { code, result } => {
                json!({ "role": "user", "code": code, "result": result })
            }
            NodeData::ModelCode {
                prompt,
                code,
                result,
                ..
            } => json!({
                "role": "assistant",
                "prompt": prompt,
                "code": code,
                "result": result,
            }),
            NodeData::ModelMessage {
                prompt, message, ..
            } => json!({ "role": "assistant", "prompt": prompt, "text": message }),
            NodeData::ModelError { prompt, error, .. } => {
                json!({ "role": "assistant", "prompt": prompt, "error": error })
            }
        }
    }

    fn call(
        &self,
        _lineage: &[&HistoryNode],
        prompt: &str,
        cancel: &CancelSignal,
        on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<LlmReply, ProviderError> {
        if cancel.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }

        let scripted = self.next_scripted();

        if self.stream_replies {
            if let Some(text) = Self::streamed_text(&scripted) {
                for token in split_tokens(text) {
                    if cancel.load(Ordering::Acquire) {
                        return Err(ProviderError::Cancelled);
                    }

                    on_chunk(StreamChunk { text: token });
                    if let Some(delay) = self.chunk_delay {
                        thread::sleep(delay);
                    }
                }
            }
        }

        let reply = match scripted {
            ScriptedReply::Code { message, code } => LlmReply::Code(CodeReply {
                prompt: prompt.to_string(),
                message,
                code,
                raw: Value::Null,
            }),
            ScriptedReply::Message { message } => LlmReply::Message(MessageReply {
                prompt: prompt.to_string(),
                message,
                raw: Value::Null,
            }),
            ScriptedReply::Error { error } => LlmReply::Error(ErrorReply {
                prompt: prompt.to_string(),
                error,
                raw: Value::Null,
            }),
        };

        Ok(reply)
    }
}

fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();

    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending));
        }
    }

    if !pending.is_empty() {
        tokens.push(pending);
    }

    tokens
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use llm_provider::{CancelSignal, Llm, LlmReply};

    use super::{MockLlm, ScriptedReply, DEFAULT_CODE};

    fn call(mock: &MockLlm, prompt: &str) -> (Vec<String>, LlmReply) {
        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let mut chunks = Vec::new();
        let reply = mock
            .call(&[], prompt, &cancel, &mut |chunk| chunks.push(chunk.text))
            .expect("mock call should succeed");
        (chunks, reply)
    }

    #[test]
    fn scripted_replies_are_consumed_in_order() {
        let mock = MockLlm::with_script(vec![
            ScriptedReply::Message {
                message: "first".to_string(),
            },
            ScriptedReply::Error {
                error: "second".to_string(),
            },
        ])
        .without_streaming();

        let (_, first) = call(&mock, "one");
        let (_, second) = call(&mock, "two");

        assert!(matches!(first, LlmReply::Message(reply) if reply.message == "first"));
        assert!(matches!(second, LlmReply::Error(reply) if reply.error == "second"));
    }

    #[test]
    fn exhausted_script_falls_back_to_the_default_proposal() {
        let mock = MockLlm::new().without_streaming();

        let (_, reply) = call(&mock, "anything");

        assert!(matches!(reply, LlmReply::Code(reply) if reply.code == DEFAULT_CODE));
    }

    #[test]
    fn message_replies_stream_their_text_as_chunks() {
        let mock = MockLlm::with_script(vec![ScriptedReply::Message {
            message: "streamed reply text".to_string(),
        }]);

        let (chunks, reply) = call(&mock, "stream it");

        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), "streamed reply text");
        assert!(matches!(reply, LlmReply::Message(_)));
    }

    #[test]
    fn replies_carry_the_prompt_they_answered() {
        let mock = MockLlm::new().without_streaming();

        let (_, reply) = call(&mock, "list the globals");

        assert!(matches!(reply, LlmReply::Code(reply) if reply.prompt == "list the globals"));
    }

    #[test]
    fn a_set_cancel_flag_resolves_to_cancelled() {
        let mock = MockLlm::new();
        let cancel: CancelSignal = Arc::new(AtomicBool::new(true));

        let result = mock.call(&[], "ignored", &cancel, &mut |_| {});

        assert!(matches!(
            result,
            Err(llm_provider::ProviderError::Cancelled)
        ));
    }

    #[test]
    fn agent_loop_support_is_opt_in() {
        assert!(!MockLlm::new().supports_agent_loop());
        assert!(MockLlm::new().with_agent_loop().supports_agent_loop());
    }
}
