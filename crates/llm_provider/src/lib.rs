//! Minimal provider-agnostic contract for one model call.
//!
//! This crate defines only the shared reply/stream types and the [`Llm`]
//! trait every backend implements. It excludes transport details, wire
//! payloads, and orchestration concerns: a backend receives the cursor
//! lineage plus the new prompt, may stream incremental text, and concludes
//! with exactly one classified reply. Transport failures are errors, never
//! replies — the console treats them as fatal to the turn while the session
//! itself survives.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use history_tree::HistoryNode;
use serde_json::Value;

/// Shared interrupt flag for an in-flight call.
pub type CancelSignal = Arc<AtomicBool>;

/// Incremental model output relayed to the presentation layer as it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
}

/// A model reply that proposes code for approval.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeReply {
    pub prompt: String,
    pub message: Option<String>,
    pub code: String,
    pub raw: Value,
}

/// A plain textual model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageReply {
    pub prompt: String,
    pub message: String,
    pub raw: Value,
}

/// A backend-reported failure surfaced as conversation content.
///
/// This is a classification outcome (for example a code directive whose
/// payload could not be interpreted), not a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReply {
    pub prompt: String,
    pub error: String,
    pub raw: Value,
}

/// Terminal classification of one model call.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    Code(CodeReply),
    Message(MessageReply),
    Error(ErrorReply),
}

/// Failure of the call itself: the turn is lost, the session is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The operator interrupted the in-flight call.
    Cancelled,
    /// Transport or backend-process failure (network, auth, local binary).
    Backend(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "model call was interrupted"),
            Self::Backend(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Wraps a backend failure message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Backend interface for turning history + a prompt into one classified
/// reply.
pub trait Llm: Send + Sync + 'static {
    /// Whether replies from this backend are suitable for unattended
    /// re-invocation (agent mode).
    fn supports_agent_loop(&self) -> bool {
        false
    }

    /// Human-readable identity (model name, endpoint) for status display.
    fn describe(&self) -> String;

    /// Deterministic projection of history + the new prompt into the
    /// backend's native request, rendered as JSON for preview and testing.
    ///
    /// Implementations must skip the root sentinel, coalesce consecutive
    /// user-code nodes into a single logical turn, render model nodes as
    /// paired prompt/response turns, and append the new prompt to the
    /// trailing turn when that turn is human-authored.
    fn build_request(&self, lineage: &[&HistoryNode], prompt: &str) -> Value;

    /// Backend-native rendering of a single history node.
    ///
    /// Raw payloads stored on history nodes are opaque to the console core;
    /// this is the only place they are interpreted, error-turn replay
    /// included.
    fn render_as_turn(&self, node: &HistoryNode) -> Value;

    /// Issues the call: zero or more chunks through `on_chunk`, then exactly
    /// one classified reply. `cancel` is polled at suspension points; a set
    /// flag resolves to [`ProviderError::Cancelled`].
    fn call(
        &self,
        lineage: &[&HistoryNode],
        prompt: &str,
        cancel: &CancelSignal,
        on_chunk: &mut dyn FnMut(StreamChunk),
    ) -> Result<LlmReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use history_tree::HistoryNode;
    use serde_json::{json, Value};

    use super::{
        CancelSignal, Llm, LlmReply, MessageReply, ProviderError, StreamChunk,
    };

    struct MinimalBackend;

    impl Llm for MinimalBackend {
        fn describe(&self) -> String {
            "minimal".to_string()
        }

        fn build_request(&self, _lineage: &[&HistoryNode], prompt: &str) -> Value {
            json!({ "prompt": prompt })
        }

        fn render_as_turn(&self, _node: &HistoryNode) -> Value {
            Value::Null
        }

        fn call(
            &self,
            _lineage: &[&HistoryNode],
            prompt: &str,
            _cancel: &CancelSignal,
            _on_chunk: &mut dyn FnMut(StreamChunk),
        ) -> Result<LlmReply, ProviderError> {
            Ok(LlmReply::Message(MessageReply {
                prompt: prompt.to_string(),
                message: "hello".to_string(),
                raw: Value::Null,
            }))
        }
    }

    #[test]
    fn agent_loop_support_defaults_to_false() {
        assert!(!MinimalBackend.supports_agent_loop());
    }

    #[test]
    fn call_concludes_with_exactly_one_classified_reply() {
        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let mut chunks = Vec::new();

        let reply = MinimalBackend
            .call(&[], "hi", &cancel, &mut |chunk| chunks.push(chunk))
            .expect("minimal backend should not fail");

        assert!(chunks.is_empty());
        assert!(matches!(
            reply,
            LlmReply::Message(MessageReply { ref message, .. }) if message == "hello"
        ));
    }

    #[test]
    fn provider_error_messages_are_display_ready() {
        assert_eq!(
            ProviderError::Cancelled.to_string(),
            "model call was interrupted"
        );
        assert_eq!(
            ProviderError::backend("connection refused").to_string(),
            "connection refused"
        );
    }
}
