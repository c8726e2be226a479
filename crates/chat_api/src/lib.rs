//! Chat-completions HTTP transport for the ailua chat backend.
//!
//! Speaks the OpenAI-compatible chat-completions wire protocol: a messages
//! array plus a single `lua` function declaration the model can call to
//! propose executable code. The client streams SSE frames incrementally,
//! retries retryable statuses with bounded backoff, and polls a shared
//! cancellation flag at every await point. Classification of replies into
//! code/message/error lives in the provider adapter, not here.

mod client;
mod config;
mod error;
mod events;
mod payload;
mod retry;
mod sse;
mod url;

pub use client::{CancellationSignal, ChatApiClient, StreamResult};
pub use config::ChatApiConfig;
pub use error::{parse_error_message, ChatApiError};
pub use events::ChatStreamEvent;
pub use payload::{lua_function_declaration, ChatFunctionCall, ChatMessage, ChatRequest};
pub use sse::SseStreamParser;
pub use url::{normalize_chat_url, DEFAULT_CHAT_BASE_URL};
