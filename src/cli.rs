use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use llm_provider::Llm;
use llm_provider_chat::{ChatLlm, ChatLlmConfig};
use llm_provider_llama::{LlamaLlm, LlamaLlmConfig};
use llm_provider_mock::MockLlm;

/// API key environment variables, checked in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["AILUA_API_KEY", "OPENAI_API_KEY"];
/// Optional base-URL override for the chat backend.
pub const BASE_URL_ENV_VAR: &str = "AILUA_BASE_URL";

const MOCK_CHUNK_DELAY_MS: u64 = 30;

/// AI-assisted Lua REPL.
#[derive(Parser, Debug)]
#[command(name = "ailua")]
#[command(version, about, long_about = None)]
#[command(group = ArgGroup::new("backend").required(true))]
pub struct Args {
    /// Use the remote chat backend with the given model.
    /// Requires AILUA_API_KEY or OPENAI_API_KEY in the environment.
    #[arg(long, value_name = "MODEL", group = "backend")]
    pub chat: Option<String>,

    /// Use a local llama.cpp server at the given URL.
    #[arg(long, value_name = "URL", group = "backend")]
    pub llama: Option<String>,

    /// Use the deterministic scripted backend (no network).
    #[arg(long, group = "backend", hide = true)]
    pub mock: bool,

    /// How many history nodes to send to the model as context.
    /// Defaults to all of them.
    #[arg(long, value_name = "N")]
    pub ctx_history_count: Option<usize>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

/// Constructs the selected backend. Construction failures are fatal at
/// startup; everything after enters the resilient session loop.
pub fn build_backend(args: &Args) -> anyhow::Result<Arc<dyn Llm>> {
    if let Some(model) = &args.chat {
        let api_key = api_key_from_env().with_context(|| {
            format!(
                "the chat backend needs an API key in one of: {}",
                API_KEY_ENV_VARS.join(", ")
            )
        })?;

        let mut config = ChatLlmConfig::new(api_key, model).with_timeout(Duration::from_secs(120));
        if let Ok(base_url) = std::env::var(BASE_URL_ENV_VAR) {
            config = config.with_base_url(base_url);
        }

        let backend = ChatLlm::new(config).context("failed to construct the chat backend")?;
        return Ok(Arc::new(backend));
    }

    if let Some(base_url) = &args.llama {
        let backend = LlamaLlm::new(LlamaLlmConfig::new(base_url))
            .context("failed to construct the llama backend")?;
        return Ok(Arc::new(backend));
    }

    Ok(Arc::new(
        MockLlm::new()
            .with_agent_loop()
            .with_chunk_delay(Duration::from_millis(MOCK_CHUNK_DELAY_MS)),
    ))
}

fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
