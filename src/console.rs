use std::sync::atomic::Ordering;
use std::sync::Arc;

use history_tree::{HistoryNode, HistoryTree, NodeData};
use llm_provider::{CancelSignal, Llm, LlmReply, ProviderError};
use lua_engine::{EngineError, LuaEngine};
use serde_json::Value;

/// Model-proposed code awaiting operator approval.
///
/// Proposals are not history: a node is appended only when the approved
/// (possibly edited) proposal comes back as [`ConsoleInput::ModelCode`].
#[derive(Debug, Clone, PartialEq)]
pub struct CodeProposal {
    pub prompt: String,
    pub message: Option<String>,
    pub code: String,
    pub raw: Value,
    /// Re-invoke the model immediately after execution.
    pub agent_mode: bool,
}

/// Input consumed by the console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// A snippet typed by the operator.
    UserCode { code: String },
    /// An approved (possibly edited) model proposal.
    ModelCode(CodeProposal),
    /// Pre-generated model content replayed into history.
    ModelMessage {
        prompt: String,
        message: String,
        raw: Value,
    },
    /// Pre-generated model failure replayed into history.
    ModelError {
        prompt: String,
        error: String,
        raw: Value,
    },
}

/// Observable console progress, delivered in emission order.
///
/// Events are a pure projection of orchestrator progress; they carry no
/// mutation authority. The `Waiting*` variants tell the driving loop what
/// input to collect next.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    WaitingForInput,
    WaitingForApproval { proposal: CodeProposal },
    WaitingForModel,
    ModelMessage { text: String },
    CodeResult { text: String },
    StreamChunk { text: String },
}

/// The orchestrator: one persistent engine, one history tree, one backend.
///
/// Each entry point runs to its next suspension point and returns, emitting
/// events through the callback in order. Suspension is simply returning to
/// the caller: with a trailing `WaitingForInput` the driver collects the
/// next line, with `WaitingForApproval` it collects an approval, and a
/// blocked model call is interruptible through the shared cancel flag.
pub struct Console {
    engine: LuaEngine,
    history: HistoryTree,
    llm: Arc<dyn Llm>,
    max_context_nodes: Option<usize>,
    cancel: CancelSignal,
}

impl Console {
    pub fn new(llm: Arc<dyn Llm>, max_context_nodes: Option<usize>) -> Result<Self, EngineError> {
        Ok(Self {
            engine: LuaEngine::new()?,
            history: HistoryTree::new(),
            llm,
            max_context_nodes,
            cancel: CancelSignal::default(),
        })
    }

    /// Backend identity for status display.
    #[must_use]
    pub fn describe_backend(&self) -> String {
        self.llm.describe()
    }

    /// Whether the backend is suitable for unattended agent mode.
    #[must_use]
    pub fn supports_agent_loop(&self) -> bool {
        self.llm.supports_agent_loop()
    }

    /// Shared interrupt flag; setting it aborts the in-flight model call.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    /// The execution engine, for input-completeness classification.
    #[must_use]
    pub fn engine(&self) -> &LuaEngine {
        &self.engine
    }

    /// Bounded cursor lineage (the model's context window).
    #[must_use]
    pub fn history(&self) -> Vec<&HistoryNode> {
        self.history.lineage(self.max_context_nodes)
    }

    /// Full-lineage suffix from `index`, for incremental replay.
    #[must_use]
    pub fn history_since(&self, index: usize) -> Vec<&HistoryNode> {
        self.history.lineage_since(index)
    }

    /// The underlying tree, for branch navigation.
    pub fn history_tree_mut(&mut self) -> &mut HistoryTree {
        &mut self.history
    }

    /// Backend-native request for the given prompt, for preview/debugging.
    #[must_use]
    pub fn request_preview(&self, prompt: &str) -> Value {
        self.llm
            .build_request(&self.history.lineage(self.max_context_nodes), prompt)
    }

    /// Replaces the history tree and the engine namespace together.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.engine = LuaEngine::new()?;
        self.history = HistoryTree::new();
        Ok(())
    }

    /// Processes one input and emits the resulting events in order.
    ///
    /// A transport failure aborts only the turn: nothing is committed for
    /// it, and the session remains usable.
    pub fn handle_input(
        &mut self,
        input: ConsoleInput,
        emit: &mut dyn FnMut(ConsoleEvent),
    ) -> Result<(), ProviderError> {
        match input {
            ConsoleInput::UserCode { code } => {
                if code.trim().is_empty() {
                    emit(ConsoleEvent::WaitingForInput);
                    return Ok(());
                }

                let result = self.engine.run(&code);
                emit(ConsoleEvent::CodeResult {
                    text: result.clone(),
                });
                self.history.add_node(NodeData::UserCode { code, result });
                emit(ConsoleEvent::WaitingForInput);
                Ok(())
            }
            ConsoleInput::ModelCode(proposal) => {
                let result = self.engine.run(&proposal.code);
                emit(ConsoleEvent::CodeResult {
                    text: result.clone(),
                });
                self.history.add_node(NodeData::ModelCode {
                    prompt: proposal.prompt,
                    message: proposal.message,
                    code: proposal.code,
                    result,
                    raw: proposal.raw,
                });

                if proposal.agent_mode {
                    // The loop's continuation signal is the captured output,
                    // now part of the lineage.
                    self.generate("", true, emit)
                } else {
                    emit(ConsoleEvent::WaitingForInput);
                    Ok(())
                }
            }
            ConsoleInput::ModelMessage {
                prompt,
                message,
                raw,
            } => {
                emit(ConsoleEvent::ModelMessage {
                    text: message.clone(),
                });
                self.history
                    .add_node(NodeData::ModelMessage {
                        prompt,
                        message,
                        raw,
                    });
                emit(ConsoleEvent::WaitingForInput);
                Ok(())
            }
            ConsoleInput::ModelError { prompt, error, raw } => {
                emit(ConsoleEvent::ModelMessage {
                    text: error.clone(),
                });
                self.history
                    .add_node(NodeData::ModelError { prompt, error, raw });
                emit(ConsoleEvent::WaitingForInput);
                Ok(())
            }
        }
    }

    /// Sends `prompt` (with the bounded lineage) to the backend, relaying
    /// stream chunks as they arrive, then branches on the classified reply.
    ///
    /// A code reply ends in `WaitingForApproval` with nothing committed;
    /// message and error replies are committed and end in `WaitingForInput`.
    pub fn generate(
        &mut self,
        prompt: &str,
        agent_mode: bool,
        emit: &mut dyn FnMut(ConsoleEvent),
    ) -> Result<(), ProviderError> {
        // A stale interrupt from a previous turn must not abort this one.
        self.cancel.store(false, Ordering::SeqCst);

        tracing::debug!(prompt_bytes = prompt.len(), agent_mode, "requesting model turn");
        emit(ConsoleEvent::WaitingForModel);

        let lineage = self.history.lineage(self.max_context_nodes);
        let reply = self.llm.call(&lineage, prompt, &self.cancel, &mut |chunk| {
            emit(ConsoleEvent::StreamChunk { text: chunk.text });
        })?;

        match reply {
            LlmReply::Code(code) => {
                if let Some(message) = &code.message {
                    emit(ConsoleEvent::ModelMessage {
                        text: message.clone(),
                    });
                }
                emit(ConsoleEvent::WaitingForApproval {
                    proposal: CodeProposal {
                        prompt: code.prompt,
                        message: code.message,
                        code: code.code,
                        raw: code.raw,
                        agent_mode,
                    },
                });
            }
            LlmReply::Message(message) => {
                emit(ConsoleEvent::ModelMessage {
                    text: message.message.clone(),
                });
                self.history.add_node(NodeData::ModelMessage {
                    prompt: message.prompt,
                    message: message.message,
                    raw: message.raw,
                });
                emit(ConsoleEvent::WaitingForInput);
            }
            LlmReply::Error(error) => {
                emit(ConsoleEvent::ModelMessage {
                    text: error.error.clone(),
                });
                self.history.add_node(NodeData::ModelError {
                    prompt: error.prompt,
                    error: error.error,
                    raw: error.raw,
                });
                emit(ConsoleEvent::WaitingForInput);
            }
        }

        Ok(())
    }

    /// Non-streaming convenience: processes one input and collects the
    /// emitted events.
    pub fn exec(&mut self, input: ConsoleInput) -> Result<Vec<ConsoleEvent>, ProviderError> {
        let mut events = Vec::new();
        self.handle_input(input, &mut |event| events.push(event))?;
        Ok(events)
    }

    /// Non-streaming convenience: generates for `prompt` and collects the
    /// emitted events.
    pub fn code_gen(
        &mut self,
        prompt: &str,
        agent_mode: bool,
    ) -> Result<Vec<ConsoleEvent>, ProviderError> {
        let mut events = Vec::new();
        self.generate(prompt, agent_mode, &mut |event| events.push(event))?;
        Ok(events)
    }
}
