//! ailua: an interactive Lua REPL with an LLM copilot.
//!
//! The operator types Lua or natural-language prompts; a backend may answer
//! with an explanation, an error, or a proposed snippet; approved snippets
//! run in a persistent interpreter whose captured output feeds the next
//! model turn. Agent mode re-invokes the model after each approved
//! execution until a non-code reply ends the loop.
//!
//! The [`console`] module is the orchestrator core: a state machine fed
//! [`ConsoleInput`] that emits ordered [`ConsoleEvent`]s. The [`repl`]
//! module is the terminal front end driving it; [`cli`] wires up argument
//! parsing and backend selection. History, backends, transport, and the
//! execution engine live in the workspace member crates.

pub mod cli;
pub mod commands;
pub mod console;
pub mod repl;

pub use console::{CodeProposal, Console, ConsoleEvent, ConsoleInput};
pub use repl::Repl;
