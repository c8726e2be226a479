//! Incremental Lua execution for the ailua console.
//!
//! One [`LuaEngine`] owns one Lua VM whose globals are the session
//! namespace; it persists across calls until the console performs an
//! explicit session reset. `run` evaluates a snippet with REPL display
//! semantics (a trailing expression's value is printed) and returns
//! everything captured from `print`/`io.write` plus any normalized error
//! text. Engine-level failures never escape as errors: a malformed snippet,
//! whether typed by the operator or proposed by a model, must not crash the
//! session.

mod engine;
mod error;

pub use engine::{is_valid_source, Completeness, LuaEngine};
pub use error::EngineError;
