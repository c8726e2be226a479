use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to initialize Lua interpreter: {0}")]
    Init(#[source] mlua::Error),
}
