use std::sync::{Arc, Mutex, MutexGuard};

use mlua::{Function, Lua, MultiValue, Value};

use crate::error::EngineError;

/// Whether a buffered snippet is ready to run or still expects a
/// continuation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// The snippet parses (or fails) as-is; hand it to [`LuaEngine::run`].
    Complete,
    /// Lua reported an unexpected end of input; collect another line.
    Incomplete,
}

/// Persistent Lua session with captured output.
///
/// `print` and `io.write` are rebound at construction to append into an
/// internal buffer owned by this VM, so capture is scoped to the engine
/// itself and cannot leak to the process streams or fail to restore.
pub struct LuaEngine {
    lua: Lua,
    output: Arc<Mutex<String>>,
}

impl LuaEngine {
    /// Creates a fresh VM with an empty namespace and capture in place.
    pub fn new() -> Result<Self, EngineError> {
        let lua = Lua::new();
        let output = Arc::new(Mutex::new(String::new()));

        install_capture(&lua, &output).map_err(EngineError::Init)?;

        Ok(Self { lua, output })
    }

    /// Runs a snippet against the persistent namespace and returns the
    /// captured output.
    ///
    /// REPL display semantics: when the trailing line parses as an
    /// expression, the preceding lines run first as statements and the
    /// trailing expression's values are appended to the output the same way
    /// `print` would render them. Compile and runtime errors are normalized
    /// to text in the returned output instead of propagating; the namespace
    /// survives every call.
    pub fn run(&mut self, source: &str) -> String {
        let source = source.trim();
        if source.is_empty() {
            return self.drain_output();
        }

        tracing::debug!(bytes = source.len(), "running snippet");

        let lines: Vec<&str> = source.lines().collect();
        let last_line = lines[lines.len() - 1];

        if self.parses_as_expression(last_line) {
            let body = lines[..lines.len() - 1].join("\n");
            if !body.trim().is_empty() {
                if let Err(error) = self.lua.load(&body).set_name("=repl").exec() {
                    // The trailing expression is not evaluated after a
                    // failed body.
                    self.append_error(&error);
                    return self.drain_output();
                }
            }

            match self
                .lua
                .load(format!("return {last_line}"))
                .set_name("=repl")
                .eval::<MultiValue>()
            {
                Ok(values) => self.append_expression_values(&values),
                Err(error) => self.append_error(&error),
            }
        } else if let Err(error) = self.lua.load(source).set_name("=repl").exec() {
            self.append_error(&error);
        }

        self.drain_output()
    }

    /// Classifies a buffered snippet for multi-line input collection.
    ///
    /// Incomplete input (an open `function`, `do`, unfinished expression)
    /// is distinct from input that fails outright; failed input is
    /// `Complete` so `run` can surface its error.
    #[must_use]
    pub fn completeness(&self, source: &str) -> Completeness {
        let direct = self.lua.load(source).into_function();
        if direct.is_ok() {
            return Completeness::Complete;
        }

        let wrapped = self
            .lua
            .load(format!("return {source}"))
            .into_function();
        if wrapped.is_ok() {
            return Completeness::Complete;
        }

        let continuation_expected = direct.err().as_ref().is_some_and(is_incomplete)
            || wrapped.err().as_ref().is_some_and(is_incomplete);
        if continuation_expected {
            Completeness::Incomplete
        } else {
            Completeness::Complete
        }
    }

    fn parses_as_expression(&self, line: &str) -> bool {
        self.lua
            .load(format!("return {line}"))
            .into_function()
            .is_ok()
    }

    fn append_expression_values(&self, values: &MultiValue) {
        if values.is_empty() {
            return;
        }

        let rendered: Vec<String> = values
            .iter()
            .map(|value| self.display_value(value))
            .collect();

        let mut output = lock_unpoisoned(&self.output);
        output.push_str(&rendered.join("\t"));
        output.push('\n');
    }

    fn display_value(&self, value: &Value) -> String {
        // Route through Lua's own tostring so __tostring metamethods apply.
        let via_tostring = self
            .lua
            .globals()
            .get::<Function>("tostring")
            .and_then(|tostring| tostring.call::<mlua::String>(value));

        match via_tostring {
            Ok(text) => text.to_string_lossy().to_string(),
            Err(_) => format!("{value:?}"),
        }
    }

    fn append_error(&self, error: &mlua::Error) {
        let mut output = lock_unpoisoned(&self.output);
        output.push_str(&error.to_string());
        if !output.ends_with('\n') {
            output.push('\n');
        }
    }

    fn drain_output(&self) -> String {
        std::mem::take(&mut *lock_unpoisoned(&self.output))
    }
}

/// Compile-only check used by backends that must decide whether a raw model
/// payload is runnable source. Nothing is executed.
#[must_use]
pub fn is_valid_source(source: &str) -> bool {
    let lua = Lua::new();
    lua.load(source).into_function().is_ok()
        || lua.load(format!("return {source}")).into_function().is_ok()
}

fn install_capture(lua: &Lua, output: &Arc<Mutex<String>>) -> Result<(), mlua::Error> {
    let print_output = Arc::clone(output);
    let print = lua.create_function(move |lua, values: MultiValue| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut rendered = Vec::with_capacity(values.len());
        for value in values {
            let text: mlua::String = tostring.call(value)?;
            rendered.push(text.to_string_lossy().to_string());
        }

        let mut output = lock_unpoisoned(&print_output);
        output.push_str(&rendered.join("\t"));
        output.push('\n');
        Ok(())
    })?;
    lua.globals().set("print", print)?;

    let write_output = Arc::clone(output);
    let write = lua.create_function(move |lua, values: MultiValue| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut output = lock_unpoisoned(&write_output);
        for value in values {
            let text: mlua::String = tostring.call(value)?;
            output.push_str(&text.to_string_lossy());
        }
        Ok(())
    })?;
    let io: mlua::Table = lua.globals().get("io")?;
    io.set("write", write)?;

    Ok(())
}

fn is_incomplete(error: &mlua::Error) -> bool {
    matches!(
        error,
        mlua::Error::SyntaxError {
            incomplete_input: true,
            ..
        }
    )
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
