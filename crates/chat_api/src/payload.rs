use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One turn of the chat-completions messages array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    /// `None` on assistant turns that carry only a function call.
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<ChatFunctionCall>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// Assistant turn that called the named function.
    #[must_use]
    pub fn assistant_function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            name: None,
            function_call: Some(ChatFunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }
    }

    /// Function-result turn answering an assistant function call.
    #[must_use]
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "function".to_string(),
            content: Some(content.into()),
            name: Some(name.into()),
            function_call: None,
        }
    }

    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    /// Appends text to this turn's content, separated by a newline.
    pub fn append_content(&mut self, text: &str) {
        match &mut self.content {
            Some(content) => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(text);
            }
            None => self.content = Some(text.to_string()),
        }
    }
}

/// Function-call envelope on an assistant turn. `arguments` is the raw
/// string the model produced; it is not guaranteed to be valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Canonical request payload for the chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
            functions: vec![lua_function_declaration()],
            temperature: None,
        }
    }
}

/// The single function the model may call to propose executable code.
#[must_use]
pub fn lua_function_declaration() -> Value {
    json!({
        "name": "lua",
        "description": "Execute Lua code in the REPL.",
        "parameters": {
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Lua code to run",
                },
            },
            "required": ["code"],
        },
    })
}
