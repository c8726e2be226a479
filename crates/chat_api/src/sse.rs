use serde_json::Value;

use crate::events::ChatStreamEvent;

/// Incremental parser for SSE text streams.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            if let Some(payload) = extract_data_payload(&frame) {
                if payload == "[DONE]" || payload.is_empty() {
                    continue;
                }

                if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                    events.extend(map_chunk(&value));
                }
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_chunk(value: &Value) -> Vec<ChatStreamEvent> {
    let Some(choice) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Vec::new();
    };

    let mut events = Vec::new();

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(ChatStreamEvent::ContentDelta {
                    delta: text.to_string(),
                });
            }
        }

        if let Some(function_call) = delta.get("function_call") {
            let name = function_call
                .get("name")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let arguments = function_call
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            if name.is_some() || !arguments.is_empty() {
                events.push(ChatStreamEvent::FunctionCallDelta { name, arguments });
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        events.push(ChatStreamEvent::Finished {
            reason: Some(reason.to_string()),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::SseStreamParser;
    use crate::events::ChatStreamEvent;

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        events.extend(parser.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ));
        assert_eq!(events.len(), 1);

        // A frame split across feeds only drains once complete.
        events.extend(parser.feed(b"data: {\"choices\":[{\"delta\":"));
        assert_eq!(events.len(), 1);
        events.extend(parser.feed(b"{\"content\":\"lo\"}}]}\n\n"));
        assert_eq!(events.len(), 2);

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.len(), 2);
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn function_call_deltas_carry_name_then_arguments() {
        let frames = concat!(
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"name\":\"lua\",\"arguments\":\"\"}}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"arguments\":\"{\\\"code\\\":\"}}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"function_call\":{\"arguments\":\"\\\"print(1)\\\"}\"}}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"function_call\"}]}\n\n",
        );

        let events = SseStreamParser::parse_frames(frames);

        assert!(matches!(
            &events[0],
            ChatStreamEvent::FunctionCallDelta { name: Some(name), .. } if name == "lua"
        ));

        let arguments: String = events
            .iter()
            .filter_map(|event| match event {
                ChatStreamEvent::FunctionCallDelta { arguments, .. } => Some(arguments.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(arguments, r#"{"code":"print(1)"}"#);

        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::Finished { reason: Some(reason) }) if reason == "function_call"
        ));
    }

    #[test]
    fn frames_without_choices_are_ignored() {
        let events = SseStreamParser::parse_frames("data: {\"object\":\"ping\"}\n\n");
        assert!(events.is_empty());
    }
}
