#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    History,
    Preview(String),
    Reset,
    Quit,
    Unknown(String),
}

pub fn parse_repl_command(input: &str) -> Option<ReplCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with(':') {
        return None;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or(trimmed);
    let rest = parts.next().unwrap_or("").trim();

    let parsed = match command {
        ":help" => ReplCommand::Help,
        ":history" => ReplCommand::History,
        ":preview" => ReplCommand::Preview(rest.to_string()),
        ":reset" => ReplCommand::Reset,
        ":quit" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::{parse_repl_command, ReplCommand};

    #[test]
    fn non_colon_input_is_not_a_command() {
        assert_eq!(parse_repl_command("print(1)"), None);
        assert_eq!(parse_repl_command("ai: hello"), None);
    }

    #[test]
    fn known_commands_parse_with_their_payload() {
        assert_eq!(parse_repl_command(":help"), Some(ReplCommand::Help));
        assert_eq!(parse_repl_command(" :history "), Some(ReplCommand::History));
        assert_eq!(
            parse_repl_command(":preview sort this table"),
            Some(ReplCommand::Preview("sort this table".to_string()))
        );
        assert_eq!(parse_repl_command(":quit"), Some(ReplCommand::Quit));
    }

    #[test]
    fn unknown_commands_keep_their_name_for_reporting() {
        assert_eq!(
            parse_repl_command(":frobnicate now"),
            Some(ReplCommand::Unknown(":frobnicate".to_string()))
        );
    }
}
