//! Slash commands for interactive mode

/// Result of parsing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Clear the current conversation
    Clear,
    /// Open another conversation
    Switch(String),
    /// Print the current conversation's log
    History,
    /// Show a message to the user (not sent to the agent)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for ordinary input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = match rest.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    let command = command.to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "history" => CommandResult::History,

        "switch" | "s" => {
            if args.is_empty() {
                CommandResult::Message("Usage: /switch <agent id>".to_string())
            } else {
                CommandResult::Switch(args.to_string())
            }
        }

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /switch, /s <id>     Open another agent's conversation
  /history             Print this conversation
  /clear, /c           Clear this conversation (here and on the agent)
  /quit, /exit, /q     Exit"#
        .to_string()
}
