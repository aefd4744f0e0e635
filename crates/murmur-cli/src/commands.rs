//! Slash commands for interactive mode

use murmur_ai::{Model, models};
use murmur_chat::{ChatSession, QueryPhase};

/// Result of executing a slash command
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Change the model used for following queries
    ChangeModel(Model),
    /// Record the partial reply left by a failed or cancelled query
    Commit,
    /// Drop the partial reply left by a failed or cancelled query
    Discard,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(
    input: &str,
    session: &ChatSession,
    current_model: &Model,
) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "model" | "m" => model_command(args, current_model),

        "history" => CommandResult::Message(history(session)),

        "tokens" | "t" => CommandResult::Message(token_summary(session)),

        "commit" => CommandResult::Commit,

        "discard" => CommandResult::Discard,

        _ => CommandResult::Unknown(command),
    })
}

fn model_command(args: &str, current: &Model) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Message(list_models(current));
    }
    let base_url = (current.base_url != murmur_ai::OPENAI_BASE_URL).then_some(current.base_url.as_str());
    CommandResult::ChangeModel(models::resolve_model(args, base_url))
}

fn list_models(current: &Model) -> String {
    let mut output = String::from("Known models:\n");
    for id in models::KNOWN_MODELS {
        let marker = if *id == current.id { " *" } else { "" };
        output.push_str(&format!("  {}{}\n", id, marker));
    }
    if !current.is_known() {
        output.push_str(&format!("  {} * (custom)\n", current.id));
    }
    output.push_str("\nSwitch with: /model <id>");
    output
}

fn history(session: &ChatSession) -> String {
    let messages = session.visible_messages();
    if messages.is_empty() {
        return "No messages yet.".to_string();
    }
    messages
        .iter()
        .map(|m| format!("[{}] {}", m.role(), m.content()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn token_summary(session: &ChatSession) -> String {
    let messages = session.messages();
    let total: usize = messages.iter().map(|m| m.token_count()).sum();
    let pending = match session.phase() {
        QueryPhase::Errored(_) | QueryPhase::Cancelled if session.store().is_streaming() => {
            "\nA partial reply is pending: /commit or /discard"
        }
        _ => "",
    };
    format!("{} messages, ~{} tokens{}", messages.len(), total, pending)
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /model, /m [id]      List known models or switch to a model
  /history             Show the conversation so far
  /tokens, /t          Show message and token counts
  /commit              Keep the partial reply of a failed or cancelled query
  /discard             Drop the partial reply of a failed or cancelled query
  /quit, /exit, /q     Exit murmur

Press Ctrl-C while a reply is streaming to cancel it; Ctrl-D exits."#
        .to_string()
}
