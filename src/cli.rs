//! Line commands for the interactive `join` client, and the text it prints.
//!
//! ```text
//! cursor X Y
//! select NODE
//! move NODE X Y
//! create NODE X Y [LABEL...]
//! delete NODE
//! who
//! quit
//! ```

use serde_json::json;

use crate::envelope::{ActionDraft, ActionEnvelope};
use crate::presence::Participant;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(ActionDraft),
    Who,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`; try cursor, select, move, create, delete, who, quit")]
    Unknown(String),
    #[error("missing argument: {0}")]
    MissingArg(&'static str),
    #[error("not a number: {0}")]
    BadNumber(String),
}

/// Parse one input line.
///
/// # Errors
///
/// Returns an error for blank lines, unknown verbs, and missing or
/// non-numeric arguments.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(CommandError::Empty);
    };

    match verb.to_ascii_lowercase().as_str() {
        "cursor" => {
            let (x, y) = coords(&mut words)?;
            Ok(Command::Send(ActionDraft::cursor_move(x, y)))
        }
        "select" => Ok(Command::Send(ActionDraft::node_select(node(&mut words)?))),
        "move" => {
            let id = node(&mut words)?;
            let (x, y) = coords(&mut words)?;
            Ok(Command::Send(ActionDraft::node_move(id, x, y)))
        }
        "create" => {
            let id = node(&mut words)?;
            let (x, y) = coords(&mut words)?;
            let label = words.collect::<Vec<_>>().join(" ");
            let draft = ActionDraft::node_create(id, x, y);
            if label.is_empty() {
                Ok(Command::Send(draft))
            } else {
                Ok(Command::Send(draft.with_data(json!({ "label": label }))))
            }
        }
        "delete" => Ok(Command::Send(ActionDraft::node_delete(node(&mut words)?))),
        "who" => Ok(Command::Who),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_owned())),
    }
}

fn node<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<String, CommandError> {
    words.next().map(str::to_owned).ok_or(CommandError::MissingArg("node id"))
}

fn coords<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<(f64, f64), CommandError> {
    let x = number(words.next().ok_or(CommandError::MissingArg("x"))?)?;
    let y = number(words.next().ok_or(CommandError::MissingArg("y"))?)?;
    Ok((x, y))
}

fn number(raw: &str) -> Result<f64, CommandError> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CommandError::BadNumber(raw.to_owned()))
}

// =============================================================================
// OUTPUT
// =============================================================================

#[must_use]
pub fn describe_action(env: &ActionEnvelope) -> String {
    let mut line = format!("[{}] {}", env.origin_user_name, env.kind);
    if let Some(node_id) = &env.node_id {
        line.push(' ');
        line.push_str(node_id);
    }
    if let Some(pos) = env.position {
        line.push_str(&format!(" ({}, {})", pos.x, pos.y));
    }
    if let Some(data) = &env.data {
        line.push(' ');
        line.push_str(&data.to_string());
    }
    line
}

#[must_use]
pub fn describe_presence(participants: &[Participant]) -> String {
    if participants.is_empty() {
        return "participants: none".to_owned();
    }
    let names: Vec<String> = participants
        .iter()
        .map(|p| format!("{} {}", p.display_name, p.color))
        .collect();
    format!("participants: {}", names.join(", "))
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
