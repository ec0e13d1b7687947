//! Parsing of the lines typed at the prompt.

use std::path::PathBuf;

use agora_types::models::DeleteType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Reply { message_id: String, content: String },
    Community(Option<String>),
    Direct(String),
    Older,
    Refresh,
    Edit { message_id: String, content: String },
    Delete { message_id: String, delete_type: DeleteType },
    React { message_id: String, emoji: String },
    Upload { path: PathBuf, caption: String },
    Who,
    Typing,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                       send to the active conversation
  /reply <id> <text>           reply to a message
  /community [id]              back to the community chat (optionally switch community)
  /dm <user id>                open a direct conversation
  /older                       load older direct messages
  /refresh                     re-fetch the newest direct messages
  /edit <id> <text>            edit one of your messages
  /delete <id> [me|everyone]   delete a message (default: everyone)
  /react <id> <emoji>          toggle a reaction
  /upload <path> [caption]     send a file
  /who                         list online members
  /typing                      show the conversation you are typing (stops after 3 s or on send)
  /quit";

/// `None` for blank lines.
pub fn parse(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Ok(Command::Say(line.to_string())));
    };

    let (name, args) = split_word(rest);
    Some(match name {
        "quit" | "q" => Ok(Command::Quit),
        "help" | "h" => Ok(Command::Help),
        "who" => Ok(Command::Who),
        "typing" | "t" => Ok(Command::Typing),
        "older" => Ok(Command::Older),
        "refresh" => Ok(Command::Refresh),
        "community" => Ok(Command::Community(non_empty(args))),
        "dm" => non_empty(args)
            .map(Command::Direct)
            .ok_or_else(|| "usage: /dm <user id>".to_string()),
        "reply" => id_and_text(args, "usage: /reply <id> <text>")
            .map(|(message_id, content)| Command::Reply { message_id, content }),
        "edit" => id_and_text(args, "usage: /edit <id> <text>")
            .map(|(message_id, content)| Command::Edit { message_id, content }),
        "react" => id_and_text(args, "usage: /react <id> <emoji>")
            .map(|(message_id, emoji)| Command::React { message_id, emoji }),
        "delete" => {
            let (id, kind) = split_word(args);
            if id.is_empty() {
                Err("usage: /delete <id> [me|everyone]".to_string())
            } else if kind.is_empty() {
                Ok(Command::Delete {
                    message_id: id.to_string(),
                    delete_type: DeleteType::ForEveryone,
                })
            } else {
                DeleteType::parse(kind)
                    .map(|delete_type| Command::Delete {
                        message_id: id.to_string(),
                        delete_type,
                    })
                    .ok_or_else(|| format!("unknown delete type: {kind}"))
            }
        }
        "upload" => {
            let (path, caption) = split_word(args);
            if path.is_empty() {
                Err("usage: /upload <path> [caption]".to_string())
            } else {
                Ok(Command::Upload {
                    path: PathBuf::from(path),
                    caption: caption.to_string(),
                })
            }
        }
        other => Err(format!("unknown command: /{other} (try /help)")),
    })
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn id_and_text(args: &str, usage: &str) -> Result<(String, String), String> {
    match split_word(args) {
        (id, text) if !id.is_empty() && !text.is_empty() => Ok((id.to_string(), text.to_string())),
        _ => Err(usage.to_string()),
    }
}
