//! Interactive terminal front-end: stdin commands in, chat events out.

use std::path::PathBuf;

use chit_core::sender_of;
use chit_core::{MessageSink, ReceivedMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::node::{Node, NodeError};
use crate::status::Status;

const HELP: &str = "commands: <text> | /like <id> | /unlike <id> | /edit <id> <text> | \
/delete <id> | /img <path> [caption] | /doc <path> | /status | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Like { unique_id: String, liked: bool },
    Edit { unique_id: String, new_text: String },
    Delete(String),
    Image { path: PathBuf, caption: String },
    Document(PathBuf),
    Status,
    Help,
    Quit,
    Empty,
    /// Recognised command with bad arguments, or an unknown one.
    Usage(&'static str),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (word, rest) = match command.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (command, ""),
    };
    let first_and_rest = || match rest.split_once(char::is_whitespace) {
        Some((a, b)) => (a, b.trim()),
        None => (rest, ""),
    };
    match word {
        "like" | "unlike" if !rest.is_empty() => Input::Like {
            unique_id: rest.to_string(),
            liked: word == "like",
        },
        "like" => Input::Usage("usage: /like <id>"),
        "unlike" => Input::Usage("usage: /unlike <id>"),
        "edit" => match first_and_rest() {
            (id, text) if !id.is_empty() && !text.is_empty() => Input::Edit {
                unique_id: id.to_string(),
                new_text: text.to_string(),
            },
            _ => Input::Usage("usage: /edit <id> <text>"),
        },
        "delete" if !rest.is_empty() => Input::Delete(rest.to_string()),
        "delete" => Input::Usage("usage: /delete <id>"),
        "img" => match first_and_rest() {
            ("", _) => Input::Usage("usage: /img <path> [caption]"),
            (path, caption) => Input::Image {
                path: PathBuf::from(path),
                caption: caption.to_string(),
            },
        },
        "doc" if !rest.is_empty() => Input::Document(PathBuf::from(rest)),
        "doc" => Input::Usage("usage: /doc <path>"),
        "status" => Input::Status,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Usage(HELP),
    }
}

/// Prints inbound events. Messages from `own_name` are skipped: the user
/// already saw them when typing, and a Client gets them back as the Host's echo.
pub struct ConsoleSink {
    own_name: String,
}

impl ConsoleSink {
    pub fn new(own_name: &str) -> Self {
        Self {
            own_name: own_name.to_string(),
        }
    }

    fn is_own(&self, unique_id: &str) -> bool {
        sender_of(unique_id) == Some(self.own_name.as_str())
    }

    fn render_message(&self, m: &ReceivedMessage) -> Option<String> {
        if m.sender.as_deref() == Some(self.own_name.as_str()) {
            return None;
        }
        let line = match (&m.unique_id, &m.sender) {
            (Some(id), Some(sender)) => format!("[{id}] {sender}: {}", m.text),
            (Some(id), None) => format!("[{id}] {}", m.text),
            (None, Some(sender)) => format!("{sender}: {}", m.text),
            (None, None) => format!("* {}", m.text),
        };
        Some(line)
    }
}

impl MessageSink for ConsoleSink {
    fn on_message_received(&self, message: ReceivedMessage) {
        if let Some(line) = self.render_message(&message) {
            println!("{line}");
        }
    }

    fn on_message_liked(&self, unique_id: &str, liked: bool) {
        let verb = if liked { "liked" } else { "unliked" };
        println!("* {verb} {unique_id}");
    }

    fn on_message_edited(&self, unique_id: &str, new_text: &str) {
        println!("* edited [{unique_id}]: {new_text}");
    }

    fn on_message_deleted(&self, unique_id: &str) {
        println!("* deleted [{unique_id}]");
    }

    fn on_image_received(&self, unique_id: &str, caption: &str, payload: &str) {
        if self.is_own(unique_id) {
            return;
        }
        println!(
            "[{unique_id}] image ({} base64 chars){}",
            payload.len(),
            if caption.is_empty() { String::new() } else { format!(": {caption}") }
        );
    }

    fn on_document_received(&self, unique_id: &str, file_name: &str, file_size: u64, _payload: &str) {
        if self.is_own(unique_id) {
            return;
        }
        println!("[{unique_id}] document {file_name} ({file_size} bytes)");
    }
}

fn render_status(status: &Status) -> String {
    let state = if status.connected { "connected" } else { "not connected" };
    match &status.host_address {
        Some(address) => format!("{address} ({state})"),
        None => state.to_string(),
    }
}

fn report(e: &NodeError) {
    match e {
        NodeError::NotConnected => println!("Not connected."),
        other => println!("error: {other}"),
    }
}

/// Read commands from `input` until `/quit` or end of input, printing status
/// changes as they happen. The caller stops the node afterwards.
pub async fn run<R>(node: &Node, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut status = node.status();
    println!("{HELP}");
    loop {
        let line = tokio::select! {
            changed = status.changed() => {
                if changed.is_ok() {
                    println!("-- {}", render_status(&status.borrow_and_update()));
                }
                continue;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stdin closed");
                break;
            }
        };
        let result = match parse_input(&line) {
            Input::Empty => Ok(()),
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                Ok(())
            }
            Input::Usage(usage) => {
                println!("{usage}");
                Ok(())
            }
            Input::Status => {
                println!("{}", render_status(&node.status().borrow()));
                Ok(())
            }
            Input::Message(text) => node.send_message(&text).map(drop),
            Input::Like { unique_id, liked } => node.send_like(&unique_id, liked),
            Input::Edit {
                unique_id,
                new_text,
            } => node.send_edit(&unique_id, &new_text),
            Input::Delete(unique_id) => node.send_delete(&unique_id),
            Input::Image { path, caption } => node.send_image(&path, &caption).await.map(drop),
            Input::Document(path) => node.send_document(&path).await.map(drop),
        };
        if let Err(e) = result {
            report(&e);
        }
    }
}
