//! Store/UI sink: the collaborator that materialises inbound commands.
//!
//! The relay never tracks like/edit/delete state. Toggle decisions and echo
//! deduplication belong to the sink, which gets sender and id to do it.

use crate::protocol::Command;

/// A chat line as seen by the sink.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReceivedMessage {
    /// Explicit sender for legacy lines, recovered from the id for `MSG:` lines,
    /// `None` for system text.
    pub sender: Option<String>,
    pub unique_id: Option<String>,
    pub text: String,
}

/// Callbacks the relay core delivers inbound events to. Called from network
/// tasks; implementations must not block for long.
pub trait MessageSink: Send + Sync {
    fn on_message_received(&self, message: ReceivedMessage);
    fn on_message_liked(&self, unique_id: &str, liked: bool);
    fn on_message_edited(&self, unique_id: &str, new_text: &str);
    fn on_message_deleted(&self, unique_id: &str);
    fn on_image_received(&self, unique_id: &str, caption: &str, payload: &str);
    fn on_document_received(&self, unique_id: &str, file_name: &str, file_size: u64, payload: &str);
}

/// Route one decoded command to the matching sink callback.
pub fn deliver(sink: &dyn MessageSink, command: Command) {
    match command {
        Command::PlainMessage { sender, text } => sink.on_message_received(ReceivedMessage {
            sender,
            unique_id: None,
            text,
        }),
        Command::IdentifiedMessage { unique_id, text } => {
            let sender = crate::identity::sender_of(&unique_id).map(str::to_string);
            sink.on_message_received(ReceivedMessage {
                sender,
                unique_id: Some(unique_id),
                text,
            })
        }
        Command::Like { unique_id, liked } => sink.on_message_liked(&unique_id, liked),
        Command::Edit {
            unique_id,
            new_text,
        } => sink.on_message_edited(&unique_id, &new_text),
        Command::Delete { unique_id } => sink.on_message_deleted(&unique_id),
        Command::Image {
            unique_id,
            caption,
            payload,
        } => sink.on_image_received(&unique_id, &caption, &payload),
        Command::Document {
            unique_id,
            file_name,
            file_size,
            payload,
        } => sink.on_document_received(&unique_id, &file_name, file_size, &payload),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl MessageSink for Recorder {
        fn on_message_received(&self, m: ReceivedMessage) {
            self.0.lock().unwrap().push(format!(
                "msg {:?} {:?} {}",
                m.sender, m.unique_id, m.text
            ));
        }
        fn on_message_liked(&self, id: &str, liked: bool) {
            self.0.lock().unwrap().push(format!("like {id} {liked}"));
        }
        fn on_message_edited(&self, id: &str, text: &str) {
            self.0.lock().unwrap().push(format!("edit {id} {text}"));
        }
        fn on_message_deleted(&self, id: &str) {
            self.0.lock().unwrap().push(format!("delete {id}"));
        }
        fn on_image_received(&self, id: &str, caption: &str, payload: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("img {id} {caption} {payload}"));
        }
        fn on_document_received(&self, id: &str, name: &str, size: u64, payload: &str) {
            self.0
                .lock()
                .unwrap()
                .push(format!("doc {id} {name} {size} {payload}"));
        }
    }

    #[test]
    fn routes_each_command() {
        let sink = Recorder::default();
        deliver(
            &sink,
            Command::IdentifiedMessage {
                unique_id: "alice_1000".into(),
                text: "hello".into(),
            },
        );
        deliver(
            &sink,
            Command::Like {
                unique_id: "alice_1000".into(),
                liked: false,
            },
        );
        deliver(
            &sink,
            Command::Edit {
                unique_id: "alice_1000".into(),
                new_text: "hey".into(),
            },
        );
        deliver(
            &sink,
            Command::Delete {
                unique_id: "alice_1000".into(),
            },
        );
        deliver(
            &sink,
            Command::Document {
                unique_id: "d_1".into(),
                file_name: "a.pdf".into(),
                file_size: 3,
                payload: "QUJD".into(),
            },
        );
        deliver(
            &sink,
            Command::PlainMessage {
                sender: None,
                text: "notice".into(),
            },
        );
        let seen = sink.0.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "msg Some(\"alice\") Some(\"alice_1000\") hello",
                "like alice_1000 false",
                "edit alice_1000 hey",
                "delete alice_1000",
                "doc d_1 a.pdf 3 QUJD",
                "msg None None notice",
            ]
        );
    }
}
