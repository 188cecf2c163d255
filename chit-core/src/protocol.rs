//! ChitChat wire protocol: command types and tags.

/// Default TCP port for the Host listener.
pub const DEFAULT_PORT: u16 = 12345;

/// Text the Host announces (as `<name>: has joined the chat.`) when a client registers.
pub const JOIN_TEXT: &str = "has joined the chat.";

/// Line tags. A tagged line is `<TAG>:<payload>`; the tag is the text before the first colon.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Tag {
    Msg,
    Like,
    Unlike,
    Edit,
    Delete,
    Img,
    Doc,
}

/// Ordered dispatch table. Lookup is an exact match on the tag word, so a
/// future `LIKED:` can never be mistaken for `LIKE:`.
pub const TAGS: &[(&str, Tag)] = &[
    ("MSG", Tag::Msg),
    ("LIKE", Tag::Like),
    ("UNLIKE", Tag::Unlike),
    ("EDIT", Tag::Edit),
    ("DELETE", Tag::Delete),
    ("IMG", Tag::Img),
    ("DOC", Tag::Doc),
];

impl Tag {
    /// Look up a tag word (without the colon).
    pub fn from_word(word: &str) -> Option<Tag> {
        TAGS.iter().find(|(w, _)| *w == word).map(|(_, t)| *t)
    }

    pub fn as_str(self) -> &'static str {
        TAGS.iter()
            .find(|(_, t)| *t == self)
            .map(|(w, _)| *w)
            .unwrap_or("")
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All protocol commands. Constructed once by the sender and immutable in flight.
///
/// `unique_id` is chosen by the sender (conventionally `<sender>_<millis>`) and is
/// shared by every participant; it is not a local storage key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    /// Legacy `sender: text`, or an untagged line with no known sender.
    PlainMessage { sender: Option<String>, text: String },
    /// `MSG:<uniqueId>:<text>`.
    IdentifiedMessage { unique_id: String, text: String },
    /// `LIKE:<uniqueId>` or `UNLIKE:<uniqueId>`.
    Like { unique_id: String, liked: bool },
    /// `EDIT:<uniqueId>:<newText>`.
    Edit { unique_id: String, new_text: String },
    /// `DELETE:<uniqueId>`.
    Delete { unique_id: String },
    /// `IMG:<uniqueId>:<caption>:<base64>`.
    Image {
        unique_id: String,
        caption: String,
        payload: String,
    },
    /// `DOC:<uniqueId>:<fileName>:<fileSize>:<base64>`.
    Document {
        unique_id: String,
        file_name: String,
        file_size: u64,
        payload: String,
    },
}

impl Command {
    /// Tag this command is encoded with, `None` for plain messages.
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Command::PlainMessage { .. } => None,
            Command::IdentifiedMessage { .. } => Some(Tag::Msg),
            Command::Like { liked: true, .. } => Some(Tag::Like),
            Command::Like { liked: false, .. } => Some(Tag::Unlike),
            Command::Edit { .. } => Some(Tag::Edit),
            Command::Delete { .. } => Some(Tag::Delete),
            Command::Image { .. } => Some(Tag::Img),
            Command::Document { .. } => Some(Tag::Doc),
        }
    }

    /// Network-wide id of the logical message this command refers to.
    pub fn unique_id(&self) -> Option<&str> {
        match self {
            Command::PlainMessage { .. } => None,
            Command::IdentifiedMessage { unique_id, .. }
            | Command::Like { unique_id, .. }
            | Command::Edit { unique_id, .. }
            | Command::Delete { unique_id }
            | Command::Image { unique_id, .. }
            | Command::Document { unique_id, .. } => Some(unique_id),
        }
    }

    /// Best-effort sender identity: explicit for plain messages, recovered from
    /// the `<sender>_<millis>` id convention otherwise.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Command::PlainMessage { sender, .. } => sender.as_deref(),
            other => other.unique_id().and_then(crate::identity::sender_of),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_lookup_is_exact() {
        assert_eq!(Tag::from_word("LIKE"), Some(Tag::Like));
        assert_eq!(Tag::from_word("UNLIKE"), Some(Tag::Unlike));
        assert_eq!(Tag::from_word("LIKED"), None);
        assert_eq!(Tag::from_word("like"), None);
        assert_eq!(Tag::Doc.to_string(), "DOC");
    }

    #[test]
    fn like_tag_follows_flag() {
        let like = Command::Like {
            unique_id: "a_1".into(),
            liked: true,
        };
        let unlike = Command::Like {
            unique_id: "a_1".into(),
            liked: false,
        };
        assert_eq!(like.tag(), Some(Tag::Like));
        assert_eq!(unlike.tag(), Some(Tag::Unlike));
    }

    #[test]
    fn sender_from_unique_id() {
        let cmd = Command::IdentifiedMessage {
            unique_id: "alice_1000".into(),
            text: "hello".into(),
        };
        assert_eq!(cmd.sender(), Some("alice"));
        let plain = Command::PlainMessage {
            sender: None,
            text: "x".into(),
        };
        assert_eq!(plain.sender(), None);
        assert_eq!(plain.unique_id(), None);
    }
}
