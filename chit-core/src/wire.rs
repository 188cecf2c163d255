//! Framing: one newline-terminated UTF-8 line per command.
//!
//! Tagged lines are `<TAG>:<fields>`; anything else is a legacy `sender: text`
//! line, an ignorable fragment, or generic system text.

use std::borrow::Cow;

use crate::protocol::{Command, Tag};

/// Longest line logged verbatim; longer lines (base64 payloads) are truncated.
const LOG_LINE_MAX: usize = 100;

/// Lines shorter than this with no colon and no space are treated as fragments.
const NOISE_MAX_CHARS: usize = 50;

/// Encode a command into a single line, without the trailing newline.
///
/// Text fields have embedded line breaks replaced by spaces. Ids and payloads
/// are rejected instead, since altering them would change their meaning.
pub fn encode_line(cmd: &Command) -> Result<String, EncodeError> {
    let line = match cmd {
        Command::PlainMessage { sender, text } => match sender {
            Some(sender) => format!("{}: {}", flatten(sender), flatten(text)),
            None => flatten(text).into_owned(),
        },
        Command::IdentifiedMessage { unique_id, text } => {
            format!("MSG:{}:{}", checked_id(Tag::Msg, unique_id)?, flatten(text))
        }
        Command::Like { unique_id, liked } => {
            let tag = if *liked { Tag::Like } else { Tag::Unlike };
            format!("{}:{}", tag, checked_id(tag, unique_id)?)
        }
        Command::Edit {
            unique_id,
            new_text,
        } => format!(
            "EDIT:{}:{}",
            checked_id(Tag::Edit, unique_id)?,
            flatten(new_text)
        ),
        Command::Delete { unique_id } => {
            format!("DELETE:{}", checked_id(Tag::Delete, unique_id)?)
        }
        Command::Image {
            unique_id,
            caption,
            payload,
        } => format!(
            "IMG:{}:{}:{}",
            checked_id(Tag::Img, unique_id)?,
            flatten(caption),
            checked_payload(Tag::Img, payload)?
        ),
        Command::Document {
            unique_id,
            file_name,
            file_size,
            payload,
        } => format!(
            "DOC:{}:{}:{}:{}",
            checked_id(Tag::Doc, unique_id)?,
            flatten(file_name),
            file_size,
            checked_payload(Tag::Doc, payload)?
        ),
    };
    Ok(line)
}

/// Decode one line.
///
/// Returns `Ok(None)` for blank lines and short fragments that carry nothing
/// (no colon, no space), `Err` for a known tag with malformed fields.
pub fn decode_line(line: &str) -> Result<Option<Command>, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    if let Some((word, rest)) = line.split_once(':') {
        if let Some(tag) = Tag::from_word(word) {
            return decode_tagged(tag, rest).map(Some);
        }
    }
    if let Some((sender, text)) = line.split_once(": ") {
        return Ok(Some(Command::PlainMessage {
            sender: Some(sender.to_string()),
            text: text.to_string(),
        }));
    }
    if is_fragment(line) {
        return Ok(None);
    }
    Ok(Some(Command::PlainMessage {
        sender: None,
        text: line.to_string(),
    }))
}

/// Whether a line is tagged with one of the protocol tags.
pub fn is_tagged(line: &str) -> bool {
    line.split_once(':')
        .and_then(|(word, _)| Tag::from_word(word))
        .is_some()
}

fn decode_tagged(tag: Tag, rest: &str) -> Result<Command, DecodeError> {
    match tag {
        Tag::Msg => {
            let (unique_id, text) = split_id(tag, rest)?;
            Ok(Command::IdentifiedMessage {
                unique_id,
                text: text.to_string(),
            })
        }
        Tag::Like | Tag::Unlike => Ok(Command::Like {
            unique_id: bare_id(tag, rest)?,
            liked: tag == Tag::Like,
        }),
        Tag::Delete => Ok(Command::Delete {
            unique_id: bare_id(tag, rest)?,
        }),
        Tag::Edit => {
            let (unique_id, new_text) = split_id(tag, rest)?;
            Ok(Command::Edit {
                unique_id,
                new_text: new_text.to_string(),
            })
        }
        Tag::Img => {
            let (unique_id, fields) = split_id(tag, rest)?;
            // base64 never contains ':', so the payload starts after the last one
            // and the caption may carry colons of its own.
            let (caption, payload) = fields.rsplit_once(':').ok_or(DecodeError::Malformed {
                tag,
                reason: "expected <id>:<caption>:<data>",
            })?;
            Ok(Command::Image {
                unique_id,
                caption: caption.to_string(),
                payload: non_empty_payload(tag, payload)?,
            })
        }
        Tag::Doc => {
            let (unique_id, fields) = split_id(tag, rest)?;
            let malformed = DecodeError::Malformed {
                tag,
                reason: "expected <id>:<name>:<size>:<data>",
            };
            let (head, payload) = fields.rsplit_once(':').ok_or(malformed.clone())?;
            let (file_name, size) = head.rsplit_once(':').ok_or(malformed)?;
            if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DecodeError::InvalidSize {
                    tag,
                    value: size.to_string(),
                });
            }
            let file_size = size.parse::<u64>().map_err(|_| DecodeError::InvalidSize {
                tag,
                value: size.to_string(),
            })?;
            Ok(Command::Document {
                unique_id,
                file_name: file_name.to_string(),
                file_size,
                payload: non_empty_payload(tag, payload)?,
            })
        }
    }
}

fn split_id(tag: Tag, rest: &str) -> Result<(String, &str), DecodeError> {
    let (id, tail) = rest.split_once(':').ok_or(DecodeError::Malformed {
        tag,
        reason: "missing ':' after unique id",
    })?;
    if id.is_empty() {
        return Err(DecodeError::Malformed {
            tag,
            reason: "empty unique id",
        });
    }
    Ok((id.to_string(), tail))
}

fn bare_id(tag: Tag, rest: &str) -> Result<String, DecodeError> {
    if rest.is_empty() {
        return Err(DecodeError::Malformed {
            tag,
            reason: "empty unique id",
        });
    }
    Ok(rest.to_string())
}

fn non_empty_payload(tag: Tag, payload: &str) -> Result<String, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload { tag });
    }
    Ok(payload.to_string())
}

fn is_fragment(line: &str) -> bool {
    line.chars().count() < NOISE_MAX_CHARS && !line.contains(':') && !line.contains(' ')
}

fn flatten(s: &str) -> Cow<'_, str> {
    if s.contains(['\r', '\n']) {
        Cow::Owned(s.replace("\r\n", " ").replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(s)
    }
}

fn checked_id(tag: Tag, id: &str) -> Result<&str, EncodeError> {
    if id.is_empty() || id.contains([':', '\r', '\n']) {
        return Err(EncodeError::InvalidUniqueId {
            tag,
            id: id.to_string(),
        });
    }
    Ok(id)
}

fn checked_payload(tag: Tag, payload: &str) -> Result<&str, EncodeError> {
    if payload.is_empty() || payload.contains([':', '\r', '\n']) {
        return Err(EncodeError::InvalidPayload { tag });
    }
    Ok(payload)
}

/// Shorten a line for logging: `<first 100 chars>... (length: N)`.
pub fn truncate_for_log(line: &str) -> Cow<'_, str> {
    match line.char_indices().nth(LOG_LINE_MAX) {
        Some((cut, _)) => Cow::Owned(format!("{}... (length: {})", &line[..cut], line.len())),
        None => Cow::Borrowed(line),
    }
}

/// A line carried a known tag but its fields could not be parsed.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed {tag} line: {reason}")]
    Malformed { tag: Tag, reason: &'static str },
    #[error("{tag} line has non-numeric file size {value:?}")]
    InvalidSize { tag: Tag, value: String },
    #[error("{tag} line has an empty payload")]
    EmptyPayload { tag: Tag },
}

/// A command cannot be put on the wire without corrupting the line grammar.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("invalid unique id for {tag}: {id:?}")]
    InvalidUniqueId { tag: Tag, id: String },
    #[error("{tag} payload must be non-empty unwrapped base64")]
    InvalidPayload { tag: Tag },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(line: &str) -> Command {
        decode_line(line).unwrap().unwrap()
    }

    #[test]
    fn document_example() {
        let cmd = decoded("DOC:id:name:1024:QUJD");
        assert_eq!(
            cmd,
            Command::Document {
                unique_id: "id".into(),
                file_name: "name".into(),
                file_size: 1024,
                payload: "QUJD".into(),
            }
        );
        assert_eq!(encode_line(&cmd).unwrap(), "DOC:id:name:1024:QUJD");
    }

    #[test]
    fn roundtrip_tagged() {
        let commands = vec![
            Command::IdentifiedMessage {
                unique_id: "alice_1000".into(),
                text: "hello: world".into(),
            },
            Command::Like {
                unique_id: "alice_1000".into(),
                liked: true,
            },
            Command::Like {
                unique_id: "alice_1000".into(),
                liked: false,
            },
            Command::Edit {
                unique_id: "bob_2".into(),
                new_text: "a:b:c".into(),
            },
            Command::Delete {
                unique_id: "bob_2".into(),
            },
            Command::Image {
                unique_id: "bob_3".into(),
                caption: String::new(),
                payload: "iVBORw0KGgo=".into(),
            },
            Command::PlainMessage {
                sender: Some("carol".into()),
                text: "hi there".into(),
            },
        ];
        for cmd in commands {
            let line = encode_line(&cmd).unwrap();
            assert!(!line.contains('\n'));
            assert_eq!(decoded(&line), cmd, "line {line}");
        }
    }

    #[test]
    fn like_and_unlike_are_distinct_tags() {
        assert_eq!(
            decoded("UNLIKE:x_1"),
            Command::Like {
                unique_id: "x_1".into(),
                liked: false
            }
        );
        assert_eq!(
            decoded("LIKE:x_1"),
            Command::Like {
                unique_id: "x_1".into(),
                liked: true
            }
        );
    }

    #[test]
    fn edit_splits_on_first_colon() {
        assert_eq!(
            decoded("EDIT:id_1:time is 12:30"),
            Command::Edit {
                unique_id: "id_1".into(),
                new_text: "time is 12:30".into()
            }
        );
    }

    #[test]
    fn image_caption_may_contain_colons() {
        assert_eq!(
            decoded("IMG:id_1:note: see this:QUJD"),
            Command::Image {
                unique_id: "id_1".into(),
                caption: "note: see this".into(),
                payload: "QUJD".into(),
            }
        );
    }

    #[test]
    fn malformed_tagged_lines_are_errors() {
        assert!(matches!(
            decode_line("IMG:onlyonepart"),
            Err(DecodeError::Malformed { tag: Tag::Img, .. })
        ));
        assert!(matches!(
            decode_line("IMG:id:caption"),
            Err(DecodeError::Malformed { tag: Tag::Img, .. })
        ));
        assert!(matches!(
            decode_line("IMG:id:caption:"),
            Err(DecodeError::EmptyPayload { tag: Tag::Img })
        ));
        assert!(matches!(
            decode_line("DOC:id:name:12kb:QUJD"),
            Err(DecodeError::InvalidSize { tag: Tag::Doc, .. })
        ));
        assert!(matches!(
            decode_line("DOC:id:QUJD"),
            Err(DecodeError::Malformed { tag: Tag::Doc, .. })
        ));
        assert!(matches!(
            decode_line("MSG:nocolon"),
            Err(DecodeError::Malformed { tag: Tag::Msg, .. })
        ));
        assert!(matches!(
            decode_line("MSG::text"),
            Err(DecodeError::Malformed { tag: Tag::Msg, .. })
        ));
        assert!(decode_line("LIKE:").is_err());
        assert!(decode_line("EDIT:idonly").is_err());
    }

    #[test]
    fn tags_win_over_legacy_format() {
        // Looks like "sender: text" but the tag takes priority.
        assert!(decode_line("MSG: hello").is_err());
        // Unknown tag words fall through to legacy parsing.
        assert_eq!(
            decoded("LIKED: that"),
            Command::PlainMessage {
                sender: Some("LIKED".into()),
                text: "that".into()
            }
        );
    }

    #[test]
    fn legacy_splits_on_first_separator() {
        assert_eq!(
            decoded("alice: re: lunch"),
            Command::PlainMessage {
                sender: Some("alice".into()),
                text: "re: lunch".into()
            }
        );
    }

    #[test]
    fn fragments_are_ignored() {
        assert_eq!(decode_line("QUJDREVGR0g=").unwrap(), None);
        assert_eq!(decode_line("   ").unwrap(), None);
        assert_eq!(decode_line("").unwrap(), None);
    }

    #[test]
    fn other_text_is_system_text() {
        assert_eq!(
            decoded("server restarting soon"),
            Command::PlainMessage {
                sender: None,
                text: "server restarting soon".into()
            }
        );
        let long = "x".repeat(60);
        assert_eq!(
            decoded(&long),
            Command::PlainMessage {
                sender: None,
                text: long.clone()
            }
        );
    }

    #[test]
    fn encode_flattens_text_newlines() {
        let cmd = Command::Image {
            unique_id: "a_1".into(),
            caption: "two\nlines".into(),
            payload: "QUJD".into(),
        };
        assert_eq!(encode_line(&cmd).unwrap(), "IMG:a_1:two lines:QUJD");
        let msg = Command::IdentifiedMessage {
            unique_id: "a_1".into(),
            text: "x\r\ny".into(),
        };
        assert_eq!(encode_line(&msg).unwrap(), "MSG:a_1:x y");
    }

    #[test]
    fn encode_rejects_bad_ids_and_payloads() {
        let bad_id = Command::Delete {
            unique_id: "a:1".into(),
        };
        assert!(matches!(
            encode_line(&bad_id),
            Err(EncodeError::InvalidUniqueId { tag: Tag::Delete, .. })
        ));
        let wrapped = Command::Document {
            unique_id: "a_1".into(),
            file_name: "f".into(),
            file_size: 3,
            payload: "QU\nJD".into(),
        };
        assert!(matches!(
            encode_line(&wrapped),
            Err(EncodeError::InvalidPayload { tag: Tag::Doc })
        ));
    }

    #[test]
    fn truncates_long_lines_for_log() {
        let short = "MSG:a_1:hi";
        assert_eq!(truncate_for_log(short), short);
        let long = format!("IMG:a_1::{}", "A".repeat(300));
        let logged = truncate_for_log(&long);
        assert!(logged.starts_with("IMG:a_1::AAAA"));
        assert!(logged.ends_with("... (length: 309)"));
    }

    #[test]
    fn tagged_detection() {
        assert!(is_tagged("DELETE:x"));
        assert!(!is_tagged("alice: hi"));
        assert!(!is_tagged("hello"));
    }
}
