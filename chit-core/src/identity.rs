//! Display names and message ids.

use rand::Rng;

/// Name a Host uses when started with an empty display name.
pub const DEFAULT_HOST_NAME: &str = "Host";

/// Name used for a local user who never picked one.
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Generated name for a client whose handshake line was empty or missing.
pub fn guest_name() -> String {
    format!("Guest-{}", rand::thread_rng().gen_range(0..1000))
}

/// Trim a user-supplied name, falling back to `default` when blank.
/// Newlines become spaces and ':' becomes '-', the same form [`unique_id`]
/// embeds, so a name compares equal to the sender recovered from its ids.
pub fn display_name(raw: &str, default: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default.to_string();
    }
    trimmed.replace(['\r', '\n'], " ").replace(':', "-")
}

/// Network-wide id for a message sent by `sender` at `millis` (ms since Unix epoch).
pub fn unique_id(sender: &str, millis: u64) -> String {
    // ':' separates fields on the wire, so it cannot appear in an id.
    format!("{}_{}", sender.replace(':', "-"), millis)
}

/// Recover the sender from a `<sender>_<millis>` id. Returns `None` if the id
/// does not follow the convention.
pub fn sender_of(unique_id: &str) -> Option<&str> {
    let (sender, millis) = unique_id.rsplit_once('_')?;
    if sender.is_empty() || millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(sender)
}

/// Milliseconds since the Unix epoch, saturating at 0 for clocks before it.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
