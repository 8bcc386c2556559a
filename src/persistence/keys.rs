//! Store key layout for persisted messages.
//!
//! ```text
//! "msg." | queue name (utf-8) | "." | message id (u64, big-endian)
//! ```
//!
//! The id is a fixed 8-byte tail, so the queue name is recovered without
//! splitting on the separator and may itself contain dots. For a given
//! queue every key shares the same prefix, and lexicographic store order is
//! numeric id order.

pub const MESSAGE_KEY_PREFIX: &[u8] = b"msg.";
const SEPARATOR: u8 = b'.';
const ID_LEN: usize = std::mem::size_of::<u64>();

pub fn message_key(queue: &str, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(MESSAGE_KEY_PREFIX.len() + queue.len() + 1 + ID_LEN);
    key.extend_from_slice(MESSAGE_KEY_PREFIX);
    key.extend_from_slice(queue.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Split a message key into queue name and id. Returns `None` for keys
/// that are not message keys.
pub fn parse_message_key(key: &[u8]) -> Option<(&str, u64)> {
    let rest = key.strip_prefix(MESSAGE_KEY_PREFIX)?;
    if rest.len() < ID_LEN + 1 {
        return None;
    }
    let (head, id_bytes) = rest.split_at(rest.len() - ID_LEN);
    let (queue, sep) = head.split_at(head.len() - 1);
    if sep != [SEPARATOR] {
        return None;
    }
    let queue = std::str::from_utf8(queue).ok()?;
    let id = u64::from_be_bytes(id_bytes.try_into().ok()?);
    Some((queue, id))
}
