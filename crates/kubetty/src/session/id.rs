//! Terminal identifiers.
//!
//! 16 bytes from the OS random source, hex encoded, with the variant and
//! version nibbles forced the way UUIDs tag them. The result is not a valid
//! RFC 4122 UUID string (no dashes); the tag only marks it as a terminal ID.

use rand::TryRngCore;
use rand::rngs::OsRng;

use super::error::{SessionError, SessionResult};

/// Length of a terminal ID in characters.
pub const TERMINAL_ID_LEN: usize = 32;

/// Generate a new terminal ID.
pub fn new_terminal_id() -> SessionResult<String> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::Entropy(e.to_string()))?;
    Ok(encode_terminal_id(bytes))
}

fn encode_terminal_id(mut bytes: [u8; 16]) -> String {
    bytes[8] = (bytes[8] | 0x80) & 0xBF;
    bytes[6] = (bytes[6] | 0x40) & 0x4F;
    hex::encode(bytes)
}

/// Whether `id` has the shape of a generated terminal ID.
pub fn is_terminal_id(id: &str) -> bool {
    if id.len() != TERMINAL_ID_LEN
        || !id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }

    match hex::decode(id) {
        Ok(bytes) => bytes[6] & 0xF0 == 0x40 && bytes[8] & 0xC0 == 0x80,
        Err(_) => false,
    }
}
