//! Token encoding detection.
//!
//! Tokens travel in one of two encodings:
//! - **JSON**: human-readable, used for logs and cross-language peers
//! - **Bincode**: compact, used between native nodes
//!
//! Bincode tokens start with the length prefix of the `type` field, so they
//! never begin with `{`.

use crate::token::{Token, WireError};

/// Encoding of a raw token message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Bincode,
    Empty,
}

/// Detect the encoding from raw bytes.
pub fn detect_encoding(data: &[u8]) -> Encoding {
    match data.first() {
        Some(b'{') => Encoding::Json,
        Some(_) => Encoding::Bincode,
        None => Encoding::Empty,
    }
}

/// Decode a token in whichever encoding it arrived in.
pub fn decode_token(data: &[u8]) -> Result<Token, WireError> {
    match detect_encoding(data) {
        Encoding::Json => Token::from_json(data),
        Encoding::Bincode => Token::from_bytes(data),
        Encoding::Empty => Err(WireError::Empty),
    }
}
