//! Payload decoding for received frames.
//!
//! A received [`Message`] is decoded into one of three payload types
//! before an expectation is checked against it:
//!
//! | Type | Accepts | Fails with |
//! |------|---------|------------|
//! | [`String`] | text frames | [`Error::ExpectedText`] |
//! | [`Vec<u8>`] | binary frames | [`Error::ExpectedBinary`] |
//! | [`Value`] | text frames holding JSON | [`Error::ExpectedText`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use regex::Regex;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, PayloadKind, Result};

// ============================================================================
// Payload Trait
// ============================================================================

/// A type a received frame can be decoded into.
pub trait Payload: Sized + Send + 'static {
    /// Decodes a received frame.
    fn decode(message: Message) -> Result<Self>;

    /// Renders the payload for failure messages.
    fn describe(&self) -> String;

    /// Tests the payload against a regular expression.
    ///
    /// Only text supports patterns.
    fn matches_pattern(&self, _pattern: &Regex) -> Result<bool> {
        Err(Error::PatternNotSupported)
    }
}

impl Payload for String {
    fn decode(message: Message) -> Result<Self> {
        text(message)
    }

    fn describe(&self) -> String {
        quote(self)
    }

    fn matches_pattern(&self, pattern: &Regex) -> Result<bool> {
        Ok(pattern.is_match(self))
    }
}

impl Payload for Vec<u8> {
    fn decode(message: Message) -> Result<Self> {
        binary(message)
    }

    fn describe(&self) -> String {
        let bytes: Vec<String> = self.iter().map(|b| format!("{b:02x}")).collect();
        format!("[{}]", bytes.join(" "))
    }
}

impl Payload for Value {
    fn decode(message: Message) -> Result<Self> {
        json(message)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Returns the payload kind of a frame.
///
/// Anything that is not a text frame counts as binary.
#[inline]
#[must_use]
pub fn kind(message: &Message) -> PayloadKind {
    match message {
        Message::Text(_) => PayloadKind::Text,
        _ => PayloadKind::Binary,
    }
}

/// Decodes a text frame.
///
/// # Errors
///
/// Returns [`Error::ExpectedText`] for non-text frames.
pub fn text(message: Message) -> Result<String> {
    match message {
        Message::Text(text) => Ok(text.as_str().to_owned()),
        other => Err(Error::ExpectedText {
            actual: kind(&other),
        }),
    }
}

/// Decodes a binary frame.
///
/// # Errors
///
/// Returns [`Error::ExpectedBinary`] for text frames.
pub fn binary(message: Message) -> Result<Vec<u8>> {
    match message {
        Message::Text(_) => Err(Error::ExpectedBinary {
            actual: PayloadKind::Text,
        }),
        other => Ok(other.into_data().to_vec()),
    }
}

/// Decodes a text frame holding JSON.
///
/// # Errors
///
/// - [`Error::ExpectedText`] for non-text frames
/// - [`Error::Json`] if the text is not valid JSON
pub fn json(message: Message) -> Result<Value> {
    let text = text(message)?;
    Ok(serde_json::from_str(&text)?)
}

/// Renders text as a quoted, escaped string.
pub(crate) fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_text_accepts_text() {
        assert_eq!(text(Message::text("hello")).unwrap(), "hello");
    }

    #[test]
    fn test_text_rejects_binary() {
        let err = text(Message::binary(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            Error::ExpectedText {
                actual: PayloadKind::Binary
            }
        ));
    }

    #[test]
    fn test_binary_accepts_binary() {
        assert_eq!(binary(Message::binary(vec![1, 2, 3])).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_binary_rejects_text() {
        let err = binary(Message::text("nope")).unwrap_err();
        assert_eq!(err.to_string(), "Expected binary message, got text");
    }

    #[test]
    fn test_json_parses_text() {
        let value = json(Message::text(r#"{"a":[1,2]}"#)).unwrap();
        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_json_parse_failure_is_json_error() {
        let err = json(Message::text("{not json")).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_json_rejects_binary_before_parsing() {
        let err = json(Message::binary(b"{}".to_vec())).unwrap_err();
        assert!(matches!(err, Error::ExpectedText { .. }));
    }

    #[test]
    fn test_describe() {
        assert_eq!("a\"b".to_string().describe(), r#""a\"b""#);
        assert_eq!(vec![0u8, 255].describe(), "[00 ff]");
        assert_eq!(json!({"x": 1}).describe(), r#"{"x":1}"#);
    }

    #[test]
    fn test_patterns_only_for_text() {
        let pattern = Regex::new("^echo ").unwrap();
        assert!("echo foo".to_string().matches_pattern(&pattern).unwrap());
        assert!(!"foo".to_string().matches_pattern(&pattern).unwrap());
        assert!(matches!(
            vec![1u8].matches_pattern(&pattern),
            Err(Error::PatternNotSupported)
        ));
    }
}
