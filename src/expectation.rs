//! Expectations checked against received payloads.
//!
//! | Variant | Passes when |
//! |---------|-------------|
//! | [`Expectation::Any`] | a frame of the right type arrived |
//! | [`Expectation::Equals`] | the decoded payload equals the value |
//! | [`Expectation::Pattern`] | the text matches the regex |
//! | [`Expectation::Predicate`] | the callback's verdict is not a failure |
//!
//! Literal values convert into expectations directly:
//!
//! ```ignore
//! pipeline
//!     .expect_text("hello")
//!     .expect_text(Regex::new("^echo ")?)
//!     .expect_json(json!({ "ok": true }))
//!     .expect_binary(vec![1, 2, 3])
//!     .expect_text(Expectation::predicate(|text: &String| text.len() > 3))
//!     .expect_text(Expectation::any());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::Payload;
use crate::protocol::payload::quote;

// ============================================================================
// Verdicts
// ============================================================================

/// Outcome of a user callback: `Err` carries an optional detail message.
pub type Verdict = std::result::Result<(), Option<String>>;

/// Return types accepted from predicates and `exec` callbacks.
///
/// | Return | Verdict |
/// |--------|---------|
/// | `()` | pass |
/// | `true` / `false` | pass / fail |
/// | `Ok(())` / `Err(e)` | pass / fail with `e` as detail |
///
/// Callbacks that assert with `assert!` and return nothing pass unless
/// they panic; the panic reaches the awaiting test.
pub trait IntoVerdict {
    /// Converts the callback's return value.
    fn into_verdict(self) -> Verdict;
}

impl IntoVerdict for () {
    #[inline]
    fn into_verdict(self) -> Verdict {
        Ok(())
    }
}

impl IntoVerdict for bool {
    #[inline]
    fn into_verdict(self) -> Verdict {
        if self { Ok(()) } else { Err(None) }
    }
}

impl<E: fmt::Display> IntoVerdict for std::result::Result<(), E> {
    #[inline]
    fn into_verdict(self) -> Verdict {
        self.map_err(|e| Some(e.to_string()))
    }
}

// ============================================================================
// Expectation
// ============================================================================

/// Boxed predicate over a decoded payload.
pub type PredicateFn<T> = Box<dyn FnOnce(&T) -> Verdict + Send>;

/// What a message expectation checks once a frame is decoded.
pub enum Expectation<T> {
    /// Type check only.
    Any,
    /// Structural equality with the decoded payload.
    Equals(T),
    /// Regex match; text payloads only.
    Pattern(Regex),
    /// User callback.
    Predicate(PredicateFn<T>),
}

impl<T> Expectation<T> {
    /// Passes for any payload of the right type.
    #[inline]
    #[must_use]
    pub fn any() -> Self {
        Self::Any
    }

    /// Passes when `predicate` returns `()`, `true` or `Ok(())`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// Expectation::predicate(|value: &Value| value["id"].is_u64())
    /// ```
    #[must_use]
    pub fn predicate<F, V>(predicate: F) -> Self
    where
        F: FnOnce(&T) -> V + Send + 'static,
        V: IntoVerdict,
    {
        Self::Predicate(Box::new(move |value: &T| predicate(value).into_verdict()))
    }
}

impl Expectation<Value> {
    /// Structural equality with the serialized form of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `value` cannot be serialized.
    ///
    /// # Example
    ///
    /// ```ignore
    /// pipeline.expect_json(Expectation::json(&Reply { ok: true })?)
    /// ```
    pub fn json<V: Serialize + ?Sized>(value: &V) -> Result<Self> {
        Ok(Self::Equals(serde_json::to_value(value)?))
    }
}

impl<T: Payload + PartialEq> Expectation<T> {
    /// Checks a decoded payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Mismatch`] if an equality or pattern check fails
    /// - [`Error::PredicateFailed`] if the predicate rejects the payload
    /// - [`Error::PatternNotSupported`] for patterns on non-text payloads
    pub fn check(self, actual: &T) -> Result<()> {
        match self {
            Self::Any => Ok(()),

            Self::Equals(expected) => {
                if &expected == actual {
                    Ok(())
                } else {
                    Err(Error::mismatch(expected.describe(), actual.describe()))
                }
            }

            Self::Pattern(pattern) => {
                if actual.matches_pattern(&pattern)? {
                    Ok(())
                } else {
                    Err(Error::mismatch(
                        format!("matching /{pattern}/"),
                        actual.describe(),
                    ))
                }
            }

            Self::Predicate(predicate) => predicate(actual)
                .map_err(|detail| Error::predicate_failed(actual.describe(), detail)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Expectation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Equals(value) => f.debug_tuple("Equals").field(value).finish(),
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl<T> Default for Expectation<T> {
    fn default() -> Self {
        Self::Any
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&str> for Expectation<String> {
    fn from(text: &str) -> Self {
        Self::Equals(text.to_string())
    }
}

impl From<String> for Expectation<String> {
    fn from(text: String) -> Self {
        Self::Equals(text)
    }
}

impl From<Regex> for Expectation<String> {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

impl From<Value> for Expectation<Value> {
    fn from(value: Value) -> Self {
        Self::Equals(value)
    }
}

impl From<Vec<u8>> for Expectation<Vec<u8>> {
    fn from(data: Vec<u8>) -> Self {
        Self::Equals(data)
    }
}

impl From<&[u8]> for Expectation<Vec<u8>> {
    fn from(data: &[u8]) -> Self {
        Self::Equals(data.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Expectation<Vec<u8>> {
    fn from(data: &[u8; N]) -> Self {
        Self::Equals(data.to_vec())
    }
}

// ============================================================================
// ExpectOptions
// ============================================================================

/// Options for message expectations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectOptions {
    /// Fail if no frame arrives in time. `None` or zero waits forever.
    pub timeout: Option<Duration>,
}

impl ExpectOptions {
    /// Creates options without a timeout.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the timeout if one applies.
    #[inline]
    #[must_use]
    pub(crate) fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }
}

// ============================================================================
// ExpectedConnectionError
// ============================================================================

/// Handshake failure a pipeline expects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExpectedConnectionError {
    /// Any handshake failure.
    #[default]
    Any,
    /// HTTP rejection with this status.
    Status(u16),
    /// Failure with exactly this message.
    Message(String),
}

impl ExpectedConnectionError {
    /// Returns `true` if `actual` is the expected failure message.
    #[must_use]
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Status(status) => actual == status_message(*status),
            Self::Message(message) => actual == message,
        }
    }
}

impl fmt::Display for ExpectedConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Status(status) => f.write_str(&quote(&status_message(*status))),
            Self::Message(message) => f.write_str(&quote(message)),
        }
    }
}

impl From<u16> for ExpectedConnectionError {
    fn from(status: u16) -> Self {
        Self::Status(status)
    }
}

impl From<&str> for ExpectedConnectionError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<String> for ExpectedConnectionError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

/// Failure message of an HTTP handshake rejection.
#[inline]
#[must_use]
pub(crate) fn status_message(status: u16) -> String {
    format!("Unexpected server response: {status}")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[derive(Serialize)]
    struct Reply {
        id: u32,
        tags: Vec<&'static str>,
    }

    #[test]
    fn test_json_from_serializable() {
        let reply = Reply {
            id: 7,
            tags: vec!["a", "b"],
        };

        let expectation = Expectation::json(&reply).unwrap();
        assert!(expectation.check(&json!({ "tags": ["a", "b"], "id": 7 })).is_ok());

        let expectation = Expectation::json(&reply).unwrap();
        let err = expectation.check(&json!({ "id": 8, "tags": ["a", "b"] })).unwrap_err();
        assert!(matches!(err, Error::Mismatch { .. }));
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(().into_verdict(), Ok(()));
        assert_eq!(true.into_verdict(), Ok(()));
        assert_eq!(false.into_verdict(), Err(None));
        assert_eq!(Ok::<(), String>(()).into_verdict(), Ok(()));
        assert_eq!(
            Err::<(), _>("too short").into_verdict(),
            Err(Some("too short".to_string()))
        );
    }

    #[test]
    fn test_any_passes() {
        assert!(Expectation::<String>::any().check(&"x".to_string()).is_ok());
    }

    #[test]
    fn test_equals_text() {
        let expectation: Expectation<String> = "hello".into();
        assert!(expectation.check(&"hello".to_string()).is_ok());

        let expectation: Expectation<String> = "hello".into();
        let err = expectation.check(&"bye".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Expected message \"hello\", got \"bye\"");
    }

    #[test]
    fn test_equals_json_is_structural() {
        let expectation: Expectation<Value> = json!({ "a": 1, "b": [true] }).into();
        let actual: Value = serde_json::from_str(r#"{"b":[true],"a":1}"#).unwrap();
        assert!(expectation.check(&actual).is_ok());

        let expectation: Expectation<Value> = json!({ "a": 1 }).into();
        let err = expectation.check(&json!({ "a": 2 })).unwrap_err();
        assert!(matches!(err, Error::Mismatch { .. }));
    }

    #[test]
    fn test_equals_binary() {
        let expectation: Expectation<Vec<u8>> = (&[1u8, 2, 3]).into();
        assert!(expectation.check(&vec![1, 2, 3]).is_ok());

        let expectation: Expectation<Vec<u8>> = vec![1u8].into();
        let err = expectation.check(&vec![0xff]).unwrap_err();
        assert_eq!(err.to_string(), "Expected message [01], got [ff]");
    }

    #[test]
    fn test_pattern() {
        let expectation: Expectation<String> = Regex::new("^echo ").unwrap().into();
        assert!(expectation.check(&"echo foo".to_string()).is_ok());

        let expectation: Expectation<String> = Regex::new("^echo ").unwrap().into();
        let err = expectation.check(&"foo".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Expected message matching /^echo /, got \"foo\"");
    }

    #[test]
    fn test_pattern_rejected_for_json() {
        let expectation = Expectation::<Value>::Pattern(Regex::new(".").unwrap());
        let err = expectation.check(&json!(1)).unwrap_err();
        assert!(matches!(err, Error::PatternNotSupported));
    }

    #[test]
    fn test_predicate_verdicts() {
        let pass = Expectation::predicate(|text: &String| text.starts_with('a'));
        assert!(pass.check(&"abc".to_string()).is_ok());

        let fail = Expectation::predicate(|text: &String| text.starts_with('a'));
        let err = fail.check(&"xyz".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Expectation failed for \"xyz\"");

        let unit = Expectation::predicate(|_: &String| {});
        assert!(unit.check(&"anything".to_string()).is_ok());

        let detailed = Expectation::predicate(|_: &Vec<u8>| Err::<(), _>("bad bytes"));
        let err = detailed.check(&vec![0]).unwrap_err();
        assert!(matches!(
            err,
            Error::PredicateFailed { detail: Some(ref d), .. } if d == "bad bytes"
        ));
    }

    #[test]
    fn test_expect_options() {
        assert_eq!(ExpectOptions::new().effective_timeout(), None);
        assert_eq!(
            ExpectOptions::new()
                .with_timeout(Duration::ZERO)
                .effective_timeout(),
            None
        );
        assert_eq!(
            ExpectOptions::new()
                .with_timeout(Duration::from_millis(50))
                .effective_timeout(),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_expected_connection_error() {
        let status = ExpectedConnectionError::from(404u16);
        assert!(status.matches("Unexpected server response: 404"));
        assert!(!status.matches("Unexpected server response: 500"));
        assert_eq!(status.to_string(), "\"Unexpected server response: 404\"");

        let message = ExpectedConnectionError::from("boom");
        assert!(message.matches("boom"));
        assert!(!message.matches("Boom"));

        assert!(ExpectedConnectionError::Any.matches("anything"));
    }
}
