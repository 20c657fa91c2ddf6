//! Handshake failure assertion.

use tracing::debug;

use crate::error::{Error, Result};
use crate::expectation::ExpectedConnectionError;

use super::core::{Fresh, Rejected, WsPipeline};

// ============================================================================
// WsPipeline - Connection Error
// ============================================================================

impl WsPipeline<Fresh> {
    /// Expects the handshake to fail.
    ///
    /// Only available before any other step. A `u16` matches the HTTP
    /// rejection status, a string matches the failure message exactly,
    /// [`ExpectedConnectionError::Any`] accepts any failure.
    ///
    /// # Errors
    ///
    /// Fails the pipeline with:
    /// - [`Error::UnexpectedConnection`] if the handshake succeeds (the
    ///   connection is closed first)
    /// - [`Error::ConnectionErrorMismatch`] if it fails differently
    ///
    /// # Example
    ///
    /// ```ignore
    /// request(&server).ws("/missing")?.expect_connection_error(404u16).await?;
    /// ```
    pub fn expect_connection_error(
        self,
        expected: impl Into<ExpectedConnectionError>,
    ) -> WsPipeline<Rejected> {
        let expected = expected.into();
        self.then_before_open(move |connection| async move {
            let failure = match connection.ready().await {
                Ok(()) => {
                    debug!(connection_id = %connection.id(), "Connected although failure was expected");
                    connection.close(None, None);
                    return Err(Error::UnexpectedConnection);
                }
                Err(e) => e,
            };

            check_failure(&expected, &failure)
        })
    }
}

/// Compares a handshake failure with the expected one.
fn check_failure(expected: &ExpectedConnectionError, failure: &Error) -> Result<()> {
    let actual = failure.to_string();
    if expected.matches(&actual) {
        Ok(())
    } else {
        Err(Error::connection_error_mismatch(expected.to_string(), actual))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_failure_by_status() {
        let failure = Error::connection_failed("Unexpected server response: 404");
        assert!(check_failure(&404u16.into(), &failure).is_ok());

        let err = check_failure(&500u16.into(), &failure).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected connection failure \"Unexpected server response: 500\", got Unexpected server response: 404"
        );
    }

    #[test]
    fn test_check_failure_by_message() {
        let failure = Error::connection_failed("Connection refused");
        assert!(check_failure(&"Connection refused".into(), &failure).is_ok());
        assert!(check_failure(&ExpectedConnectionError::Any, &failure).is_ok());
        assert!(check_failure(&"Other".into(), &failure).is_err());
    }
}
