//! Pipeline message expectations.

use std::time::Duration;

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

use crate::error::{Error, Result};
use crate::expectation::{ExpectOptions, Expectation};
use crate::protocol::Payload;
use crate::transport::Connection;

use super::core::{Chainable, Chained, WsPipeline};

// ============================================================================
// WsPipeline - Expectations
// ============================================================================

impl<S: Chainable> WsPipeline<S> {
    /// Expects the next frame to be text satisfying `expected`.
    ///
    /// `&str`/`String` compare for equality, a [`Regex`](regex::Regex)
    /// must match, [`Expectation::predicate`] runs a callback and
    /// [`Expectation::any`] only checks the frame type.
    pub fn expect_text(self, expected: impl Into<Expectation<String>>) -> WsPipeline<Chained> {
        self.expect_text_with(expected, ExpectOptions::default())
    }

    /// [`expect_text`](Self::expect_text) with options.
    pub fn expect_text_with(
        self,
        expected: impl Into<Expectation<String>>,
        options: ExpectOptions,
    ) -> WsPipeline<Chained> {
        self.expect_payload(expected.into(), options)
    }

    /// Expects the next frame to be text holding JSON satisfying `expected`.
    ///
    /// Pass a [`Value`] or [`Expectation::json`] for a serializable type.
    /// Invalid JSON fails with [`Error::Json`], not a mismatch.
    pub fn expect_json(self, expected: impl Into<Expectation<Value>>) -> WsPipeline<Chained> {
        self.expect_json_with(expected, ExpectOptions::default())
    }

    /// [`expect_json`](Self::expect_json) with options.
    pub fn expect_json_with(
        self,
        expected: impl Into<Expectation<Value>>,
        options: ExpectOptions,
    ) -> WsPipeline<Chained> {
        self.expect_payload(expected.into(), options)
    }

    /// Expects the next frame to be binary satisfying `expected`.
    pub fn expect_binary(self, expected: impl Into<Expectation<Vec<u8>>>) -> WsPipeline<Chained> {
        self.expect_binary_with(expected, ExpectOptions::default())
    }

    /// [`expect_binary`](Self::expect_binary) with options.
    pub fn expect_binary_with(
        self,
        expected: impl Into<Expectation<Vec<u8>>>,
        options: ExpectOptions,
    ) -> WsPipeline<Chained> {
        self.expect_payload(expected.into(), options)
    }

    fn expect_payload<T>(self, expectation: Expectation<T>, options: ExpectOptions) -> WsPipeline<Chained>
    where
        T: Payload + PartialEq,
    {
        self.then(move |connection| async move {
            let message = next_message(&connection, options.effective_timeout()).await?;
            let payload = T::decode(message)?;
            expectation.check(&payload)
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Waits for the next frame, the close event or the timeout.
///
/// Frames queued before the close win over the close event.
async fn next_message(connection: &Connection, timeout: Option<Duration>) -> Result<Message> {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;

        message = connection.next_message() => {
            trace!(connection_id = %connection.id(), "Expectation received frame");
            Ok(message)
        }

        info = connection.closed() => {
            Err(Error::closed_while_waiting(info.code, info.reason))
        }

        () = deadline => {
            let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
            Err(Error::NoMessage { timeout_ms })
        }
    }
}
