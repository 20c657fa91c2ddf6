//! Pipeline close, upgrade, wait and exec steps.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::expectation::IntoVerdict;
use crate::protocol::UpgradeResponse;
use crate::protocol::payload::quote;
use crate::transport::Connection;

use super::core::{Chainable, Chained, WsPipeline};

// ============================================================================
// WsPipeline - Closing
// ============================================================================

impl<S: Chainable> WsPipeline<S> {
    /// Starts the closing handshake without a status code.
    ///
    /// The peer reports such a close as 1005.
    pub fn close(self) -> WsPipeline<Chained> {
        self.then(|connection| async move {
            connection.close(None, None);
            Ok(())
        })
    }

    /// Starts the closing handshake with a code and reason.
    pub fn close_with(self, code: u16, reason: impl Into<String>) -> WsPipeline<Chained> {
        let reason = reason.into();
        self.then(move |connection| async move {
            connection.close(Some(code), Some(&reason));
            Ok(())
        })
    }

    /// Waits for the close event and checks its code and reason.
    ///
    /// `None` skips the corresponding check.
    ///
    /// # Errors
    ///
    /// Fails the pipeline with [`Error::CloseMismatch`] naming the field
    /// that differed, with both values.
    pub fn expect_closed(self, code: Option<u16>, reason: Option<&str>) -> WsPipeline<Chained> {
        let reason = reason.map(str::to_owned);
        self.then(move |connection| async move {
            let info = connection.closed().await;
            debug!(connection_id = %connection.id(), %info, "Close observed");

            if let Some(code) = code
                && code != info.code
            {
                return Err(Error::close_mismatch(
                    "code",
                    code.to_string(),
                    info.code.to_string(),
                ));
            }

            if let Some(reason) = reason
                && reason != info.reason
            {
                return Err(Error::close_mismatch(
                    "reason",
                    quote(&reason),
                    quote(&info.reason),
                ));
            }

            Ok(())
        })
    }
}

// ============================================================================
// WsPipeline - Upgrade
// ============================================================================

impl<S: Chainable> WsPipeline<S> {
    /// Checks the handshake response with `predicate`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// pipeline.expect_upgrade(|response: &UpgradeResponse| {
    ///     response.header("x-served-by") == Some("test")
    /// })
    /// ```
    pub fn expect_upgrade<F, V>(self, predicate: F) -> WsPipeline<Chained>
    where
        F: FnOnce(&UpgradeResponse) -> V + Send + 'static,
        V: IntoVerdict,
    {
        self.then(move |connection| async move {
            let response = connection.upgrade().await?;
            predicate(&response)
                .into_verdict()
                .map_err(|detail| Error::UpgradeRejected { detail })
        })
    }
}

// ============================================================================
// WsPipeline - Utilities
// ============================================================================

impl<S: Chainable> WsPipeline<S> {
    /// Pauses the pipeline.
    ///
    /// Prefer message expectations; fixed waits make tests slow and flaky.
    pub fn wait(self, duration: Duration) -> WsPipeline<Chained> {
        self.then(move |_connection| async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    /// Runs `callback` with the live connection and awaits its future.
    ///
    /// The future's output is a verdict: `()`, `bool` or
    /// `Result<(), impl Display>`. Failures become
    /// [`Error::StepFailed`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// pipeline.exec(|connection| async move {
    ///     connection.send_text("raw").await.map_err(|e| e.to_string())
    /// })
    /// ```
    pub fn exec<F, Fut>(self, callback: F) -> WsPipeline<Chained>
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoVerdict,
    {
        self.then(move |connection| async move { run_exec(callback(connection).await) })
    }
}

/// Converts an `exec` callback's output into a step result.
fn run_exec(output: impl IntoVerdict) -> Result<()> {
    output.into_verdict().map_err(|detail| {
        Error::step_failed(detail.unwrap_or_else(|| "exec callback returned false".to_string()))
    })
}
