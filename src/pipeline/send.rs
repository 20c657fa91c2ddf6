//! Pipeline send steps.

use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Error;

use super::core::{Chainable, Chained, WsPipeline};

// ============================================================================
// WsPipeline - Sending
// ============================================================================

impl<S: Chainable> WsPipeline<S> {
    /// Sends a frame and waits until it was written.
    ///
    /// Fails the pipeline with [`Error::SendOnClosed`] if the connection
    /// closed first.
    pub fn send(self, message: impl Into<Message>) -> WsPipeline<Chained> {
        let message = message.into();
        self.then(move |connection| async move { connection.send(message).await })
    }

    /// Sends a text frame.
    pub fn send_text(self, text: impl Into<String>) -> WsPipeline<Chained> {
        self.send(Message::text(text.into()))
    }

    /// Sends a binary frame.
    pub fn send_binary(self, data: impl Into<Vec<u8>>) -> WsPipeline<Chained> {
        self.send(Message::binary(data.into()))
    }

    /// Serializes `value` now and sends it as a text frame.
    ///
    /// A serialization failure fails the step with [`Error::Json`].
    pub fn send_json<T: Serialize + ?Sized>(self, value: &T) -> WsPipeline<Chained> {
        let encoded = serde_json::to_string(value).map_err(Error::from);
        self.then(move |connection| async move { connection.send_text(encoded?).await })
    }
}
