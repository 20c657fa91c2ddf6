//! Server-side peer socket handed to route handlers.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::PeerId;
use crate::protocol::payload;

// ============================================================================
// Constants
// ============================================================================

/// Time a peer waits for the client to acknowledge its close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ServerPeer
// ============================================================================

/// One accepted WebSocket connection on a [`TestServer`](super::TestServer).
///
/// Handlers own the peer; when the handler returns, the socket is dropped.
///
/// # Example
///
/// ```ignore
/// TestServer::builder()
///     .route("/path/ws", |mut peer: ServerPeer| async move {
///         peer.send_text("hello").await.ok();
///         while let Some(text) = peer.recv_text().await {
///             peer.send_text(format!("echo {text}")).await.ok();
///         }
///     })
///     .bind()
///     .await?;
/// ```
pub struct ServerPeer {
    id: PeerId,
    path: String,
    headers: HeaderMap,
    stream: WebSocketStream<TcpStream>,
}

impl std::fmt::Debug for ServerPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPeer")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServerPeer {
    pub(crate) fn new(
        id: PeerId,
        path: String,
        headers: HeaderMap,
        stream: WebSocketStream<TcpStream>,
    ) -> Self {
        Self {
            id,
            path,
            headers,
            stream,
        }
    }

    /// Returns the peer ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Returns the request path the client connected to.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the handshake request headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a handshake request header if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sends a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the write fails.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        self.stream.send(message.into()).await?;
        Ok(())
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// See [`ServerPeer::send`].
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text.into())).await
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// See [`ServerPeer::send`].
    pub async fn send_binary(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::binary(data.into())).await
    }

    /// Serializes `value` and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    /// Waits for the next text or binary frame.
    ///
    /// Returns `None` once the client closed the connection (the closing
    /// handshake is completed first) or the transport failed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.stream.next().await {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    trace!(peer_id = %self.id, "Frame received");
                    return Some(message);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(peer_id = %self.id, ?frame, "Client closed connection");
                    // Flushes the close reply queued by tungstenite
                    let _ = self.stream.close(None).await;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(peer_id = %self.id, error = %e, "Peer stream failed");
                    return None;
                }
                None => return None,
            }
        }
    }

    /// Waits for the next frame and decodes it as text.
    ///
    /// Returns `None` when the connection ends or the frame is binary.
    pub async fn recv_text(&mut self) -> Option<String> {
        let message = self.recv().await?;
        payload::text(message).ok()
    }

    /// Sends a close frame and waits for the client to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the close
    /// frame cannot be written.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };

        debug!(peer_id = %self.id, code, reason, "Closing peer");
        self.stream.close(Some(frame)).await?;

        // Drain until the client's acknowledgement ends the stream
        let drain = async { while let Some(Ok(_)) = self.stream.next().await {} };
        if timeout(CLOSE_ACK_TIMEOUT, drain).await.is_err() {
            debug!(peer_id = %self.id, "Close acknowledgement timed out");
        }

        Ok(())
    }
}
