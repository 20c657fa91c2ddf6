//! Client WebSocket connection and event loop.
//!
//! A [`Connection`] wraps one client socket. The socket itself lives in a
//! spawned tokio task that turns transport events into queue pushes and
//! signal settlements:
//!
//! | Transport event | Effect |
//! |-----------------|--------|
//! | handshake success | `upgrade` + `ready` settle, state `Open` |
//! | handshake failure | `ready` settles with the failure |
//! | text / binary frame | pushed onto `messages` |
//! | error after open | `first_error` settles |
//! | close | `closed` settles, connection leaves the registry |
//!
//! Outgoing frames and close requests travel to the task through an
//! unbounded command channel; each send is acknowledged once the frame has
//! been written to the socket.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{CloseInfo, ReadyState, UpgradeResponse};
use crate::queue::{BlockingQueue, Signal};

use super::WsOptions;
use super::registry;

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the closing handshake before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure reported when a connection is closed during the handshake.
const CLOSED_BEFORE_OPEN: &str = "WebSocket was closed before the connection was established";

// ============================================================================
// Types
// ============================================================================

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the event loop could not write a frame.
#[derive(Debug)]
pub(crate) enum SendFailure {
    /// Handshake not finished.
    NotOpen,
    /// Socket is closing or closed.
    Closed,
    /// Any other transport failure.
    Transport(String),
}

impl From<WsError> for SendFailure {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::SendAfterClosing) => Self::Closed,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Internal commands for the event loop.
pub(crate) enum ConnectionCommand {
    /// Write a frame and acknowledge.
    Send {
        message: Message,
        ack: oneshot::Sender<std::result::Result<(), SendFailure>>,
    },
    /// Start the closing handshake.
    Close { frame: Option<CloseFrame> },
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between connection handles, the event loop and the registry.
pub(crate) struct Shared {
    id: ConnectionId,
    url: String,
    state: Mutex<ReadyState>,
    messages: BlockingQueue<Message>,
    ready: Signal<std::result::Result<(), String>>,
    closed: Signal<CloseInfo>,
    first_error: Signal<String>,
    upgrade: Signal<UpgradeResponse>,
}

impl Shared {
    fn new(id: ConnectionId, url: &str) -> Self {
        Self {
            id,
            url: url.to_string(),
            state: Mutex::new(ReadyState::Connecting),
            messages: BlockingQueue::new(),
            ready: Signal::new(),
            closed: Signal::new(),
            first_error: Signal::new(),
            upgrade: Signal::new(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub(crate) fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }

    /// Moves an active connection to `Closing`.
    ///
    /// Returns `false` if it was already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if state.is_active() {
            *state = ReadyState::Closing;
            true
        } else {
            false
        }
    }

    /// Moves `Connecting` to `Open`; fails if a close was requested meanwhile.
    fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ReadyState::Connecting {
            *state = ReadyState::Open;
            true
        } else {
            false
        }
    }

    /// Final transition: settles every pending signal and deregisters.
    fn finish(&self, info: CloseInfo) {
        *self.state.lock() = ReadyState::Closed;
        self.ready.settle(Err(CLOSED_BEFORE_OPEN.to_string()));
        debug!(connection_id = %self.id, code = info.code, reason = %info.reason, "Connection closed");
        self.closed.settle(info);
        registry::deregister(self.id);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Client WebSocket connection.
///
/// Cheap to clone; all clones drive the same socket. When the last handle
/// is dropped while the socket is open, the closing handshake starts.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and can be shared across tasks.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("url", &self.shared.url)
            .field("state", &self.ready_state())
            .finish()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Starts connecting to `url` and returns immediately.
    ///
    /// The handshake runs in a background task; await [`Connection::ready`]
    /// to observe its outcome. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake request cannot be built from
    /// `url` and `options`.
    pub fn open(url: &str, options: &WsOptions) -> Result<Self> {
        let request = options.build_request(url)?;

        let shared = Arc::new(Shared::new(ConnectionId::next(), url));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        registry::register(Arc::clone(&shared), command_tx.downgrade());

        debug!(connection_id = %shared.id, url, "Connecting");

        tokio::spawn(Self::run_event_loop(
            request,
            Arc::clone(&shared),
            command_rx,
        ));

        Ok(Self { shared, command_tx })
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the URL this connection targets.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Returns the current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// Returns `true` while connecting or open.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ready_state().is_active()
    }

    /// Returns the queue of received text and binary frames.
    #[inline]
    #[must_use]
    pub fn messages(&self) -> &BlockingQueue<Message> {
        &self.shared.messages
    }

    /// Returns the close event if the connection already closed.
    #[must_use]
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.shared.closed.peek()
    }
}

// ============================================================================
// Connection - Signals
// ============================================================================

impl Connection {
    /// Waits for the handshake outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the handshake failed, e.g.
    /// `Unexpected server response: 404`.
    pub async fn ready(&self) -> Result<()> {
        self.shared
            .ready
            .wait()
            .await
            .map_err(Error::connection_failed)
    }

    /// Waits for the close event.
    pub async fn closed(&self) -> CloseInfo {
        self.shared.closed.wait().await
    }

    /// Waits for the first error reported after the connection opened.
    ///
    /// Never resolves for connections that close cleanly; meant to be
    /// raced against other operations.
    pub async fn first_error(&self) -> Error {
        Error::socket(self.shared.first_error.wait().await)
    }

    /// Returns the handshake response once the connection is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the handshake failed.
    pub async fn upgrade(&self) -> Result<UpgradeResponse> {
        self.ready().await?;
        Ok(self.shared.upgrade.wait().await)
    }

    /// Waits for the next received frame.
    pub async fn next_message(&self) -> Message {
        self.shared.messages.pop().await
    }
}

// ============================================================================
// Connection - Sending
// ============================================================================

impl Connection {
    /// Sends a frame and waits until it has been written to the socket.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the handshake has not completed
    /// - [`Error::SendOnClosed`] if the connection is closing or closed
    /// - [`Error::Socket`] for other transport failures
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        match self.ready_state() {
            ReadyState::Connecting => return Err(Error::NotOpen),
            ReadyState::Closing | ReadyState::Closed => return Err(self.closed_error().await),
            ReadyState::Open => {}
        }

        let (ack, ack_rx) = oneshot::channel();
        let command = ConnectionCommand::Send {
            message: message.into(),
            ack,
        };

        if self.command_tx.send(command).is_err() {
            return Err(self.closed_error().await);
        }

        match ack_rx.await {
            Ok(Ok(())) => {
                trace!(connection_id = %self.shared.id, "Frame sent");
                Ok(())
            }
            Ok(Err(SendFailure::NotOpen)) => Err(Error::NotOpen),
            Ok(Err(SendFailure::Transport(message))) => Err(Error::socket(message)),
            Ok(Err(SendFailure::Closed)) | Err(_) => Err(self.closed_error().await),
        }
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text.into())).await
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::binary(data.into())).await
    }

    /// Serializes `value` and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails, otherwise see
    /// [`Connection::send`].
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    /// Translates a send on a dead socket into its close code and reason.
    async fn closed_error(&self) -> Error {
        let info = self.closed().await;
        Error::send_on_closed(info.code, info.reason)
    }
}

// ============================================================================
// Connection - Closing
// ============================================================================

impl Connection {
    /// Starts the closing handshake.
    ///
    /// Does nothing if the connection is already closing or closed. A
    /// connection still connecting is aborted. `reason` is only sent along
    /// with a `code`.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        if !self.shared.begin_close() {
            return;
        }

        let frame = code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: reason.unwrap_or_default().to_owned().into(),
        });

        debug!(connection_id = %self.shared.id, ?code, "Closing connection");
        let _ = self.command_tx.send(ConnectionCommand::Close { frame });
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    /// Drives the socket from handshake to close.
    async fn run_event_loop(
        request: Request,
        shared: Arc<Shared>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        let Some(stream) = Self::handshake(request, &shared, &mut command_rx).await else {
            shared.finish(CloseInfo::abnormal());
            return;
        };

        let (mut ws_write, mut ws_read) = stream.split();
        let mut close_info: Option<CloseInfo> = None;
        let mut commands_open = true;
        let mut closing = false;

        let close_deadline = tokio::time::sleep(CLOSE_TIMEOUT);
        tokio::pin!(close_deadline);

        loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                            trace!(connection_id = %shared.id, "Frame received");
                            shared.messages.push(message);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(connection_id = %shared.id, ?frame, "Close frame received");
                            shared.begin_close();
                            close_info.get_or_insert_with(|| CloseInfo::from_frame(frame.as_ref()));
                            if !closing {
                                closing = true;
                                close_deadline.as_mut().reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);
                            }
                        }

                        // Ping, Pong and raw frames are handled by tungstenite
                        Some(Ok(_)) => {}

                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                            break;
                        }

                        Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                            debug!(connection_id = %shared.id, "Connection reset without closing handshake");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(connection_id = %shared.id, error = %e, "WebSocket error");
                            shared.first_error.settle(e.to_string());
                            break;
                        }
                    }
                }

                // Commands from connection handles
                command = command_rx.recv(), if commands_open => {
                    match command {
                        Some(ConnectionCommand::Send { message, ack }) => {
                            let outcome = ws_write.send(message).await.map_err(SendFailure::from);
                            if let Err(ref failure) = outcome {
                                debug!(connection_id = %shared.id, ?failure, "Send failed");
                            }
                            let _ = ack.send(outcome);
                        }

                        Some(ConnectionCommand::Close { frame }) => {
                            if let Err(e) = ws_write.send(Message::Close(frame)).await {
                                debug!(connection_id = %shared.id, error = %e, "Close frame not sent");
                            }
                            if !closing {
                                closing = true;
                                close_deadline.as_mut().reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);
                            }
                        }

                        None => {
                            commands_open = false;
                            if shared.begin_close() {
                                debug!(connection_id = %shared.id, "All handles dropped, closing");
                                let _ = ws_write.send(Message::Close(None)).await;
                                closing = true;
                                close_deadline.as_mut().reset(tokio::time::Instant::now() + CLOSE_TIMEOUT);
                            }
                        }
                    }
                }

                () = &mut close_deadline, if closing => {
                    warn!(connection_id = %shared.id, "Closing handshake timed out");
                    break;
                }
            }
        }

        shared.finish(close_info.unwrap_or_else(CloseInfo::abnormal));
    }

    /// Runs the handshake while honoring early close requests.
    async fn handshake(
        request: Request,
        shared: &Shared,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Option<ClientStream> {
        let connect = connect_async(request);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok((stream, response)) => {
                            if !shared.mark_open() {
                                debug!(connection_id = %shared.id, "Closed during handshake");
                                shared.ready.settle(Err(CLOSED_BEFORE_OPEN.to_string()));
                                return None;
                            }
                            shared.upgrade.settle(UpgradeResponse::from(&response));
                            shared.ready.settle(Ok(()));
                            info!(connection_id = %shared.id, url = %shared.url, "WebSocket connection established");
                            Some(stream)
                        }
                        Err(e) => {
                            let message = handshake_failure(&e);
                            debug!(connection_id = %shared.id, error = %message, "Handshake failed");
                            shared.ready.settle(Err(message));
                            None
                        }
                    };
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { ack, .. }) => {
                            let _ = ack.send(Err(SendFailure::NotOpen));
                        }
                        Some(ConnectionCommand::Close { .. }) | None => {
                            debug!(connection_id = %shared.id, "Handshake aborted");
                            shared.ready.settle(Err(CLOSED_BEFORE_OPEN.to_string()));
                            return None;
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Renders a handshake failure the way callers match on it.
///
/// HTTP rejections become `Unexpected server response: <status>`.
fn handshake_failure(err: &WsError) -> String {
    match err {
        WsError::Http(response) => {
            format!("Unexpected server response: {}", response.status().as_u16())
        }
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    use crate::protocol::CLOSE_NO_STATUS;
    use crate::server::{ServerPeer, TestServer};

    async fn echo_server() -> TestServer {
        TestServer::bind(|mut peer: ServerPeer| async move {
            while let Some(message) = peer.recv().await {
                if peer.send(message).await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("bind should succeed")
    }

    #[test]
    fn test_constants() {
        assert_eq!(CLOSE_TIMEOUT.as_secs(), 30);
    }

    #[test]
    fn test_send_failure_from_ws_error() {
        assert!(matches!(
            SendFailure::from(WsError::ConnectionClosed),
            SendFailure::Closed
        ));
        assert!(matches!(
            SendFailure::from(WsError::AlreadyClosed),
            SendFailure::Closed
        ));
        assert!(matches!(
            SendFailure::from(WsError::Io(std::io::Error::other("boom"))),
            SendFailure::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_open_send_receive_close() {
        let server = echo_server().await;
        let url = format!("{}/echo", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        assert_eq!(connection.ready_state(), ReadyState::Connecting);

        connection.ready().await.expect("handshake should succeed");
        assert_eq!(connection.ready_state(), ReadyState::Open);

        connection.send_text("ping").await.unwrap();
        let reply = connection.next_message().await;
        assert_eq!(reply, Message::text("ping"));

        connection.close(Some(1000), Some("done"));
        let info = connection.closed().await;
        assert_eq!(info, CloseInfo::new(1000, "done"));
        assert_eq!(connection.ready_state(), ReadyState::Closed);
        assert_eq!(connection.close_info(), Some(info));

        server.close().await;
    }

    #[tokio::test]
    async fn test_close_without_code_reports_no_status() {
        let server = echo_server().await;
        let url = format!("{}/", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        connection.ready().await.unwrap();
        connection.close(None, None);

        assert_eq!(connection.closed().await.code, CLOSE_NO_STATUS);
        server.close().await;
    }

    #[tokio::test]
    async fn test_send_after_close_reports_close_code() {
        let server = echo_server().await;
        let url = format!("{}/", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        connection.ready().await.unwrap();
        connection.close(Some(4001), Some("gone"));

        let err = connection.send_text("late").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot send message; connection closed with 4001 \"gone\""
        );
        server.close().await;
    }

    #[tokio::test]
    async fn test_upgrade_response_available_after_open() {
        let server = echo_server().await;
        let url = format!("{}/", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        let upgrade = connection.upgrade().await.unwrap();
        assert_eq!(upgrade.status().as_u16(), 101);

        connection.close(None, None);
        server.close().await;
    }

    #[tokio::test]
    async fn test_handshake_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connection =
            Connection::open(&format!("ws://127.0.0.1:{port}/"), &WsOptions::new()).unwrap();
        let err = connection.ready().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(connection.closed().await, CloseInfo::abnormal());
    }

    #[tokio::test]
    async fn test_close_while_connecting_aborts() {
        let server = echo_server().await;
        let url = format!("{}/", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        connection.close(None, None);

        let err = connection.ready().await.unwrap_err();
        assert_eq!(err.to_string(), CLOSED_BEFORE_OPEN);
        assert_eq!(connection.ready_state(), ReadyState::Closed);
        server.close().await;
    }

    #[tokio::test]
    async fn test_send_while_connecting_is_not_open() {
        let server = echo_server().await;
        let url = format!("{}/", server.ws_url().unwrap());

        let connection = Connection::open(&url, &WsOptions::new()).unwrap();
        let err = connection.send_text("early").await.unwrap_err();
        assert!(matches!(err, Error::NotOpen));

        connection.ready().await.unwrap();
        connection.close(None, None);
        server.close().await;
    }
}
