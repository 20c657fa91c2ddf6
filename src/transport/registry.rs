//! Process-wide registry of open client connections.
//!
//! Every [`Connection`](super::Connection) registers itself when it starts
//! connecting and is removed by its event loop when it closes. The registry
//! only holds weak command senders, so it never keeps a socket alive on its
//! own.
//!
//! [`close_all_clients`] is meant for suites that test a remote server,
//! where no local server shutdown closes stray client sockets.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::debug;

use crate::identifiers::ConnectionId;

use super::connection::{ConnectionCommand, Shared};

// ============================================================================
// Types
// ============================================================================

/// Registry entry for one client connection.
struct RegisteredClient {
    shared: Arc<Shared>,
    commands: WeakUnboundedSender<ConnectionCommand>,
}

/// Open client connections by ID.
static OPEN_CLIENTS: LazyLock<Mutex<FxHashMap<ConnectionId, RegisteredClient>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

// ============================================================================
// Registration
// ============================================================================

/// Adds a connection that just started connecting.
pub(crate) fn register(shared: Arc<Shared>, commands: WeakUnboundedSender<ConnectionCommand>) {
    let id = shared.id();
    OPEN_CLIENTS
        .lock()
        .insert(id, RegisteredClient { shared, commands });
}

/// Removes a connection after its close event.
pub(crate) fn deregister(id: ConnectionId) {
    OPEN_CLIENTS.lock().remove(&id);
}

// ============================================================================
// Public API
// ============================================================================

/// Returns the number of registered client connections.
#[must_use]
pub fn open_client_count() -> usize {
    OPEN_CLIENTS.lock().len()
}

/// Closes every client connection that is still connecting or open.
///
/// Clears the registry and returns the number of connections closed.
///
/// # Example
///
/// ```ignore
/// // After a suite run against a remote server
/// let closed = wsassert::close_all_clients();
/// assert_eq!(wsassert::close_all_clients(), 0);
/// ```
pub fn close_all_clients() -> usize {
    let clients: Vec<_> = {
        let mut map = OPEN_CLIENTS.lock();
        map.drain().map(|(_, client)| client).collect()
    };

    let mut closed = 0;
    for client in clients {
        // No live sender means every handle is gone and the loop is closing anyway
        let Some(commands) = client.commands.upgrade() else {
            continue;
        };
        if !client.shared.begin_close() {
            continue;
        }

        let _ = commands.send(ConnectionCommand::Close { frame: None });
        debug!(connection_id = %client.shared.id(), "Closed by close_all_clients");
        closed += 1;
    }

    closed
}
