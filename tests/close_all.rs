//! Bulk close of client connections.
//!
//! Lives in its own test binary: the client registry is process-wide and
//! other tests would otherwise race with the counts.

use std::time::Duration;

use wsassert::{Connection, ReadyState, ServerPeer, TestServer, WsOptions, close_all_clients};

#[tokio::test]
async fn test_close_all_clients_closes_open_connections_once() -> anyhow::Result<()> {
    let server = TestServer::bind(|mut peer: ServerPeer| async move {
        while peer.recv().await.is_some() {}
    })
    .await?;
    let url = format!("{}/", server.ws_url()?);

    let mut connections = Vec::new();
    for _ in 0..3 {
        let connection = Connection::open(&url, &WsOptions::new())?;
        connection.ready().await?;
        connections.push(connection);
    }

    assert_eq!(close_all_clients(), 3);
    for connection in &connections {
        assert!(matches!(
            connection.ready_state(),
            ReadyState::Closing | ReadyState::Closed
        ));
    }

    assert_eq!(close_all_clients(), 0);

    for connection in &connections {
        tokio::time::timeout(Duration::from_secs(5), connection.closed()).await?;
        assert_eq!(connection.ready_state(), ReadyState::Closed);
    }

    server.close().await;
    Ok(())
}
