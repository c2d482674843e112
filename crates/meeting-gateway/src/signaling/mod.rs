//! WebSocket signaling surface.
//!
//! `GET /ws` upgrades to a WebSocket carrying the JSON frames of
//! [`protocol`]. The connection metadata comes from the upgrade request
//! headers and is fixed for the lifetime of the socket:
//!
//! - `data-name`: display name (default `"User"`)
//! - `data-admin`: `"true"` marks the connection as a host
//!
//! Each socket is served by three pieces: the reader loop (requests, one at
//! a time, in arrival order), a push forwarder draining the connection's
//! event stream, and a writer task owning the socket sink.

pub mod protocol;

use crate::actors::{ConnectionActorHandle, GatewayActorHandle};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::types::{ConnectionMetadata, Role};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Header carrying the display name.
pub const NAME_HEADER: &str = "data-name";
/// Header carrying the host flag.
pub const ADMIN_HEADER: &str = "data-admin";

const DEFAULT_NAME: &str = "User";

/// Frames queued for the socket writer.
const OUTBOUND_BUFFER: usize = 256;

/// Limit on a single inbound frame; signaling payloads are small.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Create the signaling router.
pub fn signaling_router(gateway: GatewayActorHandle) -> Router {
    Router::new()
        .route("/ws", get(upgrade_handler))
        .with_state(gateway)
}

/// Connection metadata from the upgrade request headers.
#[must_use]
pub fn metadata_from_headers(headers: &HeaderMap) -> ConnectionMetadata {
    let name = headers
        .get(NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_NAME);
    let is_host = headers
        .get(ADMIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));

    ConnectionMetadata::new(name, Role::from_is_host(is_host))
}

async fn upgrade_handler(
    State(gateway): State<GatewayActorHandle>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let metadata = metadata_from_headers(&headers);
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, gateway, metadata))
}

async fn handle_socket(socket: WebSocket, gateway: GatewayActorHandle, metadata: ConnectionMetadata) {
    let (connection, mut events) = match gateway.connect(metadata) {
        Ok(connected) => connected,
        Err(e) => {
            warn!(target: "mg.signaling", error = %e, "Rejecting signaling connection");
            return;
        }
    };
    let connection_id = connection.connection_id();
    info!(
        target: "mg.signaling",
        connection_id = %connection_id,
        "Signaling connection established"
    );

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!(
                    target: "mg.signaling",
                    connection_id = %connection_id,
                    error = %e,
                    "Socket write failed"
                );
                break;
            }
        }
        let _ = sink.close().await;
    });

    let push_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match protocol::encode_push(&event) {
                Ok(text) => {
                    if push_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(
                    target: "mg.signaling",
                    connection_id = %connection_id,
                    event = event.name(),
                    error = %e,
                    "Failed to encode push"
                ),
            }
        }
    });

    loop {
        // A leave tears the connection down after its reply is queued
        let frame = tokio::select! {
            () = connection.closed() => break,
            frame = stream.next() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(
                    target: "mg.signaling",
                    connection_id = %connection_id,
                    error = %e,
                    "Socket read failed"
                );
                break;
            }
        };

        if let Some(reply) = handle_frame(&connection, &text).await {
            if out_tx.send(Message::Text(reply)).await.is_err() {
                break;
            }
        }
    }

    connection.disconnect();
    drop(out_tx);
    let _ = forwarder.await;
    let _ = writer.await;

    info!(
        target: "mg.signaling",
        connection_id = %connection_id,
        "Signaling connection closed"
    );
}

/// Run one text frame through the connection. Returns the reply frame, if any.
async fn handle_frame(connection: &ConnectionActorHandle, text: &str) -> Option<String> {
    let encoded = match protocol::parse_frame(text) {
        Ok((id, request)) => {
            let result = connection.request(request).await;
            protocol::encode_reply(id, &result)
        }
        Err(error) => protocol::encode_frame_error(&error).map(Some),
    };

    match encoded {
        Ok(reply) => reply,
        Err(e) => {
            warn!(
                target: "mg.signaling",
                connection_id = %connection.connection_id(),
                error = %e,
                "Failed to encode reply"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_metadata_defaults() {
        let metadata = metadata_from_headers(&HeaderMap::new());
        assert_eq!(metadata.name, "User");
        assert_eq!(metadata.role, Role::Guest);
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(NAME_HEADER, HeaderValue::from_static("Ada"));
        headers.insert(ADMIN_HEADER, HeaderValue::from_static("true"));

        let metadata = metadata_from_headers(&headers);
        assert_eq!(metadata.name, "Ada");
        assert!(metadata.role.is_host());

        headers.insert(ADMIN_HEADER, HeaderValue::from_static("false"));
        assert_eq!(metadata_from_headers(&headers).role, Role::Guest);
    }
}
