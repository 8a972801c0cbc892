//! WebSocket handler for subordinate gateway connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use gateway_core::protocol::GatewayMessage;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::connections::ConnectionHandle;
use super::manager::{FrameOutcome, MainHub};

const OUTBOUND_CAPACITY: usize = 100;

/// Time the writer gets to flush queued frames after the reader stops
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct ManagementState {
    pub hub: Arc<MainHub>,
    pub shutdown: watch::Receiver<bool>,
}

/// WebSocket upgrade handler
pub async fn management_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<ManagementState>,
    headers: HeaderMap,
) -> Response {
    // Tokens are accepted but not verified
    match bearer_token(&headers) {
        Some(_) => debug!("Connection from {} presented a bearer token", remote_addr),
        None => debug!("Connection from {} without bearer token", remote_addr),
    }

    info!("New gateway connection from {}", remote_addr);
    ws.on_upgrade(move |socket| handle_management_socket(socket, remote_addr, state))
}

/// Drive one subordinate connection until it closes or the node stops
async fn handle_management_socket(
    socket: WebSocket,
    remote_addr: SocketAddr,
    state: ManagementState,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(OUTBOUND_CAPACITY);
    let handle = ConnectionHandle::new(remote_addr, tx);
    let conn_id = handle.id;

    // Forward queued messages to the socket; the socket closes once every
    // sender is gone
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_json() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize {}: {}", msg.message_type(), e);
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        let frame = tokio::select! {
            _ = crate::stopped(&mut shutdown) => {
                debug!("Closing connection {} for shutdown", conn_id);
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if state.hub.handle_frame(&handle, text.as_str()).await == FrameOutcome::Close {
                    warn!("Closing connection {} from {}", conn_id, remote_addr);
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("Connection {} from {} closed", conn_id, remote_addr);
                break;
            }
            Some(Ok(Message::Binary(_))) => {
                warn!("Unexpected binary frame from {}", remote_addr);
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Err(e)) => {
                error!("WebSocket error from {}: {}", remote_addr, e);
                break;
            }
        }
    }

    state.hub.connection_closed(conn_id).await;
    drop(handle);

    if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
        send_task.abort();
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_from_auxiliary_handshake() {
        let cases: [(Option<&'static str>, Option<&str>); 5] = [
            (Some("Bearer gw-aux-7f3a"), Some("gw-aux-7f3a")),
            (Some("Bearer "), Some("")),
            (Some("Basic Z3ctYXV4OnNlY3JldA=="), None),
            (Some("bearer gw-aux-7f3a"), None),
            (None, None),
        ];

        for (header, expected) in cases {
            let mut headers = HeaderMap::new();
            if let Some(value) = header {
                headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
            }
            assert_eq!(bearer_token(&headers), expected, "header {:?}", header);
        }
    }
}
