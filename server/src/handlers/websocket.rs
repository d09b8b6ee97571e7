//! WebSocket handler for topic watches.
//!
//! A client opens one socket and multiplexes watches over it. Every watch
//! gets a forwarding task that turns store watch events into `snapshot`
//! and `watch_error` messages on the connection's outgoing channel.

use std::sync::Arc;

use armory_engine::store::{Watch, WatchId};
use armory_engine::wire::{ClientMessage, ServerMessage, WireError};
use armory_engine::StorageBackend;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ConnectionManager, MessageSender};

/// Handle an established watch socket.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Closes every watch the connection still holds on disconnect
pub async fn handle_watch_connection(
    socket: WebSocket,
    store: Arc<dyn StorageBackend>,
    conn_manager: Arc<ConnectionManager>,
    client: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = conn_manager.register(client.clone(), tx);

    tracing::info!(conn_id = %conn_id, client = %client, "Watch client connected");

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) =
                    process_message(&text, store.as_ref(), &conn_manager, &conn_id).await
                {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
                conn_manager.send_to(
                    &conn_id,
                    ServerMessage::error("binary messages are not supported", None),
                );
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    for watch_id in conn_manager.unregister(&conn_id) {
        if let Err(e) = store.unsubscribe(&watch_id).await {
            tracing::warn!(watch_id = %watch_id, "Failed to close watch: {}", e);
        }
    }
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        client = %client,
        active_connections = conn_manager.connection_count(),
        "Watch client disconnected"
    );
}

/// Process a client message.
///
/// Returns the reply to send, if any. A successful subscribe queues its
/// own acknowledgement ahead of the first snapshot and returns `None`.
async fn process_message(
    text: &str,
    store: &dyn StorageBackend,
    conn_manager: &Arc<ConnectionManager>,
    conn_id: &str,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(
                format!("Invalid message format: {}", e),
                None,
            ));
        }
    };

    match client_msg {
        ClientMessage::Subscribe { topic, request_id } => {
            let watch = match store.subscribe(topic).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, topic = %topic, "Subscribe failed: {}", e);
                    return Some(ServerMessage::from_engine_error(&e, request_id));
                }
            };
            let Some(sender) = conn_manager.sender(conn_id) else {
                let _ = store.unsubscribe(&watch.id).await;
                return None;
            };

            let watch_id = watch.id.clone();
            let _ = sender.send(ServerMessage::Subscribed {
                watch_id: watch_id.clone(),
                topic,
                request_id,
            });

            let forwarder = tokio::spawn(forward_watch(
                watch,
                sender,
                conn_manager.clone(),
                conn_id.to_string(),
            ));
            if conn_manager.track_watch(conn_id, watch_id.clone(), forwarder) {
                tracing::debug!(conn_id = %conn_id, watch_id = %watch_id, topic = %topic, "Watch opened");
            } else {
                let _ = store.unsubscribe(&watch_id).await;
            }
            None
        }

        ClientMessage::Unsubscribe { watch_id } => {
            if conn_manager.release_watch(conn_id, &watch_id) {
                if let Err(e) = store.unsubscribe(&watch_id).await {
                    tracing::warn!(watch_id = %watch_id, "Failed to close watch: {}", e);
                }
                tracing::debug!(conn_id = %conn_id, watch_id = %watch_id, "Watch closed");
            } else {
                tracing::debug!(conn_id = %conn_id, watch_id = %watch_id, "Unsubscribe for unknown watch");
            }
            None
        }

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

/// Relay one watch until it fails, its store side closes, or the socket goes.
async fn forward_watch(
    mut watch: Watch,
    sender: MessageSender,
    conn_manager: Arc<ConnectionManager>,
    conn_id: String,
) {
    let watch_id: WatchId = watch.id.clone();
    let topic = watch.topic;

    while let Some(event) = watch.events.recv().await {
        let (message, last) = match event {
            Ok(documents) => (
                ServerMessage::Snapshot {
                    watch_id: watch_id.clone(),
                    topic,
                    documents,
                },
                false,
            ),
            Err(e) => {
                tracing::warn!(watch_id = %watch_id, topic = %topic, "Watch failed: {}", e);
                (
                    ServerMessage::WatchError {
                        watch_id: watch_id.clone(),
                        error: WireError::from(&e),
                    },
                    true,
                )
            }
        };
        if sender.send(message).is_err() || last {
            break;
        }
    }

    conn_manager.forget_watch(&conn_id, &watch_id);
}
