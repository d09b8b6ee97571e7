//! Client for the hosted document store.
//!
//! One-shot operations are plain HTTP calls. Watches are multiplexed over a
//! single WebSocket that is opened lazily on the first subscribe; when it
//! drops, every live watch receives `Unreachable` and the next subscribe
//! reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use reqwest::{Method, RequestBuilder, StatusCode};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::record::{Document, Fields};
use crate::wire::{
    BatchDeleteRequest, BatchDeleteResponse, ClientMessage, ErrorBody, IncrementRequest,
    IncrementResponse, InsertResponse, ServerMessage, WireError,
};
use crate::{DocumentId, Topic};

use super::{BackendKind, Query, StorageBackend, Watch, WatchEvent, WatchId, WatchSender};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an HTTP status to the engine's error taxonomy.
pub(crate) fn status_error(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::PermissionDenied(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            Error::ValidationFailed(message)
        }
        _ => Error::Unreachable(format!("{}: {}", status, message)),
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> Error {
    Error::Unreachable(err.to_string())
}

/// Watches awaiting their `subscribed` acknowledgement, by request id.
type PendingMap = DashMap<String, (WatchSender, oneshot::Sender<Result<WatchId>>)>;

#[derive(Default)]
struct Router {
    watches: DashMap<WatchId, WatchSender>,
    pending: PendingMap,
}

impl Router {
    /// Returns a watch id whose receiver is gone, so the caller can close it.
    fn dispatch(&self, message: ServerMessage) -> Option<WatchId> {
        match message {
            ServerMessage::Subscribed {
                watch_id,
                request_id,
                topic,
            } => {
                let pending = request_id.and_then(|r| self.pending.remove(&r));
                match pending {
                    Some((_, (sender, ack))) => {
                        self.watches.insert(watch_id.clone(), sender);
                        if ack.send(Ok(watch_id.clone())).is_err() {
                            self.watches.remove(&watch_id);
                            return Some(watch_id);
                        }
                    }
                    None => {
                        tracing::warn!(watch_id = %watch_id, topic = %topic, "unsolicited subscription");
                        return Some(watch_id);
                    }
                }
            }
            ServerMessage::Snapshot {
                watch_id,
                topic,
                documents,
            } => {
                let delivered = self
                    .watches
                    .get(&watch_id)
                    .map(|w| w.send(Ok(documents)).is_ok());
                match delivered {
                    Some(true) => {
                        tracing::trace!(watch_id = %watch_id, topic = %topic, "snapshot delivered")
                    }
                    Some(false) => {
                        self.watches.remove(&watch_id);
                        return Some(watch_id);
                    }
                    None => {}
                }
            }
            ServerMessage::WatchError { watch_id, error } => {
                if let Some((_, sender)) = self.watches.remove(&watch_id) {
                    let _ = sender.send(Err(Error::from(error)));
                }
            }
            ServerMessage::Error {
                message,
                request_id,
                code,
            } => {
                let pending = request_id.and_then(|r| self.pending.remove(&r));
                match (pending, code) {
                    (Some((_, (_, ack))), Some(code)) => {
                        let _ = ack.send(Err(WireError { code, message }.into()));
                    }
                    (Some((_, (_, ack))), None) => {
                        let _ = ack.send(Err(Error::Protocol(message)));
                    }
                    (None, _) => tracing::warn!(error = %message, "store reported an error"),
                }
            }
            ServerMessage::Pong => tracing::trace!("pong"),
        }
        None
    }

    /// Fail every watch and pending subscribe.
    fn fail_all(&self, reason: &str) {
        let ids: Vec<WatchId> = self.watches.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, sender)) = self.watches.remove(&id) {
                let _ = sender.send(Err(Error::Unreachable(reason.to_string())));
            }
        }
        let requests: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for request_id in requests {
            if let Some((_, (_, ack))) = self.pending.remove(&request_id) {
                let _ = ack.send(Err(Error::Unreachable(reason.to_string())));
            }
        }
    }
}

struct Socket {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Socket {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.outgoing.is_closed()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Store client over HTTP + WebSocket.
pub struct RemoteBackend {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
    router: Arc<Router>,
    socket: Mutex<Option<Socket>>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("base_url", &self.base_url)
            .field("watches", &self.router.watches.len())
            .finish()
    }
}

impl RemoteBackend {
    /// `base_url` is the store root, e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http: reqwest::Client::new(),
            router: Arc::new(Router::default()),
            socket: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}/v1/{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, ErrorBody::message_from(&body)))
    }

    async fn json<T: serde::de::DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        Self::send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))
    }

    fn watch_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/v1/watch", ws_base)
    }

    /// Current outgoing channel, connecting first if needed.
    async fn outgoing(&self) -> Result<mpsc::UnboundedSender<ClientMessage>> {
        let mut slot = self.socket.lock().await;
        if let Some(socket) = slot.as_ref() {
            if socket.is_alive() {
                return Ok(socket.outgoing.clone());
            }
        }

        let socket = self.connect().await?;
        let outgoing = socket.outgoing.clone();
        *slot = Some(socket);
        Ok(outgoing)
    }

    async fn connect(&self) -> Result<Socket> {
        let url = self.watch_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Protocol(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Protocol(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(response) => {
                    let status = StatusCode::from_u16(response.status().as_u16())
                        .unwrap_or(StatusCode::BAD_GATEWAY);
                    status_error(status, "watch handshake rejected".to_string())
                }
                other => Error::Unreachable(other.to_string()),
            })?;
        tracing::info!(url = %url, "watch socket connected");

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let alive = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode watch message");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let router = self.router.clone();
        let reader_alive = alive.clone();
        let reader_outgoing = outgoing.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "watch socket error");
                        break;
                    }
                };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        if let Some(stale) = router.dispatch(message) {
                            let _ = reader_outgoing.send(ClientMessage::Unsubscribe { watch_id: stale });
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "undecodable watch message"),
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            router.fail_all("watch socket closed");
            tracing::info!("watch socket closed");
        });

        Ok(Socket {
            outgoing,
            alive,
            reader,
            writer,
        })
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn insert(&self, topic: Topic, fields: Fields) -> Result<DocumentId> {
        let response: InsertResponse =
            Self::json(self.request(Method::POST, topic.collection()).json(&fields)).await?;
        Ok(response.id)
    }

    async fn get(&self, topic: Topic, id: &str) -> Result<Option<Document>> {
        let path = format!("{}/{}", topic, id);
        match Self::json::<Document>(self.request(Method::GET, &path)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        let path = format!("{}/{}", topic, id);
        Self::send(self.request(Method::PATCH, &path).json(&fields)).await?;
        Ok(())
    }

    async fn set(&self, topic: Topic, id: &str, fields: Fields) -> Result<()> {
        let path = format!("{}/{}", topic, id);
        Self::send(self.request(Method::PUT, &path).json(&fields)).await?;
        Ok(())
    }

    async fn delete(&self, topic: Topic, id: &str) -> Result<()> {
        let path = format!("{}/{}", topic, id);
        Self::send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn query(&self, topic: Topic, query: &Query) -> Result<Vec<Document>> {
        let mut builder = self.request(Method::GET, topic.collection());
        if !query.filters.is_empty() {
            let filters = serde_json::to_string(&query.filters)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            builder = builder.query(&[("where", filters)]);
        }
        if let Some(limit) = query.limit {
            builder = builder.query(&[("limit", limit)]);
        }
        Self::json(builder).await
    }

    async fn increment(&self, topic: Topic, id: &str, field: &str, delta: f64) -> Result<f64> {
        let path = format!("{}/{}/increment", topic, id);
        let body = IncrementRequest {
            field: field.to_string(),
            delta,
        };
        let response: IncrementResponse =
            Self::json(self.request(Method::POST, &path).json(&body)).await?;
        Ok(response.value)
    }

    async fn batch_delete(&self, topic: Topic, ids: &[DocumentId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let path = format!("{}/batch-delete", topic);
        let body = BatchDeleteRequest { ids: ids.to_vec() };
        let response: BatchDeleteResponse =
            Self::json(self.request(Method::POST, &path).json(&body)).await?;
        Ok(response.deleted)
    }

    async fn subscribe(&self, topic: Topic) -> Result<Watch> {
        let outgoing = self.outgoing().await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel::<WatchEvent>();
        let (ack, acked) = oneshot::channel();
        self.router
            .pending
            .insert(request_id.clone(), (sender, ack));

        if outgoing
            .send(ClientMessage::Subscribe {
                topic,
                request_id: Some(request_id.clone()),
            })
            .is_err()
        {
            self.router.pending.remove(&request_id);
            return Err(Error::Unreachable("watch socket closed".to_string()));
        }

        let id = match tokio::time::timeout(SUBSCRIBE_TIMEOUT, acked).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(Error::Unreachable("watch socket closed".to_string())),
            Err(_) => {
                self.router.pending.remove(&request_id);
                return Err(Error::Unreachable(format!(
                    "no subscription acknowledgement for {}",
                    topic
                )));
            }
        };

        tracing::debug!(watch_id = %id, topic = %topic, "remote watch opened");
        Ok(Watch { id, topic, events })
    }

    async fn unsubscribe(&self, watch_id: &str) -> Result<()> {
        self.router.watches.remove(watch_id);
        let slot = self.socket.lock().await;
        if let Some(socket) = slot.as_ref().filter(|s| s.is_alive()) {
            let _ = socket.outgoing.send(ClientMessage::Unsubscribe {
                watch_id: watch_id.to_string(),
            });
        }
        Ok(())
    }
}
