use crate::http::{TransportError, TransportResult};
use crate::redact::redact_secrets;
use crate::types::ServerFrame;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

const LINK_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Frame(ServerFrame),
    Closed { reason: String },
}

/// A live realtime connection: inbound events plus the means to tear it
/// down. Dropping the link also signals shutdown.
pub struct RealtimeLink {
    events: mpsc::Receiver<LinkEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeLink {
    pub fn new(
        events: mpsc::Receiver<LinkEvent>,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// `None` once the transport side has gone away.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Signals shutdown and waits for the reader task to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeLink {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub trait RealtimeTransport: Send + Sync {
    /// Opens a link authenticated with `token`.
    fn open<'a>(&'a self, url: &'a str, token: &'a str) -> BoxFuture<'a, TransportResult<RealtimeLink>>;
}

pub(crate) fn auth_frame(token: &str) -> String {
    json!({"event": "auth", "data": {"token": token}}).to_string()
}

fn map_ws_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            TransportError::Unauthorized(format!("upgrade rejected ({})", response.status()))
        }
        other => TransportError::ConnectionFailed(redact_secrets(&other.to_string()).into_owned()),
    }
}

/// Websocket transport over tokio-tungstenite. The token travels both as a
/// bearer header on the upgrade request and in the first `auth` frame.
#[derive(Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl RealtimeTransport for WebSocketTransport {
    fn open<'a>(&'a self, url: &'a str, token: &'a str) -> BoxFuture<'a, TransportResult<RealtimeLink>> {
        Box::pin(async move {
            let mut request = url
                .into_client_request()
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, bearer);

            let (ws_stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(map_ws_error)?;
            let (mut sink, mut stream) = ws_stream.split();

            sink.send(Message::Text(auth_frame(token).into()))
                .await
                .map_err(|e| TransportError::SendFailed(redact_secrets(&e.to_string()).into_owned()))?;

            let (tx, rx) = mpsc::channel(LINK_BUFFER);
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

            let task = tokio::spawn(async move {
                let reason = loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            let _ = sink.close().await;
                            break None;
                        }
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(frame) => {
                                        if tx.send(LinkEvent::Frame(frame)).await.is_err() {
                                            break None;
                                        }
                                    }
                                    Err(e) => tracing::debug!(error = %e, "ignoring malformed realtime frame"),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                break Some(
                                    frame
                                        .map(|f| f.reason.as_str().to_string())
                                        .filter(|r| !r.is_empty())
                                        .unwrap_or_else(|| "closed by server".to_string()),
                                );
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break Some(redact_secrets(&e.to_string()).into_owned()),
                            None => break Some("stream ended".to_string()),
                        }
                    }
                };

                if let Some(reason) = reason {
                    let _ = tx.send(LinkEvent::Closed { reason }).await;
                }
            });

            Ok(RealtimeLink::new(rx, shutdown_tx, task))
        })
    }
}
