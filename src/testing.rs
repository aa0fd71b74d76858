//! Fakes shared by unit tests.

use crate::http::{ApiResponse, HttpTransport, OutgoingRequest, TransportError, TransportResult};
use crate::realtime::{LinkEvent, RealtimeLink, RealtimeTransport};
use crate::types::ServerFrame;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

type Handler = Box<dyn Fn(&OutgoingRequest) -> ApiResponse + Send + Sync>;

pub struct MockHttp {
    handler: Handler,
    calls: Mutex<Vec<OutgoingRequest>>,
    refresh_delay: Duration,
}

impl MockHttp {
    pub fn new(handler: impl Fn(&OutgoingRequest) -> ApiResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            refresh_delay: Duration::ZERO,
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn requests_to(&self, path: &str) -> Vec<OutgoingRequest> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|r| r.url.ends_with(path))
            .cloned()
            .collect()
    }

    pub fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.requests_to(path)
            .into_iter()
            .map(|r| r.bearer)
            .collect()
    }
}

impl HttpTransport for MockHttp {
    fn execute(&self, request: OutgoingRequest) -> BoxFuture<'_, TransportResult<ApiResponse>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(request.clone());
            tokio::task::yield_now().await;
            if request.url.ends_with("/auth/refresh") && !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            Ok((self.handler)(&request))
        })
    }
}

pub fn json_response(status: u16, body: Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

struct MockLinkSlot {
    token: String,
    events: Option<mpsc::Sender<LinkEvent>>,
}

/// Realtime transport that hands out in-process links and tracks how many
/// are alive.
#[derive(Clone, Default)]
pub struct MockRealtime {
    links: Arc<Mutex<Vec<MockLinkSlot>>>,
    live: Arc<AtomicUsize>,
    auto_ack: Arc<std::sync::atomic::AtomicBool>,
    reject_with: Arc<Mutex<Option<TransportError>>>,
    open_delay: Arc<Mutex<Duration>>,
    attempts: Arc<AtomicUsize>,
}

impl MockRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acking() -> Self {
        let mock = Self::default();
        mock.auto_ack.store(true, Ordering::SeqCst);
        mock
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = delay;
    }

    /// Every open fails with `err` until cleared with `None`.
    pub fn reject_with(&self, err: Option<TransportError>) {
        *self.reject_with.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = err;
    }

    pub fn open_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.slots().len()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn token_of(&self, index: usize) -> Option<String> {
        self.slots().get(index).map(|slot| slot.token.clone())
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<MockLinkSlot>> {
        self.links.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn sender(&self, index: usize) -> Option<mpsc::Sender<LinkEvent>> {
        self.slots().get(index).and_then(|slot| slot.events.clone())
    }

    pub async fn emit(&self, index: usize, frame: ServerFrame) {
        if let Some(tx) = self.sender(index) {
            let _ = tx.send(LinkEvent::Frame(frame)).await;
        }
    }

    /// Simulates the server side dropping the connection.
    pub fn drop_link(&self, index: usize) {
        if let Some(slot) = self.slots().get_mut(index) {
            slot.events = None;
        }
    }
}

impl RealtimeTransport for MockRealtime {
    fn open<'a>(&'a self, _url: &'a str, token: &'a str) -> BoxFuture<'a, TransportResult<RealtimeLink>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.open_delay.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let rejection = self
                .reject_with
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            if let Some(err) = rejection {
                return Err(err);
            }

            let (event_tx, event_rx) = mpsc::channel(16);
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            if self.auto_ack.load(Ordering::SeqCst) {
                let _ = event_tx
                    .send(LinkEvent::Frame(ServerFrame::new("connected", Value::Null)))
                    .await;
            }

            self.live.fetch_add(1, Ordering::SeqCst);
            let live = self.live.clone();
            let task = tokio::spawn(async move {
                let _ = shutdown_rx.await;
                live.fetch_sub(1, Ordering::SeqCst);
            });

            self.slots().push(MockLinkSlot {
                token: token.to_string(),
                events: Some(event_tx),
            });
            Ok(RealtimeLink::new(event_rx, shutdown_tx, task))
        })
    }
}
