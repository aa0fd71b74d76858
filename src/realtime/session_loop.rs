use super::policy::{reconnect_delay, Trigger};
use super::session::{ConnectionState, RealtimeEvent};
use super::transport::{LinkEvent, RealtimeLink, RealtimeTransport};
use crate::http::TransportError;
use crate::settings::{RealtimeSettings, Settings};
use crate::state::TokenStore;
use crate::types::{NotificationPayload, ServerFrame};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

pub(crate) enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct ConnectionHandle {
    id: u64,
    link: RealtimeLink,
    opened_at: Instant,
}

enum Step {
    Command(Option<Command>),
    Link(Option<LinkEvent>),
    ReconnectDue,
    Liveness,
}

/// Owns the connection handle. Every state change happens on this task.
pub(crate) struct SessionLoop {
    settings: RealtimeSettings,
    url: String,
    tokens: TokenStore,
    transport: Arc<dyn RealtimeTransport>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<RealtimeEvent>,
    handle: Option<ConnectionHandle>,
    wanted: bool,
    attempts: u32,
    reconnect_at: Option<Instant>,
    next_handle_id: u64,
}

async fn link_event(handle: Option<&mut ConnectionHandle>) -> Option<LinkEvent> {
    match handle {
        Some(handle) => handle.link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn frame_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .unwrap_or("unauthorized")
        .to_string()
}

impl SessionLoop {
    pub(crate) fn new(
        settings: &Settings,
        tokens: TokenStore,
        transport: Arc<dyn RealtimeTransport>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        events: broadcast::Sender<RealtimeEvent>,
    ) -> Self {
        Self {
            settings: settings.realtime.clone(),
            url: settings.realtime_url.clone(),
            tokens,
            transport,
            commands,
            state,
            events,
            handle: None,
            wanted: false,
            attempts: 0,
            reconnect_at: None,
            next_handle_id: 0,
        }
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let period = self.settings.liveness_interval();
        let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                event = link_event(self.handle.as_mut()) => Step::Link(event),
                () = reconnect_due(self.reconnect_at) => Step::ReconnectDue,
                _ = liveness.tick() => Step::Liveness,
            };

            match step {
                Step::Command(None) => break,
                Step::Command(Some(Command::Connect(reply))) => {
                    self.wanted = true;
                    if self.current() == ConnectionState::Disconnected {
                        self.attempts = 0;
                        self.attempt().await;
                    }
                    let _ = reply.send(());
                }
                Step::Command(Some(Command::Disconnect(reply))) => {
                    self.wanted = false;
                    self.reconnect_at = None;
                    self.attempts = 0;
                    self.teardown().await;
                    self.set_state(ConnectionState::Disconnected);
                    tracing::info!("realtime disconnected");
                    let _ = reply.send(());
                }
                Step::Command(Some(Command::Shutdown(reply))) => {
                    self.wanted = false;
                    self.teardown().await;
                    self.set_state(ConnectionState::Disconnected);
                    let _ = reply.send(());
                    break;
                }
                Step::Link(Some(LinkEvent::Frame(frame))) => self.on_frame(frame).await,
                Step::Link(Some(LinkEvent::Closed { reason })) => self.on_dropped(&reason).await,
                Step::Link(None) => self.on_dropped("link closed").await,
                Step::ReconnectDue => {
                    self.reconnect_at = None;
                    if self.wanted {
                        self.attempt().await;
                    }
                }
                Step::Liveness => self.on_liveness().await,
            }
        }

        self.teardown().await;
        tracing::debug!("realtime session loop stopped");
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.link.close().await;
            tracing::debug!(handle = handle.id, "realtime link closed");
        }
    }

    /// Replaces any existing handle with a freshly opened one.
    async fn attempt(&mut self) {
        self.reconnect_at = None;
        self.teardown().await;

        let token = match self.tokens.access_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("no access token; realtime stays disconnected");
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "token storage unavailable; realtime stays disconnected");
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        self.set_state(ConnectionState::Connecting);
        let opened = tokio::time::timeout(
            self.settings.connect_timeout(),
            self.transport.open(&self.url, &token),
        )
        .await;

        match opened {
            Ok(Ok(link)) => {
                self.next_handle_id += 1;
                tracing::debug!(handle = self.next_handle_id, "realtime link opened");
                self.handle = Some(ConnectionHandle {
                    id: self.next_handle_id,
                    link,
                    opened_at: Instant::now(),
                });
            }
            Ok(Err(TransportError::Unauthorized(reason))) => {
                self.set_state(ConnectionState::Disconnected);
                self.schedule(Trigger::AuthRejected, &reason);
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                self.schedule(Trigger::AttemptFailed, &e.to_string());
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                self.schedule(Trigger::AttemptFailed, "connect timed out");
            }
        }
    }

    fn schedule(&mut self, trigger: Trigger, reason: &str) {
        self.attempts += 1;
        match reconnect_delay(&self.settings, trigger, self.attempts) {
            Some(delay) => {
                tracing::warn!(
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "realtime reconnect scheduled"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                tracing::warn!(
                    attempts = self.attempts - 1,
                    reason,
                    "realtime reconnect attempts exhausted"
                );
                self.reconnect_at = None;
            }
        }
    }

    async fn on_frame(&mut self, frame: ServerFrame) {
        match frame.event.as_str() {
            "connected" => {
                if self.current() != ConnectionState::Connected {
                    tracing::info!("realtime connected");
                }
                self.attempts = 0;
                self.reconnect_at = None;
                self.set_state(ConnectionState::Connected);
            }
            "connect_error" | "unauthorized" => {
                let reason = frame_message(&frame.data);
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                if self.wanted {
                    self.schedule(Trigger::AuthRejected, &reason);
                }
            }
            "notification" => match serde_json::from_value::<NotificationPayload>(frame.data) {
                Ok(payload) => {
                    let _ = self.events.send(RealtimeEvent::Notification(payload));
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed notification"),
            },
            _ => {
                let _ = self.events.send(RealtimeEvent::Frame(frame));
            }
        }
    }

    async fn on_dropped(&mut self, reason: &str) {
        let was_connected = self.current() == ConnectionState::Connected;
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
        if !self.wanted {
            return;
        }

        tracing::info!(reason, "realtime link dropped");
        if was_connected {
            self.attempts = 0;
            self.schedule(Trigger::Dropped, reason);
        } else {
            self.schedule(Trigger::AttemptFailed, reason);
        }
    }

    /// Periodic check that restarts a wanted session nothing else is driving.
    async fn on_liveness(&mut self) {
        if !self.wanted || self.reconnect_at.is_some() {
            return;
        }

        let stalled = self.handle.as_ref().map(|handle| {
            self.current() == ConnectionState::Connecting
                && handle.opened_at.elapsed() >= self.settings.connect_timeout()
        });

        match stalled {
            None => {
                tracing::debug!("liveness check found the session down");
                self.attempts = 0;
                self.attempt().await;
            }
            Some(true) => {
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
                self.schedule(Trigger::AttemptFailed, "server never acknowledged the connection");
            }
            Some(false) => {}
        }
    }
}
