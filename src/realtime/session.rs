use super::session_loop::{Command, SessionLoop};
use super::transport::RealtimeTransport;
use crate::settings::Settings;
use crate::state::TokenStore;
use crate::types::{NotificationPayload, ServerFrame};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Notification(NotificationPayload),
    /// Any other server event, passed through untouched.
    Frame(ServerFrame),
}

/// Cheap handle to the realtime session task. Clones share one connection.
#[derive(Clone)]
pub struct RealtimeSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeSession {
    pub fn spawn(
        settings: &Settings,
        tokens: TokenStore,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        SessionLoop::new(settings, tokens, transport, rx, state_tx, events.clone()).spawn();

        Self {
            commands,
            state,
            events,
        }
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).is_err() {
            tracing::debug!("realtime session loop is not running");
            return;
        }
        let _ = rx.await;
    }

    /// Opens the connection unless one is already open or opening. Resolves
    /// once the attempt has been made.
    pub async fn connect(&self) {
        self.request(Command::Connect).await;
    }

    /// Closes the connection and stops automatic reconnection until the next
    /// `connect`.
    pub async fn disconnect(&self) {
        self.request(Command::Disconnect).await;
    }

    pub async fn shutdown(&self) {
        self.request(Command::Shutdown).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::http::TransportError;
    use crate::testing::MockRealtime;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> Settings {
        Settings {
            realtime_url: "ws://127.0.0.1:1/realtime".to_string(),
            ..Settings::default()
        }
    }

    async fn session(
        settings: &Settings,
        mock: &MockRealtime,
        token: Option<&str>,
    ) -> (RealtimeSession, TokenStore) {
        let tokens = TokenStore::in_memory();
        if let Some(token) = token {
            tokens.set_tokens(Some(token), Some("R1")).await.unwrap();
        }
        let session = RealtimeSession::spawn(settings, tokens.clone(), Arc::new(mock.clone()));
        (session, tokens)
    }

    async fn wait_for(session: &RealtimeSession, state: ConnectionState) {
        let mut rx = session.watch_state();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_open_one_link() {
        let mock = MockRealtime::acking();
        mock.set_open_delay(Duration::from_millis(100));
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;

        tokio::join!(session.connect(), session.connect());
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        assert_eq!(mock.opened(), 1);
        assert_eq!(mock.live(), 1);
        assert_eq!(mock.token_of(0).as_deref(), Some("A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn server_drop_reconnects_after_delay() {
        let mock = MockRealtime::acking();
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        mock.drop_link(0);
        settle().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.live(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.opened(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(mock.opened(), 2);
        assert_eq!(mock.live(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_never_reconnects() {
        let mock = MockRealtime::acking();
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.live(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.opened(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_reconnect() {
        let mock = MockRealtime::acking();
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        mock.drop_link(0);
        settle().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.disconnect().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.opened(), 1);
        assert_eq!(mock.live(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_link_is_replaced_after_connect_timeout() {
        let mut settings = settings();
        settings.realtime.liveness_interval_ms = 1_000;
        settings.realtime.connect_timeout_ms = 2_000;
        let mock = MockRealtime::new();
        let (session, _tokens) = session(&settings, &mock, Some("A1")).await;

        session.connect().await;
        settle().await;
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(mock.live(), 1);

        tokio::time::sleep(Duration::from_millis(1_400)).await;
        assert_eq!(mock.live(), 1);

        // Torn down on the 2 s tick; the retry backs off at least 1 s.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.live(), 0);
        assert_eq!(mock.opened(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(mock.opened(), 2);
        assert_eq!(mock.live(), 1);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_defers_to_liveness_check() {
        let mock = MockRealtime::acking();
        let (session, tokens) = session(&settings(), &mock, None).await;

        session.connect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.open_attempts(), 0);

        tokens.set_tokens(Some("A1"), Some("R1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(mock.token_of(0).as_deref(), Some("A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_error_retries_quickly_with_the_current_token() {
        let mock = MockRealtime::new();
        let (session, tokens) = session(&settings(), &mock, Some("A1")).await;
        session.connect().await;
        assert_eq!(session.state(), ConnectionState::Connecting);

        mock.emit(0, ServerFrame::new("connect_error", json!({"message": "jwt expired"})))
            .await;
        tokens.set_tokens(Some("A2"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(mock.opened(), 1);
        assert_eq!(mock.live(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.opened(), 2);
        assert_eq!(mock.token_of(1).as_deref(), Some("A2"));

        mock.emit(1, ServerFrame::new("connected", json!(null))).await;
        wait_for(&session, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_upgrade_counts_as_auth_error() {
        let mock = MockRealtime::acking();
        mock.reject_with(Some(TransportError::Unauthorized("401".to_string())));
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;

        session.connect().await;
        assert_eq!(mock.open_attempts(), 1);
        mock.reject_with(None);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(mock.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_bounded() {
        let mut settings = settings();
        settings.realtime.liveness_interval_ms = 600_000;
        let mock = MockRealtime::acking();
        mock.reject_with(Some(TransportError::ConnectionFailed("refused".to_string())));
        let (session, _tokens) = session(&settings, &mock, Some("A1")).await;

        session.connect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.open_attempts(), 6);
        assert_eq!(session.state(), ConnectionState::Disconnected);

        mock.reject_with(None);
        tokio::time::sleep(Duration::from_secs(600)).await;
        wait_for(&session, ConnectionState::Connected).await;
        assert_eq!(mock.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_reach_subscribers() {
        let mock = MockRealtime::acking();
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;
        let mut events = session.subscribe();
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        mock.emit(
            0,
            ServerFrame::new(
                "notification",
                json!({
                    "title": "Driver assigned",
                    "body": "Your pickup is on the way",
                    "data": {"type": "driver_assigned", "bookingId": "b-1"}
                }),
            ),
        )
        .await;
        mock.emit(0, ServerFrame::new("presence", json!({"online": 3}))).await;

        match events.recv().await.unwrap() {
            RealtimeEvent::Notification(payload) => {
                assert_eq!(payload.title, "Driver assigned");
                assert_eq!(payload.data.kind.as_deref(), Some("driver_assigned"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            RealtimeEvent::Frame(ServerFrame::new("presence", json!({"online": 3})))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_link_and_ignores_later_commands() {
        let mock = MockRealtime::acking();
        let (session, _tokens) = session(&settings(), &mock, Some("A1")).await;
        session.connect().await;
        wait_for(&session, ConnectionState::Connected).await;

        session.shutdown().await;
        assert_eq!(mock.live(), 0);

        session.connect().await;
        assert_eq!(mock.open_attempts(), 1);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
