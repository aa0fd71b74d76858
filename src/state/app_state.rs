use super::token_store::{KeyringBackend, SecretBackend, TokenStore};
use crate::api::{auth, BookingBook, BookingFilter, FetchOptions};
use crate::http::{ApiClient, ApiError, HttpTransport, ReqwestTransport};
use crate::notifications::{spawn_dispatch_loop, AlertController, EventCategory, NotificationDispatcher};
use crate::realtime::{RealtimeSession, RealtimeTransport, WebSocketTransport};
use crate::settings::Settings;
use crate::types::{AuthSession, SignupRequest, UserProfile};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything one signed-in client session needs, built once and passed
/// around by clone.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tokens: TokenStore,
    pub api: ApiClient,
    pub realtime: RealtimeSession,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub bookings: Arc<BookingBook>,
    pub profile: Arc<Mutex<Option<UserProfile>>>,
}

impl AppState {
    pub fn create(settings: Settings) -> Result<Self, reqwest::Error> {
        let http = ReqwestTransport::new(&settings)?;
        let secrets = KeyringBackend::new(settings.keyring_service.clone());
        Ok(Self::with_parts(
            settings,
            Arc::new(secrets),
            Arc::new(http),
            Arc::new(WebSocketTransport::new()),
        ))
    }

    pub fn with_parts(
        settings: Settings,
        secrets: Arc<dyn SecretBackend>,
        http: Arc<dyn HttpTransport>,
        realtime: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let settings = Arc::new(settings);
        let tokens = TokenStore::new(secrets);
        let api = ApiClient::new(settings.clone(), http, tokens.clone());
        let realtime = RealtimeSession::spawn(&settings, tokens.clone(), realtime);
        let alerts = AlertController::new(settings.alert_duration());
        let dispatcher = Arc::new(NotificationDispatcher::new(alerts));
        let bookings = Arc::new(BookingBook::new(api.clone(), settings.bookings_cache_ttl()));

        let state = Self {
            settings,
            tokens,
            api,
            realtime,
            dispatcher,
            bookings,
            profile: Arc::new(Mutex::new(None)),
        };
        state.register_refresh_hooks();
        state
    }

    fn register_refresh_hooks(&self) {
        let bookings = self.bookings.clone();
        self.dispatcher
            .register(EventCategory::ShipmentUpdate, move |_| {
                let bookings = bookings.clone();
                async move {
                    bookings
                        .fetch_bookings(&BookingFilter::default(), FetchOptions { force: true })
                        .await
                        .map(|_| ())
                }
                .boxed()
            });

        let api = self.api.clone();
        let profile = self.profile.clone();
        self.dispatcher
            .register(EventCategory::ProfileUpdated, move |_| {
                let api = api.clone();
                let profile = profile.clone();
                async move {
                    let user = auth::me(&api).await?;
                    *profile.lock().await = Some(user);
                    Ok::<(), ApiError>(())
                }
                .boxed()
            });
    }

    async fn start_session(&self, session: &AuthSession) {
        *self.profile.lock().await = session.user.clone();
        self.bookings.invalidate();
        self.realtime.connect().await;
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ApiError> {
        let session = auth::login(&self.api, email, password).await?;
        self.start_session(&session).await;
        Ok(session)
    }

    pub async fn signup(&self, body: &SignupRequest) -> Result<AuthSession, ApiError> {
        let session = auth::signup(&self.api, body).await?;
        self.start_session(&session).await;
        Ok(session)
    }

    /// Reconnects realtime for a session persisted by an earlier run.
    /// Returns whether stored credentials were found.
    pub async fn resume(&self) -> Result<bool, ApiError> {
        if self.tokens.access_token().await?.is_none() {
            return Ok(false);
        }
        self.realtime.connect().await;
        Ok(true)
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.realtime.disconnect().await;
        self.bookings.invalidate();
        self.dispatcher.alerts().dismiss();
        *self.profile.lock().await = None;
        auth::logout(&self.api).await
    }

    pub async fn refresh_profile(&self) -> Result<UserProfile, ApiError> {
        let user = auth::me(&self.api).await?;
        *self.profile.lock().await = Some(user.clone());
        Ok(user)
    }

    /// Routes realtime notifications through the dispatcher until the
    /// session is disposed.
    pub fn start_dispatching(&self) -> JoinHandle<()> {
        spawn_dispatch_loop(self.dispatcher.clone(), self.realtime.subscribe())
    }

    pub async fn dispose(&self) {
        self.realtime.shutdown().await;
        self.dispatcher.alerts().dismiss();
    }
}
