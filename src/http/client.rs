use super::error::{normalize_error_message, ApiError};
use super::refresh::{Join, RefreshCoordinator, RefreshLease};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, OutgoingRequest};
use crate::redact::redact_secrets;
use crate::settings::Settings;
use crate::state::TokenStore;
use crate::types::{RefreshRequestBody, RefreshResponseBody};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const REFRESH_PATH: &str = "/auth/refresh";
const UNAUTHORIZED: u16 = 401;

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Http {
            status: response.status,
            message: normalize_error_message(&response.body),
        })
    }
}

/// Authenticated client for the booking backend.
///
/// Every request carries the stored access token. A 401 triggers one
/// coordinated refresh (see [`RefreshCoordinator`]) and a single retry.
#[derive(Clone)]
pub struct ApiClient {
    settings: Arc<Settings>,
    transport: Arc<dyn HttpTransport>,
    tokens: TokenStore,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(settings: Arc<Settings>, transport: Arc<dyn HttpTransport>, tokens: TokenStore) -> Self {
        Self {
            settings,
            transport,
            tokens,
            refresh: Arc::new(RefreshCoordinator::new()),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.is_refreshing()
    }

    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse, ApiError> {
        let outgoing = OutgoingRequest::from_api(&self.settings, request, bearer);
        Ok(self.transport.execute(outgoing).await?)
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if !request.is_authenticated() {
            return into_result(self.execute(&request, None).await?);
        }

        let mut token = self.tokens.access_token().await?;
        let mut retried = false;
        loop {
            let response = self.execute(&request, token.as_deref()).await?;
            if response.status != UNAUTHORIZED || retried {
                return into_result(response);
            }

            retried = true;
            tracing::debug!(path = %request.path, "access token rejected");
            token = Some(self.fresh_access_token(token.as_deref()).await?);
        }
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        serde_json::from_str(&response.body).map_err(ApiError::decode)
    }

    async fn fresh_access_token(&self, sent_with: Option<&str>) -> Result<String, ApiError> {
        let stored = self.tokens.access_token().await?;
        let rx = match self.refresh.join(sent_with, stored) {
            Join::Fresh(token) => return Ok(token),
            Join::Wait(rx) => rx,
            Join::Lead(rx) => {
                // Runs detached so an abandoned caller cannot strand the queue.
                let client = self.clone();
                let lease = RefreshLease::new(self.refresh.clone());
                tokio::spawn(async move {
                    let outcome = client.refresh_tokens().await;
                    let drained = lease.finish(outcome);
                    tracing::debug!(drained, "token refresh settled");
                });
                rx
            }
        };
        rx.await.unwrap_or(Err(ApiError::SessionExpired))
    }

    async fn refresh_tokens(&self) -> Result<String, ApiError> {
        let generation = self.tokens.generation().await;
        let Some(refresh_token) = self.tokens.refresh_token().await? else {
            tracing::warn!("no refresh token stored; session expired");
            self.tokens.clear_tokens().await?;
            return Err(ApiError::SessionExpired);
        };

        let request = ApiRequest::post(REFRESH_PATH)
            .anonymous()
            .json(&RefreshRequestBody {
                refresh_token: &refresh_token,
            })
            .map_err(ApiError::decode)?;

        let parsed = match self.execute(&request, None).await {
            Ok(res) if res.is_success() => {
                serde_json::from_str::<RefreshResponseBody>(&res.body).map_err(|e| e.to_string())
            }
            Ok(res) => Err(format!("refresh rejected with status {}", res.status)),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(body) if !body.access_token.trim().is_empty() => {
                let access = body.access_token.trim().to_string();
                let stored = self
                    .tokens
                    .set_tokens_for(generation, Some(&access), body.refresh_token.as_deref())
                    .await?;
                if !stored {
                    tracing::info!("session ended while refreshing; dropping new tokens");
                    return Err(ApiError::SessionExpired);
                }
                tracing::info!(rotated = body.refresh_token.is_some(), "access token refreshed");
                Ok(access)
            }
            Ok(_) => {
                tracing::warn!("refresh response carried no access token");
                self.tokens.clear_tokens().await?;
                Err(ApiError::SessionExpired)
            }
            Err(reason) => {
                tracing::warn!(reason = %redact_secrets(&reason), "token refresh failed");
                self.tokens.clear_tokens().await?;
                Err(ApiError::SessionExpired)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::http::transport::bearer_header;
    use crate::testing::{json_response, MockHttp};
    use futures_util::future::join_all;
    use serde_json::json;
    use std::time::Duration;

    fn client_with(mock: Arc<MockHttp>, tokens: TokenStore) -> ApiClient {
        let settings = Settings {
            api_base_url: "http://backend.test/api".to_string(),
            ..Settings::default()
        };
        ApiClient::new(Arc::new(settings), mock, tokens)
    }

    /// Accepts only `A2` on `/bookings`; refresh hands out `A2`/`R1`.
    fn rotating_backend() -> MockHttp {
        MockHttp::new(|req| {
            if req.url.ends_with(REFRESH_PATH) {
                return json_response(200, json!({"accessToken": "A2", "refreshToken": "R1"}));
            }
            match req.bearer.as_deref() {
                Some("A2") => json_response(200, json!([])),
                _ => json_response(401, json!({"message": "jwt expired"})),
            }
        })
    }

    async fn logged_in() -> TokenStore {
        let tokens = TokenStore::in_memory();
        tokens.set_tokens(Some("A1"), Some("R1")).await.unwrap();
        tokens
    }

    #[tokio::test]
    async fn attaches_bearer_token_when_present() {
        let mock = Arc::new(MockHttp::new(|_| json_response(200, json!({"ok": true}))));
        let client = client_with(mock.clone(), logged_in().await);

        client.send(ApiRequest::get("/users/me")).await.unwrap();
        assert_eq!(mock.bearers_for("/users/me"), vec![Some("A1".to_string())]);
    }

    #[tokio::test]
    async fn sends_unauthenticated_without_token() {
        let mock = Arc::new(MockHttp::new(|_| json_response(200, json!([]))));
        let client = client_with(mock.clone(), TokenStore::in_memory());

        client.send(ApiRequest::get("/bookings")).await.unwrap();
        assert_eq!(mock.bearers_for("/bookings"), vec![None]);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_request_retried() {
        let mock = Arc::new(rotating_backend());
        let tokens = logged_in().await;
        let client = client_with(mock.clone(), tokens.clone());

        let bookings: Vec<serde_json::Value> =
            client.send_json(ApiRequest::get("/bookings")).await.unwrap();
        assert!(bookings.is_empty());

        let bearers = mock.bearers_for("/bookings");
        assert_eq!(bearers, vec![Some("A1".to_string()), Some("A2".to_string())]);
        assert_eq!(bearer_header(bearers[1].as_deref().unwrap()).unwrap(), "Bearer A2");
        assert_eq!(tokens.access_token().await.unwrap().as_deref(), Some("A2"));
        assert_eq!(tokens.refresh_token().await.unwrap().as_deref(), Some("R1"));

        let refresh = mock.requests_to(REFRESH_PATH);
        assert_eq!(refresh.len(), 1);
        assert_eq!(refresh[0].bearer, None);
        assert_eq!(refresh[0].body, Some(json!({"refreshToken": "R1"})));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_401s_share_one_refresh() {
        let mock = Arc::new(rotating_backend().with_refresh_delay(Duration::from_millis(50)));
        let tokens = logged_in().await;
        let client = client_with(mock.clone(), tokens.clone());

        let results = join_all((0..5).map(|_| client.send(ApiRequest::get("/bookings")))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(mock.calls_to(REFRESH_PATH), 1);
        let bearers = mock.bearers_for("/bookings");
        assert_eq!(bearers.len(), 10);
        assert_eq!(
            bearers.iter().filter(|b| b.as_deref() == Some("A2")).count(),
            5
        );
        assert!(!client.refresh_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_rejects_every_queued_request_and_clears_tokens() {
        let mock = Arc::new(
            MockHttp::new(|req| {
                if req.url.ends_with(REFRESH_PATH) {
                    json_response(500, json!({"message": "boom"}))
                } else {
                    json_response(401, json!({"message": "jwt expired"}))
                }
            })
            .with_refresh_delay(Duration::from_millis(50)),
        );
        let tokens = logged_in().await;
        let client = client_with(mock.clone(), tokens.clone());

        let results = join_all((0..4).map(|_| client.send(ApiRequest::get("/bookings")))).await;

        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ApiError::SessionExpired))));
        assert_eq!(mock.calls_to(REFRESH_PATH), 1);
        assert_eq!(mock.calls_to("/bookings"), 4);
        assert_eq!(tokens.access_token().await.unwrap(), None);
        assert_eq!(tokens.refresh_token().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_finishing_after_logout_does_not_restore_tokens() {
        let mock = Arc::new(rotating_backend().with_refresh_delay(Duration::from_millis(50)));
        let tokens = logged_in().await;
        let client = client_with(mock.clone(), tokens.clone());

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.send(ApiRequest::get("/bookings")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.refresh_in_flight());
        tokens.clear_tokens().await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, ApiError::SessionExpired);
        assert_eq!(mock.calls_to(REFRESH_PATH), 1);
        assert_eq!(tokens.access_token().await.unwrap(), None);
        assert_eq!(tokens.refresh_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_session_without_calling_backend() {
        let mock = Arc::new(rotating_backend());
        let tokens = TokenStore::in_memory();
        tokens.set_tokens(Some("A1"), None).await.unwrap();
        let client = client_with(mock.clone(), tokens.clone());

        let err = client.send(ApiRequest::get("/bookings")).await.unwrap_err();
        assert_eq!(err, ApiError::SessionExpired);
        assert_eq!(mock.calls_to(REFRESH_PATH), 0);
        assert_eq!(tokens.access_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_401_is_returned_as_is() {
        let mock = Arc::new(MockHttp::new(|req| {
            if req.url.ends_with(REFRESH_PATH) {
                json_response(200, json!({"accessToken": "A2"}))
            } else {
                json_response(401, json!({"message": "account suspended"}))
            }
        }));
        let client = client_with(mock.clone(), logged_in().await);

        let err = client.send(ApiRequest::get("/bookings")).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Http {
                status: 401,
                message: "account suspended".to_string()
            }
        );
        assert_eq!(mock.calls_to("/bookings"), 2);
        assert_eq!(mock.calls_to(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn other_errors_are_normalized_without_retry() {
        let mock = Arc::new(MockHttp::new(|_| {
            json_response(422, json!({"message": ["pickup should not be empty"]}))
        }));
        let client = client_with(mock.clone(), logged_in().await);

        let err = client.send(ApiRequest::post("/bookings")).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), "pickup should not be empty");
        assert_eq!(mock.calls_to("/bookings"), 1);
        assert_eq!(mock.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn anonymous_requests_never_refresh() {
        let mock = Arc::new(MockHttp::new(|_| {
            json_response(401, json!({"message": "Invalid credentials"}))
        }));
        let client = client_with(mock.clone(), logged_in().await);

        let err = client
            .send(ApiRequest::post("/auth/login").anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(mock.bearers_for("/auth/login"), vec![None]);
        assert_eq!(mock.calls_to(REFRESH_PATH), 0);
    }
}
