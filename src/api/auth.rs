use super::{encode_body, from_envelope};
use crate::http::{ApiClient, ApiError, ApiRequest};
use crate::types::{AuthSession, LoginRequest, SignupRequest, UserProfile};
use serde_json::Value;

async fn store_session(client: &ApiClient, session: &AuthSession) -> Result<(), ApiError> {
    client
        .tokens()
        .set_tokens(Some(&session.access_token), Some(&session.refresh_token))
        .await?;
    Ok(())
}

pub async fn login(client: &ApiClient, email: &str, password: &str) -> Result<AuthSession, ApiError> {
    let body = LoginRequest {
        email: email.trim().to_string(),
        password: password.to_string(),
    };
    let request = ApiRequest::post("/auth/login")
        .anonymous()
        .json(&body)
        .map_err(encode_body)?;
    let session: AuthSession = from_envelope(client.send_json::<Value>(request).await?, &["data"])?;
    store_session(client, &session).await?;
    tracing::info!("logged in");
    Ok(session)
}

pub async fn signup(client: &ApiClient, body: &SignupRequest) -> Result<AuthSession, ApiError> {
    let request = ApiRequest::post("/auth/signup")
        .anonymous()
        .json(body)
        .map_err(encode_body)?;
    let session: AuthSession = from_envelope(client.send_json::<Value>(request).await?, &["data"])?;
    store_session(client, &session).await?;
    tracing::info!("account created");
    Ok(session)
}

/// Tells the backend (best effort) and always clears the stored tokens.
pub async fn logout(client: &ApiClient) -> Result<(), ApiError> {
    if client.tokens().access_token().await?.is_some() {
        if let Err(e) = client.send(ApiRequest::post("/auth/logout")).await {
            tracing::debug!(error = %e, "backend logout failed; clearing tokens anyway");
        }
    }
    client.tokens().clear_tokens().await?;
    tracing::info!("logged out");
    Ok(())
}

pub async fn me(client: &ApiClient) -> Result<UserProfile, ApiError> {
    let value = client.send_json::<Value>(ApiRequest::get("/users/me")).await?;
    from_envelope(value, &["data", "user"])
}
