use super::error::{TransportError, TransportResult};
use crate::redact::redact_secrets;
use crate::settings::Settings;
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

/// A logical API call, before credentials are attached.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub(crate) authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Auth endpoints: no bearer header and no refresh-on-401.
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

/// What actually goes over the wire.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl OutgoingRequest {
    pub fn from_api(settings: &Settings, request: &ApiRequest, bearer: Option<&str>) -> Self {
        Self {
            method: request.method.clone(),
            url: settings.api_url(&request.path),
            query: request.query.clone(),
            body: request.body.clone(),
            bearer: bearer.map(str::to_string),
        }
    }

    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: OutgoingRequest) -> BoxFuture<'_, TransportResult<ApiResponse>>;
}

pub(crate) fn bearer_header(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {token}")).ok()
}

fn build_headers(bearer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("freightdesk/", env!("CARGO_PKG_VERSION"))),
    );
    if let Some(token) = bearer {
        match bearer_header(token) {
            Some(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            None => tracing::warn!("stored access token is not a valid header value; sending without it"),
        }
    }
    headers
}

pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(settings.request_timeout())
                .connect_timeout(settings.connect_timeout())
                .build()?,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::ConnectionFailed(redact_secrets(&err.to_string()).into_owned())
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: OutgoingRequest) -> BoxFuture<'_, TransportResult<ApiResponse>> {
        Box::pin(async move {
            let url = request.full_url();
            let mut builder = self
                .http
                .request(request.method, url)
                .headers(build_headers(request.bearer.as_deref()));
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let res = builder.send().await.map_err(map_reqwest_error)?;
            let status = res.status().as_u16();
            let body = res.text().await.map_err(map_reqwest_error)?;
            Ok(ApiResponse { status, body })
        })
    }
}
