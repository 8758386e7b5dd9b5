use anyhow::Context;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;

use crate::error::{Result, SessionError};
use crate::session::SessionManager;

/// Header carrying the refresh credential so the backend may rotate it
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// HTTP client for the dashboard API
/// Attaches the session credentials and retries once after a 401
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session manager
    session: SessionManager,
}

impl ApiClient {
    pub fn new(session: SessionManager) -> anyhow::Result<Self> {
        let settings = session.settings();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout))
            .timeout(Duration::from_secs(settings.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, session })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Resolve a target against the API base URL; absolute URLs pass through
    pub fn url(&self, target: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }

        self.session
            .settings()
            .api_base_url
            .join(target)
            .map_err(|e| SessionError::InvalidTarget(format!("{}: {}", target, e)))
    }

    /// Start building a request; send it with [`ApiClient::send`]
    pub fn request(&self, method: Method, target: &str) -> Result<RequestBuilder> {
        Ok(self.client.request(method, self.url(target)?))
    }

    pub async fn get(&self, target: &str) -> Result<Response> {
        let request = self.request(Method::GET, target)?.build()?;
        self.send(request).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        target: &str,
        body: &T,
    ) -> Result<Response> {
        let request = self.request(Method::POST, target)?.json(body).build()?;
        self.send(request).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        target: &str,
        body: &T,
    ) -> Result<Response> {
        let request = self.request(Method::PUT, target)?.json(body).build()?;
        self.send(request).await
    }

    pub async fn delete(&self, target: &str) -> Result<Response> {
        let request = self.request(Method::DELETE, target)?.build()?;
        self.send(request).await
    }

    /// Execute a request with the session credentials
    /// - no session: fails with [`SessionError::NoSession`] before sending
    /// - 401: refreshes once and resends once; a failed refresh returns the 401
    /// - any other status is returned for the caller to inspect
    ///
    /// Streaming bodies cannot be resent: after a 401 the credentials are still
    /// refreshed, but the 401 response is returned.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let access_token = self
            .session
            .valid_access_token()
            .await
            .ok_or(SessionError::NoSession)?;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending authenticated request");

        let retry_copy = request.try_clone();
        let refresh_token = self.session.current_refresh_token();
        let first = authorize(request, &access_token, refresh_token.as_deref())?;
        let response = self.execute(first).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(method = %method, url = %url, "Received 401, refreshing token and retrying");

        let Some(access_token) = self.session.refresh_access_token().await else {
            tracing::warn!("Token refresh failed, returning the 401 response");
            return Ok(response);
        };

        let Some(retry_copy) = retry_copy else {
            tracing::warn!(url = %url, "Request body cannot be resent, returning the 401 response");
            return Ok(response);
        };

        let refresh_token = self.session.current_refresh_token();
        let retry = authorize(retry_copy, &access_token, refresh_token.as_deref())?;
        let response = self.execute(retry).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(method = %method, url = %url, "Retried request was rejected again");
        }

        Ok(response)
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let url = request.url().clone();
        let response = self.client.execute(request).await.map_err(|e| {
            tracing::warn!(
                error_kind = error_kind(&e),
                error = %e,
                url = %url,
                "HTTP request error"
            );
            SessionError::Transport(e)
        })?;

        tracing::debug!(status = %response.status(), "Received HTTP response");
        Ok(response)
    }
}

/// `request` carrying the given credentials
fn authorize(
    mut request: Request,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<Request> {
    let headers = request.headers_mut();

    let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
        .map_err(|e| SessionError::InvalidHeader(e.to_string()))?;
    headers.insert(AUTHORIZATION, bearer);

    let name = HeaderName::from_static(REFRESH_TOKEN_HEADER);
    match refresh_token {
        Some(token) => {
            let value = HeaderValue::from_str(token)
                .map_err(|e| SessionError::InvalidHeader(e.to_string()))?;
            headers.insert(name, value);
        }
        None => {
            headers.remove(name);
        }
    }

    Ok(request)
}

/// Categorize a transport error for logging
fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStore, SessionSettings, TracingRedirect};
    use std::sync::Arc;

    fn client() -> ApiClient {
        let settings = SessionSettings::new(Url::parse("https://api.example.com/v1/").unwrap());
        let session = SessionManager::new(
            settings,
            Arc::new(MemoryStore::new()),
            Arc::new(TracingRedirect),
        )
        .unwrap();
        ApiClient::new(session).unwrap()
    }

    #[test]
    fn test_url_resolution() {
        let api = client();
        assert_eq!(
            api.url("leads").unwrap().as_str(),
            "https://api.example.com/v1/leads"
        );
        assert_eq!(
            api.url("/api/pricing").unwrap().as_str(),
            "https://api.example.com/api/pricing"
        );
        assert_eq!(
            api.url("https://other.example.com/x").unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_invalid_target() {
        let api = client();
        assert!(matches!(
            api.url("http://[::1"),
            Err(SessionError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_authorize_sets_headers() {
        let api = client();
        let request = api
            .request(Method::GET, "leads")
            .unwrap()
            .header(AUTHORIZATION, "Bearer stale")
            .build()
            .unwrap();

        let authorized = authorize(request.try_clone().unwrap(), "A1", Some("R1")).unwrap();
        assert_eq!(authorized.headers()[AUTHORIZATION], "Bearer A1");
        assert_eq!(authorized.headers()[REFRESH_TOKEN_HEADER], "R1");

        let authorized = authorize(request, "A2", None).unwrap();
        assert_eq!(authorized.headers()[AUTHORIZATION], "Bearer A2");
        assert!(authorized.headers().get(REFRESH_TOKEN_HEADER).is_none());
    }

    #[test]
    fn test_authorize_rejects_bad_header_value() {
        let api = client();
        let request = api.request(Method::GET, "leads").unwrap().build().unwrap();
        assert!(matches!(
            authorize(request, "A1\nInjected: yes", None),
            Err(SessionError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn test_no_session_fails_before_sending() {
        let api = client();
        let err = api.get("leads").await.unwrap_err();
        assert!(err.is_unauthenticated());
    }
}
