//! HTTP client for the medicine tracker REST API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{ApiError, NotificationApi};
use crate::notifications::{NotificationRecord, UnreadCount};
use crate::session::{Session, SessionSource};

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Client for the REST backend.
///
/// Every request carries the bearer token of the current session, if any.
/// A 401 or 403 answer invalidates the session before the error is returned.
#[derive(Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    session: SessionSource,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "http://localhost:8080/api")
    /// * `timeout` - Per-request timeout
    /// * `session` - Source of the bearer token, cleared on auth failures
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: SessionSource,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            http_client,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange email and password for a session. Does not activate it.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let url = self.url("/auth/login");
        let builder = self
            .http_client
            .post(&url)
            .json(&LoginRequest { email, password });
        // A rejected login says nothing about the current session.
        let response = Self::check_status(builder.send().await?, &url)?;
        Self::decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn mark_read_url(&self, id: &str) -> String {
        self.url(&format!("/notifications/{}/read", urlencoding::encode(id)))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, url);
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<Response, ApiError> {
        let result = Self::check_status(builder.send().await?, url);
        if let Err(ApiError::Unauthorized(_)) = &result {
            self.session.invalidate();
        }
        result
    }

    fn check_status(response: Response, url: &str) -> Result<Response, ApiError> {
        let status = response.status();
        debug!("{} -> {}", url, status);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn list_notifications(&self) -> Result<Vec<NotificationRecord>, ApiError> {
        let url = self.url("/notifications");
        let response = self.send(self.request(Method::GET, &url), &url).await?;
        Self::decode(response).await
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        let url = self.url("/notifications/unread-count");
        let response = self.send(self.request(Method::GET, &url), &url).await?;
        let count: UnreadCount = Self::decode(response).await?;
        Ok(count.unread_count)
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        let url = self.mark_read_url(id);
        self.send(self.request(Method::PUT, &url), &url).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        let url = self.url("/notifications/read-all");
        self.send(self.request(Method::PUT, &url), &url).await?;
        Ok(())
    }
}
