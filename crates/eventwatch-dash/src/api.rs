//! HTTP client for the detection service.

use std::time::Duration;

use eventwatch_proto::protocol::{
    decode_event_list, error_message, DecodedEvents, Event, PayloadError, ServiceStatus,
    SessionConfig,
};
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    /// Used for the push stream, which must not be cut off by the per-request
    /// timeout.
    stream_client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("eventwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()?;
        let stream_client = Client::builder()
            .user_agent(concat!("eventwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<ServiceStatus, ApiError> {
        let response = check(self.client.get(self.url("/status")).send().await?).await?;
        Ok(response.json().await?)
    }

    /// `GET /events?limit=N`, decoded record by record.
    pub async fn events(&self, limit: usize) -> Result<DecodedEvents, ApiError> {
        let response = check(
            self.client
                .get(self.url("/events"))
                .query(&[("limit", limit)])
                .send()
                .await?,
        )
        .await?;
        let body = response.bytes().await?;
        Ok(decode_event_list(&body)?)
    }

    /// `GET /events/{id}`
    pub async fn event(&self, id: i64) -> Result<Event, ApiError> {
        let response = check(
            self.client
                .get(self.url(&format!("/events/{}", id)))
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Turn a clip reference into a playable URL.
    ///
    /// The service serves clips from `GET /video?filepath=...`; the URL is
    /// probed with `HEAD` so a missing file is reported here rather than by
    /// the player.
    pub async fn resolve_clip(&self, clip_reference: &str) -> Result<String, ApiError> {
        let url = Url::parse_with_params(&self.url("/video"), &[("filepath", clip_reference)])
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        debug!("api: probing clip {}", url);
        check(self.client.head(url.clone()).send().await?).await?;
        Ok(url.to_string())
    }

    /// `POST /start`
    pub async fn start(&self, session: &SessionConfig) -> Result<(), ApiError> {
        check(self.client.post(self.url("/start")).json(session).send().await?).await?;
        Ok(())
    }

    /// `POST /stop`
    pub async fn stop(&self) -> Result<(), ApiError> {
        check(self.client.post(self.url("/stop")).send().await?).await?;
        Ok(())
    }

    /// Open the push stream.  The caller reads the body incrementally.
    pub async fn open_stream(&self, path: &str) -> Result<Response, ApiError> {
        let response = self
            .stream_client
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check(response).await
    }
}

/// Map a non-success status to `ApiError::Status`, pulling the server's
/// message out of the body when it has one.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    });
    Err(ApiError::Status { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = ApiClient::new("http://host:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "http://host:8000");
        assert_eq!(api.url("/status"), "http://host:8000/status");
    }

    #[test]
    fn test_status_error_display() {
        let err = ApiError::Status {
            status: StatusCode::NOT_FOUND,
            message: "Video file at path x not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "server returned 404 Not Found: Video file at path x not found"
        );
    }
}
