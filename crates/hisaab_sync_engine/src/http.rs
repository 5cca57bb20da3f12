//! HTTP transport implementation.
//!
//! Pushes are `POST {base_url}/{endpoint}` with a JSON body; pulls are
//! `GET {base_url}/{endpoint}?last-sync-time=..&page=..&limit=..`. The
//! active business travels in the `X-Business-Slug` header.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use hisaab_sync_protocol::{ApiEnvelope, PullQuery, PullResponse, PushRequest, PushResponse};
use serde::de::DeserializeOwned;

/// Header carrying the active business slug.
pub const BUSINESS_HEADER: &str = "X-Business-Slug";

/// HTTP-based sync transport over `reqwest`.
pub struct HttpTransport {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport from the sync configuration.
    ///
    /// # Errors
    ///
    /// Returns a fatal transport error if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins the base URL and an endpoint path with exactly one slash.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn prepare(&self, builder: reqwest::RequestBuilder, business_id: &str) -> reqwest::RequestBuilder {
        let builder = builder.header(BUSINESS_HEADER, business_id);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<D: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> SyncResult<ApiEnvelope<D>> {
        let response = builder.send().await.map_err(classify_request_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify_request_error)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| status.to_string());
            return Err(SyncError::from_status(status.as_u16(), message));
        }

        serde_json::from_slice(&body).map_err(|e| SyncError::Transport {
            message: format!("malformed response body: {e}"),
            retryable: false,
            status: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(
        &self,
        endpoint: &str,
        business_id: &str,
        request: &PushRequest,
    ) -> SyncResult<PushResponse> {
        let builder = self
            .client
            .post(self.endpoint_url(endpoint))
            .json(request);
        self.send(self.prepare(builder, business_id)).await
    }

    async fn pull(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> SyncResult<PullResponse> {
        let builder = self.client.get(self.endpoint_url(endpoint)).query(query);
        self.send(self.prepare(builder, business_id)).await
    }
}

/// Maps a `reqwest` failure onto a transport error.
///
/// Timeouts, connection failures and a body cut off mid-read are
/// retryable. Anything else, such as a bad URL or redirect loop, is not.
fn classify_request_error(err: reqwest::Error) -> SyncError {
    if let Some(status) = err.status() {
        return SyncError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_timeout()
        || err.is_connect()
        || err.is_request()
        || err.is_body()
        || err.is_decode()
    {
        SyncError::transport_retryable(err.to_string())
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn joins_urls_with_one_slash() {
        let transport = HttpTransport::new(&SyncConfig::new("https://api.example.com/api/")).unwrap();
        assert_eq!(
            transport.endpoint_url("/sync-product"),
            "https://api.example.com/api/sync-product"
        );
        assert_eq!(
            transport.endpoint_url("products"),
            "https://api.example.com/api/products"
        );
    }

    #[test]
    fn keeps_auth_token_from_config() {
        let config = SyncConfig::new("http://localhost")
            .with_auth_token("secret")
            .with_timeout(Duration::from_secs(5));
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.auth_token.as_deref(), Some("secret"));
        assert_eq!(transport.base_url(), "http://localhost");
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        // Port 9 on localhost is the discard service, closed on test machines.
        let config = SyncConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2));
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .push("products", "B1", &PushRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn body_cut_off_mid_read_is_retryable() {
        use hisaab_sync_protocol::time::epoch;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 200\r\n\r\n{\"status\":",
                )
                .await;
            // Closing here leaves the declared body unfinished.
        });

        let transport = HttpTransport::new(&SyncConfig::new(format!("http://{addr}"))).unwrap();
        let err = transport
            .pull("sync-product", "B1", &PullQuery::first(epoch(), 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
