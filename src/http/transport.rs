use super::{HttpRequest, HttpResponse, TimeoutConfig, TransportError, TransportErrorKind};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Performs exactly one network round-trip per call
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the connect timeout and `read` as its whole-request timeout
    pub fn new(timeout: &TimeoutConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.connect)
            .timeout(timeout.read)
            .user_agent(concat!("ffbb-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await.map_err(TransportError::from)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            TransportError::new(TransportErrorKind::Body, format!("Failed to read body: {}", e))
        })?;

        debug!("{} {} -> {} ({} bytes)", request.method, request.url.path(), status, body.len());
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/multi-search"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(serde_json::json!({"queries": []})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"results":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(&TimeoutConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/multi-search", server.uri())).unwrap();
        let request = HttpRequest::post_json(url, br#"{"queries":[]}"#.to_vec())
            .with_bearer_token(Some("secret-token".to_string()));

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"results":[]}"#);
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(&TimeoutConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let response = transport.send(&HttpRequest::get(url)).await.unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_read_timeout_bounds_the_whole_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(500)))
            .mount(&server)
            .await;

        let timeout = TimeoutConfig {
            read: std::time::Duration::from_millis(100),
            ..TimeoutConfig::default()
        };
        let transport = ReqwestTransport::new(&timeout).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = transport.send(&HttpRequest::get(url)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        // Bind then drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new(&TimeoutConfig::default()).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let err = transport.send(&HttpRequest::get(url)).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }
}
