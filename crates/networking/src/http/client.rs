//! Hosted backend HTTP client (PostgREST-style RPC over HTTPS)

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE},
    Client, Response, StatusCode,
};
use otakudex_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const USER_AGENT_VALUE: &str = concat!("otakudex/", env!("CARGO_PKG_VERSION"));

/// Connection settings for the hosted backend
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Public API key sent as `apikey`
    pub api_key: String,
    /// Signed-in user's access token; the API key is used when absent
    pub session_token: Option<String>,
    /// Per request timeout
    pub timeout: Duration,
}

/// HTTP client for the hosted database's remote procedures
///
/// Every request carries the API key and bearer token and is bounded by the
/// configured timeout. Failures are mapped onto the shared error taxonomy so
/// callers can decide whether to retry.
pub struct BackendClient {
    http: Client,
    config: ClientConfig,
}

impl BackendClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Base URL the client talks to
    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Timeout applied to each request
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Default headers for requests
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| Error::Config(format!("invalid API key: {}", e)))?;
        headers.insert("apikey", api_key);

        let bearer = self
            .config
            .session_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|e| Error::Config(format!("invalid session token: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        Ok(headers)
    }

    /// Map a transport failure. Timeouts carry the configured limit.
    fn send_error(&self, err: reqwest::Error) -> Error {
        if err.is_decode() {
            Error::InvalidData(err.to_string())
        } else if err.is_timeout() {
            Error::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            Error::NetworkError(err.to_string())
        }
    }

    /// Turn a non-success response into a typed error
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    /// Call a remote procedure and decode its JSON result
    #[instrument(skip(self, args))]
    pub async fn rpc<T: DeserializeOwned>(&self, name: &str, args: &serde_json::Value) -> Result<T> {
        let response = self.post_rpc(name, args).await?;

        response.json::<T>().await.map_err(|e| {
            let err = self.send_error(e);
            error!("Failed to read {} response: {}", name, err);
            err
        })
    }

    /// Call a remote procedure whose result is not needed
    #[instrument(skip(self, args))]
    pub async fn rpc_unit(&self, name: &str, args: &serde_json::Value) -> Result<()> {
        self.post_rpc(name, args).await?;
        Ok(())
    }

    async fn post_rpc(&self, name: &str, args: &serde_json::Value) -> Result<Response> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url(), name);
        debug!("Calling {}", url);

        let response = self
            .http
            .post(&url)
            .headers(self.default_headers()?)
            .json(args)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        match Self::check_status(response).await {
            Ok(r) => Ok(r),
            Err(e) => {
                warn!("RPC {} failed: {}", name, e);
                Err(e)
            }
        }
    }

    /// Exact row count of a table, read from the `Content-Range` header
    #[instrument(skip(self))]
    pub async fn count_rows(&self, table: &str) -> Result<u64> {
        let url = format!("{}/rest/v1/{}?select=id", self.base_url(), table);

        let response = self
            .http
            .head(&url)
            .headers(self.default_headers()?)
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let response = Self::check_status(response).await?;

        let header = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::InvalidData(format!("{} count has no Content-Range", table)))?;

        parse_content_range_total(header)
            .ok_or_else(|| Error::InvalidData(format!("unparseable Content-Range '{}'", header)))
    }
}

/// Map an HTTP failure onto the error taxonomy.
///
/// Throttling, request timeouts and server errors are transient; other
/// client errors mean the backend validated and refused the request.
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 => Error::TokenExpired,
        403 => Error::AuthenticationError("Access forbidden".to_string()),
        408 | 429 => Error::NetworkError(format!("HTTP {}", status)),
        s if status.is_server_error() => Error::NetworkError(format!("HTTP {}: {}", s, error_message(body))),
        s => Error::RemoteRejected {
            status: s,
            message: error_message(body),
        },
    }
}

/// Pull the `message` out of a PostgREST error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Total from `Content-Range: 0-24/3573` or `*/3573`
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), Error::TokenExpired));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "upstream").is_retryable());

        let rejected = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"code":"P0001","message":"progress exceeds episode count"}"#,
        );
        match rejected {
            Error::RemoteRejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "progress exceeds episode count");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!classify_status(StatusCode::CONFLICT, "dup").is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_carries_configured_limit() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the connection and never answer
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let client = BackendClient::new(ClientConfig {
            base_url: format!("http://{}", addr),
            api_key: "anon-key".to_string(),
            session_token: None,
            timeout: Duration::from_millis(150),
        })
        .unwrap();

        let err = client
            .rpc_unit("rate_media", &serde_json::json!({ "media_id": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(150)), "got {:?}", err);
        assert!(err.is_retryable());
        server.abort();
    }

    #[test]
    fn test_headers_use_session_token() {
        let client = BackendClient::new(ClientConfig {
            base_url: "https://backend.example/".to_string(),
            api_key: "anon-key".to_string(),
            session_token: Some("user-jwt".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(client.base_url(), "https://backend.example");
        let headers = client.default_headers().unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer user-jwt");
    }
}
