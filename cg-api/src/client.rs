//! HTTP client for the device login call.
//!
//! Exchanges endpoint credentials for a bearer token with a single
//! `POST {base}/loginDevice`. There is no retry: a failed login is reported
//! to the caller, who decides whether to try again.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cg_core::config::ClientConfig;
use cg_core::error::{CgError, CgResult};

/// Path of the login endpoint relative to the base URL.
const LOGIN_PATH: &str = "/loginDevice";

/// Credentials posted to the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCredentials {
    pub user: String,
    pub channel: String,
    #[serde(rename = "apikey")]
    pub api_key: String,
}

/// Body returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// HTTP client for the login endpoint.
#[derive(Clone)]
pub struct LoginClient {
    inner: Client,
    /// Base URL without trailing slash (e.g. "https://api.example.com").
    base_url: String,
}

impl LoginClient {
    /// Create a new LoginClient for the given base URL.
    pub fn new(base_url: &str, timeout: Duration) -> CgResult<Self> {
        let base_url = ClientConfig::sanitize_endpoint(base_url);
        if base_url.is_empty() {
            return Err(CgError::MissingConfig("login base url".into()));
        }

        let inner = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CgError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { inner, base_url })
    }

    /// Full URL of the login endpoint.
    pub fn login_url(&self) -> String {
        format!("{}{LOGIN_PATH}", self.base_url)
    }

    /// Exchange credentials for a token.
    pub async fn login_device(&self, credentials: &DeviceCredentials) -> CgResult<String> {
        let url = self.login_url();
        debug!("POST {url} (user={}, channel={})", credentials.user, credentials.channel);

        let response = self
            .inner
            .post(&url)
            .header("Accept", "application/json")
            .json(credentials)
            .send()
            .await
            .map_err(Self::classify_error)?;

        let response = Self::check_status(response).await?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| CgError::Serialization(format!("failed to parse login response: {e}")))?;

        match body.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                warn!("login succeeded but no token was supplied");
                Err(CgError::AuthFailed("no token was supplied as part of the response".into()))
            }
        }
    }

    /// Anything but 200 is a failed login.
    async fn check_status(response: Response) -> CgResult<Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let reason = status.canonical_reason().unwrap_or("unknown status");
        warn!("login rejected: {reason}: {}", status.as_u16());
        Err(CgError::AuthFailed(format!("{reason}: {}", status.as_u16())))
    }

    /// Classify a reqwest error into a CgError variant.
    fn classify_error(e: reqwest::Error) -> CgError {
        if e.is_timeout() {
            CgError::Timeout(e.to_string())
        } else if e.is_connect() {
            CgError::Http(format!("connection failed: {e}"))
        } else {
            CgError::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with the given status line and body,
    /// returning the raw request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{addr}"), handle)
    }

    fn credentials() -> DeviceCredentials {
        DeviceCredentials {
            user: "benni".into(),
            channel: "socket-client".into(),
            api_key: "testapikey".into(),
        }
    }

    #[test]
    fn test_login_url() {
        let client = LoginClient::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.login_url(), "https://api.example.com/loginDevice");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = LoginClient::new("  ", Duration::from_secs(5));
        assert!(matches!(result, Err(CgError::MissingConfig(_))));
    }

    #[test]
    fn test_credentials_wire_shape() {
        let json = serde_json::to_value(credentials()).unwrap();
        assert_eq!(json["apikey"], "testapikey");
        assert_eq!(json["user"], "benni");
        assert!(json.get("api_key").is_none());
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let (base, server) = serve_once("200 OK", r#"{"token":"tok-123"}"#).await;
        let client = LoginClient::new(&base, Duration::from_secs(5)).unwrap();

        let token = client.login_device(&credentials()).await.unwrap();
        assert_eq!(token, "tok-123");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /loginDevice"));
        assert!(request.contains("\"apikey\":\"testapikey\""));
    }

    #[tokio::test]
    async fn test_login_non_200_is_auth_failure() {
        let (base, server) = serve_once("401 Unauthorized", r#"{"error":"nope"}"#).await;
        let client = LoginClient::new(&base, Duration::from_secs(5)).unwrap();

        let err = client.login_device(&credentials()).await.unwrap_err();
        assert!(matches!(err, CgError::AuthFailed(ref m) if m.contains("401")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_without_token_field() {
        let (base, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let client = LoginClient::new(&base, Duration::from_secs(5)).unwrap();

        let err = client.login_device(&credentials()).await.unwrap_err();
        assert!(matches!(err, CgError::AuthFailed(_)));
        server.await.unwrap();
    }
}
