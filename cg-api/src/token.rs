//! Token resolution and decoding.
//!
//! A session needs one bearer token. Either the caller already has it (an
//! endpoint URL token), or it is fetched once through the login endpoint.
//! Tokens are JWTs; [`TokenClaims`] reads their payload without verifying
//! the signature, which only the backend can do.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use cg_core::config::EndpointConfig;
use cg_core::error::{CgError, CgResult};

use crate::client::{DeviceCredentials, LoginClient};

/// Where the session token comes from.
#[derive(Clone)]
pub enum TokenSource {
    /// Token supplied directly; no network call.
    Direct(String),
    /// Token fetched through the login endpoint.
    Login {
        client: LoginClient,
        credentials: DeviceCredentials,
    },
}

impl TokenSource {
    /// Pick a token source from endpoint settings.
    ///
    /// A non-empty `url_token` always wins over login credentials.
    pub fn from_endpoint(endpoint: &EndpointConfig, channel: &str, timeout: Duration) -> CgResult<Self> {
        if !endpoint.url_token.is_empty() {
            return Ok(Self::Direct(endpoint.url_token.clone()));
        }

        if endpoint.user.is_empty() || endpoint.api_key.is_empty() {
            return Err(CgError::MissingConfig(
                "either a url token or login user and api key".into(),
            ));
        }

        Ok(Self::Login {
            client: LoginClient::new(&endpoint.base_url, timeout)?,
            credentials: DeviceCredentials {
                user: endpoint.user.clone(),
                channel: channel.to_string(),
                api_key: endpoint.api_key.clone(),
            },
        })
    }

    /// Produce the token, logging in if necessary.
    pub async fn resolve(&self) -> CgResult<String> {
        match self {
            Self::Direct(token) => Ok(token.clone()),
            Self::Login { client, credentials } => {
                let token = client.login_device(credentials).await?;
                info!("obtained token for user {}", credentials.user);
                Ok(token)
            }
        }
    }
}

/// Kind of principal a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Device,
    User,
}

/// Claims carried in the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Channel the token is used on (e.g. "facebook").
    pub channel: String,
    /// Expiry, milliseconds since epoch.
    pub exp: i64,
    /// Issue time, milliseconds since epoch.
    pub iat: i64,
    /// User id.
    pub id: String,
    /// Organisation id.
    pub organisation: String,
    /// Kind of connection.
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(token: &str) -> CgResult<Self> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(CgError::InvalidToken("expected three dot-separated segments".into())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| CgError::InvalidToken(format!("payload is not base64url: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| CgError::InvalidToken(format!("payload is not valid claims: {e}")))
    }

    /// Expiry as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.exp).single()
    }

    /// Issue time as a timestamp.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.iat).single()
    }

    /// Whether the token is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(true, |exp| now >= exp)
    }
}
