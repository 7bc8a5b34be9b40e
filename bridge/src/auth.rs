//! Token handling for the Minut API.
//!
//! The bridge authenticates the way the Minut web dashboard does: an OAuth
//! password grant against `/auth/token` with the dashboard's public client
//! id, followed by refresh-token grants whenever the access token expires or
//! the API answers 401.

use crate::errors::{Error, Result};
use crate::metrics::TOKEN_REFRESH_TOTAL;
use crate::model::Credentials;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Client id used by the Minut web dashboard
pub const CLIENT_ID: &str = "c33c3776f220cd90";

/// Tokens are treated as expired this long before their actual expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<Value>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn user_id(&self) -> Option<String> {
        match self.user_id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn expires_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs))
    }
}

fn token_url(api_url: &str) -> String {
    format!("{}/auth/token", api_url)
}

async fn request_token(http: &Client, url: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let resp = http
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await?;

    let status = resp.status();
    if status == StatusCode::BAD_REQUEST {
        // invalid_grant: wrong password or revoked refresh token
        return Err(Error::InvalidAuth(format!(
            "token endpoint rejected the grant (HTTP {})",
            status.as_u16()
        )));
    }
    if !status.is_success() {
        return Err(Error::from_status(status, "token endpoint"));
    }

    Ok(resp.json::<TokenResponse>().await?)
}

/// Exchanges a username and password for a full set of credentials
pub async fn password_login(
    http: &Client,
    api_url: &str,
    username: &str,
    password: &str,
) -> Result<Credentials> {
    debug!("Authenticating to Minut with username");
    let token = request_token(
        http,
        &token_url(api_url),
        &[
            ("client_id", CLIENT_ID),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ],
    )
    .await?;

    let user_id = token.user_id();
    let expires_at = token.expires_at();
    match (token.access_token, token.refresh_token, user_id) {
        (Some(access_token), Some(refresh_token), Some(user_id)) if !access_token.is_empty() => {
            Ok(Credentials {
                access_token,
                refresh_token: Some(refresh_token),
                user_id,
                expires_at,
            })
        }
        _ => Err(Error::InvalidAuth(
            "token endpoint response is missing access_token, refresh_token or user_id"
                .to_string(),
        )),
    }
}

pub async fn load_token_file(path: &Path) -> Result<Option<Credentials>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Holds the current credentials and hands out valid access tokens
pub struct AuthManager {
    http: Client,
    token_url: String,
    credentials: RwLock<Credentials>,
    token_file: Option<PathBuf>,
}

impl AuthManager {
    pub fn new(
        http: Client,
        api_url: &str,
        credentials: Credentials,
        token_file: Option<PathBuf>,
    ) -> Self {
        Self {
            http,
            token_url: token_url(api_url),
            credentials: RwLock::new(credentials),
            token_file,
        }
    }

    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    pub async fn user_id(&self) -> String {
        self.credentials.read().await.user_id.clone()
    }

    /// Returns an access token, refreshing first if the current one has expired
    pub async fn access_token(&self) -> Result<String> {
        let (token, expired, can_refresh) = {
            let creds = self.credentials.read().await;
            (
                creds.access_token.clone(),
                creds.is_expired(Utc::now(), Duration::seconds(EXPIRY_MARGIN_SECS)),
                creds.refresh_token.is_some(),
            )
        };

        if expired && can_refresh {
            debug!("Access token expired, refreshing before request");
            return self.refresh(&token).await;
        }
        Ok(token)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// `stale` is the token that was rejected; if another caller already
    /// replaced it, the current token is returned without a second refresh.
    pub async fn refresh(&self, stale: &str) -> Result<String> {
        let mut creds = self.credentials.write().await;
        if creds.access_token != stale {
            return Ok(creds.access_token.clone());
        }

        let refresh_token = creds
            .refresh_token
            .clone()
            .ok_or_else(|| Error::InvalidAuth("no refresh token available".to_string()))?;

        let token = request_token(
            &self.http,
            &self.token_url,
            &[
                ("client_id", CLIENT_ID),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
        )
        .await?;

        let expires_at = token.expires_at();
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidAuth("refresh response has no access_token".to_string()))?;

        creds.access_token = access_token.clone();
        // Keep the old refresh token unless the API rotated it
        if let Some(rotated) = token.refresh_token {
            creds.refresh_token = Some(rotated);
        }
        creds.expires_at = expires_at;

        TOKEN_REFRESH_TOTAL.inc();
        info!("Refreshed Minut access token");

        self.persist(&creds).await;
        Ok(access_token)
    }

    /// Writes credentials to the token file, if one is configured
    pub async fn persist(&self, creds: &Credentials) {
        let Some(path) = &self.token_file else {
            return;
        };

        let result = match serde_json::to_vec_pretty(creds) {
            Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(Error::from),
            Err(e) => Err(Error::from(e)),
        };
        match result {
            Ok(()) => debug!("Stored Minut tokens in {}", path.display()),
            Err(e) => warn!("Failed to store Minut tokens in {}: {}", path.display(), e),
        }
    }
}
