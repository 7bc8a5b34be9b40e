//! Credential validation run once before polling starts.
//!
//! Either a username/password pair or a set of dashboard tokens may be
//! supplied. The credentials are only accepted after a device listing
//! succeeds with them.

use crate::api::MinutClient;
use crate::auth::{load_token_file, password_login, AuthManager};
use crate::errors::{Error, Result};
use crate::model::{Credentials, Device};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The configuration form fields
#[derive(Debug, Clone, Default)]
pub struct SetupInput {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    Tokens,
}

impl SetupInput {
    /// Password login is used only when no access token was supplied
    pub fn auth_method(&self) -> AuthMethod {
        if self.username.is_some() && self.password.is_some() && self.access_token.is_none() {
            AuthMethod::Password
        } else {
            AuthMethod::Tokens
        }
    }

    fn supplied_credentials(&self) -> Result<Credentials> {
        match (&self.user_id, &self.access_token) {
            (Some(user_id), Some(access_token)) => Ok(Credentials {
                access_token: access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                user_id: user_id.clone(),
                expires_at: None,
            }),
            _ => Err(Error::InvalidAuth(
                "missing user_id or access_token".to_string(),
            )),
        }
    }
}

pub struct ValidatedSetup {
    pub client: MinutClient,
    pub devices: Vec<Device>,
}

/// Resolves credentials and proves them against the devices endpoint.
///
/// Stored tokens from `token_file` win over the supplied input, since they
/// carry any rotation that happened during earlier runs.
pub async fn validate_setup(
    http: &Client,
    api_url: &str,
    input: &SetupInput,
    token_file: Option<&Path>,
) -> Result<ValidatedSetup> {
    let stored = match token_file {
        Some(path) => load_token_file(path).await?,
        None => None,
    };

    let (credentials, fresh_login) = match stored {
        Some(creds) => {
            info!("Using stored Minut tokens for user {}", creds.user_id);
            (creds, false)
        }
        None => match input.auth_method() {
            AuthMethod::Password => {
                let username = input.username.as_deref().unwrap_or_default();
                let password = input.password.as_deref().unwrap_or_default();
                let creds = password_login(http, api_url, username, password).await?;
                debug!("Obtained tokens via password grant for user {}", creds.user_id);
                (creds, true)
            }
            AuthMethod::Tokens => (input.supplied_credentials()?, false),
        },
    };

    let auth = Arc::new(AuthManager::new(
        http.clone(),
        api_url,
        credentials,
        token_file.map(Path::to_path_buf),
    ));
    if fresh_login {
        auth.persist(&auth.credentials().await).await;
    }

    let client = MinutClient::new(http.clone(), api_url, auth);
    let devices = client.get_devices().await?;
    if devices.is_empty() {
        warn!("No devices returned for user {}", client.auth().user_id().await);
    }

    Ok(ValidatedSetup { client, devices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn input(pairs: &[(&str, &str)]) -> SetupInput {
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        };
        SetupInput {
            username: get("username"),
            password: get("password"),
            access_token: get("access_token"),
            refresh_token: get("refresh_token"),
            user_id: get("user_id"),
        }
    }

    #[test]
    fn test_auth_method_selection() {
        assert_eq!(
            input(&[("username", "u"), ("password", "p")]).auth_method(),
            AuthMethod::Password
        );
        assert_eq!(
            input(&[("username", "u"), ("password", "p"), ("access_token", "a")]).auth_method(),
            AuthMethod::Tokens
        );
        assert_eq!(input(&[("username", "u")]).auth_method(), AuthMethod::Tokens);
    }

    #[tokio::test]
    async fn test_missing_tokens_is_invalid_auth() {
        let server = Server::new_async().await;
        let result = validate_setup(
            &Client::new(),
            &server.url(),
            &input(&[("access_token", "a")]),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAuth(_))));
    }

    #[tokio::test]
    async fn test_password_setup_validates_devices() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a1","refresh_token":"r1","user_id":"u1"}"#)
            .create_async()
            .await;
        let devices = server
            .mock("GET", "/devices")
            .match_header("authorization", "Bearer a1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"p1","description":"Bedroom"}]"#)
            .create_async()
            .await;

        let setup = validate_setup(
            &Client::new(),
            &server.url(),
            &input(&[("username", "me@example.com"), ("password", "secret")]),
            None,
        )
        .await
        .unwrap();

        devices.assert_async().await;
        assert_eq!(setup.devices[0].name, "Bedroom");
        assert_eq!(setup.client.auth().user_id().await, "u1");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_cannot_connect() {
        let result = validate_setup(
            &Client::new(),
            "http://127.0.0.1:9",
            &input(&[("access_token", "a"), ("user_id", "u")]),
            None,
        )
        .await;
        let err = result.err().expect("setup should fail");
        assert_eq!(err.kind().as_str(), "cannot_connect");
    }

    #[tokio::test]
    async fn test_password_login_persists_tokens() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a2","refresh_token":"r2","user_id":42,"expires_in":3600}"#)
            .create_async()
            .await;
        let _devices = server
            .mock("GET", "/devices")
            .match_header("authorization", "Bearer a2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"p1"}]"#)
            .create_async()
            .await;

        let path = std::env::temp_dir().join(format!("minut-login-{}.json", uuid::Uuid::new_v4()));
        validate_setup(
            &Client::new(),
            &server.url(),
            &input(&[("username", "me@example.com"), ("password", "secret")]),
            Some(&path),
        )
        .await
        .unwrap();

        let stored = load_token_file(&path).await.unwrap().expect("token file written");
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
        assert_eq!(stored.user_id, "42");
        assert!(stored.expires_at.is_some());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_stored_tokens_take_precedence() {
        let mut server = Server::new_async().await;
        let devices = server
            .mock("GET", "/devices")
            .match_header("authorization", "Bearer stored")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let path = std::env::temp_dir().join(format!("minut-setup-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"access_token":"stored","refresh_token":"r","user_id":"u9"}"#,
        )
        .unwrap();

        let setup = validate_setup(
            &Client::new(),
            &server.url(),
            &input(&[("access_token", "configured"), ("user_id", "u1")]),
            Some(&path),
        )
        .await
        .unwrap();

        devices.assert_async().await;
        assert!(setup.devices.is_empty());
        assert_eq!(setup.client.auth().user_id().await, "u9");
        let _ = std::fs::remove_file(&path);
    }
}
