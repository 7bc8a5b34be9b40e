use crate::auth::AuthManager;
use crate::errors::{Error, Result};
use crate::mapper::parse_devices;
use crate::metrics::API_REQUESTS_TOTAL;
use crate::model::{Device, MetricType};
use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Events requested from the timeline per poll
pub const TIMELINE_LIMIT: u32 = 200;

pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("minut-bridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

/// Bearer-authenticated reads against the Minut REST API
#[derive(Clone)]
pub struct MinutClient {
    http: Client,
    api_url: String,
    auth: Arc<AuthManager>,
}

impl MinutClient {
    pub fn new(http: Client, api_url: &str, auth: Arc<AuthManager>) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Sends an authenticated GET, returning `None` on 404.
    ///
    /// A 401 triggers one token refresh and one retry; a second 401 is
    /// reported as invalid authentication.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Response>> {
        let url = format!("{}{}", self.api_url, path);
        let mut token = self.auth.access_token().await?;
        let mut refreshed = false;

        loop {
            API_REQUESTS_TOTAL.inc();
            debug!("GET {}", path);

            let resp = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .header(header::ACCEPT, "application/json")
                .query(query)
                .send()
                .await?;

            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                warn!("Access token rejected, attempting to refresh");
                token = self.auth.refresh(&token).await?;
                refreshed = true;
                continue;
            }

            if status.is_success() {
                return Ok(Some(resp));
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            return Err(Error::from_status(status, path));
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        match self.get(path, query).await? {
            Some(resp) => Ok(Some(resp.json::<Value>().await?)),
            None => Ok(None),
        }
    }

    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        let payload = self
            .get_json("/devices", &[])
            .await?
            .ok_or_else(|| Error::UnexpectedResponse("devices endpoint not found".to_string()))?;
        Ok(parse_devices(&payload))
    }

    /// Raw values payload for one metric, `None` when the Point has no such data
    /// or the body is not JSON
    pub async fn get_sensor_values(
        &self,
        device_id: &str,
        metric: MetricType,
    ) -> Result<Option<Value>> {
        let path = format!("/devices/{}/{}", device_id, metric.endpoint());
        let Some(resp) = self.get(&path, &[]).await? else {
            return Ok(None);
        };

        // Empty or non-JSON bodies leave the reading unknown
        let body = resp.bytes().await?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                debug!("Ignoring undecodable {} payload for {}: {}", metric.key(), device_id, e);
                Ok(None)
            }
        }
    }

    /// Most recent events across all of the user's Points
    pub async fn get_timeline(&self, limit: u32) -> Result<Value> {
        Ok(self
            .get_json("/timelines/me", &[("limit", limit.to_string())])
            .await?
            .unwrap_or(Value::Null))
    }
}
