// Snapshot endpoint HTTP client
//
// Wraps `reqwest::Client` with URL construction for the per-entity snapshot
// route and optional bearer-token auth. Envelope validation happens in the
// core; this client only reports transport and decoding failures.

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use super::{SnapshotEnvelope, SnapshotSource};
use crate::BoxFuture;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Everything needed to reach the snapshot endpoint.
#[derive(Debug, Clone)]
pub struct SnapshotClientConfig {
    /// API root, e.g. `https://greenhouse.local/api`.
    pub base_url: Url,
    pub transport: TransportConfig,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub api_token: Option<SecretString>,
}

/// HTTP client for `GET {base}/entities/{id}/snapshot`.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SnapshotClient {
    pub fn new(config: &SnapshotClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(ref token) = config.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| Error::Tls(format!("invalid API token header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = config.transport.build_client_with_headers(headers)?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/entities/{id}/snapshot`, tolerating a trailing slash on
    /// the base.
    pub fn snapshot_url(&self, entity_id: u64) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/entities/{entity_id}/snapshot"))?)
    }

    /// Fetch the snapshot envelope for `entity_id`.
    pub async fn get_snapshot(&self, entity_id: u64) -> Result<SnapshotEnvelope, Error> {
        let url = self.snapshot_url(entity_id)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

impl SnapshotSource for SnapshotClient {
    fn fetch_snapshot(&self, entity_id: u64) -> BoxFuture<'_, Result<SnapshotEnvelope, Error>> {
        Box::pin(self.get_snapshot(entity_id))
    }
}

/// Pull `message` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
