//! HTTP gateway to the reference service.
//!
//! Resources live at `{base}/{items|collections|attachments}[/{key}]`.
//! Records are created with `POST` and replaced with `PUT` guarded by an
//! `If-Match` header carrying the etag the edit was based on.

use reqwest::header::{ETAG, IF_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::error::{SyncError, SyncResult};
use super::gateway::{PushAck, PushRequest, RemoteGateway};
use crate::config::SyncConfig;
use crate::models::{EntityKind, RemoteEntity};

#[derive(Debug, Deserialize)]
struct PushResponseBody {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    etag: Option<String>,
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Creates a gateway from config.
    ///
    /// Returns an error if no server URL is configured.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        if !config.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        let server_url = config.server_url.clone().ok_or(SyncError::NotConfigured)?;
        Self::new(
            server_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Checks that the service answers its health endpoint.
    pub async fn check_server(&self) -> SyncResult<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::transport_fatal(format!(
                "Server returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.table())
    }

    fn record_url(&self, kind: EntityKind, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            kind.table(),
            urlencoding::encode(key)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

impl RemoteGateway for HttpGateway {
    async fn fetch_entity(&self, kind: EntityKind, key: &str) -> SyncResult<RemoteEntity> {
        let url = self.record_url(kind, key);
        tracing::debug!(%kind, key, "GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(kind, key, response)?;
        let header_etag = etag_header(&response);

        let mut entity: RemoteEntity = response.json().await?;
        if entity.etag.is_empty() {
            entity.etag = header_etag.unwrap_or_default();
        }
        Ok(entity)
    }

    async fn fetch_all(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
    ) -> SyncResult<Vec<RemoteEntity>> {
        let mut url = self.collection_url(kind);
        if let Some(parent) = parent {
            url.push_str("?parent=");
            url.push_str(&urlencoding::encode(parent));
        }
        tracing::debug!(%kind, "GET {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = check_status(kind, parent.unwrap_or(""), response)?;
        Ok(response.json().await?)
    }

    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
        if_match: Option<&str>,
    ) -> SyncResult<PushAck> {
        let builder = match if_match {
            None => self.client.post(self.collection_url(kind)),
            Some(etag) => self
                .client
                .put(self.record_url(kind, &request.key))
                .header(IF_MATCH, quote_etag(etag)),
        };
        tracing::debug!(%kind, key = %request.key, create = if_match.is_none(), "pushing record");

        let response = self.authorized(builder).json(request).send().await?;
        let response = check_status(kind, &request.key, response)?;
        let header_etag = etag_header(&response);

        // Some endpoints answer 204 with only an ETag header.
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            PushResponseBody {
                key: None,
                etag: None,
            }
        } else {
            serde_json::from_str(&text).map_err(|e| {
                SyncError::transport_fatal(format!("unreadable push response: {}", e))
            })?
        };

        let etag = body
            .etag
            .filter(|e| !e.is_empty())
            .or(header_etag)
            .ok_or_else(|| SyncError::transport_fatal("push response carried no etag"))?;

        Ok(PushAck {
            etag,
            server_key: body.key.filter(|k| !k.is_empty() && *k != request.key),
        })
    }
}

/// Maps an error status to the matching `SyncError`.
fn status_error(kind: EntityKind, key: &str, status: StatusCode) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound {
            kind,
            key: key.to_string(),
        },
        StatusCode::PRECONDITION_FAILED => SyncError::Conflict {
            kind,
            key: key.to_string(),
        },
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            SyncError::transport_retryable(format!("Server returned status {}", s))
        }
        s => SyncError::transport_fatal(format!("Server returned status {}", s)),
    }
}

fn check_status(kind: EntityKind, key: &str, response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(status_error(kind, key, status))
    }
}

fn etag_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(unquote_etag)
}

fn quote_etag(etag: &str) -> String {
    format!("\"{}\"", etag)
}

fn unquote_etag(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"').to_string()
}
