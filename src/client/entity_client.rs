//! Remote Entity API
//!
//! The sync core reads and writes entities through [`RemoteEntityApi`]; it never
//! knows the field naming of the system of record behind it. [`HttpEntityApi`] talks
//! JSON to the shop's REST proxy:
//!
//! - `GET  {base}/entities/{type}/{id}` returns the entity's fields
//! - `PATCH {base}/entities/{type}/{id}` with `{"changes": {...}}` returns the
//!   updated entity
//!
//! Status mapping: 408, 429 and 5xx are transient, any other 4xx is a validation
//! error. A 4xx body of the form `{"field": "...", "message": "..."}` names the
//! rejected field.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::shared::entity::FieldMap;
use crate::shared::error::{Result, SyncError};

/// Remote system of record for jobs and work orders
#[async_trait]
pub trait RemoteEntityApi: Send + Sync {
    /// Current server state of one entity
    async fn get_entity(&self, entity_type: &str, entity_id: &str) -> Result<FieldMap>;

    /// Apply `changes` and return the updated server state
    async fn update_entity(&self, entity_type: &str, entity_id: &str, changes: &FieldMap) -> Result<FieldMap>;
}

#[derive(Debug, Serialize)]
struct UpdateEntityRequest<'a> {
    changes: &'a FieldMap,
}

#[derive(Debug, Default, Deserialize)]
struct RejectionBody {
    field: Option<String>,
    message: Option<String>,
}

/// JSON-over-HTTP adapter for the entity proxy
#[derive(Debug, Clone)]
pub struct HttpEntityApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpEntityApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, token }
    }

    /// Get the full URL of an entity, with the type and id percent-encoded as path
    /// segments
    pub fn entity_url(&self, entity_type: &str, entity_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::validation(None, format!("Invalid API base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::validation(None, format!("API base URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["entities", entity_type, entity_id]);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_entity(response: Response) -> Result<FieldMap> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        // A 2xx that is not an entity is treated as a proxy hiccup, not a rejection.
        response
            .json::<FieldMap>()
            .await
            .map_err(|e| SyncError::transient(format!("Failed to parse entity: {}", e)))
    }
}

#[async_trait]
impl RemoteEntityApi for HttpEntityApi {
    async fn get_entity(&self, entity_type: &str, entity_id: &str) -> Result<FieldMap> {
        let url = self.entity_url(entity_type, entity_id)?;
        tracing::debug!(%url, "fetching entity");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| SyncError::transient(format!("Network error: {}", e)))?;
        Self::read_entity(response).await
    }

    async fn update_entity(&self, entity_type: &str, entity_id: &str, changes: &FieldMap) -> Result<FieldMap> {
        let url = self.entity_url(entity_type, entity_id)?;
        tracing::debug!(%url, fields = changes.len(), "updating entity");

        let response = self
            .authorize(self.client.patch(url))
            .json(&UpdateEntityRequest { changes })
            .send()
            .await
            .map_err(|e| SyncError::transient(format!("Network error: {}", e)))?;
        Self::read_entity(response).await
    }
}

/// Map a non-success status to the error taxonomy
pub fn status_error(status: StatusCode, body: &str) -> SyncError {
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable || !status.is_client_error() {
        return SyncError::transient(format!("HTTP {}", status));
    }

    let rejection: RejectionBody = serde_json::from_str(body).unwrap_or_default();
    let message = rejection
        .message
        .unwrap_or_else(|| format!("Request failed: {}", status));
    SyncError::validation(rejection.field.as_deref(), format!("HTTP {}: {}", status.as_u16(), message))
}
