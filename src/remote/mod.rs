//! HTTP adapter for the backend's record API.
//!
//! The backend is authoritative for timestamps and ids: every record it
//! returns is treated as `synced` as of its `updatedAt`.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::api::ApiResponse;
use crate::auth::{API_KEY_HEADER, OWNER_HEADER};
use crate::config::Config;
use crate::errors::{AppError, ErrorResponse};
use crate::models::{
    CreateBody, DeleteOutcome, Entity, EntityKind, NewRecord, Record, RecordPatch, WireRecord,
};
use crate::store::RecordStore;

/// Longest slice of an unexpected response body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Shared HTTP client for every remote store.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteClient {
    /// Build a client for the backend at `base_url`.
    ///
    /// `api_key` is sent as `x-api-key` on every request when present.
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).map_err(|_| {
                AppError::Configuration("API key is not a valid header value".to_string())
            })?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            &config.remote_url,
            config.api_psk.as_deref(),
            config.request_timeout,
        )
    }

    /// Typed store for one entity kind sharing this client.
    pub fn store<E: Entity>(&self) -> RemoteStore<E> {
        RemoteStore {
            client: self.clone(),
            _entity: PhantomData,
        }
    }

    fn url(&self, kind: EntityKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/api/{}/{}", self.base_url, kind.path(), id),
            None => format!("{}/api/{}", self.base_url, kind.path()),
        }
    }

    fn request(&self, method: Method, url: &str, owner_id: &str) -> Result<RequestBuilder, AppError> {
        if owner_id.is_empty() {
            return Err(AppError::Configuration(
                "Remote store used without an owner".to_string(),
            ));
        }
        Ok(self.http.request(method, url).header(OWNER_HEADER, owner_id))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AppError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(envelope) = serde_json::from_str::<ErrorResponse>(&body) {
                tracing::debug!("Backend rejected request ({}): {}", status, envelope.error.code);
                return Err(AppError::from_code(&envelope.error.code, envelope.error.message));
            }
            let preview: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::TransportFailure(format!(
                "Backend returned {}: {}",
                status, preview
            )));
        }

        serde_json::from_str::<ApiResponse<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|e| AppError::TransportFailure(format!("Malformed backend response: {}", e)))
    }
}

/// Remote store for one entity kind.
pub struct RemoteStore<E> {
    client: RemoteClient,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for RemoteStore<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> RemoteStore<E> {
    async fn create(
        &self,
        new: &NewRecord<E>,
        owner_id: &str,
        client_id: Option<&str>,
    ) -> Result<Record<E>, AppError> {
        let url = self.client.url(E::KIND, None);
        let body = CreateBody {
            client_id,
            record: new,
        };
        let request = self.client.request(Method::POST, &url, owner_id)?.json(&body);
        let created: WireRecord<E> = RemoteClient::send(request).await?;
        tracing::debug!("Created {} {} remotely", E::KIND, created.id);
        Ok(created.into_synced())
    }

    /// Delete and report what the backend removed.
    pub async fn delete_record(&self, id: &str, owner_id: &str) -> Result<DeleteOutcome, AppError> {
        let url = self.client.url(E::KIND, Some(id));
        let request = self.client.request(Method::DELETE, &url, owner_id)?;
        let outcome: DeleteOutcome = RemoteClient::send(request).await?;
        tracing::debug!("Deleted {} {} remotely ({} rows)", E::KIND, id, outcome.removed);
        Ok(outcome)
    }
}

#[async_trait]
impl<E: Entity> RecordStore<E> for RemoteStore<E> {
    async fn get_all(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError> {
        let url = self.client.url(E::KIND, None);
        let request = self.client.request(Method::GET, &url, owner_id)?;
        let records: Vec<WireRecord<E>> = RemoteClient::send(request).await?;
        Ok(records.into_iter().map(WireRecord::into_synced).collect())
    }

    async fn get_by_id(&self, id: &str, owner_id: &str) -> Result<Option<Record<E>>, AppError> {
        let url = self.client.url(E::KIND, Some(id));
        let request = self.client.request(Method::GET, &url, owner_id)?;
        match RemoteClient::send::<WireRecord<E>>(request).await {
            Ok(record) => Ok(Some(record.into_synced())),
            Err(AppError::NotFoundOrForbidden(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn add(&self, new: NewRecord<E>, owner_id: &str) -> Result<Record<E>, AppError> {
        self.create(&new, owner_id, None).await
    }

    async fn add_idempotent(
        &self,
        new: NewRecord<E>,
        owner_id: &str,
        client_id: &str,
    ) -> Result<Record<E>, AppError> {
        self.create(&new, owner_id, Some(client_id)).await
    }

    async fn update(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
        owner_id: &str,
    ) -> Result<Record<E>, AppError> {
        let url = self.client.url(E::KIND, Some(id));
        let request = self.client.request(Method::PUT, &url, owner_id)?.json(&patch);
        let updated: WireRecord<E> = RemoteClient::send(request).await?;
        Ok(updated.into_synced())
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<(), AppError> {
        self.delete_record(id, owner_id).await.map(|_| ())
    }
}
