use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::error::BwsError;
use crate::region::Region;
use crate::types::{CreateResponse, GetByIdResponse, SyncResponse};

/// A thin REST client against the documented Bitwarden Secrets Manager API
/// surface. Only `sync`, `get_by_id`, and `create` are implemented,
/// matching the three operations the stages actually call.
pub struct BwsSecretClient {
    http: Client,
    region: Region,
    access_token: String,
}

impl BwsSecretClient {
    pub fn new(region: Region, access_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            region,
            access_token: access_token.into(),
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    async fn map_response<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        on_404: BwsError,
    ) -> Result<T, BwsError> {
        match resp.status() {
            StatusCode::OK => {
                let bytes = resp.bytes().await?;
                serde_json::from_slice(&bytes).map_err(|e| BwsError::SecretParse(e.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BwsError::Unauthorised),
            StatusCode::TOO_MANY_REQUESTS => Err(BwsError::ApiRateLimit),
            StatusCode::NOT_FOUND => Err(on_404),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(BwsError::ApiError(format!("{status}: {body}")))
            }
        }
    }

    /// `sync(since) -> { secrets?, ratelimit }`. `since` is the
    /// epoch timestamp for a full sync, or the last successful sync time
    /// for an incremental one.
    pub async fn sync(&self, since: DateTime<Utc>) -> Result<SyncResponse, BwsError> {
        let resp = self
            .http
            .get(format!("{}/api/sync", self.region.api_url))
            .bearer_auth(&self.access_token)
            .query(&[("lastSyncedDate", since.to_rfc3339())])
            .send()
            .await?;
        Self::map_response(resp, BwsError::SecretNotFound).await
    }

    /// `get_by_id(id) -> { id, key, value, ratelimit }`.
    pub async fn get_by_id(&self, id: &str) -> Result<GetByIdResponse, BwsError> {
        let resp = self
            .http
            .get(format!("{}/api/secrets/{id}", self.region.api_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::map_response(resp, BwsError::SecretNotFound).await
    }

    /// `create(key, value, note, project_ids) -> { id, key, value }`.
    pub async fn create(
        &self,
        key: &str,
        value: &str,
        note: &str,
        project_ids: &[String],
    ) -> Result<CreateResponse, BwsError> {
        let resp = self
            .http
            .post(format!("{}/api/secrets", self.region.api_url))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "key": key,
                "value": value,
                "note": note,
                "projectIds": project_ids,
            }))
            .send()
            .await?;
        Self::map_response(resp, BwsError::ApiError("create returned 404".into())).await
    }
}
