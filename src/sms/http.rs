//! HTTP JSON implementation of the [`VolumeManager`] interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{CreateSpec, QueryFilter, QueryResult, SmsError, UpdateSpec, VolumeManager};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to an SMS endpoint exposing the volume catalog as a small JSON API.
pub struct HttpVolumeManager {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateVolumeResponse {
    volume_handle: String,
}

impl HttpVolumeManager {
    pub fn new(endpoint: &str) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| SmsError::Transient(error.to_string()))?;

        Ok(HttpVolumeManager {
            base_url: endpoint.trim_end_matches('/').to_owned(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl From<reqwest::Error> for SmsError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status.is_client_error() => SmsError::Rejected(error.to_string()),
            _ => SmsError::Transient(error.to_string()),
        }
    }
}

#[async_trait]
impl VolumeManager for HttpVolumeManager {
    async fn query(&self, filter: QueryFilter) -> Result<QueryResult, SmsError> {
        let response = self
            .client
            .post(self.url("/volumes/query"))
            .json(&filter)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn create_volume(&self, spec: CreateSpec) -> Result<String, SmsError> {
        let response = self
            .client
            .post(self.url("/volumes"))
            .json(&spec)
            .send()
            .await?
            .error_for_status()?;

        let created: CreateVolumeResponse = response.json().await?;
        Ok(created.volume_handle)
    }

    async fn update_metadata(&self, spec: UpdateSpec) -> Result<(), SmsError> {
        self.client
            .post(self.url(&format!("/volumes/{}/metadata", spec.volume_handle)))
            .json(&spec)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn delete_volume(&self, volume_handle: &str, delete_disk: bool) -> Result<(), SmsError> {
        self.client
            .post(self.url(&format!("/volumes/{}/delete", volume_handle)))
            .json(&json!({ "deleteDisk": delete_disk }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
