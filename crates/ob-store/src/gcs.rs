//! Google Cloud Storage backend over the JSON API.

use async_trait::async_trait;
use ob_types::StoreError;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::ObjectStore;

pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Connection settings for [`GcsStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    /// OAuth2 bearer token; requests go out unauthenticated when absent.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_GCS_ENDPOINT.to_string()
}

impl GcsConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            access_token: None,
            endpoint: default_endpoint(),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }
}

/// Object store backed by a Cloud Storage bucket.
#[derive(Debug, Clone)]
pub struct GcsStore {
    config: GcsConfig,
    http: reqwest::Client,
}

impl GcsStore {
    pub fn new(config: GcsConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.endpoint).map_err(|e| StoreError::Backend {
            message: format!("bad endpoint {}: {e}", self.config.endpoint),
        })?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend {
                message: format!("endpoint {} cannot carry a path", self.config.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn upload_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.config.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn download_url(&self, key: &str) -> Result<Url, StoreError> {
        // A single path segment, so '/' inside the key is percent-encoded.
        let mut url = self.url(&["storage", "v1", "b", &self.config.bucket, "o", key])?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn transport_error(key: &str, err: reqwest::Error) -> StoreError {
    StoreError::Http {
        key: key.to_string(),
        status: err.status().map(|s| s.as_u16()).unwrap_or(0),
        message: err.to_string(),
    }
}

async fn status_error(key: &str, response: reqwest::Response) -> StoreError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return StoreError::NotFound {
            key: key.to_string(),
        };
    }
    let message = response.text().await.unwrap_or_default();
    StoreError::Http {
        key: key.to_string(),
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let url = self.upload_url(key)?;
        let size = bytes.len();
        let response = self
            .authorize(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error(key, e))?;

        if !response.status().is_success() {
            return Err(status_error(key, response).await);
        }
        debug!(bucket = %self.config.bucket, key, bytes = size, "object uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.download_url(key)?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| transport_error(key, e))?;

        if !response.status().is_success() {
            return Err(status_error(key, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(key, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_encodes_object_name() {
        let store = GcsStore::new(GcsConfig::new("my-bucket"));
        let url = store.download_url("example_study/trial_result_3.bin").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/my-bucket/o/example_study%2Ftrial_result_3.bin?alt=media"
        );
    }

    #[test]
    fn upload_url_uses_media_upload() {
        let store = GcsStore::new(GcsConfig::new("my-bucket"));
        let url = store.upload_url("example_study/trial_3.bin").unwrap();
        assert_eq!(url.path(), "/upload/storage/v1/b/my-bucket/o");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("uploadType".to_string(), "media".to_string()),
                ("name".to_string(), "example_study/trial_3.bin".to_string()),
            ]
        );
    }

    #[test]
    fn token_is_never_serialized() {
        let config = GcsConfig::new("b").with_access_token(Some("secret".into()));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
