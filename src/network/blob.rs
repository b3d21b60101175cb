use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::error::UploadError;

pub const STORAGE_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0";

/// A binary file headed for blob storage.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobPayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl BlobPayload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn ensure_within(&self, limit: usize) -> Result<(), UploadError> {
        if self.len() > limit {
            return Err(UploadError::TooLarge {
                size: self.len(),
                limit,
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the payload and return a stable URL for it.
    async fn upload(&self, payload: &BlobPayload) -> Result<String, UploadError>;
}

/// Object path for an upload: `images/<millis>-<file name>`.
pub fn object_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("images/{}-{}", Utc::now().timestamp_millis(), cleaned)
}

/// Writes blobs under a local directory and hands out `file://` URLs.
pub struct LocalBlobStore {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, payload: &BlobPayload) -> Result<String, UploadError> {
        payload.ensure_within(self.max_bytes)?;

        let path = self.root.join(object_name(&payload.file_name));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &payload.bytes).await?;
        let path = tokio::fs::canonicalize(&path).await?;

        log::info!("Stored {} bytes at {}", payload.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageObject {
    name: String,
    #[serde(default)]
    download_tokens: Option<String>,
}

/// Uploads through the Firebase Storage REST API.
pub struct FirebaseStorageClient {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    id_token: Option<String>,
    max_bytes: usize,
}

impl FirebaseStorageClient {
    pub fn new(bucket: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: STORAGE_ENDPOINT.to_string(),
            bucket: bucket.into(),
            id_token: None,
            max_bytes,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Authenticate uploads as the signed-in user.
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    fn upload_url(&self, name: &str) -> Result<Url, UploadError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.endpoint, self.bucket))
            .map_err(|err| UploadError::Rejected(format!("invalid storage endpoint: {err}")))?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(url)
    }

    pub fn download_url(&self, name: &str, token: Option<&str>) -> Result<String, UploadError> {
        let mut url = Url::parse(&format!("{}/b/{}/o/", self.endpoint, self.bucket))
            .map_err(|err| UploadError::Rejected(format!("invalid storage endpoint: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| UploadError::Rejected("storage endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(name);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("alt", "media");
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl BlobStore for FirebaseStorageClient {
    async fn upload(&self, payload: &BlobPayload) -> Result<String, UploadError> {
        payload.ensure_within(self.max_bytes)?;

        let name = object_name(&payload.file_name);
        let mut request = self
            .http
            .post(self.upload_url(&name)?)
            .header(CONTENT_TYPE, payload.content_type.as_str())
            .body(payload.bytes.clone());
        if let Some(token) = &self.id_token {
            request = request.header(AUTHORIZATION, format!("Firebase {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Storage rejected upload of {name}: {status} {body}");
            return Err(UploadError::Rejected(format!("{status}: {body}")));
        }

        let object: StorageObject = response.json().await?;
        log::info!("Uploaded {} bytes to {}", payload.len(), object.name);
        self.download_url(&object.name, object.download_tokens.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_path_safe() {
        let name = object_name("my photo?.png");
        assert!(name.starts_with("images/"));
        assert!(name.ends_with("-my_photo_.png"));
    }

    #[test]
    fn download_url_encodes_object_path() {
        let client = FirebaseStorageClient::new("luma.appspot.com", 1024);
        let url = client
            .download_url("images/1-a.png", Some("tok"))
            .unwrap();
        assert_eq!(
            url,
            concat!(
                "https://firebasestorage.googleapis.com/v0/b/luma.appspot.com/o/",
                "images%2F1-a.png?alt=media&token=tok"
            )
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = BlobPayload::new("a.png", "image/png", vec![0; 8]);
        assert!(matches!(
            payload.ensure_within(4),
            Err(UploadError::TooLarge { size: 8, limit: 4 })
        ));
        assert!(payload.ensure_within(8).is_ok());
    }

    #[tokio::test]
    async fn local_store_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), 1024);
        let payload = BlobPayload::new("a.png", "image/png", b"png".to_vec());

        let url = store.upload(&payload).await.unwrap();
        assert!(url.starts_with("file://"));
        let path = url.trim_start_matches("file://");
        assert_eq!(std::fs::read(path).unwrap(), b"png");
    }
}
