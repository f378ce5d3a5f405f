use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::CloudConfig;
use crate::error::AppError;

/// Readable by guests and authenticated users.
pub const PUBLIC_PREFIX: &str = "public";
/// Readable/writable/deletable only by the owning user.
pub const PROTECTED_PREFIX: &str = "protected";

pub fn public_path(file_name: &str) -> String {
    format!("{}/{}", PUBLIC_PREFIX, file_name)
}

/// Upload path for a user-owned file. The timestamp prefix keeps repeated
/// uploads of the same filename from colliding.
pub fn protected_path(user_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}-{}",
        PROTECTED_PREFIX,
        user_id,
        Utc::now().timestamp_millis(),
        file_name
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub path: String,
}

/// Temporary display URL for a stored object. Expiry is enforced by the
/// storage service; this client only carries it through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<StoredObject, AppError>;
    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError>;
    async fn remove(&self, path: &str) -> Result<(), AppError>;
}

pub struct HttpBlobStore {
    client: Client,
    config: CloudConfig,
}

impl HttpBlobStore {
    pub fn new(config: CloudConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/objects/{}", self.config.storage_base_url, path)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<StoredObject, AppError> {
        let response = self
            .client
            .put(self.object_url(path))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Upload of {} failed {}: {}",
                path, status, body
            )));
        }

        Ok(StoredObject {
            path: path.to_string(),
        })
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        let response = self
            .client
            .get(format!("{}/url", self.object_url(path)))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::BlobNotFound(path.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Signing url for {} failed {}: {}",
                path, status, body
            )));
        }

        let signed = response
            .json::<SignedUrl>()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to parse signed url: {}", e)))?;
        Ok(signed)
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        let response = self
            .client
            .delete(self.object_url(path))
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Delete of {} failed {}: {}",
                path, status, body
            )));
        }

        Ok(())
    }
}

/// In-process store for tests and offline mode. Signed URLs are synthetic but
/// unique per call, so resolution behaves like the real service.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.lock().await.contains_key(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<StoredObject, AppError> {
        self.objects.lock().await.insert(path.to_string(), data);
        Ok(StoredObject {
            path: path.to_string(),
        })
    }

    async fn get_url(&self, path: &str) -> Result<SignedUrl, AppError> {
        let objects = self.objects.lock().await;
        if !objects.contains_key(path) {
            return Err(AppError::BlobNotFound(path.to_string()));
        }
        Ok(SignedUrl {
            url: format!("memory://{}?token={}", path, Uuid::new_v4()),
            expires_at: Utc::now() + Duration::minutes(15),
        })
    }

    async fn remove(&self, path: &str) -> Result<(), AppError> {
        // Deleting an absent object is a no-op, matching the real service.
        self.objects.lock().await.remove(path);
        Ok(())
    }
}
