//! Object store seam: image byte fetches and presigned write slots.
//!
//! Uploads live under `uploads/{owner_id}/{uuid}-{filename}`; the prefix is
//! the tenancy boundary and every read on behalf of an owner is checked
//! against it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// Maximum presign TTL in seconds.
pub const MAX_PRESIGN_TTL_SECS: u64 = 60;

/// A `(bucket, key)` reference to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// A presigned upload slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignedUpload {
    /// Signed URL accepting a single PUT.
    pub url: String,
    /// Object key the upload will land at.
    pub key: String,
    /// Expiry instant; at most 60 seconds out.
    pub expires_at: DateTime<Utc>,
}

/// Object storage operations used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch raw object bytes.
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>>;

    /// Delete an object. Missing objects are not an error.
    async fn delete(&self, object: &ObjectRef) -> Result<()>;

    /// Create a presigned upload slot after validating size and MIME type.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        size_bytes: u64,
        ttl_seconds: u64,
    ) -> Result<PresignedUpload>;
}

/// Build the canonical upload key for an owner's file.
pub fn upload_key(owner_id: &str, filename: &str) -> String {
    format!("uploads/{}/{}-{}", owner_id, Uuid::new_v4(), filename)
}

/// Refuse keys that do not sit under the supplied owner's upload prefix.
pub fn verify_key_owner(key: &str, owner_id: &str) -> Result<()> {
    let prefix = format!("uploads/{}/", owner_id);
    if key.starts_with(&prefix) {
        Ok(())
    } else {
        Err(Error::permission_denied(format!(
            "key '{}' is not under the upload prefix of owner '{}'",
            key, owner_id
        )))
    }
}

/// In-memory object store used by tests and local runs.
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<ObjectRef, Vec<u8>>>>,
    max_upload_size: u64,
    allowed_mime: Vec<String>,
}

impl MemoryObjectStore {
    /// Create a store enforcing the configured upload limits.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            max_upload_size: config.max_upload_size,
            allowed_mime: config.upload_allowed_mime.clone(),
        }
    }

    /// Insert object bytes directly (test setup path).
    pub async fn put(&self, object: ObjectRef, bytes: Vec<u8>) {
        self.objects.write().await.insert(object, bytes);
    }

    /// Whether an object exists.
    pub async fn contains(&self, object: &ObjectRef) -> bool {
        self.objects.read().await.contains_key(object)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, object: &ObjectRef) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(object)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("object {}/{}", object.bucket, object.key)))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        self.objects.write().await.remove(object);
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        size_bytes: u64,
        ttl_seconds: u64,
    ) -> Result<PresignedUpload> {
        if size_bytes > self.max_upload_size {
            return Err(Error::InvalidInput(format!(
                "upload of {} bytes exceeds cap of {} bytes",
                size_bytes, self.max_upload_size
            )));
        }
        if !self.allowed_mime.iter().any(|m| m == content_type) {
            return Err(Error::InvalidInput(format!(
                "content type '{}' is not allowed",
                content_type
            )));
        }

        let ttl = ttl_seconds.min(MAX_PRESIGN_TTL_SECS);
        Ok(PresignedUpload {
            url: format!("memory://{}/{}?signature={}", bucket, key, Uuid::new_v4()),
            key: key.to_string(),
            expires_at: Utc::now() + Duration::seconds(ttl as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store() -> MemoryObjectStore {
        MemoryObjectStore::new(&PipelineConfig::default())
    }

    #[test]
    fn test_upload_key_shape() {
        let key = upload_key("owner-1", "scan.jpg");
        assert!(key.starts_with("uploads/owner-1/"));
        assert!(key.ends_with("-scan.jpg"));
    }

    #[test]
    fn test_verify_key_owner() {
        assert!(verify_key_owner("uploads/owner-1/abc-scan.jpg", "owner-1").is_ok());

        let err = verify_key_owner("uploads/owner-2/abc-scan.jpg", "owner-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let err = store()
            .get(&ObjectRef::new("cards", "uploads/o/x.jpg"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = store();
        let object = ObjectRef::new("cards", "uploads/o/x.jpg");
        store.put(object.clone(), vec![1, 2, 3]).await;

        assert_eq!(store.get(&object).await.unwrap(), vec![1, 2, 3]);
        store.delete(&object).await.unwrap();
        assert!(!store.contains(&object).await);
    }

    #[tokio::test]
    async fn test_presign_enforces_size_cap() {
        let err = store()
            .presign_put("cards", "uploads/o/big.jpg", "image/jpeg", 13 * 1024 * 1024, 30)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_presign_enforces_mime_allowlist() {
        let err = store()
            .presign_put("cards", "uploads/o/x.gif", "image/gif", 1024, 30)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_presign_caps_ttl() {
        let upload = store()
            .presign_put("cards", "uploads/o/x.jpg", "image/jpeg", 1024, 600)
            .await
            .unwrap();
        let ttl = upload.expires_at - Utc::now();
        assert!(ttl <= Duration::seconds(MAX_PRESIGN_TTL_SECS as i64));
    }
}
