use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub type Result<T, E = BlobError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Bucket {bucket} is unavailable: {reason}")]
    BucketUnavailable { bucket: String, reason: String },
    #[error("Uploading object {key} failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("Making object {key} public failed: {reason}")]
    Acl { key: String, reason: String },
    #[error("Fetching attributes of object {key} failed: {reason}")]
    Attributes { key: String, reason: String },
}

/// An uploaded image.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Image {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Storage for post images.
///
/// Each call creates one publicly readable object; storing under an existing
/// key overwrites it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `image` under `key` and returns the public URL of the object.
    async fn store(&self, key: &str, image: Image) -> Result<String>;
}
