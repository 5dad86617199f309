//! Blob store backed by S3 or an S3-compatible service such as MinIO.

use crate::blob::{BlobError, BlobStore, Image, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client, error::DisplayErrorContext, primitives::ByteStream, types::ObjectCannedAcl,
};
use tracing::{debug, info};

const FALLBACK_REGION: &str = "us-east-1";

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint; addressing switches to path style when set.
    pub endpoint: Option<String>,
    /// Base URL under which objects are publicly reachable.
    pub public_url: Option<String>,
}

pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    /// Builds a client from the ambient AWS configuration (environment,
    /// profile, instance metadata).
    pub async fn connect(config: S3Config) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let region = sdk_config.region().map(ToString::to_string);
        let public_base_url = public_base_url(&config, region.as_deref());
        debug!(bucket = %config.bucket, %public_base_url, "Built S3 client");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            public_base_url,
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base_url)
    }
}

fn public_base_url(config: &S3Config, region: Option<&str>) -> String {
    if let Some(public_url) = &config.public_url {
        return public_url.trim_end_matches('/').to_owned();
    }

    if let Some(endpoint) = &config.endpoint {
        return format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket);
    }

    let region = region.unwrap_or(FALLBACK_REGION);
    format!("https://{}.s3.{region}.amazonaws.com", config.bucket)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(&self, key: &str, image: Image) -> Result<String> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| BlobError::BucketUnavailable {
                bucket: self.bucket.clone(),
                reason: DisplayErrorContext(err).to_string(),
            })?;

        let size = image.bytes.len();
        debug!(bucket = %self.bucket, key, size, "Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(image.content_type)
            .body(ByteStream::from(image.bytes))
            .send()
            .await
            .map_err(|err| BlobError::Upload {
                key: key.to_owned(),
                reason: DisplayErrorContext(err).to_string(),
            })?;

        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|err| BlobError::Acl {
                key: key.to_owned(),
                reason: DisplayErrorContext(err).to_string(),
            })?;

        let attributes = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| BlobError::Attributes {
                key: key.to_owned(),
                reason: DisplayErrorContext(err).to_string(),
            })?;

        let url = self.object_url(key);
        info!(
            key,
            %url,
            size = attributes.content_length(),
            etag = attributes.e_tag(),
            "Image is saved to blob storage"
        );

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use crate::s3::{S3Config, public_base_url};

    #[test]
    fn public_url_takes_precedence() {
        let config = S3Config {
            bucket: "post-images".to_owned(),
            endpoint: Some("http://localhost:9000".to_owned()),
            public_url: Some("https://cdn.example.com/images/".to_owned()),
        };

        assert_eq!(
            public_base_url(&config, Some("eu-west-1")),
            "https://cdn.example.com/images"
        );
    }

    #[test]
    fn custom_endpoint_uses_path_style() {
        let config = S3Config {
            bucket: "post-images".to_owned(),
            endpoint: Some("http://localhost:9000/".to_owned()),
            public_url: None,
        };

        assert_eq!(
            public_base_url(&config, None),
            "http://localhost:9000/post-images"
        );
    }

    #[test]
    fn aws_uses_virtual_hosted_style() {
        let config = S3Config {
            bucket: "post-images".to_owned(),
            ..S3Config::default()
        };

        assert_eq!(
            public_base_url(&config, Some("eu-west-1")),
            "https://post-images.s3.eu-west-1.amazonaws.com"
        );
        assert_eq!(
            public_base_url(&config, None),
            "https://post-images.s3.us-east-1.amazonaws.com"
        );
    }
}
