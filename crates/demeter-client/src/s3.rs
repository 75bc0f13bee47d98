use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use demeter_core::error::HarvestError;
use demeter_core::traits::ObjectStore;

/// [`ObjectStore`] backed by an S3 bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the default AWS credential chain.
    ///
    /// A custom `endpoint` (MinIO, localstack) switches to path-style
    /// addressing.
    pub async fn connect(bucket: impl Into<String>, endpoint: Option<&str>) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let bucket = bucket.into();
        tracing::info!(%bucket, endpoint = ?endpoint, "S3 object store initialized");
        Self::new(Client::from_conf(builder.build()), bucket)
    }
}

impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), HarvestError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                HarvestError::Storage(format!("Failed to upload s3://{}/{key}: {e}", self.bucket))
            })?;

        tracing::debug!(bucket = %self.bucket, %key, size, "Uploaded object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HarvestError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(HarvestError::Storage(format!(
                    "Failed to download s3://{}/{key}: {service_error}",
                    self.bucket
                )));
            }
        };

        let data = response.body.collect().await.map_err(|e| {
            HarvestError::Storage(format!("Failed to read s3://{}/{key}: {e}", self.bucket))
        })?;
        Ok(Some(data.into_bytes().to_vec()))
    }
}
