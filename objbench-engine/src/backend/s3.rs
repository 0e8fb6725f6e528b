//! S3 and S3-compatible storage through the AWS SDK.
//!
//! With multipart enabled, uploads go through `CreateMultipartUpload`, `UploadPart` and
//! `CompleteMultipartUpload`, and downloads fetch the object in ranged parts. Both keep at most the
//! multipart concurrency of parts in flight.

use std::ops::Range;

use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use futures_util::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, BackendResult, abort_unless_completed, until_cancelled};
use crate::multipart::{MultipartConfig, plan_parts};
use crate::payload::Payload;

/// Region used when neither the configuration nor the environment provide one.
const FALLBACK_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible service.
#[derive(Clone, Debug, Default)]
pub struct S3Config {
    /// The bucket all objects are written to.
    pub bucket: String,
    /// The signing region. Falls back to the AWS environment, then `us-east-1`.
    pub region: Option<String>,
    /// A custom endpoint URL for S3-compatible services such as MinIO.
    pub endpoint: Option<String>,
    /// Static access key. Uses the default credential chain if unset.
    pub access_key: Option<String>,
    /// Static secret key, required together with `access_key`.
    pub secret_key: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub path_style: bool,
    /// Number of retries performed by the SDK for every request.
    pub max_retries: u32,
}

/// Talks to S3 and S3-compatible services through the AWS SDK.
#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    multipart: Option<MultipartConfig>,
}

impl S3Backend {
    /// Creates a new S3 backend bound to the configured bucket.
    pub async fn new(config: S3Config, multipart: Option<MultipartConfig>) -> Self {
        let region = RegionProviderChain::first_try(config.region.map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_retries + 1));

        if let Some(endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (config.access_key, config.secret_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "objbench");
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            multipart,
        }
    }

    async fn put_object(&self, key: &str, payload: Payload) -> BackendResult<()> {
        let body = payload.into_bytes()?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(BackendError::generic(format!("error uploading object {key}")))?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
        multipart: MultipartConfig,
    ) -> BackendResult<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send();
        let created = until_cancelled(cancel, async {
            create.await.map_err(BackendError::generic(format!(
                "error creating multipart upload for {key}"
            )))
        })
        .await?;

        let upload_id = created.upload_id().ok_or_else(|| {
            BackendError::UnexpectedResponse(format!("no upload id for multipart upload of {key}"))
        })?;

        let upload = async {
            let parts = self.upload_parts(key, upload_id, payload, multipart).await?;
            self.complete_multipart(key, upload_id, parts).await
        };
        abort_unless_completed(cancel, upload, || self.abort_multipart(key, upload_id)).await
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BackendResult<()> {
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(BackendError::generic(format!(
                "error completing multipart upload for {key}"
            )))?;

        Ok(())
    }

    /// Releases the parts of an unfinished upload. Failures are only logged.
    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(error) = aborted {
            tracing::debug!(key, %error, "failed to abort multipart upload");
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut payload: Payload,
        multipart: MultipartConfig,
    ) -> BackendResult<Vec<CompletedPart>> {
        let parts = multipart.plan(payload.len());
        let client = &self.client;
        let bucket = self.bucket.as_str();

        let mut completed: Vec<CompletedPart> = stream::iter(parts.into_iter().enumerate())
            .map(move |(index, range)| {
                // parts are read lazily, so at most `concurrency` parts are held in memory
                let contents = payload.read_range(range);
                let part_number = index as i32 + 1;
                async move {
                    let uploaded = client
                        .upload_part()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(ByteStream::from(contents?))
                        .send()
                        .await
                        .map_err(BackendError::generic(format!(
                            "error uploading part {part_number} for {key}"
                        )))?;

                    Ok::<_, BackendError>(
                        CompletedPart::builder()
                            .part_number(part_number)
                            .set_e_tag(uploaded.e_tag().map(str::to_owned))
                            .build(),
                    )
                }
            })
            .buffer_unordered(multipart.concurrency)
            .try_collect()
            .await?;

        completed.sort_by_key(|part| part.part_number());
        Ok(completed)
    }

    /// Reads an object in a single request and returns the number of bytes received.
    async fn get_object(&self, key: &str) -> BackendResult<u64> {
        self.get_range(key, None).await.map(|(received, _)| received)
    }

    /// Reads one byte range of an object, or all of it without a range.
    ///
    /// Returns the number of bytes received along with the total object size, if reported.
    async fn get_range(
        &self,
        key: &str,
        range: Option<Range<u64>>,
    ) -> BackendResult<(u64, Option<u64>)> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(range_header))
            .send()
            .await
            .map_err(BackendError::generic(format!("error downloading object {key}")))?;

        let total = response.content_range().and_then(total_size);
        let mut body = response.body;
        let mut received = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(BackendError::generic("error receiving response"))?
        {
            received += chunk.len() as u64;
        }

        Ok((received, total))
    }

    /// Reads an object in ranged parts, with up to `concurrency` parts in flight.
    ///
    /// The first part also reveals the object size, which determines the remaining ranges.
    async fn get_parts(&self, key: &str, multipart: MultipartConfig) -> BackendResult<u64> {
        let part_size = multipart.part_size;
        let (first, total) = self.get_range(key, Some(0..part_size)).await?;
        let Some(total) = total else {
            // the service ignored the range and sent the entire object
            return Ok(first);
        };

        let remaining = plan_parts(total, part_size).into_iter().skip(1);
        let rest = stream::iter(remaining)
            .map(|range| async move { self.get_range(key, Some(range)).await })
            .buffer_unordered(multipart.concurrency)
            .try_fold(0, |sum, (received, _)| async move {
                Ok::<_, BackendError>(sum + received)
            })
            .await?;

        Ok(first + rest)
    }
}

/// Formats an HTTP `Range` header for a non-empty byte range.
fn range_header(range: Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end.saturating_sub(1))
}

/// Extracts the object size from a `Content-Range` header such as `bytes 0-99/1000`.
fn total_size(content_range: &str) -> Option<u64> {
    let (_, total) = content_range.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait::async_trait]
impl Backend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(level = "trace", fields(bucket = %self.bucket), skip_all)]
    async fn prepare(&self) -> BackendResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(BackendError::generic(format!(
                "unable to access the bucket {}",
                self.bucket
            )))?;

        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()> {
        match self.multipart {
            Some(multipart) => self.put_multipart(cancel, key, payload, multipart).await,
            None => until_cancelled(cancel, self.put_object(key, payload)).await,
        }
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64> {
        match self.multipart {
            Some(multipart) => until_cancelled(cancel, self.get_parts(key, multipart)).await,
            None => until_cancelled(cancel, self.get_object(key)).await,
        }
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()> {
        until_cancelled(cancel, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(BackendError::generic(format!("error deleting object {key}")))?;
            Ok(())
        })
        .await
    }
}
