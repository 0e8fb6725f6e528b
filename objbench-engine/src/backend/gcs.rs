//! Google Cloud Storage through its XML and JSON APIs.
//!
//! Multipart uploads write every part as a temporary `<key>_<n>` object and compose them into the
//! final object. The part objects are removed afterwards, whether or not the upload completed.

use std::fmt;
use std::ops::Range;
use std::pin::pin;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest::{Body, RequestBuilder, Url};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, BackendResult, USER_AGENT, until_cancelled};
use crate::multipart::MultipartConfig;
use crate::payload::Payload;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Maximum number of source objects a single GCS compose request accepts.
pub const MAX_COMPOSE_PARTS: usize = 32;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComposeRequest<'a> {
    source_objects: Vec<SourceObject<'a>>,
}

#[derive(Serialize)]
struct SourceObject<'a> {
    name: &'a str,
}

/// Google Cloud Storage backend.
///
/// Objects are transferred through the XML API. Multipart uploads write every part as a separate
/// object and compose them into the final object through the JSON API.
pub struct Gcs {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
    multipart: Option<MultipartConfig>,
}

impl Gcs {
    /// Creates a GCS backend using Application Default Credentials.
    ///
    /// With a custom `endpoint`, such as an emulator, requests are sent without authentication.
    pub async fn new(
        endpoint: Option<&str>,
        bucket: &str,
        multipart: Option<MultipartConfig>,
    ) -> BackendResult<Self> {
        let token_provider = match endpoint {
            Some(_) => None,
            None => Some(gcp_auth::provider().await?),
        };

        let endpoint = endpoint.unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = Url::parse(endpoint).map_err(BackendError::generic(format!(
            "invalid GCS endpoint {endpoint}"
        )))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(BackendError::reqwest("failed to build HTTP client"))?;

        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            token_provider,
            multipart,
        })
    }

    fn url(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                BackendError::UnexpectedResponse(format!("cannot build URLs on {}", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, key: &str) -> BackendResult<Url> {
        self.url(&[&self.bucket, key])
    }

    async fn authorize(&self, builder: RequestBuilder) -> BackendResult<RequestBuilder> {
        Ok(match &self.token_provider {
            Some(provider) => builder.bearer_auth(provider.token(SCOPES).await?.as_str()),
            None => builder,
        })
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        context: String,
    ) -> BackendResult<reqwest::Response> {
        self.authorize(builder)
            .await?
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(BackendError::reqwest(context))
    }

    async fn put_object(&self, key: &str, payload: Payload) -> BackendResult<()> {
        let length = payload.len();
        let builder = self
            .client
            .put(self.object_url(key)?)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(payload.into_stream()));

        self.send(builder, format!("error uploading {key}")).await?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        let builder = self.client.delete(self.object_url(key)?);
        self.send(builder, format!("error deleting object {key}")).await?;
        Ok(())
    }

    async fn put_composed(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
        multipart: MultipartConfig,
    ) -> BackendResult<()> {
        let parts = multipart.plan(payload.len());
        if parts.len() > MAX_COMPOSE_PARTS {
            return Err(BackendError::UnexpectedResponse(format!(
                "can't split {key} in more than {MAX_COMPOSE_PARTS} parts"
            )));
        }

        let part_keys: Vec<String> = (0..parts.len())
            .map(|index| format!("{key}_{index}"))
            .collect();

        let upload = async {
            self.upload_parts(&part_keys, parts, payload, multipart.concurrency)
                .await?;
            self.compose(key, &part_keys).await
        };
        let result = until_cancelled(cancel, upload).await;

        // runs after cancellation as well, parts must not outlive the upload
        self.delete_parts(&part_keys).await;
        result
    }

    async fn upload_parts(
        &self,
        part_keys: &[String],
        parts: Vec<Range<u64>>,
        mut payload: Payload,
        concurrency: usize,
    ) -> BackendResult<()> {
        stream::iter(parts.into_iter().zip(part_keys.iter().cloned()))
            .map(move |(range, part_key)| {
                let contents = payload.read_range(range);
                async move {
                    let builder = self
                        .client
                        .put(self.object_url(&part_key)?)
                        .body(contents?);
                    self.send(builder, format!("error uploading part {part_key}"))
                        .await
                        .map(drop)
                }
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await
    }

    async fn compose(&self, key: &str, part_keys: &[String]) -> BackendResult<()> {
        let compose = ComposeRequest {
            source_objects: part_keys
                .iter()
                .map(|name| SourceObject { name })
                .collect(),
        };
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o", key, "compose"])?;
        let builder = self.client.post(url).json(&compose);
        self.send(builder, format!("error composing object {key}")).await?;
        Ok(())
    }

    /// Removes part objects. Parts that were never written fail to delete, which is only logged.
    async fn delete_parts(&self, part_keys: &[String]) {
        for part_key in part_keys {
            if let Err(error) = self.delete_object(part_key).await {
                tracing::debug!(%part_key, %error, "failed to remove composed part");
            }
        }
    }
}

impl fmt::Debug for Gcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gcs")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("multipart", &self.multipart)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for Gcs {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn prepare(&self) -> BackendResult<()> {
        let url = self.url(&["storage", "v1", "b", &self.bucket])?;
        let builder = self.client.get(url);
        self.send(builder, format!("unable to access the bucket {}", self.bucket))
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()> {
        match self.multipart {
            Some(multipart) => self.put_composed(cancel, key, payload, multipart).await,
            None => until_cancelled(cancel, self.put_object(key, payload)).await,
        }
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64> {
        until_cancelled(cancel, async {
            let builder = self.client.get(self.object_url(key)?);
            let response = self
                .send(builder, format!("error downloading object {key}"))
                .await?;

            let mut body = pin!(response.bytes_stream());
            let mut received = 0;
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(BackendError::reqwest("error receiving response"))?
            {
                received += chunk.len() as u64;
            }

            Ok(received)
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()> {
        until_cancelled(cancel, self.delete_object(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_encoded_urls() {
        let gcs = Gcs::new(Some("http://localhost:4443"), "bench", None)
            .await
            .unwrap();

        let url = gcs.object_url("run 1/Object-0").unwrap();
        assert_eq!(url.as_str(), "http://localhost:4443/bench/run%201%2FObject-0");

        let url = gcs
            .url(&["storage", "v1", "b", "bench", "o", "Object-0", "compose"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/storage/v1/b/bench/o/Object-0/compose"
        );
    }

    #[tokio::test]
    async fn rejects_too_many_parts() {
        let gcs = Gcs::new(
            Some("http://localhost:4443"),
            "bench",
            Some(MultipartConfig {
                part_size: 10,
                concurrency: 1,
            }),
        )
        .await
        .unwrap();

        let payload = crate::payload::PayloadSource::materialize(1_000).open();
        let err = gcs
            .upload(&CancellationToken::new(), "Object-0", payload)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn cancelled_composed_upload_reports_cancellation() {
        // nothing listens on the port, so removing the parts fails quickly and is only logged
        let gcs = Gcs::new(
            Some("http://127.0.0.1:9"),
            "bench",
            Some(MultipartConfig {
                part_size: 100,
                concurrency: 2,
            }),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let payload = crate::payload::PayloadSource::materialize(1_000).open();
        let err = gcs.upload(&cancel, "Object-0", payload).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
