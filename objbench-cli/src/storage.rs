use std::sync::Arc;

use anyhow::{Context, Result, bail};
use objbench_engine::RunConfig;
use objbench_engine::backend::{
    Gcs, InMemoryBackend, LocalFs, MAX_COMPOSE_PARTS, S3Backend, S3Config, SharedBackend,
};

use crate::config::{Config, Storage};

/// Creates the backend selected in the configuration.
pub async fn connect(config: &Config, run: &RunConfig) -> Result<SharedBackend> {
    let multipart = run.multipart();

    let backend: SharedBackend = match &config.storage {
        Storage::Memory { latency } => Arc::new(
            InMemoryBackend::new()
                .with_latency(*latency)
                .with_multipart(multipart),
        ),
        Storage::FileSystem { path } => Arc::new(LocalFs::new(path).with_multipart(multipart)),
        Storage::S3 {
            endpoint,
            bucket,
            region,
            access_key,
            secret_key,
            path_style,
        } => {
            if bucket.is_empty() {
                bail!("the s3 storage requires a bucket");
            }

            let s3_config = S3Config {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.as_ref().map(|key| key.as_str().to_owned()),
                path_style: *path_style,
                max_retries: config.max_retries,
            };
            Arc::new(S3Backend::new(s3_config, multipart).await)
        }
        Storage::Gcs { endpoint, bucket } => {
            if bucket.is_empty() {
                bail!("the gcs storage requires a bucket");
            }
            if let Some(multipart) = multipart {
                let parts = multipart.plan(run.object_size()).len();
                if parts > MAX_COMPOSE_PARTS {
                    bail!(
                        "gcs can compose at most {MAX_COMPOSE_PARTS} parts, \
                         but {parts} parts are needed; increase the part size"
                    );
                }
            }

            let gcs = Gcs::new(endpoint.as_deref(), bucket, multipart)
                .await
                .context("failed to initialize the gcs client")?;
            Arc::new(gcs)
        }
    };

    Ok(backend)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytesize::ByteSize;

    use super::*;

    #[tokio::test]
    async fn rejects_too_many_compose_parts() {
        let mut config = Config {
            storage: Storage::Gcs {
                endpoint: Some("http://localhost:4443".into()),
                bucket: "bench".into(),
            },
            object_size: ByteSize::mib(64),
            ..Default::default()
        };
        config.multipart.enabled = true;
        config.multipart.part_size = ByteSize::mib(1);

        let run = config.run_config().unwrap();
        let err = connect(&config, &run).await.unwrap_err();
        assert!(err.to_string().contains("at most 32 parts"));
    }

    #[tokio::test]
    async fn builds_local_backends() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: Storage::FileSystem {
                path: tempdir.path().join("objects"),
            },
            ..Default::default()
        };
        let run = config.run_config().unwrap();
        let backend = connect(&config, &run).await.unwrap();
        assert_eq!(backend.name(), "filesystem");

        let config = Config {
            storage: Storage::Memory {
                latency: Duration::from_millis(5),
            },
            ..Default::default()
        };
        let backend = connect(&config, &run).await.unwrap();
        assert_eq!(backend.name(), "memory");
    }
}
