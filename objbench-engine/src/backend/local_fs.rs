//! Filesystem backend storing every object as a file below a root directory.
//!
//! Uploads are written to a temporary `<key>.upload` file that is renamed into place once
//! complete, so readers never observe a partial object. Multipart uploads additionally stage
//! every part as `<key>.part-<n>` and concatenate the parts on commit. Cancellation is checked
//! between parts and chunks, and every file of an unfinished upload is removed before it returns.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::TryStreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, BackendResult, ensure_active, until_cancelled};
use crate::multipart::MultipartConfig;
use crate::payload::Payload;

/// Stores objects as files below a root directory.
#[derive(Debug)]
pub struct LocalFs {
    path: PathBuf,
    multipart: Option<MultipartConfig>,
}

impl LocalFs {
    /// Creates a backend rooted at `path`. The directory is created by [`Backend::prepare`].
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.into(),
            multipart: None,
        }
    }

    /// Writes objects as separate part files that are concatenated on commit.
    pub fn with_multipart(mut self, multipart: Option<MultipartConfig>) -> Self {
        self.multipart = multipart;
        self
    }

    async fn create_file(&self, path: &Path) -> BackendResult<BufWriter<File>> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(BufWriter::new(file))
    }

    async fn finish_file(mut writer: BufWriter<File>) -> BackendResult<()> {
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_data().await?;
        Ok(())
    }

    async fn write_object(
        &self,
        cancel: &CancellationToken,
        temp_path: &Path,
        payload: Payload,
    ) -> BackendResult<()> {
        let mut stream = payload.into_stream();
        let mut writer = self.create_file(temp_path).await?;

        while let Some(chunk) = stream.try_next().await? {
            ensure_active(cancel)?;
            writer.write_all(&chunk).await?;
        }
        Self::finish_file(writer).await
    }

    /// Stages all parts, then concatenates them into `temp_path`.
    ///
    /// Every part file is recorded in `staged` before it is created.
    async fn write_parts(
        &self,
        cancel: &CancellationToken,
        temp_path: &Path,
        path: &Path,
        mut payload: Payload,
        multipart: MultipartConfig,
        staged: &mut Vec<PathBuf>,
    ) -> BackendResult<()> {
        for (index, range) in multipart.plan(payload.len()).into_iter().enumerate() {
            ensure_active(cancel)?;

            let part_path = part_path(path, index);
            staged.push(part_path.clone());

            let contents = payload.read_range(range)?;
            let mut writer = self.create_file(&part_path).await?;
            writer.write_all(&contents).await?;
            Self::finish_file(writer).await?;
        }

        let mut writer = self.create_file(temp_path).await?;
        for part_path in staged.iter() {
            ensure_active(cancel)?;
            let mut part = File::open(part_path).await?;
            tokio::io::copy(&mut part, &mut writer).await?;
        }
        Self::finish_file(writer).await
    }

    async fn write(
        &self,
        cancel: &CancellationToken,
        path: &Path,
        payload: Payload,
    ) -> BackendResult<()> {
        let temp_path = suffixed(path, ".upload");
        let mut staged = Vec::new();

        let written = match self.multipart {
            Some(multipart) => {
                self.write_parts(cancel, &temp_path, path, payload, multipart, &mut staged)
                    .await
            }
            None => self.write_object(cancel, &temp_path, payload).await,
        };
        let result = match written.and_then(|()| ensure_active(cancel)) {
            Ok(()) => tokio::fs::rename(&temp_path, path).await.map_err(BackendError::from),
            Err(error) => Err(error),
        };

        for part_path in &staged {
            remove_leftover(part_path).await;
        }
        if result.is_err() {
            remove_leftover(&temp_path).await;
        }

        result
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(suffix);
    path.into()
}

fn part_path(path: &Path, index: usize) -> PathBuf {
    suffixed(path, &format!(".part-{index}"))
}

/// Removes a staging file, ignoring files that were never created.
async fn remove_leftover(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            tracing::debug!(path = %path.display(), %error, "failed to remove staging file");
        }
    }
}

#[async_trait::async_trait]
impl Backend for LocalFs {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn prepare(&self) -> BackendResult<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        key: &str,
        payload: Payload,
    ) -> BackendResult<()> {
        // cancellation is checked between writes, so no file operation is abandoned midway
        self.write(cancel, &self.path.join(key), payload).await
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> BackendResult<u64> {
        let path = self.path.join(key);
        until_cancelled(cancel, async {
            let mut file = match OpenOptions::new().read(true).open(&path).await {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(BackendError::NotFound {
                        key: key.to_owned(),
                    });
                }
                Err(err) => return Err(err.into()),
            };

            Ok(tokio::io::copy(&mut file, &mut tokio::io::sink()).await?)
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> BackendResult<()> {
        let path = self.path.join(key);
        until_cancelled(cancel, async { Ok(tokio::fs::remove_file(path).await?) }).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::payload::PayloadSource;

    fn entries(path: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn roundtrip() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(&tempdir.path().join("bucket"));
        let cancel = CancellationToken::new();
        backend.prepare().await.unwrap();

        let source = PayloadSource::streamed(10_000);
        backend.upload(&cancel, "Object-7", source.open()).await.unwrap();
        assert_eq!(backend.download(&cancel, "Object-7").await.unwrap(), 10_000);

        backend.delete(&cancel, "Object-7").await.unwrap();
        let err = backend.download(&cancel, "Object-7").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn multipart_concatenates_parts() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(tempdir.path()).with_multipart(Some(MultipartConfig {
            part_size: 400_000,
            concurrency: 1,
        }));
        let cancel = CancellationToken::new();

        let source = PayloadSource::materialize(1_000_000);
        backend.upload(&cancel, "Object-0", source.open()).await.unwrap();

        let stored = std::fs::read(tempdir.path().join("Object-0")).unwrap();
        assert_eq!(stored, source.open().into_bytes().unwrap());

        // staging files are gone after the commit
        assert_eq!(entries(tempdir.path()), ["Object-0"]);
    }

    #[tokio::test]
    async fn nested_prefixes() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(tempdir.path());
        let cancel = CancellationToken::new();

        let payload = PayloadSource::materialize(10).open();
        backend.upload(&cancel, "run/1/Object-0", payload).await.unwrap();
        assert!(tempdir.path().join("run/1/Object-0").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_multipart_upload_leaves_no_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().to_owned();
        let backend = LocalFs::new(&root).with_multipart(Some(MultipartConfig {
            part_size: 1024 * 1024,
            concurrency: 1,
        }));
        let cancel = CancellationToken::new();

        // cancel as soon as the first part is staged
        let canceller = cancel.clone();
        let watched = root.clone();
        tokio::spawn(async move {
            for _ in 0..10_000 {
                if entries(&watched).iter().any(|name| name.contains(".part-")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            canceller.cancel();
        });

        let payload = PayloadSource::streamed(64 * 1024 * 1024).open();
        let err = backend.upload(&cancel, "Object-0", payload).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(entries(&root), Vec::<String>::new());
    }

    #[tokio::test]
    async fn cancelled_upload_is_not_visible() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(tempdir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let payload = PayloadSource::streamed(10_000).open();
        let err = backend.upload(&cancel, "Object-0", payload).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(entries(tempdir.path()), Vec::<String>::new());
    }

    #[tokio::test]
    async fn failed_commit_removes_staged_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFs::new(tempdir.path()).with_multipart(Some(MultipartConfig {
            part_size: 400,
            concurrency: 1,
        }));
        let cancel = CancellationToken::new();

        // the final rename fails because a directory occupies the key
        std::fs::create_dir(tempdir.path().join("Object-0")).unwrap();

        let payload = PayloadSource::materialize(1_000).open();
        let err = backend.upload(&cancel, "Object-0", payload).await.unwrap_err();

        assert!(matches!(err, BackendError::Io(_)));
        assert_eq!(entries(tempdir.path()), ["Object-0"]);
        assert!(tempdir.path().join("Object-0").is_dir());
    }
}
