use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{DownloadError, FailureKind};

use super::catalog::{ModelFile, ModelSpec};
use super::manager::ModelManager;
use super::metadata::{digest_matches, sha256_file};
use super::transport::{
    RemoteResponse, Transport, HTTP_PARTIAL_CONTENT, HTTP_RANGE_NOT_SATISFIABLE,
};

/// Progress reported while a spec downloads. For one file, progress events
/// of a single source attempt carry non-decreasing byte counts; a failed
/// source is announced with `SourceFailed` before the next one starts, and
/// exactly one `FileCompleted` follows a successful file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DownloadEvent {
    #[serde(rename_all = "camelCase")]
    FileProgress {
        model_id: String,
        file_name: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SourceFailed {
        model_id: String,
        file_name: String,
        url: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    FileCompleted { model_id: String, file_name: String },
}

/// Shared stop signal, checked before every request and between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ModelDownloader {
    manager: ModelManager,
    transport: Arc<dyn Transport>,
    cancel: CancelFlag,
}

impl ModelDownloader {
    pub fn new(manager: ModelManager, transport: Arc<dyn Transport>) -> Self {
        Self {
            manager,
            transport,
            cancel: CancelFlag::new(),
        }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Downloads every file of `spec` that is not already satisfied.
    ///
    /// Each file streams into `<name>.partial`, resuming from its current
    /// length when the server honors range requests, and is renamed to its
    /// final name once it passes the size threshold and optional checksum.
    /// URLs are tried in order; the first file that exhausts its URLs fails
    /// the spec with the last error. Files finalized before that stay.
    pub async fn download<F>(&self, spec: &ModelSpec, mut on_event: F) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadEvent) + Send,
    {
        let dir = self.manager.install_dir(spec);
        self.manager
            .ensure_install_dir(spec)
            .map_err(|err| DownloadError::storage(format!("create {}", dir.display()), err))?;

        for file in &spec.files {
            if self.manager.file_satisfied(spec, file) {
                tracing::debug!("{}: {} already installed, skipping", spec.id, file.file_name);
                continue;
            }

            let partial = self.manager.partial_path(spec, file);
            let target = self.manager.file_path(spec, file);

            self.download_file(spec, file, &partial, &mut on_event).await?;
            finalize(file, &partial, &target).await?;

            tracing::info!("{}: installed {}", spec.id, target.display());
            on_event(DownloadEvent::FileCompleted {
                model_id: spec.id.clone(),
                file_name: file.file_name.clone(),
            });
        }

        Ok(())
    }

    /// Removes the spec's install directory, partial markers included.
    pub async fn delete(&self, spec: &ModelSpec) -> Result<(), DownloadError> {
        let dir = self.manager.install_dir(spec);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!("{}: deleted {}", spec.id, dir.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DownloadError::storage(
                format!("remove model directory {}", dir.display()),
                err,
            )),
        }
    }

    async fn download_file<F>(
        &self,
        spec: &ModelSpec,
        file: &ModelFile,
        partial: &Path,
        on_event: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadEvent) + Send,
    {
        let mut last_error = None;

        for url in &file.urls {
            match self.fetch_from(spec, file, url, partial, on_event).await {
                Ok(()) => return Ok(()),
                Err(err) if matches!(err.kind(), FailureKind::Cancelled | FailureKind::Storage) => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("{}: source {url} failed for {}: {err}", spec.id, file.file_name);
                    on_event(DownloadEvent::SourceFailed {
                        model_id: spec.id.clone(),
                        file_name: file.file_name.clone(),
                        url: url.clone(),
                        error: err.to_string(),
                    });
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DownloadError::NoSources(file.file_name.clone())))
    }

    async fn fetch_from<F>(
        &self,
        spec: &ModelSpec,
        file: &ModelFile,
        url: &str,
        partial: &Path,
        on_event: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadEvent) + Send,
    {
        self.check_cancelled()?;

        // measured per attempt, a previous source may have extended it
        let mut existing = partial_len(partial).await;
        if existing > 0 {
            tracing::info!("{}: resuming {} from byte {existing}", spec.id, file.file_name);
        } else {
            tracing::info!("{}: downloading {} from {url}", spec.id, file.file_name);
        }

        let mut response = self.request(file, url, existing).await?;

        if existing > 0 && response.status == HTTP_RANGE_NOT_SATISFIABLE {
            tracing::warn!(
                "{}: {url} rejected range for {}, restarting from zero",
                spec.id,
                file.file_name
            );
            discard(partial).await?;
            existing = 0;
            response = self.request(file, url, 0).await?;
        }

        if !response.is_success() {
            return Err(DownloadError::Http {
                file: file.file_name.clone(),
                status: response.status,
            });
        }

        let resumed = existing > 0 && response.status == HTTP_PARTIAL_CONTENT;
        if existing > 0 && !resumed {
            tracing::warn!(
                "{}: {url} ignored range request (status {}), restarting {}",
                spec.id,
                response.status,
                file.file_name
            );
        }

        let total_bytes = response
            .content_length
            .filter(|len| *len > 0)
            .map(|len| if resumed { len + existing } else { len });

        let mut options = OpenOptions::new();
        if resumed {
            options.create(true).append(true);
        } else {
            options.create(true).write(true).truncate(true);
        }
        let mut out = options
            .open(partial)
            .await
            .map_err(|err| DownloadError::storage(format!("open {}", partial.display()), err))?;

        let start = if resumed { existing } else { 0 };
        let streamed = self
            .stream_body(spec, file, url, &mut response, &mut out, start, total_bytes, on_event)
            .await;

        // bytes already received stay on disk for the next resume
        let flushed = out.flush().await;
        drop(out);
        streamed?;
        flushed.map_err(|err| DownloadError::storage(format!("flush {}", partial.display()), err))?;

        self.verify(file, partial).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_body<F>(
        &self,
        spec: &ModelSpec,
        file: &ModelFile,
        url: &str,
        response: &mut RemoteResponse,
        out: &mut tokio::fs::File,
        start: u64,
        total_bytes: Option<u64>,
        on_event: &mut F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadEvent) + Send,
    {
        let mut downloaded = start;
        loop {
            self.check_cancelled()?;
            let chunk = response
                .body
                .next_chunk()
                .await
                .map_err(|source| DownloadError::Transport {
                    file: file.file_name.clone(),
                    url: url.to_string(),
                    source,
                })?;
            let Some(chunk) = chunk else {
                return Ok(());
            };
            out.write_all(&chunk)
                .await
                .map_err(|err| DownloadError::storage(format!("write {}", file.partial_name()), err))?;
            downloaded += chunk.len() as u64;
            on_event(DownloadEvent::FileProgress {
                model_id: spec.id.clone(),
                file_name: file.file_name.clone(),
                bytes_downloaded: downloaded,
                total_bytes,
            });
        }
    }

    async fn request(
        &self,
        file: &ModelFile,
        url: &str,
        existing: u64,
    ) -> Result<RemoteResponse, DownloadError> {
        let resume_from = (existing > 0).then_some(existing);
        self.transport
            .get(url, resume_from)
            .await
            .map_err(|source| DownloadError::Transport {
                file: file.file_name.clone(),
                url: url.to_string(),
                source,
            })
    }

    /// Rejects truncated or corrupt transfers. The partial is discarded so
    /// the next source does not resume onto bad bytes.
    async fn verify(&self, file: &ModelFile, partial: &Path) -> Result<(), DownloadError> {
        let size = fs::metadata(partial)
            .await
            .map_err(|err| DownloadError::storage(format!("stat {}", partial.display()), err))?
            .len();

        if let Some(min) = file.min_bytes {
            if size < min {
                discard(partial).await?;
                return Err(DownloadError::TooSmall {
                    file: file.file_name.clone(),
                    actual: size,
                    min,
                });
            }
        }

        if let Some(expected) = &file.sha256 {
            let path = partial.to_path_buf();
            let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
                .and_then(|hashed| hashed)
                .map_err(|err| {
                    DownloadError::storage(format!("hash {}", partial.display()), err)
                })?;
            if !digest_matches(expected, &actual) {
                discard(partial).await?;
                return Err(DownloadError::ChecksumMismatch {
                    file: file.file_name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), DownloadError> {
        if self.cancel.is_cancelled() {
            Err(DownloadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn partial_len(path: &Path) -> u64 {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

async fn discard(path: &Path) -> Result<(), DownloadError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(DownloadError::storage(format!("remove {}", path.display()), err)),
    }
}

async fn finalize(file: &ModelFile, partial: &Path, target: &Path) -> Result<(), DownloadError> {
    let finalize_error = |source: io::Error| DownloadError::Finalize {
        file: file.file_name.clone(),
        source,
    };

    match fs::remove_file(target).await {
        Ok(()) => tracing::debug!("replaced stale {}", target.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(finalize_error(err)),
    }
    fs::rename(partial, target).await.map_err(finalize_error)
}
