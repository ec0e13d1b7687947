use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use agora_store::ChatStoreHandle;
use agora_types::models::FileAttachment;
use agora_types::normalize::normalize_uploaded_file;
use futures_util::StreamExt;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::ApiError;

const OCTET_STREAM: &str = "application/octet-stream";

/// Counts streamed bytes and reports whole percentages, once per change.
struct ProgressCounter<F> {
    total: u64,
    sent: AtomicU64,
    last: AtomicU8,
    report: F,
}

impl<F: Fn(u8)> ProgressCounter<F> {
    fn new(total: u64, report: F) -> Self {
        Self {
            total,
            sent: AtomicU64::new(0),
            last: AtomicU8::new(u8::MAX),
            report,
        }
    }

    fn advance(&self, bytes: usize) {
        let sent = self.sent.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
        let percent = if self.total == 0 {
            100
        } else {
            (sent.saturating_mul(100) / self.total).min(100) as u8
        };
        if self.last.swap(percent, Ordering::Relaxed) != percent {
            (self.report)(percent);
        }
    }
}

impl ApiClient {
    /// POST `/community-chat/{community}/upload` as multipart field `file`,
    /// streaming from disk. Files above the configured limit are refused
    /// before any request is sent.
    pub async fn upload_file<F>(
        &self,
        community_id: &str,
        path: &Path,
        on_progress: F,
    ) -> Result<FileAttachment, ApiError>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let size = tokio::fs::metadata(path).await?.len();
        let limit = self.config.max_upload_bytes;
        if size > limit {
            return Err(ApiError::FileTooLarge { size, limit });
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let counter = Arc::new(ProgressCounter::new(size, on_progress));
        let stream = ReaderStream::new(file).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.advance(bytes.len());
            }
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), size)
            .file_name(name.clone())
            .mime_str(&mime)?;
        let form = Form::new().part("file", part);

        let url = self.endpoint(&["community-chat", community_id, "upload"])?;
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let body = self.json_body(resp).await?;

        let mut attachment = normalize_uploaded_file(&body)?;
        if attachment.mime_type == OCTET_STREAM && mime != OCTET_STREAM {
            attachment.mime_type = mime;
        }
        info!("Uploaded {} ({} bytes)", attachment.name, size);
        Ok(attachment)
    }

    /// [`upload_file`](Self::upload_file) with progress mirrored into the
    /// store; the indicator is cleared when the upload ends either way.
    pub async fn upload_attachment(
        &self,
        store: &ChatStoreHandle,
        community_id: &str,
        path: &Path,
    ) -> Result<FileAttachment, ApiError> {
        store.dispatch(|s| s.set_upload_progress(0));
        let progress = store.clone();
        let result = self
            .upload_file(community_id, path, move |percent| {
                progress.dispatch(|s| s.set_upload_progress(percent));
            })
            .await;
        store.dispatch(|s| s.clear_upload_progress());

        if let Err(e) = &result {
            warn!("Upload of {} failed: {}", path.display(), e);
        }
        result
    }
}
