//! Resumable chunked upload: a session URL obtained once (`client.rs`'s
//! `open_chunk_writer`), then each chunk PUT with a `Content-Range`
//! header. Every request here runs through the same `RetryPolicy`/
//! `StallTracker` as the rest of `HttpBucketStore`, so a single 5xx or
//! stalled chunk doesn't abort the whole upload.

use std::sync::Arc;

use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::{ChunkWriter, ProgressCallback};
use reqwest::StatusCode;
use tracing::debug;

use crate::client::HttpBucketStore;
use crate::retry::{RetryPolicy, StallTracker};
use crate::wire::ObjectResource;

pub struct HttpChunkWriter {
    http: reqwest::Client,
    session_url: String,
    chunk_size: usize,
    sent: u64,
    finalized_response: Option<ObjectResource>,
    progress: Option<ProgressCallback>,
    retry: RetryPolicy,
    stall: Arc<StallTracker>,
}

enum ChunkOutcome {
    Continue,
    Finalized(ObjectResource),
}

impl HttpChunkWriter {
    /// `session_url` is the already-opened resumable session URL
    /// (`open_chunk_writer` handles the session-creation POST, itself
    /// retried); this just holds the ingredients needed to retry each
    /// subsequent chunk PUT independently.
    pub fn new(
        http: reqwest::Client,
        session_url: String,
        chunk_size: usize,
        progress: Option<ProgressCallback>,
        retry: RetryPolicy,
        stall: Arc<StallTracker>,
    ) -> Self {
        Self {
            http,
            session_url,
            chunk_size,
            sent: 0,
            finalized_response: None,
            progress,
            retry,
            stall,
        }
    }
}

#[async_trait::async_trait]
impl ChunkWriter for HttpChunkWriter {
    async fn write_chunk(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
        if data.len() > self.chunk_size {
            anyhow::bail!(BucketFsError::InvalidArgument(format!(
                "chunk of {} bytes exceeds configured chunk size {}",
                data.len(),
                self.chunk_size
            )));
        }
        let chunk_len = data.len() as u64;
        let range_end = self.sent + chunk_len - 1;
        let content_range = format!("bytes {}-{}/*", self.sent, range_end);

        debug!(content_range = %content_range, "uploading chunk");

        let http = self.http.clone();
        let session_url = self.session_url.clone();

        let outcome = self
            .retry
            .execute("write_chunk", &self.stall, |deadline| {
                let http = http.clone();
                let session_url = session_url.clone();
                let data = data.clone();
                let content_range = content_range.clone();
                async move {
                    let req = http
                        .put(&session_url)
                        .header("Content-Length", chunk_len.to_string())
                        .header("Content-Range", &content_range)
                        .body(data);
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;

                    match resp.status() {
                        StatusCode::OK | StatusCode::CREATED => {
                            let resource: ObjectResource = resp
                                .json()
                                .await
                                .map_err(|e| BucketFsError::IoError(e.to_string()))?;
                            Ok(ChunkOutcome::Finalized(resource))
                        }
                        StatusCode::PERMANENT_REDIRECT | StatusCode::ACCEPTED => {
                            Ok(ChunkOutcome::Continue)
                        }
                        other => {
                            let body = resp.text().await.unwrap_or_default();
                            Err(HttpBucketStore::classify_status(other, &body))
                        }
                    }
                }
            })
            .await?;

        self.sent += chunk_len;
        if let Some(cb) = &self.progress {
            cb(self.sent, 0);
        }
        if let ChunkOutcome::Finalized(resource) = outcome {
            self.finalized_response = Some(resource);
        }
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> anyhow::Result<bucketfs_core::domain::ObjectRecord> {
        let resource = self.finalized_response.ok_or_else(|| {
            BucketFsError::InvariantViolation(
                "finalize called before the last chunk reported completion".into(),
            )
        })?;
        Ok(resource.into_record()?)
    }

    async fn abort(self: Box<Self>) -> anyhow::Result<()> {
        let http = self.http.clone();
        let session_url = self.session_url.clone();
        self.retry
            .execute("abort_chunk_writer", &self.stall, |deadline| {
                let http = http.clone();
                let session_url = session_url.clone();
                async move {
                    let resp = tokio::time::timeout(deadline, http.delete(&session_url).send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
                        Ok(())
                    } else {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        Err(HttpBucketStore::classify_status(status, &body))
                    }
                }
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_formats_inclusive_end_offset() {
        // A 10-byte chunk starting at offset 20 spans bytes 20..=29.
        let offset = 20u64;
        let chunk_len = 10u64;
        let range_end = offset + chunk_len - 1;
        assert_eq!(format!("bytes {}-{}/*", offset, range_end), "bytes 20-29/*");
    }
}
