//! HTTP implementation of the bucket abstraction (C1, §4.1): a thin
//! `reqwest`-backed client carrying auth, a base URL, and an
//! `execute_with_retry` wrapper around the object store's
//! stat/list/create/copy/compose/delete/folder surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bucketfs_core::config::Config;
use bucketfs_core::domain::{BucketName, ContinuationToken, Generation, ObjectName, ObjectRecord};
use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::{
    BucketStore, ChunkWriter, ListPage, Precondition, ProgressCallback,
};
use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::retry::{RetryPolicy, StallTracker};
use crate::upload::HttpChunkWriter;
use crate::wire::{ListResource, ObjectResource};

/// How the client authenticates to the object store (§6 `auth.*`).
#[derive(Debug, Clone)]
pub enum Credential {
    Anonymous,
    Bearer(String),
}

/// HTTP-backed implementation of [`BucketStore`].
pub struct HttpBucketStore {
    http: reqwest::Client,
    base_url: String,
    bucket: BucketName,
    credential: Credential,
    retry: RetryPolicy,
    stall: Arc<StallTracker>,
    enable_hns: bool,
}

impl HttpBucketStore {
    pub fn new(bucket: BucketName, credential: Credential, config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.transport.max_idle_conns_per_host as usize)
            .timeout(Duration::from_secs(config.transport.http_client_timeout_secs))
            .build()?;

        let base_url = config
            .transport
            .custom_endpoint
            .clone()
            .unwrap_or_else(|| "https://storage.googleapis.com/storage/v1".to_string());

        Ok(Self {
            http,
            base_url,
            bucket,
            credential,
            retry: RetryPolicy::new(config.retry.clone()),
            stall: Arc::new(StallTracker::new(config.read_stall.clone())),
            enable_hns: config.enable_hns,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        Self::authorize_with(&self.credential, builder)
    }

    /// Same as [`Self::authorize`] but usable without a `HttpBucketStore`
    /// in scope, for callers (e.g. `HttpChunkWriter`) that only hold a
    /// cloned [`Credential`].
    pub(crate) fn authorize_with(
        credential: &Credential,
        builder: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        match credential {
            Credential::Anonymous => builder,
            Credential::Bearer(token) => builder.bearer_auth(token),
        }
    }

    fn object_url(&self, name: &ObjectName) -> String {
        format!(
            "{}/b/{}/o/{}",
            self.base_url,
            self.bucket.as_str(),
            urlencoding::encode(name.as_str())
        )
    }

    fn upload_session_url(&self, name: &ObjectName) -> String {
        format!(
            "{}/b/{}/o/{}/uploadSessions",
            self.base_url.replace("/storage/v1", "/upload/storage/v1"),
            self.bucket.as_str(),
            urlencoding::encode(name.as_str())
        )
    }

    pub(crate) fn classify_status(status: StatusCode, body: &str) -> BucketFsError {
        match status {
            StatusCode::NOT_FOUND => BucketFsError::NotFound(body.to_string()),
            StatusCode::PRECONDITION_FAILED => BucketFsError::PreconditionFailed(body.to_string()),
            StatusCode::CONFLICT => BucketFsError::AlreadyExists(body.to_string()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                BucketFsError::PermissionDenied(body.to_string())
            }
            StatusCode::BAD_REQUEST => BucketFsError::InvalidArgument(body.to_string()),
            StatusCode::REQUESTED_RANGE_NOT_SATISFIABLE => {
                BucketFsError::RangeUnsatisfiable(body.to_string())
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                BucketFsError::Transient(format!("{s}: {body}"))
            }
            s => BucketFsError::IoError(format!("{s}: {body}")),
        }
    }

    pub(crate) fn apply_precondition(
        builder: reqwest::RequestBuilder,
        precondition: Precondition,
    ) -> reqwest::RequestBuilder {
        match precondition {
            Precondition::Any => builder,
            Precondition::IfGenerationMatch(g) => builder.query(&[("ifGenerationMatch", g.get())]),
        }
    }
}

#[async_trait]
impl BucketStore for HttpBucketStore {
    async fn stat(&self, name: &ObjectName, force_fetch: bool) -> anyhow::Result<Option<ObjectRecord>> {
        let url = self.object_url(name);
        let result = self
            .retry
            .execute("stat", &self.stall, |deadline| {
                let url = url.clone();
                let force_fetch = force_fetch;
                async move {
                    let mut req = self.authorize(self.http.get(&url));
                    if force_fetch {
                        req = req.query(&[("cacheControl", "no-cache")]);
                    }
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;

                    if resp.status() == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    let resource: ObjectResource = resp
                        .json()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))?;
                    Ok(Some(resource))
                }
            })
            .await?;

        result.map(|r| r.into_record()).transpose()
    }

    async fn read_range(
        &self,
        name: &ObjectName,
        generation: Generation,
        offset: u64,
        length: u64,
    ) -> anyhow::Result<bytes::Bytes> {
        let url = self.object_url(name);
        let range_end = offset + length.saturating_sub(1);
        let range_header = format!("bytes={offset}-{range_end}");

        let body = self
            .retry
            .execute("read_range", &self.stall, |deadline| {
                let url = url.clone();
                let range_header = range_header.clone();
                let generation_str = generation.get().to_string();
                async move {
                    let req = self
                        .authorize(self.http.get(&url))
                        .query(&[("alt", "media"), ("generation", generation_str.as_str())])
                        .header(reqwest::header::RANGE, range_header);

                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;

                    match resp.status() {
                        StatusCode::OK | StatusCode::PARTIAL_CONTENT => resp
                            .bytes()
                            .await
                            .map_err(|e| BucketFsError::IoError(e.to_string())),
                        StatusCode::REQUESTED_RANGE_NOT_SATISFIABLE => {
                            Err(BucketFsError::RangeUnsatisfiable(format!(
                                "{} has no bytes at {range_header}",
                                name.as_str()
                            )))
                        }
                        status => {
                            let body = resp.text().await.unwrap_or_default();
                            Err(Self::classify_status(status, &body))
                        }
                    }
                }
            })
            .await?;
        Ok(body)
    }

    async fn list(
        &self,
        prefix: &ObjectName,
        delimiter: Option<&str>,
        include_trailing_delimiter: bool,
        continuation: Option<&ContinuationToken>,
    ) -> anyhow::Result<ListPage> {
        let url = format!("{}/b/{}/o", self.base_url, self.bucket.as_str());
        let prefix_str = prefix.as_str().to_string();
        let delimiter = delimiter.map(str::to_string);
        let page_token = continuation.map(|c| c.as_str().to_string());

        let resource = self
            .retry
            .execute("list", &self.stall, |deadline| {
                let url = url.clone();
                let prefix_str = prefix_str.clone();
                let delimiter = delimiter.clone();
                let page_token = page_token.clone();
                async move {
                    let mut req = self.authorize(self.http.get(&url)).query(&[
                        ("prefix", prefix_str.as_str()),
                        (
                            "includeTrailingDelimiter",
                            if include_trailing_delimiter { "true" } else { "false" },
                        ),
                    ]);
                    if let Some(d) = &delimiter {
                        req = req.query(&[("delimiter", d.as_str())]);
                    }
                    if let Some(t) = &page_token {
                        req = req.query(&[("pageToken", t.as_str())]);
                    }
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    let resource: ListResource = resp
                        .json()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))?;
                    Ok(resource)
                }
            })
            .await?;

        let mut records = Vec::with_capacity(resource.items.len());
        for item in resource.items {
            records.push(item.into_record()?);
        }
        let prefixes = resource
            .prefixes
            .into_iter()
            .map(ObjectName::new)
            .collect::<Result<Vec<_>, _>>()?;
        let next_continuation = resource
            .next_page_token
            .map(ContinuationToken::new)
            .transpose()?;

        Ok(ListPage {
            records,
            prefixes,
            next_continuation,
        })
    }

    async fn create(
        &self,
        name: &ObjectName,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord> {
        let url = format!(
            "{}/b/{}/o",
            self.base_url.replace("/storage/v1", "/upload/storage/v1"),
            self.bucket.as_str()
        );
        let name_str = name.as_str().to_string();

        let resource = self
            .retry
            .execute("create", &self.stall, |deadline| {
                let url = url.clone();
                let name_str = name_str.clone();
                let data = data.clone();
                async move {
                    let req = Self::apply_precondition(
                        self.authorize(self.http.request(Method::POST, &url))
                            .query(&[("uploadType", "media"), ("name", name_str.as_str())]),
                        precondition,
                    )
                    .body(data);

                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<ObjectResource>()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))
                }
            })
            .await?;

        Ok(resource.into_record()?)
    }

    async fn open_chunk_writer(
        &self,
        name: &ObjectName,
        chunk_size: usize,
        precondition: Precondition,
        progress: Option<ProgressCallback>,
    ) -> anyhow::Result<Box<dyn ChunkWriter>> {
        debug!(name = name.as_str(), chunk_size, "opening resumable upload session");
        let session_url = self.upload_session_url(name);

        #[derive(serde::Deserialize)]
        struct SessionResponse {
            #[serde(rename = "sessionUrl")]
            session_url: String,
        }

        let session = self
            .retry
            .execute("open_chunk_writer", &self.stall, |deadline| {
                let session_url = session_url.clone();
                async move {
                    let req = Self::apply_precondition(
                        self.authorize(self.http.request(Method::POST, &session_url)),
                        precondition,
                    )
                    .header("Content-Type", "application/json")
                    .body("{}");
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<SessionResponse>()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))
                }
            })
            .await?;

        let writer = HttpChunkWriter::new(
            self.http.clone(),
            session.session_url,
            chunk_size,
            progress,
            self.retry.clone(),
            self.stall.clone(),
        );
        Ok(Box::new(writer))
    }

    async fn copy(
        &self,
        src_name: &ObjectName,
        src_generation: Generation,
        dst_name: &ObjectName,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord> {
        let url = format!(
            "{}/b/{}/o/{}/copyTo/b/{}/o/{}",
            self.base_url,
            self.bucket.as_str(),
            urlencoding::encode(src_name.as_str()),
            self.bucket.as_str(),
            urlencoding::encode(dst_name.as_str()),
        );

        let resource = self
            .retry
            .execute("copy", &self.stall, |deadline| {
                let url = url.clone();
                async move {
                    let req = Self::apply_precondition(
                        self.authorize(self.http.request(Method::POST, &url))
                            .query(&[("sourceGeneration", src_generation.get())]),
                        precondition,
                    );
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<ObjectResource>()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))
                }
            })
            .await?;
        Ok(resource.into_record()?)
    }

    async fn compose(
        &self,
        sources: &[(ObjectName, Generation)],
        dst_name: &ObjectName,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord> {
        #[derive(serde::Serialize)]
        struct ComposeSource {
            name: String,
            generation: String,
        }
        #[derive(serde::Serialize)]
        struct ComposeRequest {
            #[serde(rename = "sourceObjects")]
            source_objects: Vec<ComposeSource>,
        }

        let url = self.object_url(dst_name) + "/compose";
        let body = ComposeRequest {
            source_objects: sources
                .iter()
                .map(|(name, gen)| ComposeSource {
                    name: name.as_str().to_string(),
                    generation: gen.get().to_string(),
                })
                .collect(),
        };

        let resource = self
            .retry
            .execute("compose", &self.stall, |deadline| {
                let url = url.clone();
                let body = serde_json::to_vec(&body).expect("compose request is serializable");
                async move {
                    let req = Self::apply_precondition(
                        self.authorize(self.http.request(Method::POST, &url)),
                        precondition,
                    )
                    .header("Content-Type", "application/json")
                    .body(body);
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<ObjectResource>()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))
                }
            })
            .await?;
        Ok(resource.into_record()?)
    }

    async fn delete(&self, name: &ObjectName, generation: Option<Generation>) -> anyhow::Result<()> {
        let url = self.object_url(name);
        self.retry
            .execute("delete", &self.stall, |deadline| {
                let url = url.clone();
                async move {
                    let mut req = self.authorize(self.http.request(Method::DELETE, &url));
                    if let Some(g) = generation {
                        req = req.query(&[("generation", g.get())]);
                    }
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if resp.status() == StatusCode::NOT_FOUND {
                        return Ok(());
                    }
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    Ok(())
                }
            })
            .await?;
        Ok(())
    }

    async fn create_folder(&self, name: &ObjectName) -> anyhow::Result<ObjectRecord> {
        if !self.enable_hns {
            anyhow::bail!(BucketFsError::NotSupported("create_folder requires enable-hns".into()));
        }
        let url = format!("{}/b/{}/folders", self.base_url, self.bucket.as_str());
        let name_str = name.as_str().to_string();
        let resource = self
            .retry
            .execute("create_folder", &self.stall, |deadline| {
                let url = url.clone();
                let name_str = name_str.clone();
                async move {
                    let req = self
                        .authorize(self.http.request(Method::POST, &url))
                        .query(&[("folderId", name_str.as_str())]);
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    resp.json::<ObjectResource>()
                        .await
                        .map_err(|e| BucketFsError::IoError(e.to_string()))
                }
            })
            .await?;
        Ok(resource.into_record()?)
    }

    async fn rename_folder(&self, src: &ObjectName, dst: &ObjectName) -> anyhow::Result<()> {
        if !self.enable_hns {
            anyhow::bail!(BucketFsError::NotSupported("rename_folder requires enable-hns".into()));
        }
        let url = format!(
            "{}/b/{}/folders/{}/renameTo/folders/{}",
            self.base_url,
            self.bucket.as_str(),
            urlencoding::encode(src.as_str()),
            urlencoding::encode(dst.as_str()),
        );
        self.retry
            .execute("rename_folder", &self.stall, |deadline| {
                let url = url.clone();
                async move {
                    let req = self.authorize(self.http.request(Method::POST, &url));
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    Ok(())
                }
            })
            .await?;
        Ok(())
    }

    async fn delete_folder(&self, name: &ObjectName) -> anyhow::Result<()> {
        if !self.enable_hns {
            anyhow::bail!(BucketFsError::NotSupported("delete_folder requires enable-hns".into()));
        }
        let url = format!(
            "{}/b/{}/folders/{}",
            self.base_url,
            self.bucket.as_str(),
            urlencoding::encode(name.as_str())
        );
        self.retry
            .execute("delete_folder", &self.stall, |deadline| {
                let url = url.clone();
                async move {
                    let req = self.authorize(self.http.request(Method::DELETE, &url));
                    let resp = tokio::time::timeout(deadline, req.send())
                        .await
                        .map_err(|_| BucketFsError::Transient("timeout".into()))?
                        .map_err(|e| BucketFsError::Transient(e.to_string()))?;
                    if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Self::classify_status(status, &body));
                    }
                    Ok(())
                }
            })
            .await?;
        Ok(())
    }

    fn supports_hierarchical_namespace(&self) -> bool {
        self.enable_hns
    }
}

mod urlencoding {
    /// Percent-encodes path segments for object names, which may contain
    /// `/` that must itself be encoded (object names are opaque strings,
    /// not hierarchical paths, as far as the wire API is concerned).
    pub fn encode(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for byte in raw.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(byte as char)
                }
                _ => out.push_str(&format!("%{byte:02X}")),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_percent_escapes_path_separators() {
        assert_eq!(urlencoding::encode("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn classify_status_maps_precondition_failed() {
        let err = HttpBucketStore::classify_status(StatusCode::PRECONDITION_FAILED, "stale");
        assert!(matches!(err, BucketFsError::PreconditionFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn classify_status_maps_server_errors_as_transient() {
        let err = HttpBucketStore::classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(err.is_retryable());
    }
}
