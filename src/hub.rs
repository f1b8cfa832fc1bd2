//! Hosting-platform REST client for Spaces.
//!
//! Uploads follow the Hub commit protocol: a preupload call sorts files into
//! regular and LFS, LFS objects go to storage through the batch API, and a
//! single NDJSON commit then references everything. Files are committed in
//! chunks so a single request body stays bounded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::HubError;

pub const HUB_BASE: &str = "https://huggingface.co";
const HUB_API_BASE: &str = "https://huggingface.co/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const FILES_PER_COMMIT: usize = 50;
const SAMPLE_BYTES: usize = 512;
const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// A local file and its destination path inside the Space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path_in_repo: String,
    pub local_path: PathBuf,
    pub size: u64,
}

/// Operations the publication stage needs from the hosting platform.
/// Real implementation: `HubClient`. Tests substitute an in-memory host.
#[async_trait]
pub trait SpaceHost: Send + Sync {
    async fn space_exists(&self, space_id: &str) -> Result<bool, HubError>;

    /// Create a Gradio Space. An already-existing Space is not an error.
    async fn create_space(&self, space_id: &str, private: bool) -> Result<(), HubError>;

    async fn upload_files(
        &self,
        space_id: &str,
        files: &[UploadFile],
        summary: &str,
    ) -> Result<(), HubError>;
}

/// Public URL of a Space.
pub fn space_url(space_id: &str) -> String {
    format!("{}/spaces/{}", HUB_BASE, space_id)
}

/// How the Hub wants a file delivered, as decided by its preupload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum UploadMode {
    Regular,
    Lfs,
    /// Not sent; the Hub flagged the file with `shouldIgnore`.
    #[serde(skip)]
    Ignore,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadVerdict>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadVerdict {
    path: String,
    upload_mode: UploadMode,
    #[serde(default)]
    should_ignore: bool,
}

/// One line of the NDJSON commit payload.
#[derive(Debug, Serialize)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
enum CommitLine<'a> {
    Header {
        summary: &'a str,
        description: &'a str,
    },
    File {
        path: &'a str,
        content: String,
        encoding: &'static str,
    },
    LfsFile {
        path: &'a str,
        algo: &'static str,
        oid: &'a str,
        size: u64,
    },
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsBatchObject>,
}

#[derive(Debug, Deserialize)]
struct LfsBatchObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    #[serde(default)]
    upload: Option<LfsAction>,
    #[serde(default)]
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// A file read into memory, with its content hash.
#[derive(Debug)]
struct StagedFile {
    path_in_repo: String,
    bytes: Vec<u8>,
    oid: String,
}

impl StagedFile {
    fn new(path_in_repo: impl Into<String>, bytes: Vec<u8>) -> Self {
        let oid = format!("{:x}", Sha256::digest(&bytes));
        Self {
            path_in_repo: path_in_repo.into(),
            bytes,
            oid,
        }
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn preupload_body(files: &[StagedFile]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = files
        .iter()
        .map(|file| {
            let sample = &file.bytes[..file.bytes.len().min(SAMPLE_BYTES)];
            serde_json::json!({
                "path": file.path_in_repo,
                "sample": BASE64.encode(sample),
                "size": file.size(),
            })
        })
        .collect();
    serde_json::json!({ "files": entries })
}

fn lfs_batch_body(files: &[&StagedFile]) -> serde_json::Value {
    let objects: Vec<serde_json::Value> = files
        .iter()
        .map(|file| serde_json::json!({ "oid": file.oid, "size": file.size() }))
        .collect();
    serde_json::json!({
        "operation": "upload",
        "transfers": ["basic"],
        "objects": objects,
        "hash_algo": "sha256",
    })
}

/// Header line, then one line per file. Ignored files are left out; files
/// without a verdict are sent inline.
fn commit_body(
    summary: &str,
    files: &[StagedFile],
    modes: &HashMap<String, UploadMode>,
) -> Result<String, serde_json::Error> {
    let mut lines = vec![serde_json::to_string(&CommitLine::Header {
        summary,
        description: "",
    })?];
    for file in files {
        let line = match modes.get(&file.path_in_repo) {
            Some(UploadMode::Ignore) => continue,
            Some(UploadMode::Lfs) => CommitLine::LfsFile {
                path: &file.path_in_repo,
                algo: "sha256",
                oid: &file.oid,
                size: file.size(),
            },
            _ => CommitLine::File {
                path: &file.path_in_repo,
                content: BASE64.encode(&file.bytes),
                encoding: "base64",
            },
        };
        lines.push(serde_json::to_string(&line)?);
    }
    Ok(lines.join("\n"))
}

pub struct HubClient {
    client: Client,
    token: String,
}

impl HubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
        }
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Response, HubError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(60))
            .json(body)
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.to_string(),
                source,
            })?;
        expect_success(url, resp).await
    }

    async fn decode<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T, HubError> {
        let text = resp.text().await.map_err(|source| HubError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| HubError::Json {
            url: url.to_string(),
            source,
        })
    }

    /// Ask the Hub which files must go through LFS and which to skip.
    async fn preupload(
        &self,
        space_id: &str,
        files: &[StagedFile],
    ) -> Result<HashMap<String, UploadMode>, HubError> {
        let url = format!("{}/spaces/{}/preupload/main", HUB_API_BASE, space_id);
        let resp = self.post_json(&url, &preupload_body(files)).await?;
        let verdicts: PreuploadResponse = Self::decode(&url, resp).await?;

        let modes = verdicts
            .files
            .into_iter()
            .map(|verdict| {
                if verdict.should_ignore {
                    tracing::debug!(space = %space_id, path = %verdict.path, "Hub ignores file");
                    (verdict.path, UploadMode::Ignore)
                } else {
                    (verdict.path, verdict.upload_mode)
                }
            })
            .collect();
        Ok(modes)
    }

    /// Push LFS objects to storage. Objects the Hub already holds come back
    /// without an upload action and are skipped.
    async fn upload_lfs(&self, space_id: &str, files: &[&StagedFile]) -> Result<(), HubError> {
        if files.is_empty() {
            return Ok(());
        }
        let url = format!("{}/spaces/{}.git/info/lfs/objects/batch", HUB_BASE, space_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
            .timeout(Duration::from_secs(60))
            .body(lfs_batch_body(files).to_string())
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.clone(),
                source,
            })?;
        let resp = expect_success(&url, resp).await?;
        let batch: LfsBatchResponse = Self::decode(&url, resp).await?;

        for object in batch.objects {
            let Some(file) = files.iter().find(|f| f.oid == object.oid) else {
                continue;
            };
            if let Some(err) = object.error {
                return Err(HubError::Lfs {
                    path: file.path_in_repo.clone(),
                    message: format!("{} {}", err.code, err.message),
                });
            }
            let Some(actions) = object.actions else {
                continue;
            };
            if let Some(upload) = actions.upload {
                if upload.header.contains_key("chunk_size") {
                    return Err(HubError::Lfs {
                        path: file.path_in_repo.clone(),
                        message: "multipart transfer not supported".to_string(),
                    });
                }
                self.put_object(&upload, file).await?;
            }
            if let Some(verify) = actions.verify {
                let mut request = self.client.post(&verify.href).bearer_auth(&self.token);
                for (name, value) in &verify.header {
                    request = request.header(name.as_str(), value.as_str());
                }
                let resp = request
                    .timeout(Duration::from_secs(60))
                    .json(&serde_json::json!({ "oid": file.oid, "size": file.size() }))
                    .send()
                    .await
                    .map_err(|source| HubError::Request {
                        url: verify.href.clone(),
                        source,
                    })?;
                expect_success(&verify.href, resp).await?;
            }
            tracing::debug!(space = %space_id, path = %file.path_in_repo, "Uploaded LFS object");
        }
        Ok(())
    }

    async fn put_object(&self, upload: &LfsAction, file: &StagedFile) -> Result<(), HubError> {
        let mut request = self.client.put(&upload.href);
        for (name, value) in &upload.header {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request
            .timeout(REQUEST_TIMEOUT)
            .body(file.bytes.clone())
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: upload.href.clone(),
                source,
            })?;
        expect_success(&upload.href, resp).await?;
        Ok(())
    }

    async fn commit(&self, space_id: &str, files: &[UploadFile], summary: &str) -> Result<(), HubError> {
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            let bytes = tokio::fs::read(&file.local_path)
                .await
                .map_err(|source| HubError::Io {
                    path: file.local_path.clone(),
                    source,
                })?;
            staged.push(StagedFile::new(file.path_in_repo.clone(), bytes));
        }

        let modes = self.preupload(space_id, &staged).await?;
        let lfs: Vec<&StagedFile> = staged
            .iter()
            .filter(|file| modes.get(&file.path_in_repo) == Some(&UploadMode::Lfs))
            .collect();
        self.upload_lfs(space_id, &lfs).await?;

        let url = format!("{}/spaces/{}/commit/main", HUB_API_BASE, space_id);
        let body = commit_body(summary, &staged, &modes).map_err(|source| HubError::Json {
            url: url.clone(),
            source,
        })?;
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .timeout(REQUEST_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.clone(),
                source,
            })?;
        expect_success(&url, resp).await?;
        Ok(())
    }
}

#[async_trait]
impl SpaceHost for HubClient {
    async fn space_exists(&self, space_id: &str) -> Result<bool, HubError> {
        let url = format!("{}/spaces/{}", HUB_API_BASE, space_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.clone(),
                source,
            })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(&url, resp).await?;
        Ok(true)
    }

    async fn create_space(&self, space_id: &str, private: bool) -> Result<(), HubError> {
        let url = format!("{}/repos/create", HUB_API_BASE);

        let (organization, name) = match space_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, space_id),
        };

        let mut body = serde_json::json!({
            "type": "space",
            "name": name,
            "private": private,
            "sdk": "gradio",
        });
        if let Some(org) = organization {
            body["organization"] = serde_json::Value::String(org.to_string());
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(60))
            .json(&body)
            .send()
            .await
            .map_err(|source| HubError::Request {
                url: url.clone(),
                source,
            })?;

        if resp.status() == StatusCode::CONFLICT {
            tracing::info!(space = %space_id, "Space already exists");
            return Ok(());
        }
        expect_success(&url, resp).await?;
        tracing::info!(space = %space_id, private, "Created Space");
        Ok(())
    }

    async fn upload_files(
        &self,
        space_id: &str,
        files: &[UploadFile],
        summary: &str,
    ) -> Result<(), HubError> {
        let chunks = files.chunks(FILES_PER_COMMIT);
        let total = chunks.len();
        for (i, chunk) in chunks.enumerate() {
            let summary = if total > 1 {
                format!("{} ({}/{})", summary, i + 1, total)
            } else {
                summary.to_string()
            };
            self.commit(space_id, chunk, &summary).await?;
            tracing::debug!(space = %space_id, files = chunk.len(), part = i + 1, of = total, "Committed files");
        }
        Ok(())
    }
}

/// Pass a successful response through; turn any other status into
/// `HubError::Status` carrying the response body.
pub(crate) async fn expect_success(url: &str, resp: Response) -> Result<Response, HubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HubError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}
