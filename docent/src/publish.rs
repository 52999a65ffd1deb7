//! Publishing the harvested CSV artifact to a dataset registry.
//!
//! [`HubPublisher`] talks to the Hugging Face Hub HTTP API: it makes sure the
//! dataset repository exists, uploads the file (through git-lfs when the Hub
//! asks for it) and commits it in a single commit.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// A finished CSV artifact, validated and held in memory for upload.
#[derive(Debug, Clone)]
pub struct DatasetArtifact {
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub rows: u64,
    pub bytes: Vec<u8>,
}

/// Load the artifact and check it parses as CSV with a header row.
pub fn load_artifact(path: impl AsRef<Path>) -> Result<DatasetArtifact> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read dataset artifact: {}", path.display()))?;

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let columns: Vec<String> = reader
        .headers()
        .context("dataset artifact has no readable header")?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.is_empty() || columns.iter().all(String::is_empty) {
        anyhow::bail!("dataset artifact {} has an empty header", path.display());
    }

    let mut rows = 0u64;
    for record in reader.records() {
        record.with_context(|| format!("invalid CSV row {} in {}", rows + 1, path.display()))?;
        rows += 1;
    }

    Ok(DatasetArtifact {
        path: path.to_path_buf(),
        columns,
        rows,
        bytes,
    })
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub repo_id: String,
    pub path_in_repo: String,
    pub rows: u64,
    pub commit_url: Option<String>,
    pub via_lfs: bool,
}

/// Uploads a finished artifact as a named dataset.
#[async_trait::async_trait]
pub trait DatasetPublisher: Send + Sync {
    /// All-or-nothing: returns an error if any step of the upload fails.
    async fn publish(&self, artifact: &Path, repo_id: &str) -> Result<PublishReceipt>;
}

/// Hugging Face Hub publisher.
pub struct HubPublisher {
    client: Client,
    endpoint: String,
    token: String,
    path_in_repo: String,
    revision: String,
}

impl HubPublisher {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(crate::ingestion::USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
            path_in_repo: "data/train.csv".to_string(),
            revision: "main".to_string(),
        })
    }

    /// Path of the uploaded file inside the repository (default `data/train.csv`).
    pub fn with_path_in_repo(mut self, path: impl Into<String>) -> Self {
        self.path_in_repo = path.into();
        self
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn create_repo(&self, repo_id: &str) -> Result<()> {
        let (organization, name) = match repo_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, repo_id),
        };

        let response = self
            .client
            .post(format!("{}/api/repos/create", self.endpoint))
            .header("Authorization", self.auth())
            .json(&json!({
                "type": "dataset",
                "name": name,
                "organization": organization,
                "private": false,
            }))
            .send()
            .await
            .context("dataset repo creation request failed")?;

        match response.status() {
            s if s.is_success() => {
                info!(repo_id, "created dataset repository");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(repo_id, "dataset repository already exists");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Hub repo creation error {}: {}", status, body)
            }
        }
    }

    async fn upload_mode(&self, repo_id: &str, artifact: &DatasetArtifact) -> Result<UploadMode> {
        let sample = &artifact.bytes[..artifact.bytes.len().min(512)];
        let body = PreuploadRequest {
            files: vec![PreuploadFile {
                path: self.path_in_repo.clone(),
                size: artifact.bytes.len() as u64,
                sample: BASE64_STANDARD.encode(sample),
            }],
        };

        let response = self
            .client
            .post(format!(
                "{}/api/datasets/{}/preupload/{}",
                self.endpoint, repo_id, self.revision
            ))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await
            .context("Hub preupload request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hub preupload error {}: {}", status, body);
        }

        let parsed: PreuploadResponse = response
            .json()
            .await
            .context("Failed to parse Hub preupload response")?;

        Ok(parsed
            .files
            .into_iter()
            .find(|f| f.path == self.path_in_repo)
            .map(|f| f.upload_mode)
            .unwrap_or(UploadMode::Regular))
    }

    /// Push the bytes through the git-lfs batch API. Returns the sha256 oid.
    async fn upload_lfs(&self, repo_id: &str, bytes: &[u8]) -> Result<String> {
        let oid = format!("{:x}", Sha256::digest(bytes));
        let size = bytes.len() as u64;

        let response = self
            .client
            .post(format!(
                "{}/datasets/{}.git/info/lfs/objects/batch",
                self.endpoint, repo_id
            ))
            .header("Authorization", self.auth())
            .header("Accept", LFS_MEDIA_TYPE)
            .header("Content-Type", LFS_MEDIA_TYPE)
            .body(
                json!({
                    "operation": "upload",
                    "transfers": ["basic"],
                    "objects": [{ "oid": oid, "size": size }],
                    "hash_algo": "sha256",
                    "ref": { "name": format!("refs/heads/{}", self.revision) },
                })
                .to_string(),
            )
            .send()
            .await
            .context("LFS batch request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LFS batch error {}: {}", status, body);
        }

        let batch: LfsBatchResponse = response
            .json()
            .await
            .context("Failed to parse LFS batch response")?;
        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == oid)
            .context("LFS batch response does not mention the uploaded object")?;

        if let Some(error) = object.error {
            anyhow::bail!("LFS batch rejected object: {} {}", error.code, error.message);
        }

        let Some(actions) = object.actions else {
            debug!(%oid, "LFS object already present on the Hub");
            return Ok(oid);
        };

        if let Some(upload) = actions.upload {
            if upload.header.contains_key("chunk_size") {
                anyhow::bail!("multipart LFS uploads are not supported ({} bytes)", size);
            }
            let mut request = self.client.put(&upload.href).body(bytes.to_vec());
            for (name, value) in &upload.header {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request.send().await.context("LFS upload failed")?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("LFS upload error {}: {}", status, body);
            }
            info!(%oid, size, "uploaded LFS object");
        }

        if let Some(verify) = actions.verify {
            let mut request = self
                .client
                .post(&verify.href)
                .header("Authorization", self.auth())
                .json(&json!({ "oid": oid, "size": size }));
            for (name, value) in &verify.header {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request.send().await.context("LFS verify request failed")?;
            if !response.status().is_success() {
                anyhow::bail!("LFS verify error {}", response.status());
            }
        }

        Ok(oid)
    }

    async fn commit(&self, repo_id: &str, operation: serde_json::Value, summary: &str) -> Result<CommitResponse> {
        let header = json!({
            "key": "header",
            "value": { "summary": summary, "description": "" },
        });
        let body = format!("{}\n{}\n", header, operation);

        let response = self
            .client
            .post(format!(
                "{}/api/datasets/{}/commit/{}",
                self.endpoint, repo_id, self.revision
            ))
            .header("Authorization", self.auth())
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Hub commit request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hub commit error {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse Hub commit response")
    }
}

#[async_trait::async_trait]
impl DatasetPublisher for HubPublisher {
    async fn publish(&self, artifact: &Path, repo_id: &str) -> Result<PublishReceipt> {
        let artifact = load_artifact(artifact)?;
        if artifact.rows == 0 {
            warn!(path = %artifact.path.display(), "publishing a dataset without rows");
        }
        info!(
            repo_id,
            rows = artifact.rows,
            columns = artifact.columns.len(),
            "publishing dataset"
        );

        self.create_repo(repo_id).await?;

        let via_lfs = self.upload_mode(repo_id, &artifact).await? == UploadMode::Lfs;
        let operation = if via_lfs {
            let oid = self.upload_lfs(repo_id, &artifact.bytes).await?;
            json!({
                "key": "lfsFile",
                "value": {
                    "path": self.path_in_repo,
                    "algo": "sha256",
                    "oid": oid,
                    "size": artifact.bytes.len(),
                },
            })
        } else {
            json!({
                "key": "file",
                "value": {
                    "path": self.path_in_repo,
                    "content": BASE64_STANDARD.encode(&artifact.bytes),
                    "encoding": "base64",
                },
            })
        };

        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path_in_repo.clone());
        let commit = self
            .commit(repo_id, operation, &format!("Upload {}", file_name))
            .await?;

        info!(repo_id, commit = ?commit.commit_url, "dataset published");
        Ok(PublishReceipt {
            repo_id: repo_id.to_string(),
            path_in_repo: self.path_in_repo.clone(),
            rows: artifact.rows,
            commit_url: commit.commit_url,
            via_lfs,
        })
    }
}

// Hub API request/response structures
#[derive(Debug, Serialize)]
struct PreuploadRequest {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Serialize)]
struct PreuploadFile {
    path: String,
    size: u64,
    sample: String,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadResult {
    path: String,
    upload_mode: UploadMode,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum UploadMode {
    Regular,
    Lfs,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsError>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    commit_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_artifact_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rijks.csv");
        std::fs::write(&path, "original_id,title\n1,\"A, B\"\n2,\n").unwrap();

        let artifact = load_artifact(&path).expect("load");
        assert_eq!(artifact.columns, vec!["original_id", "title"]);
        assert_eq!(artifact.rows, 2);
    }

    #[test]
    fn load_artifact_rejects_ragged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "a,b\n1,2,3\n").unwrap();

        assert!(load_artifact(&path).is_err());
        assert!(load_artifact(dir.path().join("missing.csv")).is_err());
    }
}
