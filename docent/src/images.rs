use anyhow::{Context, Result};
use base64::Engine;
use std::time::Duration;
use tracing::debug;

use crate::ingestion::USER_AGENT;

const FULL_SIZE_SUFFIX: &str = "/full/max/0/default.jpg";
const PREVIEW_SUFFIX: &str = "/full/512,/0/default.jpg";

/// Ask an IIIF image server for a 512px-wide rendition instead of the full image.
///
/// URLs that are not full-size IIIF requests are returned unchanged.
pub fn resize_hint(url: &str) -> String {
    url.replace(FULL_SIZE_SUFFIX, PREVIEW_SUFFIX)
}

/// An image ready to be inlined into an LLM turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub mime_type: String,
    /// Base64 (standard alphabet) encoded bytes
    pub data: String,
    pub source_url: String,
}

impl LoadedImage {
    pub fn into_part(self) -> crate::llm::Part {
        crate::llm::Part::Image {
            mime_type: self.mime_type,
            data: self.data,
        }
    }
}

/// Fetches artwork images for the opening turn of a chat
#[derive(Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
}

impl ImageLoader {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build image HTTP client")?;
        Ok(Self { client })
    }

    /// Download `url` (after [`resize_hint`]) and base64-encode it.
    pub async fn load(&self, url: &str) -> Result<LoadedImage> {
        let target = resize_hint(url);
        let response = self
            .client
            .get(&target)
            .send()
            .await
            .with_context(|| format!("Failed to fetch image: {}", target))?;

        if !response.status().is_success() {
            anyhow::bail!("Image fetch failed with status {}: {}", response.status(), target);
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read image body: {}", target))?;
        if bytes.is_empty() {
            anyhow::bail!("Image at {} is empty", target);
        }

        debug!(url = %target, mime = %mime_type, bytes = bytes.len(), "image loaded");
        Ok(LoadedImage {
            mime_type,
            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            source_url: target,
        })
    }
}
