/*!
common/src/lib.rs

Shared configuration types for Art Docent.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override layering
- Small accessors that resolve optional sections to their defaults
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default OAI-PMH endpoint harvested by the `harvest` binary.
pub const DEFAULT_OAI_ENDPOINT: &str = "https://data.rijksmuseum.nl/oai";

/// Harvest (ingestion job) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// OAI-PMH base URL (e.g. "https://data.rijksmuseum.nl/oai")
    pub endpoint: Option<String>,
    /// Metadata prefix requested on the first page (e.g. "edm")
    pub metadata_prefix: Option<String>,
    /// CSV artifact path (e.g. "data/rijks.csv")
    pub output: Option<String>,
    pub fetch_timeout_seconds: Option<u64>,
    /// Rights URI a record must carry to be kept
    pub license_marker: Option<String>,
}

/// Remote dataset registry (Hugging Face Hub) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub base URL, "https://huggingface.co" when unset
    pub endpoint: Option<String>,
    /// Datasets-server base URL used for streaming rows
    pub rows_endpoint: Option<String>,
    /// Name of the env var holding the access token
    pub token_env: Option<String>,
    /// Dataset repository the harvest publishes to (e.g. "vincentmin/rijksmuseum-oai")
    pub repo_id: Option<String>,
    /// Path of the uploaded file inside the repository
    pub path_in_repo: Option<String>,
}

/// Gemini (Google Generative Language API) config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<u32>,
    /// Attach the Google Search grounding tool (default true)
    pub google_search: Option<bool>,
}

/// OpenAI-compatible remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    /// Send `web_search_options` (only search-capable models accept it)
    pub web_search: Option<bool>,
}

/// LLM top-level config grouping adapter specifics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "gemini", "remote"
    pub gemini: Option<GeminiConfig>,
    pub remote: Option<RemoteLlmConfig>,
    pub temperature: Option<f32>,
}

/// Where a museum's rows come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuseumSourceConfig {
    /// Museum identifier ("moma" or "rijks")
    pub name: String,
    /// Hub dataset id streamed through the datasets-server rows API
    pub dataset: Option<String>,
    /// Local CSV artifact, used instead of `dataset` when set
    pub csv_path: Option<String>,
    pub config: Option<String>,
    pub split: Option<String>,
}

/// Chat application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocentConfig {
    /// Museum used when a client does not pick one
    pub default_museum: Option<String>,
    #[serde(default)]
    pub museums: Vec<MuseumSourceConfig>,
    /// Rows requested per datasets-server page (max 100)
    pub page_size: Option<usize>,
    pub image_timeout_seconds: Option<u64>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub harvest: Option<HarvestConfig>,
    pub hub: Option<HubConfig>,
    pub llm: Option<LlmConfig>,
    pub docent: Option<DocentConfig>,
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (path, label) in [(default_path, "default"), (override_path, "override")] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Harvest section, or an empty one.
    pub fn harvest(&self) -> HarvestConfig {
        self.harvest.clone().unwrap_or_default()
    }

    /// Hub section, or an empty one.
    pub fn hub(&self) -> HubConfig {
        self.hub.clone().unwrap_or_default()
    }

    /// Docent section, or an empty one.
    pub fn docent(&self) -> DocentConfig {
        self.docent.clone().unwrap_or_default()
    }

    /// Resolved OAI endpoint, validated as an absolute URL.
    pub fn oai_endpoint(&self) -> Result<url::Url> {
        let raw = self
            .harvest
            .as_ref()
            .and_then(|h| h.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_OAI_ENDPOINT.to_string());
        url::Url::parse(&raw).with_context(|| format!("Invalid OAI endpoint: {}", raw))
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}
