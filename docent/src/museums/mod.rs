//! Per-museum configuration: record schema, prompt templates and the
//! dataset each chat session draws its artwork from.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use common::{Config, MuseumSourceConfig};

use crate::dataset::{
    CsvRowsSource, DatasetStream, HubRowsSource, Row, RowSource, DEFAULT_ROWS_ENDPOINT,
    MAX_PAGE_SIZE,
};
use crate::prompt;

pub mod moma;
pub mod rijks;

/// A typed dataset row that can be shown in a chat session.
pub trait ArtRecord: DeserializeOwned + Serialize + Send + Sync + 'static {
    fn image_url(&self) -> &str;

    /// Whether a raw row may be presented. Rejects rows with any null field.
    fn is_usable(row: &Row) -> bool {
        !row.values().any(Value::is_null)
    }
}

/// The three texts that frame a conversation about one artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBundle {
    /// Shown to the user next to the image
    pub sidebar: &'static str,
    /// First user turn sent to the model, along with the image
    pub opening: &'static str,
    pub system: &'static str,
}

/// An artwork drawn for a session, with its fields flattened for templating.
#[derive(Debug, Clone, PartialEq)]
pub struct Artwork {
    pub fields: Map<String, Value>,
    pub image_url: String,
}

impl Artwork {
    pub fn from_record<R: ArtRecord>(record: &R) -> Result<Self> {
        let fields = match serde_json::to_value(record).context("Failed to flatten record")? {
            Value::Object(map) => map,
            other => anyhow::bail!("record serialized to {} instead of an object", other),
        };
        Ok(Self {
            fields,
            image_url: record.image_url().to_string(),
        })
    }

    pub fn render(&self, template: &str) -> Result<String> {
        prompt::render(template, &self.fields)
    }
}

/// Everything a chat session needs to know about one museum.
#[async_trait::async_trait]
pub trait MuseumConfig: Send + Sync {
    fn name(&self) -> &str;

    fn prompts(&self) -> &PromptBundle;

    /// Draw the next usable artwork. Fails once the dataset is exhausted.
    async fn next_artwork(&self) -> Result<Artwork>;
}

/// A museum backed by a shuffled dataset of `R` rows.
pub struct Collection<R> {
    name: String,
    prompts: PromptBundle,
    stream: DatasetStream,
    _record: PhantomData<fn() -> R>,
}

impl<R: ArtRecord> Collection<R> {
    pub fn new(name: impl Into<String>, prompts: PromptBundle, stream: DatasetStream) -> Self {
        Self {
            name: name.into(),
            prompts,
            stream,
            _record: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<R: ArtRecord> MuseumConfig for Collection<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn prompts(&self) -> &PromptBundle {
        &self.prompts
    }

    async fn next_artwork(&self) -> Result<Artwork> {
        let row = self.stream.next_matching(R::is_usable).await?;
        let record: R = serde_json::from_value(Value::Object(row))
            .with_context(|| format!("row from {} does not match the {} schema", self.stream.name(), self.name))?;
        let artwork = Artwork::from_record(&record)?;
        debug!(museum = %self.name, image = %artwork.image_url, "artwork drawn");
        Ok(artwork)
    }
}

/// The museums this server knows how to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuseumKind {
    Moma,
    Rijks,
}

impl MuseumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MuseumKind::Moma => "moma",
            MuseumKind::Rijks => "rijks",
        }
    }

    pub fn prompts(&self) -> PromptBundle {
        match self {
            MuseumKind::Moma => moma::PROMPTS,
            MuseumKind::Rijks => rijks::PROMPTS,
        }
    }

    /// Wrap `stream` in the collection type matching this museum's schema.
    pub fn collection(&self, stream: DatasetStream) -> Arc<dyn MuseumConfig> {
        match self {
            MuseumKind::Moma => Arc::new(Collection::<moma::MomaRecord>::new(
                self.as_str(),
                self.prompts(),
                stream,
            )),
            MuseumKind::Rijks => Arc::new(Collection::<rijks::RijksRecord>::new(
                self.as_str(),
                self.prompts(),
                stream,
            )),
        }
    }
}

impl fmt::Display for MuseumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MuseumKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moma" => Ok(MuseumKind::Moma),
            "rijks" | "rijksmuseum" => Ok(MuseumKind::Rijks),
            other => anyhow::bail!("unknown museum '{}' (expected moma or rijks)", other),
        }
    }
}

const ROWS_TIMEOUT_SECS: u64 = 30;

/// Open the row source described by one `[[docent.museums]]` entry.
///
/// A local `csv_path` wins over a hub `dataset`.
pub fn open_source(
    source: &MuseumSourceConfig,
    config: &Config,
) -> Result<Box<dyn RowSource>> {
    let docent = config.docent();
    let page_size = docent.page_size.unwrap_or(MAX_PAGE_SIZE);

    if let Some(path) = &source.csv_path {
        return Ok(Box::new(CsvRowsSource::open(path, page_size)?));
    }

    let Some(dataset) = &source.dataset else {
        anyhow::bail!("museum '{}' has neither dataset nor csv_path", source.name);
    };

    let hub = config.hub();
    let token = hub.token_env.as_deref().and_then(|var| std::env::var(var).ok());
    let endpoint = hub
        .rows_endpoint
        .unwrap_or_else(|| DEFAULT_ROWS_ENDPOINT.to_string());
    let mut rows = HubRowsSource::new(endpoint, dataset, ROWS_TIMEOUT_SECS)?
        .with_page_size(page_size)
        .with_token(token);
    if let Some(cfg) = &source.config {
        rows = rows.with_config(cfg);
    }
    if let Some(split) = &source.split {
        rows = rows.with_split(split);
    }
    Ok(Box::new(rows))
}

/// Configured museums, by name.
pub struct MuseumRegistry {
    museums: BTreeMap<String, Arc<dyn MuseumConfig>>,
    default: String,
}

impl MuseumRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            museums: BTreeMap::new(),
            default: default.into(),
        }
    }

    pub fn insert(&mut self, museum: Arc<dyn MuseumConfig>) {
        self.museums.insert(museum.name().to_string(), museum);
    }

    /// Build every museum listed under `[docent]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let docent = config.docent();
        if docent.museums.is_empty() {
            anyhow::bail!("no museums configured under [[docent.museums]]");
        }

        let default: MuseumKind = docent
            .default_museum
            .as_deref()
            .unwrap_or(&docent.museums[0].name)
            .parse()?;
        let mut registry = Self::new(default.as_str());

        for source in &docent.museums {
            let kind: MuseumKind = source.name.parse()?;
            let rows = open_source(source, config)
                .with_context(|| format!("Failed to open dataset for museum '{}'", kind))?;
            info!(museum = %kind, source = %rows.describe(), "museum registered");
            registry.insert(kind.collection(DatasetStream::new(rows)));
        }

        if !registry.museums.contains_key(&registry.default) {
            anyhow::bail!("default museum '{}' is not configured", registry.default);
        }
        Ok(registry)
    }

    /// Look up `name`, or the default museum when `None`.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn MuseumConfig>> {
        let key = match name {
            Some(n) => match n.parse::<MuseumKind>() {
                Ok(kind) => kind.as_str().to_string(),
                Err(_) => n.trim().to_ascii_lowercase(),
            },
            None => self.default.clone(),
        };
        self.museums
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("museum '{}' is not configured", key))
    }

    pub fn names(&self) -> Vec<String> {
        self.museums.keys().cloned().collect()
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DocentConfig;

    #[test]
    fn museum_kind_parses_names() {
        assert_eq!("MoMA".parse::<MuseumKind>().unwrap(), MuseumKind::Moma);
        assert_eq!(" rijksmuseum ".parse::<MuseumKind>().unwrap(), MuseumKind::Rijks);
        assert!("louvre".parse::<MuseumKind>().is_err());
        assert_eq!(MuseumKind::Rijks.to_string(), "rijks");
    }

    #[test]
    fn registry_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("rijks.csv");
        std::fs::write(
            &csv,
            "original_id,image_url,title,description,artist_uri,artist_name\n",
        )
        .unwrap();

        let config = Config {
            docent: Some(DocentConfig {
                default_museum: Some("rijks".to_string()),
                museums: vec![MuseumSourceConfig {
                    name: "rijks".to_string(),
                    dataset: None,
                    csv_path: Some(csv.display().to_string()),
                    config: None,
                    split: None,
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        let registry = MuseumRegistry::from_config(&config).unwrap();
        assert_eq!(registry.get(None).unwrap().name(), "rijks");
        assert_eq!(registry.get(Some("Rijks")).unwrap().name(), "rijks");
        assert!(registry.get(Some("moma")).is_err());
        assert_eq!(registry.names(), vec!["rijks".to_string()]);
    }
}
