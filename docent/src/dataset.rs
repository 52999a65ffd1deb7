use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ingestion::USER_AGENT;

pub const DEFAULT_ROWS_ENDPOINT: &str = "https://datasets-server.huggingface.co";

/// Upper bound the datasets-server accepts for `length`.
pub const MAX_PAGE_SIZE: usize = 100;

/// One dataset row as a JSON object (column name → value).
pub type Row = Map<String, Value>;

/// Returned once a finite dataset has handed out every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetExhausted {
    pub dataset: String,
    pub rows_served: u64,
}

impl fmt::Display for DatasetExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dataset {} is exhausted after {} rows",
            self.dataset, self.rows_served
        )
    }
}

impl std::error::Error for DatasetExhausted {}

/// A pull-based supplier of dataset rows, one page at a time.
#[async_trait::async_trait]
pub trait RowSource: Send {
    /// Next page of rows, or `None` when the source has nothing left.
    async fn next_page(&mut self) -> Result<Option<Vec<Row>>>;

    /// Human readable name for logs and errors.
    fn describe(&self) -> String;
}

/// Rows served by the Hugging Face datasets-server `/rows` API.
///
/// The first request (offset 0) learns the dataset size; the remaining page
/// offsets are then visited in random order.
pub struct HubRowsSource {
    client: reqwest::Client,
    endpoint: String,
    dataset: String,
    config: String,
    split: String,
    page_size: usize,
    token: Option<String>,
    pending_offsets: Option<Vec<u64>>,
    rng: StdRng,
}

impl HubRowsSource {
    pub fn new(
        endpoint: impl Into<String>,
        dataset: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build datasets-server client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            dataset: dataset.into(),
            config: "default".to_string(),
            split: "train".to_string(),
            page_size: MAX_PAGE_SIZE,
            token: None,
            pending_offsets: None,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    /// Clamped to `1..=MAX_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Bearer token for gated or private datasets.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    async fn fetch(&self, offset: u64) -> Result<RowsResponse> {
        let url = format!("{}/rows", self.endpoint);
        let offset_param = offset.to_string();
        let length_param = self.page_size.to_string();
        let mut request = self.client.get(&url).query(&[
            ("dataset", self.dataset.as_str()),
            ("config", self.config.as_str()),
            ("split", self.split.as_str()),
            ("offset", offset_param.as_str()),
            ("length", length_param.as_str()),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("rows request failed for {} at offset {}", self.dataset, offset))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("datasets-server error {} for {}: {}", status, self.dataset, body);
        }

        response
            .json::<RowsResponse>()
            .await
            .with_context(|| format!("invalid rows response for {}", self.dataset))
    }
}

#[async_trait::async_trait]
impl RowSource for HubRowsSource {
    async fn next_page(&mut self) -> Result<Option<Vec<Row>>> {
        let offset = match self.pending_offsets.as_mut() {
            None => 0,
            Some(pending) => match pending.pop() {
                Some(offset) => offset,
                None => return Ok(None),
            },
        };

        let page = self.fetch(offset).await?;

        if self.pending_offsets.is_none() {
            let step = self.page_size as u64;
            let mut offsets: Vec<u64> = (1..)
                .map(|i| i * step)
                .take_while(|o| *o < page.num_rows_total)
                .collect();
            offsets.shuffle(&mut self.rng);
            info!(
                dataset = %self.dataset,
                total = page.num_rows_total,
                pages = offsets.len() + 1,
                "streaming dataset"
            );
            self.pending_offsets = Some(offsets);
        }

        debug!(dataset = %self.dataset, offset, rows = page.rows.len(), "rows page fetched");
        Ok(Some(page.rows.into_iter().map(|r| r.row).collect()))
    }

    fn describe(&self) -> String {
        format!("{} ({}/{})", self.dataset, self.config, self.split)
    }
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: u64,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: Row,
}

/// Rows read from a local CSV artifact (as written by the harvest job).
///
/// Every cell is a string; empty cells become `null` so the usual
/// "no missing fields" filter applies unchanged.
pub struct CsvRowsSource {
    path: PathBuf,
    rows: Vec<Row>,
    page_size: usize,
}

impl CsvRowsSource {
    /// Read and shuffle the whole file.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        Self::open_with_rng(path, page_size, &mut StdRng::from_entropy())
    }

    pub fn open_with_rng(path: impl AsRef<Path>, page_size: usize, rng: &mut StdRng) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("Failed to open dataset CSV: {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
            .clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
            let row: Row = headers
                .iter()
                .zip(record.iter())
                .map(|(name, cell)| {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    };
                    (name.to_string(), value)
                })
                .collect();
            rows.push(row);
        }
        rows.shuffle(rng);

        info!(path = %path.display(), rows = rows.len(), "loaded dataset CSV");
        Ok(Self {
            path,
            rows,
            page_size: page_size.max(1),
        })
    }
}

#[async_trait::async_trait]
impl RowSource for CsvRowsSource {
    async fn next_page(&mut self) -> Result<Option<Vec<Row>>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        let take = self.page_size.min(self.rows.len());
        let start = self.rows.len() - take;
        Ok(Some(self.rows.split_off(start)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct StreamState {
    source: Box<dyn RowSource>,
    buffer: Vec<Row>,
    source_done: bool,
    rng: StdRng,
    rows_served: u64,
}

/// Shuffled, shared view over a [`RowSource`].
///
/// Rows are pulled into a buffer of at least `buffer_size` rows (while the
/// source lasts) and handed out in random order. All sessions share one
/// stream; pulls are serialized by the inner mutex.
pub struct DatasetStream {
    name: String,
    buffer_size: usize,
    state: Mutex<StreamState>,
}

impl DatasetStream {
    pub fn new(source: Box<dyn RowSource>) -> Self {
        Self {
            name: source.describe(),
            buffer_size: 2 * MAX_PAGE_SIZE,
            state: Mutex::new(StreamState {
                source,
                buffer: Vec::new(),
                source_done: false,
                rng: StdRng::from_entropy(),
                rows_served: 0,
            }),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        let mut state = self.state.into_inner();
        state.rng = StdRng::seed_from_u64(seed);
        Self {
            name: self.name,
            buffer_size: self.buffer_size,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next random row, whatever its content.
    pub async fn next_row(&self) -> Result<Row> {
        self.next_matching(|_| true).await
    }

    /// Next random row accepted by `keep`. Rejected rows are discarded.
    ///
    /// Fails with [`DatasetExhausted`] once the source and buffer run dry.
    pub async fn next_matching<F>(&self, keep: F) -> Result<Row>
    where
        F: Fn(&Row) -> bool + Send,
    {
        let mut state = self.state.lock().await;
        let mut skipped = 0u64;

        loop {
            while !state.source_done && state.buffer.len() < self.buffer_size {
                match state.source.next_page().await? {
                    Some(page) => state.buffer.extend(page),
                    None => state.source_done = true,
                }
            }

            if state.buffer.is_empty() {
                return Err(DatasetExhausted {
                    dataset: self.name.clone(),
                    rows_served: state.rows_served,
                }
                .into());
            }

            let len = state.buffer.len();
            let idx = state.rng.gen_range(0..len);
            let row = state.buffer.swap_remove(idx);

            if keep(&row) {
                state.rows_served += 1;
                if skipped > 0 {
                    debug!(dataset = %self.name, skipped, "rows rejected by filter");
                }
                return Ok(row);
            }
            skipped += 1;
        }
    }
}
