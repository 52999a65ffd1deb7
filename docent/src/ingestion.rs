use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::extraction::{self, ParsedPage};

/// User-Agent string for harvest requests.
pub const USER_AGENT: &str = concat!("ArtDocent/", env!("CARGO_PKG_VERSION"));

/// OAI-PMH verb used for every harvest request.
const LIST_RECORDS: &str = "ListRecords";

/// Thin HTTP client for one OAI-PMH endpoint.
#[derive(Clone)]
pub struct OaiClient {
    client: Client,
    base_url: String,
}

impl OaiClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// First page of a harvest: `verb=ListRecords&metadataPrefix=<prefix>`.
    pub async fn list_records(&self, metadata_prefix: &str) -> Result<ParsedPage> {
        self.fetch(&PageRequest::Initial {
            metadata_prefix: metadata_prefix.to_string(),
        })
        .await
    }

    /// Follow-up page: `verb=ListRecords&resumptionToken=<token>`.
    pub async fn resume(&self, token: &str) -> Result<ParsedPage> {
        self.fetch(&PageRequest::Resume {
            token: token.to_string(),
        })
        .await
    }

    /// Fetches one page and parses it. No retry: any failure is returned as-is.
    pub async fn fetch(&self, request: &PageRequest) -> Result<ParsedPage> {
        let params = request.query();
        debug!(url = %self.base_url, ?params, "fetching OAI-PMH page");

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .context("failed to fetch OAI-PMH page")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("OAI-PMH fetch failed with status: {}", status);
        }

        let bytes = response.bytes().await.context("failed to read response body")?;
        extraction::parse_page(bytes.as_ref())
    }
}

/// Query for one ListRecords page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page: selects the metadata format.
    Initial { metadata_prefix: String },
    /// Follow-up page: the token replaces every other argument.
    Resume { token: String },
}

impl PageRequest {
    fn query(&self) -> Vec<(&'static str, &str)> {
        match self {
            PageRequest::Initial { metadata_prefix } => {
                vec![("verb", LIST_RECORDS), ("metadataPrefix", metadata_prefix.as_str())]
            }
            PageRequest::Resume { token } => {
                vec![("verb", LIST_RECORDS), ("resumptionToken", token.as_str())]
            }
        }
    }
}

/// Walks a ListRecords result set by following resumption tokens.
///
/// Each call to [`OaiPages::next_page`] issues exactly one request; the walk
/// ends after the first page that carries no (or an empty) token.
pub struct OaiPages {
    client: OaiClient,
    next: Option<PageRequest>,
    requests: usize,
    records_seen: u64,
    declared_total: Option<u64>,
}

impl OaiPages {
    pub fn new(client: OaiClient, metadata_prefix: impl Into<String>) -> Self {
        Self {
            client,
            next: Some(PageRequest::Initial {
                metadata_prefix: metadata_prefix.into(),
            }),
            requests: 0,
            records_seen: 0,
            declared_total: None,
        }
    }

    /// Fetch the next page, or `None` once the result set is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<ParsedPage>> {
        let Some(request) = self.next.take() else {
            return Ok(None);
        };

        let page = match &request {
            PageRequest::Initial { metadata_prefix } => {
                self.client.list_records(metadata_prefix).await
            }
            PageRequest::Resume { token } => self.client.resume(token).await,
        }
        .with_context(|| format!("page {} of {}", self.requests + 1, self.client.base_url()))?;
        self.requests += 1;

        if let Some(error) = &page.error {
            if error.code == "noRecordsMatch" {
                info!("OAI-PMH endpoint reported no matching records");
                return Ok(Some(page));
            }
            anyhow::bail!("OAI-PMH error {}: {}", error.code, error.message);
        }

        if self.declared_total.is_none() {
            self.declared_total = page.complete_list_size;
        }
        self.records_seen += page.records.len() as u64;
        self.next = page
            .resumption_token
            .clone()
            .map(|token| PageRequest::Resume { token });

        Ok(Some(page))
    }

    /// Number of HTTP requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Records parsed so far, before license filtering. Never decreases.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// `completeListSize` declared by the server, once known.
    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}
