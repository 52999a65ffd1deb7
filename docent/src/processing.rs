use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::extraction::RawHarvestRecord;
use crate::ingestion::{OaiClient, OaiPages};
use crate::publish::{DatasetPublisher, PublishReceipt};
use crate::storage::CsvSink;

/// Rights URI of the Creative Commons Public Domain Mark 1.0.
pub const PUBLIC_DOMAIN_MARK: &str = "http://creativecommons.org/publicdomain/mark/1.0/";

/// Exact containment test, no normalization.
pub fn has_license(record: &RawHarvestRecord, marker: &str) -> bool {
    record.rights.iter().any(|r| r == marker)
}

pub fn is_public_domain(record: &RawHarvestRecord) -> bool {
    has_license(record, PUBLIC_DOMAIN_MARK)
}

/// Receives progress updates while a harvest runs.
pub trait HarvestProgress: Send + Sync {
    /// Called once, after the first page, with the server-declared size.
    fn started(&self, _declared_total: Option<u64>) {}
    fn page_done(&self, _records_seen: u64, _records_kept: u64) {}
    fn finished(&self, _report: &HarvestReport) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl HarvestProgress for NoProgress {}

/// Summary of a completed harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    pub pages: usize,
    pub records_seen: u64,
    pub records_kept: u64,
    pub declared_total: Option<u64>,
    pub output: PathBuf,
}

impl HarvestReport {
    pub fn records_dropped(&self) -> u64 {
        self.records_seen - self.records_kept
    }
}

/// Drain `pages` into `sink`, keeping only records that carry `license_marker`.
///
/// Fully sequential: one page is fetched, filtered and written before the
/// next request goes out. Any fetch, parse or write error aborts the run.
pub async fn harvest_to_csv(
    pages: &mut OaiPages,
    sink: &mut CsvSink,
    license_marker: &str,
    progress: &dyn HarvestProgress,
) -> Result<HarvestReport> {
    let mut records_kept = 0u64;
    let mut announced = false;

    while let Some(page) = pages.next_page().await? {
        if !announced {
            progress.started(pages.declared_total());
            announced = true;
        }

        let on_page = page.records.len();
        let kept: Vec<RawHarvestRecord> = page
            .records
            .into_iter()
            .filter(|r| has_license(r, license_marker))
            .collect();

        sink.append(&kept)?;
        records_kept += kept.len() as u64;

        debug!(
            page = pages.requests(),
            on_page,
            kept = kept.len(),
            "page processed"
        );
        progress.page_done(pages.records_seen(), records_kept);
    }

    let report = HarvestReport {
        pages: pages.requests(),
        records_seen: pages.records_seen(),
        records_kept,
        declared_total: pages.declared_total(),
        output: sink.path().to_path_buf(),
    };
    progress.finished(&report);

    info!(
        pages = report.pages,
        seen = report.records_seen,
        kept = report.records_kept,
        dropped = report.records_dropped(),
        "harvest complete"
    );
    Ok(report)
}

/// One end-to-end harvest: endpoint → filtered CSV artifact (→ registry).
#[derive(Debug, Clone)]
pub struct HarvestJob {
    pub endpoint: String,
    pub metadata_prefix: String,
    pub output: PathBuf,
    pub license_marker: String,
    pub timeout_secs: u64,
}

impl HarvestJob {
    pub fn new(endpoint: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            endpoint: endpoint.into(),
            metadata_prefix: "edm".to_string(),
            output: output.as_ref().to_path_buf(),
            license_marker: PUBLIC_DOMAIN_MARK.to_string(),
            timeout_secs: 60,
        }
    }

    /// Harvest into the CSV artifact.
    pub async fn run(&self, progress: &dyn HarvestProgress) -> Result<HarvestReport> {
        info!(endpoint = %self.endpoint, prefix = %self.metadata_prefix, "starting harvest");
        let client = OaiClient::new(&self.endpoint, self.timeout_secs)?;
        let mut pages = OaiPages::new(client, &self.metadata_prefix);
        let mut sink = CsvSink::create(&self.output)?;

        harvest_to_csv(&mut pages, &mut sink, &self.license_marker, progress).await
    }

    /// Harvest, then hand the finished artifact to `publisher`.
    pub async fn run_and_publish(
        &self,
        publisher: &dyn DatasetPublisher,
        repo_id: &str,
        progress: &dyn HarvestProgress,
    ) -> Result<(HarvestReport, PublishReceipt)> {
        let report = self.run(progress).await?;
        let receipt = publisher
            .publish(&report.output, repo_id)
            .await
            .with_context(|| format!("failed to publish {} to {}", report.output.display(), repo_id))?;
        Ok((report, receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_rights(rights: &[&str]) -> RawHarvestRecord {
        RawHarvestRecord {
            rights: rights.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn public_domain_requires_exact_marker() {
        assert!(is_public_domain(&with_rights(&[PUBLIC_DOMAIN_MARK])));
        assert!(is_public_domain(&with_rights(&[
            "http://rightsstatements.org/vocab/InC/1.0/",
            PUBLIC_DOMAIN_MARK,
        ])));

        assert!(!is_public_domain(&with_rights(&[])));
        assert!(!is_public_domain(&with_rights(&[
            "https://creativecommons.org/publicdomain/mark/1.0/"
        ])));
        assert!(!is_public_domain(&with_rights(&[
            "http://creativecommons.org/publicdomain/mark/1.0"
        ])));
        assert!(!is_public_domain(&with_rights(&[
            "HTTP://CREATIVECOMMONS.ORG/PUBLICDOMAIN/MARK/1.0/"
        ])));
        assert!(!is_public_domain(&with_rights(&[
            "http://creativecommons.org/publicdomain/zero/1.0/"
        ])));
    }
}
