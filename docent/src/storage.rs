use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::extraction::RawHarvestRecord;

/// Append-only CSV artifact written one page at a time.
///
/// The header is written and flushed by `create`, before any page is
/// fetched, and never again. Every batch is flushed before `append` returns,
/// so an interrupted run leaves a header plus whole rows on disk.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: u64,
}

impl CsvSink {
    /// Create (or truncate) the artifact at `path`, creating parent directories,
    /// and write the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }

        let file = File::create(&path)
            .with_context(|| format!("Failed to create CSV artifact: {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(RawHarvestRecord::COLUMNS)
            .context("failed to write CSV header")?;
        writer.flush().context("failed to flush CSV header")?;

        info!(path = %path.display(), "writing CSV artifact");
        Ok(Self {
            path,
            writer,
            rows_written: 0,
        })
    }

    /// Append one page worth of records. Returns the number of rows written.
    pub fn append(&mut self, records: &[RawHarvestRecord]) -> Result<usize> {
        for record in records {
            self.writer
                .serialize(record)
                .with_context(|| format!("failed to write row {:?}", record.original_id))?;
        }
        self.writer.flush().context("failed to flush CSV artifact")?;

        self.rows_written += records.len() as u64;
        debug!(batch = records.len(), total = self.rows_written, "appended rows");
        Ok(records.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}
