/*
harvest - OAI-PMH ingestion job
Harvests an OAI-PMH endpoint into a public-domain CSV dataset and publishes it to the Hub.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use docent::processing::{HarvestJob, HarvestProgress, HarvestReport, PUBLIC_DOMAIN_MARK};
use docent::publish::{HubPublisher, DEFAULT_HUB_ENDPOINT};

#[derive(Parser, Debug)]
#[command(name = "harvest", about = "Harvest an OAI-PMH endpoint into a public-domain CSV dataset")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// OAI-PMH base URL (overrides [harvest].endpoint)
    #[arg(long)]
    endpoint: Option<String>,

    /// metadataPrefix for the initial ListRecords request
    #[arg(long)]
    metadata_prefix: Option<String>,

    /// CSV artifact path (overrides [harvest].output)
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Target dataset on the Hub, e.g. "someone/rijksmuseum-oai"
    #[arg(long)]
    repo_id: Option<String>,

    /// Only write the CSV, skip the upload
    #[arg(long)]
    no_publish: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Progress bar over `completeListSize`, or a spinner when the server does not declare one.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        bar.set_message("requesting first page");
        Self { bar }
    }

    /// Stop drawing without a final frame, so error logs stay readable.
    fn abandon(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl HarvestProgress for CliProgress {
    fn started(&self, declared_total: Option<u64>) {
        if let Some(total) = declared_total {
            self.bar.set_length(total);
            self.bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} records ({percent}%) eta {eta} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
        }
    }

    fn page_done(&self, records_seen: u64, records_kept: u64) {
        self.bar.set_position(records_seen);
        self.bar.set_message(format!("{} kept", records_kept));
    }

    fn finished(&self, _report: &HarvestReport) {
        self.bar.finish_and_clear();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if let Err(e) = run(args).await {
        error!("harvest failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let default_path = PathBuf::from("config.default.toml");
    let override_path = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from("config.toml")).filter(|p| p.exists()));
    if let Some(p) = &args.config {
        if !p.exists() {
            anyhow::bail!("Config file not found: {}", p.display());
        }
    }
    let config = Config::load_with_defaults(Some(&default_path), override_path.as_deref())
        .await
        .context("failed to load configuration")?;

    let harvest = config.harvest();
    let hub = config.hub();

    let endpoint = match args.endpoint {
        Some(e) => e,
        None => config.oai_endpoint()?.to_string(),
    };
    let output = args
        .output
        .or_else(|| harvest.output.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data/rijksmuseum-oai.csv"));

    let mut job = HarvestJob::new(endpoint, &output);
    if let Some(prefix) = args.metadata_prefix.or(harvest.metadata_prefix) {
        job.metadata_prefix = prefix;
    }
    job.license_marker = harvest
        .license_marker
        .unwrap_or_else(|| PUBLIC_DOMAIN_MARK.to_string());
    job.timeout_secs = harvest.fetch_timeout_seconds.unwrap_or(60);

    info!(
        endpoint = %job.endpoint,
        prefix = %job.metadata_prefix,
        output = %job.output.display(),
        "harvest configured"
    );

    let progress = CliProgress::new();

    if args.no_publish {
        let report = job.run(&progress).await.inspect_err(|_| progress.abandon())?;
        info!(
            rows = report.records_kept,
            path = %report.output.display(),
            "CSV written, publishing skipped"
        );
        return Ok(());
    }

    // Resolve publishing settings before spending time on the harvest.
    let repo_id = args
        .repo_id
        .or(hub.repo_id)
        .context("no --repo-id given and [hub].repo_id not set (use --no-publish to skip upload)")?;
    let token_env = hub.token_env.unwrap_or_else(|| "HF_TOKEN".to_string());
    let token = std::env::var(&token_env)
        .with_context(|| format!("Hub token env var '{}' not set", token_env))?;

    let mut publisher = HubPublisher::new(
        hub.endpoint.unwrap_or_else(|| DEFAULT_HUB_ENDPOINT.to_string()),
        token,
    )?;
    if let Some(path) = hub.path_in_repo {
        publisher = publisher.with_path_in_repo(path);
    }

    let (report, receipt) = job
        .run_and_publish(&publisher, &repo_id, &progress)
        .await
        .inspect_err(|_| progress.abandon())?;
    info!(
        repo = %receipt.repo_id,
        file = %receipt.path_in_repo,
        rows = receipt.rows,
        lfs = receipt.via_lfs,
        commit = receipt.commit_url.as_deref().unwrap_or("-"),
        seen = report.records_seen,
        "dataset published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandon_stops_the_spinner() {
        let progress = CliProgress::new();
        progress.started(Some(10));
        progress.page_done(4, 2);

        progress.abandon();
        assert!(progress.bar.is_finished());

        // a second stop after a successful finish is harmless
        progress.abandon();
        assert!(progress.bar.is_finished());
    }
}
