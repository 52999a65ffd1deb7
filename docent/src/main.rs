/*
docent - chat server binary
Serves the chat page and one WebSocket docent session per visitor.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use docent::images::ImageLoader;
use docent::llm::gemini::{GeminiProvider, DEFAULT_GEMINI_URL};
use docent::llm::remote::RemoteLlmProvider;
use docent::llm::LlmProvider;
use docent::museums::MuseumRegistry;
use docent::server::{launch_rocket, AppState};

#[derive(Parser, Debug)]
#[command(name = "docent", about = "Art docent chat server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await?;

    let llm_config = config.llm.clone().unwrap_or_default();
    let llm: Arc<dyn LlmProvider> = match create_llm_provider(&llm_config) {
        Ok(provider) => {
            info!("LLM provider initialized: {}", provider.model());
            Arc::from(provider)
        }
        Err(e) => {
            error!("Failed to initialize LLM provider: {:#}", e);
            return Err(e);
        }
    };

    let museums = MuseumRegistry::from_config(&config).context("Failed to set up museums")?;
    info!(museums = ?museums.names(), default = %museums.default_name(), "museums ready");

    let images = ImageLoader::new(config.docent().image_timeout_seconds.unwrap_or(30))?;

    let state = AppState {
        started_at: Utc::now(),
        config: Arc::new(config),
        museums: Arc::new(museums),
        llm_provider: llm,
        images,
        temperature: llm_config.temperature,
    };

    // Launch the Rocket server (blocking until Rocket shuts down)
    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(state).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// `config.default.toml` merged with `--config` (or `config.toml` when present).
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            anyhow::bail!("Config file not found: {}", p.display());
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

fn api_key(env_var: Option<&str>, adapter: &str) -> Result<String> {
    let env_var = env_var.with_context(|| format!("Missing api_key_env in [llm.{}] config", adapter))?;
    std::env::var(env_var).with_context(|| format!("LLM API key env var '{}' not set", env_var))
}

/// Create an LLM provider based on configuration
fn create_llm_provider(llm_config: &common::LlmConfig) -> Result<Box<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("gemini");
    match adapter {
        "gemini" => {
            let cfg = llm_config.gemini.clone().unwrap_or_default();
            let key = api_key(cfg.api_key_env.as_deref().or(Some("GEMINI_API_KEY")), adapter)?;
            let provider = GeminiProvider::new(
                cfg.api_url.unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
                key,
                cfg.model.unwrap_or_else(|| "gemini-2.0-flash-001".to_string()),
            )
            .with_defaults(
                cfg.timeout_seconds.unwrap_or(60),
                cfg.max_tokens,
                llm_config.temperature,
            )
            .with_google_search(cfg.google_search.unwrap_or(true));
            Ok(Box::new(provider))
        }
        "remote" => {
            let Some(cfg) = llm_config.remote.clone() else {
                anyhow::bail!("Remote adapter selected but no [llm.remote] config found");
            };
            let key = api_key(cfg.api_key_env.as_deref(), adapter)?;
            let provider = RemoteLlmProvider::new(
                cfg.api_url
                    .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string()),
                key,
                cfg.model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            )
            .with_defaults(
                cfg.timeout_seconds.unwrap_or(60),
                cfg.max_tokens,
                llm_config.temperature,
            )
            .with_web_search(cfg.web_search.unwrap_or(false));
            Ok(Box::new(provider))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}
