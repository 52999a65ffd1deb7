use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::fs::FileServer;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{get, routes, Build, Rocket, State};
use serde::Serialize;

use common::Config;

use crate::images::ImageLoader;
use crate::llm::LlmProvider;
use crate::museums::MuseumRegistry;

pub const DEFAULT_STATIC_DIR: &str = "docent/static";

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub museums: Arc<MuseumRegistry>,
    pub llm_provider: Arc<dyn LlmProvider>,
    pub images: ImageLoader,
    pub temperature: Option<f32>,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    model: String,
    museums: Vec<String>,
    default_museum: String,
}

/// Redirect root to static index.html
#[get("/")]
async fn index_redirect() -> Redirect {
    Redirect::to("/static/index.html")
}

#[get("/health")]
async fn health() -> &'static str {
    "ok"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        model: state.llm_provider.model().to_string(),
        museums: state.museums.names(),
        default_museum: state.museums.default_name().to_string(),
    })
}

/// Build the Rocket instance: routes, WebSocket endpoint, static files.
///
/// `[server].bind` and `[server].port` override Rocket's own configuration.
pub fn build_rocket(state: AppState) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    let server = state.config.server.clone().unwrap_or_default();
    if let Some(bind) = &server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = server.port {
        fig = fig.merge(("port", port));
    }
    let static_dir = server
        .static_dir
        .unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string());

    let mut rocket = rocket::custom(fig)
        .manage(state)
        .mount("/", routes![index_redirect, health, status])
        .mount("/ws", routes![crate::sessions::websocket::chat_websocket]);

    if std::path::Path::new(&static_dir).is_dir() {
        rocket = rocket.mount("/static", FileServer::from(static_dir));
    } else {
        tracing::warn!(dir = %static_dir, "static directory not found; chat page disabled");
    }
    rocket
}

/// Build and launch a Rocket server.
///
/// This function blocks until the Rocket server shuts down (it awaits `rocket.launch().await`)
/// and returns an error if Rocket fails to start.
pub async fn launch_rocket(state: AppState) -> Result<()> {
    let rocket = build_rocket(state);

    // Launch Rocket - this will run until shutdown (SIGINT/SIGTERM etc.)
    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
