/// ytclip API Server
///
/// HTTP front end for the download pipeline: accepts download requests,
/// exposes per-job progress for polling, and serves finished artifacts.
mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use ytclip_shared::config::{FETCH_TIMEOUT, TRIM_TIMEOUT};
use ytclip_shared::progress_store::DEFAULT_EVICTION_GRACE;
use ytclip_shared::{Capabilities, Orchestrator, PipelineConfig, ProgressStore, YtclipError, YtclipResult};

/// Shared application state for all API handlers.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub public_dir: PathBuf,
}

impl AppState {
    pub fn new(config: PipelineConfig, public_dir: PathBuf) -> Self {
        let capabilities = Capabilities::detect(&config);
        Self {
            orchestrator: Orchestrator::new(config, ProgressStore::new(), capabilities),
            public_dir,
        }
    }

    pub fn download_dir(&self) -> &std::path::Path {
        &self.orchestrator.config().download_dir
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Pipeline settings from the environment, with defaults for everything.
fn pipeline_config_from_env() -> PipelineConfig {
    PipelineConfig {
        download_dir: PathBuf::from(env_or("DOWNLOAD_DIR", "./downloads")),
        fetch_bin: PathBuf::from(env_or("YTDLP_PATH", "yt-dlp")),
        trim_bin: PathBuf::from(env_or("FFMPEG_PATH", "./ffmpeg")),
        fetch_timeout: env_secs("FETCH_TIMEOUT_SECS", FETCH_TIMEOUT),
        trim_timeout: env_secs("TRIM_TIMEOUT_SECS", TRIM_TIMEOUT),
        eviction_grace: env_secs("PROGRESS_TTL_SECS", DEFAULT_EVICTION_GRACE),
    }
}

fn prepare_download_dir(config: &PipelineConfig) -> YtclipResult<()> {
    let dir = &config.download_dir;
    if dir.exists() && !dir.is_dir() {
        return Err(YtclipError::Config(format!(
            "DOWNLOAD_DIR {} exists but is not a directory",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Build the router with every route and layer attached.
pub fn build_router(state: Arc<AppState>) -> Router {
    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_files = ServeDir::new(&state.public_dir);

    Router::new()
        .route("/api/test", get(routes::capability_probe))
        .route("/api/progress/:id", get(routes::get_progress))
        .route("/api/video-info", post(routes::video_info))
        .route("/api/download", post(routes::submit_download))
        .route("/downloads/:filename", get(routes::serve_artifact))
        .fallback_service(static_files)
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ytclip_api=info,ytclip_shared=info,tower_http=info".into()),
        )
        .init();

    // Config
    let config = pipeline_config_from_env();
    prepare_download_dir(&config)?;
    let public_dir = PathBuf::from(env_or("PUBLIC_DIR", "./public"));
    let api_host = env_or("API_HOST", "0.0.0.0");
    let api_port: u16 = env_or("PORT", "3000").parse().unwrap_or(3000);

    info!("Download directory: {}", config.download_dir.display());
    info!("Fetch tool: {}", config.fetch_bin.display());
    info!("Checking ffmpeg at: {}", config.trim_bin.display());

    // App state
    let state = Arc::new(AppState::new(config, public_dir));
    info!(
        "Timestamp trimming {}",
        if state.orchestrator.capabilities().trim_available { "enabled" } else { "disabled" }
    );

    let app = build_router(state);

    // Bind
    let addr = format!("{}:{}", api_host, api_port);
    info!("ytclip API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_secs_falls_back_on_garbage() {
        std::env::set_var("YTCLIP_TEST_TIMEOUT_GARBAGE", "soon");
        assert_eq!(
            env_secs("YTCLIP_TEST_TIMEOUT_GARBAGE", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
        std::env::set_var("YTCLIP_TEST_TIMEOUT_OK", " 45 ");
        assert_eq!(
            env_secs("YTCLIP_TEST_TIMEOUT_OK", Duration::from_secs(7)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_prepare_download_dir_creates_nested() {
        let root = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            download_dir: root.path().join("a").join("b"),
            ..Default::default()
        };
        prepare_download_dir(&config).unwrap();
        assert!(config.download_dir.is_dir());
    }

    #[test]
    fn test_prepare_download_dir_rejects_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("downloads");
        std::fs::write(&file, b"not a dir").unwrap();
        let config = PipelineConfig {
            download_dir: file,
            ..Default::default()
        };
        let err = prepare_download_dir(&config).unwrap_err();
        assert!(matches!(err, YtclipError::Config(_)), "{:?}", err);
    }
}
