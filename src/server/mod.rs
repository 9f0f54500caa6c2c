//! HTTP front-end
//!
//! JSON API for conversion and key management plus a single embedded page.
//!
//! | Route | Method |
//! |-------|--------|
//! | `/` | GET |
//! | `/health`, `/status` | GET |
//! | `/upload` | POST (multipart) |
//! | `/download/:filename` | GET |
//! | `/extract-activation-bytes` | POST |
//! | `/test-activation-bytes` | POST |
//! | `/save-activation-bytes` | POST |
//! | `/load-activation-bytes` | GET |

pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};

use crate::audio::pipeline::ConversionPipeline;
use crate::config::ConverterConfig;
use crate::crypto::aax::KeyValidator;
use crate::discovery::{KeyDiscovery, ProvidedKey};
use crate::error::{ConverterError, Result};
use crate::storage::KeyStore;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Builds the strategy chain for one extraction request from the key the
/// client supplied, if any
pub type DiscoveryFactory = Arc<dyn Fn(Option<String>) -> KeyDiscovery + Send + Sync>;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConverterConfig>,
    pub pipeline: Arc<ConversionPipeline>,
    pub validator: KeyValidator,
    pub key_store: KeyStore,
    pub discovery: DiscoveryFactory,
}

impl AppState {
    pub fn new(config: ConverterConfig) -> Self {
        let config = Arc::new(config);
        let factory_config = config.clone();
        let discovery: DiscoveryFactory =
            Arc::new(move |key| factory_config.key_discovery(Arc::new(ProvidedKey(key))));

        Self {
            pipeline: Arc::new(config.pipeline()),
            validator: config.validator(),
            key_store: config.key_store(),
            discovery,
            config,
        }
    }

    /// Replace the strategy chain
    pub fn with_discovery(mut self, discovery: DiscoveryFactory) -> Self {
        self.discovery = discovery;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/upload", post(handlers::upload))
        .route("/download/:filename", get(handlers::download))
        .route("/extract-activation-bytes", post(handlers::extract_activation_bytes))
        .route("/test-activation-bytes", post(handlers::test_activation_bytes))
        .route("/save-activation-bytes", post(handlers::save_activation_bytes))
        .route("/load-activation-bytes", get(handlers::load_activation_bytes))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: ConverterConfig) -> Result<()> {
    let bind = config.bind.clone();
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let app = build_router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| ConverterError::Config(format!("Failed to bind to {}: {}", bind, e)))?;
    info!("listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
