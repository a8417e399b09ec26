pub mod handlers;
mod types;

pub use types::{ErrorResponse, StatusResponse};

use crate::{Result, config::Config, prediction::Predictor};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Upper bound on an uploaded prediction form.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn router(predictor: Arc<Predictor>) -> Router {
    let app_state = handlers::AppState { predictor };

    Router::new()
        .route("/", get(handlers::status))
        .route("/api/predict", post(handlers::predict))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn run(config: Config) -> Result<()> {
    // Load models once; every request shares them read-only
    let predictor = Predictor::load(&config)?;
    info!(
        "Models loaded (input {}x{}, target layer '{}')",
        config.model.image_size, config.model.image_size, config.model.target_layer
    );

    let app = router(Arc::new(predictor));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
